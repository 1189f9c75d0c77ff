use std::{collections::BTreeMap, fmt};

use crate::{Result, TrainErr, tree::Params};

/// Extra variable collections merged next to `"params"` when applying a model.
pub type Collections = BTreeMap<String, Params>;

/// A method of a model definition that can be dispatched by `TrainState::apply`.
pub type MethodFn<M> =
    fn(&M, &Variables<'_>, &<M as Module>::Input) -> Result<<M as Module>::Output>;

/// The entry point a `TrainState` stores to evaluate its model.
pub type ApplyFn<M> = fn(
    &M,
    &Variables<'_>,
    &<M as Module>::Input,
    Option<MethodFn<M>>,
) -> Result<<M as Module>::Output>;

/// A stateless model definition.
///
/// A `Module` doesn't own its parameters, every evaluation receives them inside a
/// `Variables` mapping. Any named method that should be reachable by name (see `Method::Named`)
/// must be registered in `method`.
pub trait Module: Sized {
    /// Input type consumed by the model, it carries every positional and keyword input.
    type Input;

    /// Output type produced by the model.
    type Output;

    /// The default entry point of the model.
    ///
    /// # Arguments
    /// * `variables` - The variable collections, at least `"params"`.
    /// * `input` - The model input.
    ///
    /// # Returns
    /// The model output or an error if the variables or input are invalid.
    fn call(&self, variables: &Variables<'_>, input: &Self::Input) -> Result<Self::Output>;

    /// Looks up a method by name.
    ///
    /// # Returns
    /// `None` if the model has no method with that name.
    fn method(&self, _name: &str) -> Option<MethodFn<Self>> {
        None
    }

    /// Evaluates the model with the given method, or with `call` if `method` is `None`.
    fn apply(
        &self,
        variables: &Variables<'_>,
        input: &Self::Input,
        method: Option<MethodFn<Self>>,
    ) -> Result<Self::Output> {
        match method {
            Some(method) => method(self, variables, input),
            None => self.call(variables, input),
        }
    }
}

/// The variable collections a model is evaluated with.
///
/// Collections are borrowed, assembling a `Variables` never copies parameters.
#[derive(Debug, Clone, Default)]
pub struct Variables<'a> {
    collections: BTreeMap<&'a str, &'a Params>,
}

impl<'a> Variables<'a> {
    /// The name of the collection holding the trainable parameters.
    pub const PARAMS: &'static str = "params";

    /// Creates a new `Variables` holding only the `"params"` collection.
    pub fn new(params: &'a Params) -> Self {
        let mut collections = BTreeMap::new();
        collections.insert(Self::PARAMS, params);
        Self { collections }
    }

    /// Merges extra collections into this one. The merge is shallow: a collection with an
    /// already present name replaces the previous one entirely.
    pub fn merge(mut self, extra: &'a Collections) -> Self {
        for (name, collection) in extra {
            self.collections.insert(name.as_str(), collection);
        }
        self
    }

    /// Inserts a single collection, returning the one it replaced.
    pub fn insert(&mut self, name: &'a str, collection: &'a Params) -> Option<&'a Params> {
        self.collections.insert(name, collection)
    }

    /// Returns the collection with the given name, if present.
    pub fn get(&self, name: &str) -> Option<&'a Params> {
        self.collections.get(name).copied()
    }

    /// Returns the collection with the given name.
    ///
    /// # Returns
    /// A `MissingCollection` error if there is no such collection.
    pub fn collection(&self, name: &str) -> Result<&'a Params> {
        self.get(name).ok_or_else(|| TrainErr::MissingCollection {
            name: name.to_string(),
        })
    }

    /// Shorthand for `collection("params")`.
    pub fn params(&self) -> Result<&'a Params> {
        self.collection(Self::PARAMS)
    }

    /// Returns the names of the collections in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &'a str> + '_ {
        self.collections.keys().copied()
    }
}

/// Selects which method of a model definition gets evaluated.
pub enum Method<'n, M: Module> {
    /// The model's `call`.
    Default,
    /// A method registered under this name in `Module::method`.
    Named(&'n str),
    /// A method given directly.
    Direct(MethodFn<M>),
}

impl<M: Module> Clone for Method<'_, M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M: Module> Copy for Method<'_, M> {}

impl<M: Module> fmt::Debug for Method<'_, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Default => f.write_str("Default"),
            Method::Named(name) => f.debug_tuple("Named").field(name).finish(),
            Method::Direct(_) => f.write_str("Direct(..)"),
        }
    }
}

impl<M: Module> Method<'_, M> {
    /// Resolves the method against a model definition.
    ///
    /// # Returns
    /// `None` for the default entry point, the method otherwise, or an `UnknownMethod` error
    /// if a name isn't registered by `model_def`.
    pub fn resolve(self, model_def: &M) -> Result<Option<MethodFn<M>>> {
        match self {
            Method::Default => Ok(None),
            Method::Named(name) => model_def
                .method(name)
                .map(Some)
                .ok_or_else(|| TrainErr::UnknownMethod {
                    name: name.to_string(),
                }),
            Method::Direct(method) => Ok(Some(method)),
        }
    }
}
