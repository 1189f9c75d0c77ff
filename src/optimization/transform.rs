use crate::{Result, tree::Params};

/// Defines how gradients turn into parameter updates.
///
/// A transform is stateless itself, everything it needs to carry from one step to the next
/// lives in its `State`, which the `TrainState` owns and replaces on every step.
pub trait GradientTransformation {
    /// The optimizer state, usually a tree of moments plus some counters.
    type State: Clone;

    /// Builds the initial state for the given parameters.
    ///
    /// # Arguments
    /// * `params` - The parameters that will be optimized.
    ///
    /// # Returns
    /// The initial state or an error if the parameter tree isn't supported.
    fn init(&self, params: &Params) -> Result<Self::State>;

    /// Maps gradients into updates.
    ///
    /// # Arguments
    /// * `grads` - The gradients, with the same structure as `params`.
    /// * `state` - The current optimizer state.
    /// * `params` - The current parameters.
    ///
    /// # Returns
    /// A tuple with the updates, meant to be added to `params` with `apply_updates`, and the
    /// next optimizer state.
    fn update(
        &self,
        grads: &Params,
        state: &Self::State,
        params: &Params,
    ) -> Result<(Params, Self::State)>;
}

impl<T: GradientTransformation + ?Sized> GradientTransformation for Box<T> {
    type State = T::State;

    fn init(&self, params: &Params) -> Result<Self::State> {
        (**self).init(params)
    }

    fn update(
        &self,
        grads: &Params,
        state: &Self::State,
        params: &Params,
    ) -> Result<(Params, Self::State)> {
        (**self).update(grads, state, params)
    }
}

/// Applies the updates returned by a `GradientTransformation` to the parameters.
///
/// # Returns
/// `params + updates`, or an error if both trees don't match.
pub fn apply_updates(params: &Params, updates: &Params) -> Result<Params> {
    params.plus(updates, "updates")
}

/// The transform of a state that doesn't train. It can't be constructed.
#[derive(Debug, Clone, Copy)]
pub enum NoOptimizer {}

impl GradientTransformation for NoOptimizer {
    type State = ();

    fn init(&self, _params: &Params) -> Result<()> {
        match *self {}
    }

    fn update(&self, _grads: &Params, _state: &(), _params: &Params) -> Result<(Params, ())> {
        match *self {}
    }
}

/// A transform without state, built from a closure mapping `(grads, params)` to updates.
#[derive(Debug, Clone)]
pub struct Stateless<F> {
    f: F,
}

impl<F> Stateless<F>
where
    F: Fn(&Params, &Params) -> Result<Params>,
{
    /// Creates a new `Stateless` transform.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> GradientTransformation for Stateless<F>
where
    F: Fn(&Params, &Params) -> Result<Params>,
{
    type State = ();

    fn init(&self, _params: &Params) -> Result<()> {
        Ok(())
    }

    fn update(&self, grads: &Params, _state: &(), params: &Params) -> Result<(Params, ())> {
        Ok(((self.f)(grads, params)?, ()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Tree;

    #[test]
    fn stateless_negation_then_apply() {
        let tx = Stateless::new(|grads: &Params, _: &Params| Ok(grads.scaled(-1.)));
        let params = Tree::mapping([("w", Tree::scalar(2.))]);
        let grads = Tree::mapping([("w", Tree::scalar(1.))]);

        tx.init(&params).unwrap();
        let (updates, ()) = tx.update(&grads, &(), &params).unwrap();
        let params = apply_updates(&params, &updates).unwrap();

        assert_eq!(params, Tree::mapping([("w", Tree::scalar(1.))]));
    }

    #[test]
    fn boxed_transforms_delegate() {
        let tx: Box<Stateless<_>> = Box::new(Stateless::new(|grads: &Params, _: &Params| {
            Ok(grads.scaled(2.))
        }));
        let params = Tree::scalar(0.);

        let (updates, ()) = tx.update(&Tree::scalar(3.), &(), &params).unwrap();
        assert_eq!(updates, Tree::scalar(6.));
    }

    #[test]
    fn apply_updates_rejects_structure_mismatch() {
        let params = Tree::mapping([("w", Tree::scalar(2.))]);
        let updates = Tree::mapping([("v", Tree::scalar(1.))]);

        assert!(apply_updates(&params, &updates).is_err());
    }
}
