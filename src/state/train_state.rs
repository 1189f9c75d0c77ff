use std::{fmt, sync::Arc};

use log::debug;

use super::{AuxLossFn, GradStats, Info, LossFn, Snapshot};
use crate::{
    Result, TrainErr,
    module::{ApplyFn, Collections, Method, Module, Variables},
    optimization::{GradientTransformation, NoOptimizer, apply_updates},
    parallel::Collective,
    tree::Params,
};

/// Optional arguments of `TrainState::apply`.
pub struct ApplyOptions<'o, M: Module> {
    params: Option<&'o Params>,
    extra_variables: Option<&'o Collections>,
    method: Method<'o, M>,
}

impl<M: Module> Default for ApplyOptions<'_, M> {
    fn default() -> Self {
        Self {
            params: None,
            extra_variables: None,
            method: Method::Default,
        }
    }
}

impl<'o, M: Module> ApplyOptions<'o, M> {
    /// Evaluates with these parameters instead of the state's.
    pub fn params(mut self, params: &'o Params) -> Self {
        self.params = Some(params);
        self
    }

    /// Merges these collections next to `"params"`, replacing collections with the same name.
    pub fn extra_variables(mut self, extra_variables: &'o Collections) -> Self {
        self.extra_variables = Some(extra_variables);
        self
    }

    /// Evaluates this method instead of the model's `call`.
    pub fn method(mut self, method: Method<'o, M>) -> Self {
        self.method = method;
        self
    }
}

/// The state of a training run for a single model and optimizer.
///
/// A `TrainState` is a value: every update returns a new state and leaves the previous one
/// untouched. The model definition, its apply function and the gradient transform are fixed
/// at creation and shared between all the states derived from it.
///
/// `E` holds any extra fields the caller wants to carry along, for example batch statistics
/// or a random generator state.
pub struct TrainState<M, T = NoOptimizer, E = ()>
where
    M: Module,
    T: GradientTransformation,
{
    step: u64,
    apply_fn: ApplyFn<M>,
    model_def: Arc<M>,
    params: Params,
    tx: Option<Arc<T>>,
    opt_state: Option<T::State>,
    extra: E,
}

impl<M: Module> TrainState<M> {
    /// Creates a state that evaluates `model_def` with `params` and never trains.
    pub fn frozen(model_def: M, params: Params) -> Self {
        debug!(
            leaves = params.num_leaves(),
            elements = params.num_elements();
            "created frozen train state"
        );

        Self {
            step: 1,
            apply_fn: M::apply,
            model_def: Arc::new(model_def),
            params,
            tx: None,
            opt_state: None,
            extra: (),
        }
    }
}

impl<M, T, E> TrainState<M, T, E>
where
    M: Module,
    T: GradientTransformation,
{
    /// Creates a new `TrainState` with default extra fields.
    ///
    /// See `create_with`.
    pub fn create(model_def: M, params: Params, tx: Option<T>) -> Result<Self>
    where
        E: Default,
    {
        Self::create_with(model_def, params, tx, E::default())
    }

    /// Creates a new `TrainState`.
    ///
    /// # Arguments
    /// * `model_def` - The model definition, its `apply` becomes the state's apply function.
    /// * `params` - The initial parameters.
    /// * `tx` - The gradient transform, `None` for a state that is only evaluated.
    /// * `extra` - The extra fields.
    ///
    /// # Returns
    /// A state at step 1 with the optimizer state initialized for `params`, or the error
    /// returned by the transform's `init`.
    pub fn create_with(model_def: M, params: Params, tx: Option<T>, extra: E) -> Result<Self> {
        let opt_state = tx.as_ref().map(|tx| tx.init(&params)).transpose()?;

        debug!(
            leaves = params.num_leaves(),
            elements = params.num_elements(),
            optimizer = tx.is_some();
            "created train state"
        );

        Ok(Self {
            step: 1,
            apply_fn: M::apply,
            model_def: Arc::new(model_def),
            params,
            tx: tx.map(Arc::new),
            opt_state,
            extra,
        })
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn model_def(&self) -> &M {
        &self.model_def
    }

    pub fn apply_fn(&self) -> ApplyFn<M> {
        self.apply_fn
    }

    pub fn tx(&self) -> Option<&T> {
        self.tx.as_deref()
    }

    pub fn opt_state(&self) -> Option<&T::State> {
        self.opt_state.as_ref()
    }

    pub fn extra(&self) -> &E {
        &self.extra
    }

    /// Evaluates the model.
    ///
    /// The model receives a `"params"` collection holding either the given parameters or the
    /// state's, merged with the extra collections.
    ///
    /// # Arguments
    /// * `input` - The model input.
    /// * `options` - Overrides for the parameters, extra collections and method.
    ///
    /// # Returns
    /// The model output, or an error if the method name is unknown or the model fails.
    pub fn apply(&self, input: &M::Input, options: ApplyOptions<'_, M>) -> Result<M::Output> {
        let params = options.params.unwrap_or(&self.params);

        let mut variables = Variables::new(params);
        if let Some(extra) = options.extra_variables {
            variables = variables.merge(extra);
        }

        let method = options.method.resolve(&self.model_def)?;
        (self.apply_fn)(&self.model_def, &variables, input, method)
    }

    /// Evaluates the model's `call` with the state's parameters.
    pub fn call(&self, input: &M::Input) -> Result<M::Output> {
        self.apply(input, ApplyOptions::default())
    }

    /// Takes a gradient step, keeping the extra fields.
    ///
    /// See `apply_gradients_with`.
    pub fn apply_gradients(&self, grads: &Params) -> Result<Self>
    where
        E: Clone,
    {
        self.apply_gradients_with(grads, self.extra.clone())
    }

    /// Takes a gradient step.
    ///
    /// # Arguments
    /// * `grads` - The gradients, they must match the parameters in structure and shapes.
    /// * `extra` - The extra fields of the new state.
    ///
    /// # Returns
    /// A new state one step ahead with the updated parameters and optimizer state. Fails if
    /// the state has no transform, if `grads` doesn't match the parameters or if the
    /// transform fails.
    pub fn apply_gradients_with(&self, grads: &Params, extra: E) -> Result<Self> {
        let (Some(tx), Some(opt_state)) = (&self.tx, &self.opt_state) else {
            return Err(TrainErr::MissingOptimizer);
        };

        self.params.check_compatible(grads, "grads")?;

        let (updates, opt_state) = tx.update(grads, opt_state, &self.params)?;
        let params = apply_updates(&self.params, &updates)?;
        let step = self.step + 1;

        debug!(step = step; "applied gradients");
        Ok(self.derive(step, params, Some(opt_state), extra))
    }

    /// Computes the gradient of `loss_fn` at the current parameters and takes a step.
    ///
    /// # Arguments
    /// * `loss_fn` - The loss function.
    /// * `pmap_axis` - If given, the gradients are averaged across the replicas of this axis
    ///   before the step, every replica must call this with the same axis.
    ///
    /// # Returns
    /// The new state.
    pub fn apply_loss_fn<L>(&self, loss_fn: &L, pmap_axis: Option<&dyn Collective>) -> Result<Self>
    where
        L: LossFn + ?Sized,
        E: Clone,
    {
        let mut grads = loss_fn.grad(&self.params)?;
        if let Some(axis) = pmap_axis {
            grads = axis.pmean(&grads)?;
        }

        self.apply_gradients(&grads)
    }

    /// Like `apply_loss_fn`, for loss functions reporting diagnostics.
    ///
    /// With an axis, the diagnostics are averaged across the replicas too. Statistics of the
    /// final gradients are added under `grad/max`, `grad/min` and `grad/norm`.
    ///
    /// # Returns
    /// A tuple with the new state and the diagnostics.
    pub fn apply_loss_fn_with_aux<L>(
        &self,
        loss_fn: &L,
        pmap_axis: Option<&dyn Collective>,
    ) -> Result<(Self, Info)>
    where
        L: AuxLossFn + ?Sized,
        E: Clone,
    {
        let (mut grads, mut info) = loss_fn.grad_with_aux(&self.params)?;
        if let Some(axis) = pmap_axis {
            grads = axis.pmean(&grads)?;
            info = axis.pmean_info(&info)?;
        }

        GradStats::from_grads(&grads).insert_into(&mut info);

        let state = self.apply_gradients(&grads)?;
        Ok((state, info))
    }

    /// Returns a copy of this state with other parameters.
    pub fn with_params(&self, params: Params) -> Self
    where
        E: Clone,
    {
        self.derive(self.step, params, self.opt_state.clone(), self.extra.clone())
    }

    /// Returns a copy of this state at another step.
    pub fn with_step(&self, step: u64) -> Self
    where
        E: Clone,
    {
        self.derive(step, self.params.clone(), self.opt_state.clone(), self.extra.clone())
    }

    /// Returns a copy of this state with other extra fields, possibly of another type.
    pub fn with_extra<E2>(&self, extra: E2) -> TrainState<M, T, E2> {
        self.derive(self.step, self.params.clone(), self.opt_state.clone(), extra)
    }

    /// Captures the step, parameters and optimizer state.
    pub fn snapshot(&self) -> Snapshot<T::State> {
        Snapshot::new(self.step, self.params.clone(), self.opt_state.clone())
    }

    /// Builds a state from a snapshot, keeping this state's model, transform and extra fields.
    ///
    /// # Returns
    /// The restored state, or an error if the snapshot's parameters don't match this state's
    /// or it has an optimizer state when this state has no transform, or the other way around.
    pub fn restore(&self, snapshot: Snapshot<T::State>) -> Result<Self>
    where
        E: Clone,
    {
        let (step, params, opt_state) = snapshot.into_parts();

        self.params.check_compatible(&params, "restored params")?;

        let has_tx = self.tx.is_some();
        let has_state = opt_state.is_some();
        if has_tx != has_state {
            return Err(TrainErr::OptimizerStateMismatch { has_tx, has_state });
        }

        debug!(step = step; "restored train state");
        Ok(self.derive(step, params, opt_state, self.extra.clone()))
    }

    fn derive<E2>(
        &self,
        step: u64,
        params: Params,
        opt_state: Option<T::State>,
        extra: E2,
    ) -> TrainState<M, T, E2> {
        TrainState {
            step,
            apply_fn: self.apply_fn,
            model_def: Arc::clone(&self.model_def),
            params,
            tx: self.tx.clone(),
            opt_state,
            extra,
        }
    }
}

impl<M, T, E> Clone for TrainState<M, T, E>
where
    M: Module,
    T: GradientTransformation,
    E: Clone,
{
    fn clone(&self) -> Self {
        self.derive(self.step, self.params.clone(), self.opt_state.clone(), self.extra.clone())
    }
}

impl<M, T, E> fmt::Debug for TrainState<M, T, E>
where
    M: Module,
    T: GradientTransformation,
    T::State: fmt::Debug,
    E: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrainState")
            .field("step", &self.step)
            .field("params", &self.params)
            .field("has_tx", &self.tx.is_some())
            .field("opt_state", &self.opt_state)
            .field("extra", &self.extra)
            .finish_non_exhaustive()
    }
}
