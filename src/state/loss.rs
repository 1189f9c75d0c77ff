use std::collections::BTreeMap;

use crate::{Result, tree::Params};

/// Scalar diagnostics reported by a loss function, keyed by name.
pub type Info = BTreeMap<String, f32>;

/// A loss function able to report its gradient with respect to the parameters.
///
/// The gradient usually comes from an automatic differentiation engine or a hand written
/// backward pass. It must have the same structure as the parameters it was computed for.
pub trait LossFn {
    fn grad(&self, params: &Params) -> Result<Params>;
}

/// A loss function that also reports auxiliary diagnostics next to its gradient.
pub trait AuxLossFn {
    fn grad_with_aux(&self, params: &Params) -> Result<(Params, Info)>;
}

impl<F> LossFn for F
where
    F: Fn(&Params) -> Result<Params>,
{
    fn grad(&self, params: &Params) -> Result<Params> {
        self(params)
    }
}

impl<F> AuxLossFn for F
where
    F: Fn(&Params) -> Result<(Params, Info)>,
{
    fn grad_with_aux(&self, params: &Params) -> Result<(Params, Info)> {
        self(params)
    }
}
