use log::debug;

use super::TrainState;
use crate::{Result, module::Module, optimization::GradientTransformation};

/// Moves the parameters of `target` towards those of `source`.
///
/// The new target parameters are `tau * source + (1 - tau) * target`, leaf by leaf. `tau`
/// isn't range checked, `1` copies the source and `0` keeps the target.
///
/// # Arguments
/// * `source` - The state whose parameters are followed, usually the online network.
/// * `target` - The state to update.
/// * `tau` - The interpolation factor.
///
/// # Returns
/// `target` with the blended parameters and every other field unchanged, or an error if the
/// parameters of both states don't match.
pub fn target_update<M, T, E, SM, ST, SE>(
    source: &TrainState<SM, ST, SE>,
    target: &TrainState<M, T, E>,
    tau: f32,
) -> Result<TrainState<M, T, E>>
where
    M: Module,
    T: GradientTransformation,
    E: Clone,
    SM: Module,
    ST: GradientTransformation,
{
    let params = source.params().blend(target.params(), tau)?;
    debug!(step = target.step(); "blended target params with tau {tau}");

    Ok(target.with_params(params))
}
