use crate::{Result, state::Info, tree::Params};

/// Cross-replica reductions over a named axis.
///
/// Every replica sharing an axis must issue the same sequence of calls with structurally
/// identical values, a replica that never reaches a call leaves the others waiting.
pub trait Collective {
    /// The name of the axis the replicas share.
    fn axis_name(&self) -> &str;

    /// The amount of replicas on the axis.
    fn axis_size(&self) -> usize;

    /// Averages a tree across all replicas of the axis.
    ///
    /// # Returns
    /// The element-wise mean, identical for every replica, or an error if the replicas
    /// contributed trees that don't match.
    fn pmean(&self, tree: &Params) -> Result<Params>;

    /// Averages every entry of an info map across all replicas of the axis.
    fn pmean_info(&self, info: &Info) -> Result<Info>;
}
