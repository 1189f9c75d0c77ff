use std::num::NonZeroUsize;

use log::debug;
use ndarray::{ArrayD, IxDyn};

use crate::{Result, TrainErr, tree::Tree};

/// The amount of replicas this process runs data parallel steps on.
///
/// Replicas are threads of the global rayon pool, so this is its thread count.
pub fn local_device_count() -> NonZeroUsize {
    NonZeroUsize::new(rayon::current_num_threads()).unwrap_or(NonZeroUsize::MIN)
}

/// Splits the leading axis of every leaf across the local devices.
///
/// See `shard_batch_across`.
pub fn shard_batch<A: Clone>(batch: &Tree<ArrayD<A>>) -> Result<Tree<ArrayD<A>>> {
    shard_batch_across(batch, local_device_count())
}

/// Reshapes every leaf of `batch` from `[b, ...]` into `[devices, b / devices, ...]`.
///
/// Sample `i` of shard `d` is sample `d * (b / devices) + i` of the input.
///
/// # Arguments
/// * `batch` - The batch to shard, every leaf needs a leading batch axis.
/// * `devices` - The amount of shards.
///
/// # Returns
/// The sharded batch, or an error if some leaf is a scalar or its batch size isn't
/// divisible by `devices`.
pub fn shard_batch_across<A: Clone>(
    batch: &Tree<ArrayD<A>>,
    devices: NonZeroUsize,
) -> Result<Tree<ArrayD<A>>> {
    let devices = devices.get();

    let sharded = batch.try_map(|path, leaf| {
        let shape = leaf.shape();
        let Some(&size) = shape.first() else {
            return Err(TrainErr::MissingBatchAxis { path: path.into() });
        };

        if size % devices != 0 {
            return Err(TrainErr::IndivisibleBatch {
                path: path.into(),
                shape: shape.to_vec(),
                devices,
            });
        }

        let mut sharded_shape = Vec::with_capacity(shape.len() + 1);
        sharded_shape.push(devices);
        sharded_shape.push(size / devices);
        sharded_shape.extend_from_slice(&shape[1..]);

        Ok(leaf.to_shape(IxDyn(&sharded_shape))?.into_owned())
    })?;

    debug!(devices = devices, leaves = batch.num_leaves(); "sharded batch");
    Ok(sharded)
}

/// Inverse of `shard_batch_across`, merges the two leading axes of every leaf.
pub fn unshard_batch<A: Clone>(batch: &Tree<ArrayD<A>>) -> Result<Tree<ArrayD<A>>> {
    batch.try_map(|path, leaf| {
        let shape = leaf.shape();
        if shape.len() < 2 {
            return Err(TrainErr::MissingBatchAxis { path: path.into() });
        }

        let mut merged_shape = Vec::with_capacity(shape.len() - 1);
        merged_shape.push(shape[0] * shape[1]);
        merged_shape.extend_from_slice(&shape[2..]);

        Ok(leaf.to_shape(IxDyn(&merged_shape))?.into_owned())
    })
}
