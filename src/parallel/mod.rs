mod collective;
mod replicas;
mod shard;

pub use collective::Collective;
pub use replicas::ReplicaAxis;
pub use shard::{local_device_count, shard_batch, shard_batch_across, unshard_batch};
