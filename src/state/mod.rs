mod loss;
mod snapshot;
mod stats;
mod target;
mod train_state;

pub use loss::{AuxLossFn, Info, LossFn};
pub use snapshot::Snapshot;
pub use stats::GradStats;
pub use target::target_update;
pub use train_state::{ApplyOptions, TrainState};
