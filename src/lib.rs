//! Immutable training state for models whose parameters live in a tree of arrays.
//!
//! A `TrainState` bundles a step counter, a model definition with its apply function, the
//! parameters, a gradient transform and the transform's state. Every training step returns a
//! new state. Data parallel training runs one replica per thread, each one sharing a
//! `ReplicaAxis` to average its gradients with the rest.

pub mod config;
pub mod error;
pub mod module;
pub mod optimization;
pub mod parallel;
pub mod state;
pub mod tree;

pub use config::ExecutionConfig;
pub use error::{Result, TrainErr};
pub use module::{Method, Module, Variables};
pub use optimization::GradientTransformation;
pub use parallel::{Collective, ReplicaAxis, shard_batch, shard_batch_across, unshard_batch};
pub use state::{ApplyOptions, Info, Snapshot, TrainState, target_update};
pub use tree::{Params, Tree};
