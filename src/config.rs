use std::{fs, num::NonZeroUsize, path::Path};

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

use crate::{
    Result,
    parallel::{self, ReplicaAxis},
    tree::Tree,
};

/// How data parallel training is laid out on this process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutionConfig {
    /// The amount of replicas, the local device count if not set.
    pub devices: Option<NonZeroUsize>,
    /// The name of the replica axis gradients are averaged over.
    pub axis_name: String,
    /// The interpolation factor used for target network updates.
    pub target_tau: f32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            devices: None,
            axis_name: "batch".into(),
            target_tau: 0.005,
        }
    }
}

impl ExecutionConfig {
    /// Parses a configuration from json, missing fields take their default value.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads a json configuration file.
    ///
    /// # Errors
    /// Returns an error if the file can't be read or isn't a valid configuration.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn device_count(&self) -> NonZeroUsize {
        self.devices.unwrap_or_else(parallel::local_device_count)
    }

    /// Builds the replica axis shared by every replica of a training run.
    pub fn replica_axis(&self) -> ReplicaAxis {
        ReplicaAxis::new(self.axis_name.clone(), self.device_count())
    }

    /// Shards a batch across the configured amount of replicas.
    pub fn shard_batch<A: Clone>(&self, batch: &Tree<ArrayD<A>>) -> Result<Tree<ArrayD<A>>> {
        parallel::shard_batch_across(batch, self.device_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{TrainErr, parallel::Collective};

    #[test]
    fn empty_json_gives_defaults() {
        let config = ExecutionConfig::from_json_str("{}").unwrap();
        assert_eq!(config, ExecutionConfig::default());
    }

    #[test]
    fn parses_every_field() {
        let config = ExecutionConfig::from_json_str(
            r#"{ "devices": 2, "axis_name": "replicas", "target_tau": 0.1 }"#,
        )
        .unwrap();

        assert_eq!(config.device_count().get(), 2);
        assert_eq!(config.target_tau, 0.1);

        let axis = config.replica_axis();
        assert_eq!(axis.axis_name(), "replicas");
        assert_eq!(axis.axis_size(), 2);
    }

    #[test]
    fn rejects_zero_devices_and_unknown_fields() {
        assert!(matches!(
            ExecutionConfig::from_json_str(r#"{ "devices": 0 }"#),
            Err(TrainErr::Json(_))
        ));
        assert!(matches!(
            ExecutionConfig::from_json_str(r#"{ "device": 2 }"#),
            Err(TrainErr::Json(_))
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        assert!(matches!(
            ExecutionConfig::from_path("/definitely/not/here.json"),
            Err(TrainErr::Io(_))
        ));
    }

    #[test]
    fn devices_default_to_local_count() {
        let config = ExecutionConfig::default();
        assert_eq!(config.device_count(), parallel::local_device_count());
    }
}
