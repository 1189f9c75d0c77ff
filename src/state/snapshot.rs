use std::{fs, path::Path};

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{Result, TrainErr, tree::Params};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct OptimizerSnapshot<S> {
    state: S,
}

/// The serializable part of a `TrainState`: its step, parameters and optimizer state.
///
/// The model definition, apply function and transform are code, not data, so they are left
/// out and provided again by the state a snapshot is restored into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot<S> {
    step: u64,
    params: Params,
    optimizer: Option<OptimizerSnapshot<S>>,
}

impl<S> Snapshot<S> {
    pub(super) fn new(step: u64, params: Params, opt_state: Option<S>) -> Self {
        Self {
            step,
            params,
            optimizer: opt_state.map(|state| OptimizerSnapshot { state }),
        }
    }

    pub(super) fn into_parts(self) -> (u64, Params, Option<S>) {
        (self.step, self.params, self.optimizer.map(|o| o.state))
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn opt_state(&self) -> Option<&S> {
        self.optimizer.as_ref().map(|o| &o.state)
    }

    /// Serializes the snapshot as json.
    ///
    /// # Errors
    /// Json writes `NaN` and infinities as `null`, which can't be read back, so a snapshot
    /// whose parameters hold such values is rejected with a `NonFinite` error naming the
    /// first offending leaf. The optimizer state must serialize losslessly on its own.
    pub fn to_json(&self) -> Result<String>
    where
        S: Serialize,
    {
        self.check_finite()?;
        Ok(serde_json::to_string(self)?)
    }

    fn check_finite(&self) -> Result<()> {
        match self
            .params
            .leaves_with_path()
            .into_iter()
            .find(|(_, leaf)| leaf.iter().any(|x| !x.is_finite()))
        {
            Some((path, _)) => Err(TrainErr::NonFinite { path }),
            None => Ok(()),
        }
    }

    pub fn from_json(json: &str) -> Result<Self>
    where
        S: DeserializeOwned,
    {
        Ok(serde_json::from_str(json)?)
    }

    /// Writes the snapshot as json to `path`, replacing the file if it exists.
    ///
    /// Nothing is written if the snapshot can't be serialized, see `to_json`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()>
    where
        S: Serialize,
    {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Reads a snapshot previously written with `save`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self>
    where
        S: DeserializeOwned,
    {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Tree;

    #[test]
    fn unit_optimizer_state_survives_json() {
        let snapshot = Snapshot::new(3, Tree::scalar(1.5), Some(()));

        let json = snapshot.to_json().unwrap();
        let back: Snapshot<()> = Snapshot::from_json(&json).unwrap();

        assert_eq!(back.opt_state(), Some(&()));
        assert_eq!(back, snapshot);
    }

    #[test]
    fn non_finite_params_are_rejected_before_writing() {
        let params = Tree::mapping([
            ("v", Tree::scalar(f32::NAN)),
            ("w", Tree::scalar(f32::INFINITY)),
            ("a", Tree::scalar(1.)),
        ]);
        let snapshot = Snapshot::new(4, params, Some(()));

        let err = snapshot.to_json().unwrap_err();
        assert!(matches!(err, TrainErr::NonFinite { ref path } if path == "v"), "{err}");

        let path = std::env::temp_dir().join(format!("non_finite_{}.json", std::process::id()));
        assert!(matches!(snapshot.save(&path), Err(TrainErr::NonFinite { .. })));
        assert!(!path.exists());
    }

    #[test]
    fn finite_extremes_survive_json() {
        let params = Tree::sequence([Tree::scalar(f32::MAX), Tree::scalar(-f32::MIN_POSITIVE)]);
        let snapshot = Snapshot::new(2, params, None::<()>);

        let back = Snapshot::<()>::from_json(&snapshot.to_json().unwrap()).unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn missing_optimizer_state_survives_json() {
        let snapshot: Snapshot<Vec<f32>> = Snapshot::new(1, Tree::scalar(0.), None);
        let back = Snapshot::<Vec<f32>>::from_json(&snapshot.to_json().unwrap()).unwrap();

        assert_eq!(back.opt_state(), None);
        assert_eq!(back.step(), 1);
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(matches!(
            Snapshot::<()>::from_json("{\"step\": 1}"),
            Err(TrainErr::Json(_))
        ));
    }
}
