use rayon::prelude::*;

use super::Info;
use crate::tree::Params;

/// Summary statistics of a gradient tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradStats {
    max: f32,
    min: f32,
    norm: f32,
}

impl GradStats {
    pub const MAX_KEY: &'static str = "grad/max";
    pub const MIN_KEY: &'static str = "grad/min";
    pub const NORM_KEY: &'static str = "grad/norm";

    /// Computes the statistics of `grads`.
    ///
    /// Every leaf is reduced on its own, in parallel, into its max, min and L2 norm. The
    /// results are then combined into the max of the maxes, the min of the mins and the norm
    /// of the norms. Empty leaves don't contribute and a `NaN` anywhere propagates.
    ///
    /// # Returns
    /// The statistics, for a tree without elements these are `-inf`, `inf` and `0`.
    pub fn from_grads(grads: &Params) -> Self {
        let (max, min, sq_norm) = grads
            .leaves()
            .par_iter()
            .filter(|leaf| !leaf.is_empty())
            .map(|leaf| {
                let max = leaf.iter().copied().fold(f32::NEG_INFINITY, nan_max);
                let min = leaf.iter().copied().fold(f32::INFINITY, nan_min);
                let norm = leaf.iter().map(|x| x * x).sum::<f32>().sqrt();
                (max, min, norm * norm)
            })
            .reduce(
                || (f32::NEG_INFINITY, f32::INFINITY, 0.),
                |a, b| (nan_max(a.0, b.0), nan_min(a.1, b.1), a.2 + b.2),
            );

        Self {
            max,
            min,
            norm: sq_norm.sqrt(),
        }
    }

    pub fn max(&self) -> f32 {
        self.max
    }

    pub fn min(&self) -> f32 {
        self.min
    }

    pub fn norm(&self) -> f32 {
        self.norm
    }

    /// Adds the statistics to `info` under `grad/max`, `grad/min` and `grad/norm`,
    /// overwriting previous entries with those keys.
    pub fn insert_into(&self, info: &mut Info) {
        info.insert(Self::MAX_KEY.into(), self.max);
        info.insert(Self::MIN_KEY.into(), self.min);
        info.insert(Self::NORM_KEY.into(), self.norm);
    }
}

fn nan_max(a: f32, b: f32) -> f32 {
    if a.is_nan() || b.is_nan() { f32::NAN } else { a.max(b) }
}

fn nan_min(a: f32, b: f32) -> f32 {
    if a.is_nan() || b.is_nan() { f32::NAN } else { a.min(b) }
}
