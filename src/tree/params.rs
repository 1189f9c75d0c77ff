use ndarray::{ArrayD, IxDyn};

use super::Tree;
use crate::{Result, TrainErr};

/// A tree of `f32` arrays: model parameters, gradients and optimizer updates.
pub type Params = Tree<ArrayD<f32>>;

/// Checks that two leaves at the same path have the same shape.
///
/// Arithmetic between mismatched arrays would otherwise broadcast silently or panic.
pub(crate) fn check_shape(
    what: &'static str,
    path: &str,
    got: &ArrayD<f32>,
    expected: &ArrayD<f32>,
) -> Result<()> {
    if got.shape() == expected.shape() {
        return Ok(());
    }

    Err(TrainErr::ShapeMismatch {
        what,
        path: path.to_string(),
        got: got.shape().to_vec(),
        expected: expected.shape().to_vec(),
    })
}

impl Tree<ArrayD<f32>> {
    /// Creates a leaf holding a zero-dimensional array.
    pub fn scalar(value: f32) -> Self {
        Tree::Leaf(ArrayD::from_elem(IxDyn(&[]), value))
    }

    /// Returns the total amount of scalars in the tree.
    pub fn num_elements(&self) -> usize {
        self.leaves().iter().map(|leaf| leaf.len()).sum()
    }

    /// Returns a tree with the same structure and shapes, filled with zeros.
    pub fn zeros_like(&self) -> Self {
        self.map(|leaf| ArrayD::zeros(leaf.raw_dim()))
    }

    /// Validates that `other` matches this tree in structure and in every leaf shape.
    ///
    /// # Arguments
    /// * `other` - The tree to check.
    /// * `what` - A name for `other` used in error messages.
    pub fn check_compatible(&self, other: &Self, what: &'static str) -> Result<()> {
        self.zip_with(other, what, |path, a, b| check_shape(what, path, b, a))
            .map(|_: Tree<()>| ())
    }

    /// Adds two trees leaf by leaf.
    ///
    /// # Arguments
    /// * `other` - The tree to add, it must match this tree's structure and shapes.
    /// * `what` - A name for `other` used in error messages.
    pub fn plus(&self, other: &Self, what: &'static str) -> Result<Self> {
        self.zip_with(other, what, |path, a, b| {
            check_shape(what, path, b, a)?;
            Ok(a + b)
        })
    }

    /// Multiplies every element of the tree by `factor`.
    pub fn scaled(&self, factor: f32) -> Self {
        self.map(|leaf| leaf * factor)
    }

    /// Blends two trees leaf by leaf as `tau * self + (1 - tau) * other`.
    ///
    /// # Arguments
    /// * `other` - The tree to blend with, it must match this tree's structure and shapes.
    /// * `tau` - The weight given to `self`.
    pub fn blend(&self, other: &Self, tau: f32) -> Result<Self> {
        self.zip_with(other, "blended params", |path, a, b| {
            check_shape("blended params", path, b, a)?;
            let mut out = b * (1. - tau);
            out.scaled_add(tau, a);
            Ok(out)
        })
    }
}
