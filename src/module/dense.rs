use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Ix1, Ix2};
use rand::Rng;
use rand_distr::{Distribution, Uniform};

use super::{ActFn, MethodFn, Module, Variables};
use crate::{Result, TrainErr, tree::Params, tree::Tree};

/// A fully connected layer: `act(x · kernel + bias)`.
///
/// Its parameters are the tree `{"kernel": [in_dim, out_dim], "bias": [out_dim]}`.
#[derive(Debug, Clone)]
pub struct Dense {
    in_dim: usize,
    out_dim: usize,
    act_fn: Option<ActFn>,
}

impl Dense {
    pub const KERNEL: &'static str = "kernel";
    pub const BIAS: &'static str = "bias";

    /// Creates a new `Dense`.
    ///
    /// # Arguments
    /// * `in_dim` - The amount of input features.
    /// * `out_dim` - The amount of output features.
    /// * `act_fn` - An optional activation applied to the output.
    pub fn new(in_dim: usize, out_dim: usize, act_fn: Option<ActFn>) -> Self {
        Self {
            in_dim,
            out_dim,
            act_fn,
        }
    }

    pub fn act_fn(&self) -> Option<ActFn> {
        self.act_fn
    }

    /// Returns the amount of parameters this layer has.
    pub fn size(&self) -> usize {
        (self.in_dim + 1) * self.out_dim
    }

    /// Samples a new parameter tree, using Xavier uniform initialization for the kernel and
    /// zeros for the bias.
    ///
    /// # Arguments
    /// * `rng` - A random number generator.
    ///
    /// # Returns
    /// The parameters, or an error if the layer dimensions give an invalid range.
    pub fn init<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Params> {
        let range = (6. / (self.in_dim + self.out_dim) as f32).sqrt();
        let dist = Uniform::new(-range, range)?;

        let kernel = Array2::from_shape_fn((self.in_dim, self.out_dim), |_| dist.sample(rng));
        let bias = Array1::<f32>::zeros(self.out_dim);

        Ok(Tree::mapping([
            (Self::KERNEL, Tree::leaf(kernel.into_dyn())),
            (Self::BIAS, Tree::leaf(bias.into_dyn())),
        ]))
    }

    /// The pre-activation output of the layer, registered as the `"linear"` method.
    pub fn linear(&self, variables: &Variables<'_>, x: &Array2<f32>) -> Result<Array2<f32>> {
        if x.ncols() != self.in_dim {
            return Err(TrainErr::ShapeMismatch {
                what: "input",
                path: String::new(),
                got: x.shape().to_vec(),
                expected: vec![x.nrows(), self.in_dim],
            });
        }

        let (kernel, bias) = self.view_params(variables.params()?)?;
        Ok(x.dot(&kernel) + &bias)
    }

    /// Gives a view of the parameter tree as the kernel and bias of this layer.
    fn view_params<'a>(
        &self,
        params: &'a Params,
    ) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>)> {
        let leaf = |name: &'static str| {
            params
                .get(name)
                .and_then(Tree::as_leaf)
                .ok_or_else(|| TrainErr::StructureMismatch {
                    what: "dense params",
                    path: name.to_string(),
                })
        };

        let kernel = leaf(Self::KERNEL)?;
        let bias = leaf(Self::BIAS)?;

        if kernel.shape() != [self.in_dim, self.out_dim] || bias.shape() != [self.out_dim] {
            let (path, got, expected) = if bias.shape() == [self.out_dim] {
                (Self::KERNEL, kernel.shape(), vec![self.in_dim, self.out_dim])
            } else {
                (Self::BIAS, bias.shape(), vec![self.out_dim])
            };

            return Err(TrainErr::ShapeMismatch {
                what: "dense params",
                path: path.to_string(),
                got: got.to_vec(),
                expected,
            });
        }

        let kernel = kernel.view().into_dimensionality::<Ix2>()?;
        let bias = bias.view().into_dimensionality::<Ix1>()?;
        Ok((kernel, bias))
    }
}

impl Module for Dense {
    type Input = Array2<f32>;
    type Output = Array2<f32>;

    fn call(&self, variables: &Variables<'_>, input: &Array2<f32>) -> Result<Array2<f32>> {
        let z = self.linear(variables, input)?;

        let Some(act_fn) = self.act_fn else {
            return Ok(z);
        };

        Ok(z.mapv_into(|z| act_fn.f(z)))
    }

    fn method(&self, name: &str) -> Option<MethodFn<Self>> {
        match name {
            "linear" => Some(Dense::linear),
            _ => None,
        }
    }
}
