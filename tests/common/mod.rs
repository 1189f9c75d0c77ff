#![allow(dead_code)]

use ndarray::{Array2, Axis};
use train_state::{
    ApplyOptions, GradientTransformation, Info, Method, Params, Result, TrainState, Tree,
    module::Dense,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Plain gradient descent, `updates = -lr * grads`.
pub struct Sgd {
    pub lr: f32,
}

impl GradientTransformation for Sgd {
    type State = ();

    fn init(&self, _params: &Params) -> Result<()> {
        Ok(())
    }

    fn update(&self, grads: &Params, _state: &(), _params: &Params) -> Result<(Params, ())> {
        Ok((grads.scaled(-self.lr), ()))
    }
}

/// The mean squared error of a `Dense` on `(x, y)` and its gradient, backpropagated through
/// the layer's activation if it has one.
pub fn mse_grad(
    state: &TrainState<Dense, Sgd>,
    params: &Params,
    x: &Array2<f32>,
    y: &Array2<f32>,
) -> Result<(Params, Info)> {
    let options = ApplyOptions::default()
        .params(params)
        .method(Method::Named("linear"));
    let z = state.apply(x, options)?;
    let act_fn = state.model_def().act_fn();

    let pred = match act_fn {
        Some(act_fn) => z.mapv(|z| act_fn.f(z)),
        None => z.clone(),
    };

    let diff = &pred - y;
    let loss = diff.mapv(|d| d * d).mean().unwrap_or_default();

    let mut d_z = diff * (2. / y.len() as f32);
    if let Some(act_fn) = act_fn {
        d_z *= &z.mapv(|z| act_fn.df(z));
    }

    let kernel = x.t().dot(&d_z);
    let bias = d_z.sum_axis(Axis(0));

    let grads = Tree::mapping([
        (Dense::KERNEL, Tree::leaf(kernel.into_dyn())),
        (Dense::BIAS, Tree::leaf(bias.into_dyn())),
    ]);

    Ok((grads, Info::from([("loss".to_string(), loss)])))
}

/// A batch following `y = 2 * x0 - x1 + 0.5`.
pub fn linear_batch(n: usize) -> (Array2<f32>, Array2<f32>) {
    let x = Array2::from_shape_fn((n, 2), |(i, j)| ((i * 3 + j * 5) % 7) as f32 / 7. - 0.5);
    let y = Array2::from_shape_fn((n, 1), |(i, _)| 2. * x[[i, 0]] - x[[i, 1]] + 0.5);
    (x, y)
}

pub fn assert_close(a: &Params, b: &Params, tol: f32) {
    let diffs = a.zip_with(b, "compared params", |_, a, b| Ok((a - b).mapv(f32::abs).sum()));
    let total: f32 = diffs.unwrap().leaves().into_iter().copied().sum();
    assert!(total < tol, "params differ by {total}");
}
