/// Element-wise activation functions for `Dense` layers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActFn {
    /// `amp / (1 + e^-z)`
    Sigmoid { amp: f32 },
    Relu,
}

impl ActFn {
    pub fn sigmoid(amp: f32) -> Self {
        Self::Sigmoid { amp }
    }

    pub fn f(&self, z: f32) -> f32 {
        match *self {
            ActFn::Sigmoid { amp } => amp / (1. + (-z).exp()),
            ActFn::Relu => z.max(0.),
        }
    }

    /// The derivative of `f`, for loss functions that compute their own gradients.
    pub fn df(&self, z: f32) -> f32 {
        match *self {
            ActFn::Sigmoid { amp } => (amp * (-z).exp()) / ((-z).exp() + 1.).powi(2),
            ActFn::Relu => {
                if z > 0. {
                    1.
                } else {
                    0.
                }
            }
        }
    }
}
