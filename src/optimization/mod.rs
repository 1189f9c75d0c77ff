mod transform;

pub use transform::{GradientTransformation, NoOptimizer, Stateless, apply_updates};
