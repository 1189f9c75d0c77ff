mod activation;
mod dense;
mod module;

pub use activation::ActFn;
pub use dense::Dense;
pub use module::{ApplyFn, Collections, Method, MethodFn, Module, Variables};
