mod params;
mod tree;

pub use params::Params;
pub use tree::Tree;
