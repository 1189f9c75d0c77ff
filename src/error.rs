use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

use ndarray::ShapeError;

/// The result type used in the entire crate.
pub type Result<T> = std::result::Result<T, TrainErr>;

/// The crate's error type.
#[derive(Debug)]
pub enum TrainErr {
    /// Two trees that should share a structure diverge at `path`.
    StructureMismatch {
        what: &'static str,
        path: String,
    },
    /// Two leaves at the same position have different shapes.
    ShapeMismatch {
        what: &'static str,
        path: String,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
    MissingOptimizer,
    UnknownMethod {
        name: String,
    },
    MissingCollection {
        name: String,
    },
    IndivisibleBatch {
        path: String,
        shape: Vec<usize>,
        devices: usize,
    },
    MissingBatchAxis {
        path: String,
    },
    Collective {
        axis: String,
        detail: String,
    },
    OptimizerStateMismatch {
        has_tx: bool,
        has_state: bool,
    },
    InvalidInit(String),
    /// A leaf holds `NaN` or an infinity where only finite values can be stored.
    NonFinite {
        path: String,
    },
    Shape(ShapeError),
    Json(serde_json::Error),
    Io(io::Error),
}

fn display_path(path: &str) -> &str {
    if path.is_empty() { "<root>" } else { path }
}

impl Display for TrainErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainErr::StructureMismatch { what, path } => write!(
                f,
                "tree structure mismatch for {what} at {}",
                display_path(path)
            ),
            TrainErr::ShapeMismatch {
                what,
                path,
                got,
                expected,
            } => write!(
                f,
                "shape mismatch for {what} at {}: got {got:?}, expected {expected:?}",
                display_path(path)
            ),
            TrainErr::MissingOptimizer => {
                write!(f, "cannot apply gradients, the state has no optimizer")
            }
            TrainErr::UnknownMethod { name } => {
                write!(f, "the model definition has no method named '{name}'")
            }
            TrainErr::MissingCollection { name } => {
                write!(f, "the variable collection '{name}' was not provided")
            }
            TrainErr::IndivisibleBatch {
                path,
                shape,
                devices,
            } => {
                let size = shape.first().copied().unwrap_or_default();
                write!(
                    f,
                    "batch size needs to be divisible by # devices, got {size} and {devices} (leaf {} with shape {shape:?})",
                    display_path(path)
                )
            }
            TrainErr::MissingBatchAxis { path } => write!(
                f,
                "leaf {} has no leading batch axis",
                display_path(path)
            ),
            TrainErr::Collective { axis, detail } => {
                write!(f, "collective on axis '{axis}' failed: {detail}")
            }
            TrainErr::OptimizerStateMismatch { has_tx, has_state } => write!(
                f,
                "optimizer state presence ({has_state}) doesn't match optimizer presence ({has_tx})"
            ),
            TrainErr::InvalidInit(msg) => write!(f, "invalid initialization: {msg}"),
            TrainErr::NonFinite { path } => write!(
                f,
                "leaf {} holds non-finite values that json can't represent",
                display_path(path)
            ),
            TrainErr::Shape(e) => write!(f, "shape error: {e}"),
            TrainErr::Json(e) => write!(f, "json error: {e}"),
            TrainErr::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for TrainErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TrainErr::Shape(e) => Some(e),
            TrainErr::Json(e) => Some(e),
            TrainErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ShapeError> for TrainErr {
    fn from(value: ShapeError) -> Self {
        Self::Shape(value)
    }
}

impl From<serde_json::Error> for TrainErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

impl From<io::Error> for TrainErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<rand_distr::uniform::Error> for TrainErr {
    fn from(value: rand_distr::uniform::Error) -> Self {
        Self::InvalidInit(value.to_string())
    }
}
