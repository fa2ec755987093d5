use std::fmt;
use std::path::PathBuf;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// What a mismatched shape was compared against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpectedShape {
    Shape(Vec<usize>),
    /// Only the number of axes is known.
    Rank(usize),
}

impl From<Vec<usize>> for ExpectedShape {
    fn from(shape: Vec<usize>) -> Self {
        Self::Shape(shape)
    }
}

impl fmt::Display for ExpectedShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shape(shape) => write!(f, "{shape:?}"),
            Self::Rank(n) => write!(f, "{n} axes"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    General(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("input not found: {}", .0.display())]
    InputNotFound(PathBuf),
    #[error("found 0 files with extensions {extensions:?} in {}", path.display())]
    NoInputFiles {
        path: PathBuf,
        extensions: &'static [&'static str],
    },
    #[error("unsupported axis layout {layout:?}: {reason}")]
    UnsupportedLayout { layout: String, reason: String },
    #[error("shape mismatch for layout {layout}: {left:?} != {right}")]
    ShapeMismatch {
        layout: String,
        left: Vec<usize>,
        right: ExpectedShape,
    },
    #[error("voxel size is not calibrated and no override was given for axis {axis:?}")]
    MissingCalibration { axis: char },
    #[error("not implemented: {0}")]
    NotImplemented(String),
    #[error("unsupported dimensionality: {0}")]
    UnsupportedDimensionality(String),
    #[error("region out of bounds: {0}")]
    OutOfBounds(String),
    #[error("incompatible backend: {0}")]
    Incompatible(String),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Storage(#[from] zarrs::storage::StorageError),
    #[error(transparent)]
    ArrayCreate(#[from] zarrs::array::ArrayCreateError),
    #[error(transparent)]
    Array(#[from] zarrs::array::ArrayError),
    #[error(transparent)]
    GroupCreate(#[from] zarrs::group::GroupCreateError),
    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
    #[error(transparent)]
    Tiff(#[from] tiff::TiffError),
    #[cfg(feature = "hdf5")]
    #[error(transparent)]
    Hdf5(#[from] hdf5::Error),
    #[error(transparent)]
    Wrapped(Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    pub fn general(message: impl Into<String>) -> Self {
        Self::General(message.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn wrap(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Wrapped(Box::new(error))
    }
}
