pub mod compat;
pub mod convert;
mod error;
pub mod image;
pub mod io;
pub mod layout;
pub mod metadata;
pub mod pyramid;
pub mod record;
pub mod roi;
pub mod segmentation;
pub mod storage;
pub mod volume;
pub mod writer;

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

pub use zarrs;

pub use error::{Error, ExpectedShape, Result};

/// Deserialize task parameters from a JSON file.
pub(crate) fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    if !path.is_file() {
        return Err(Error::InputNotFound(path.to_path_buf()));
    }
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}
