//! Error types for the tile pyramid partitioner.

use thiserror::Error;

/// Errors that can occur while building a tile pyramid.
#[derive(Error, Debug)]
pub enum TilerError {
    #[error("tile {coords} rejected a batch with a different schema than its first: {detail}")]
    SchemaMismatch { coords: String, detail: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("tile {0} has children but its partial file is missing")]
    MissingPartialFile(String),

    #[error("dictionary value {0:?} absent from the global table and no sentinel was configured")]
    DictionaryKeyMissing(String),

    #[error("row with coordinates outside its tile's extent at {0}; this should be unreachable")]
    OutsideExtent(String),
}

/// Result type alias used throughout this crate.
pub type TilerResult<T> = Result<T, TilerError>;
