//! Error types for the data-loader crate.

use thiserror::Error;

/// Why the anime catalog or the feedback table couldn't be loaded
#[derive(Error, Debug)]
pub enum DataLoadError {
    #[error("cannot open {path}")]
    FileNotFound { path: String },

    /// Reading failed part way through a file
    #[error("read error in {file}: {source}")]
    Io {
        file: String,
        #[source]
        source: std::io::Error,
    },

    /// A CSV record couldn't be decoded.
    ///
    /// `line` is 1-based and counts the header row.
    #[error("{file}:{line}: {reason}")]
    ParseError {
        file: String,
        line: usize,
        reason: String,
    },

    /// A decoded field is outside its allowed range
    #[error("{field} has out-of-range value {value}")]
    InvalidValue { field: String, value: String },

    /// A record points at something that isn't loaded, e.g. feedback for an
    /// anime missing from the catalog
    #[error("{entity} {id} is not in the dataset")]
    MissingReference { entity: String, id: u32 },
}

pub type Result<T> = std::result::Result<T, DataLoadError>;
