//! Error types shared by every stage of the carbon pipeline.
//!
//! Misaligned inputs and unknown classes are fatal: the computation stops
//! instead of producing numbers that look plausible but are wrong. A zone
//! with no valid cells is not an error; see [`crate::aggregate::MeanDensity`].

use std::path::PathBuf;

use crate::grid::GridExtent;

pub type Result<T> = std::result::Result<T, CarbonError>;

#[derive(Debug, thiserror::Error)]
pub enum CarbonError {
    /// A grid holds a class code the pool table does not define.
    #[error("land-cover class {code} has no entry in the pool table ({cells} cells affected)")]
    UnknownClass { code: i32, cells: usize },

    /// A zone mask does not cover the grid it is applied to.
    #[error("zone '{zone}' has extent {found}, grid has extent {expected}")]
    ZoneExtentMismatch {
        zone: String,
        expected: GridExtent,
        found: GridExtent,
    },

    /// Two grids that must be compared cell-for-cell are not aligned.
    #[error("grid mismatch: {0}")]
    GridMismatch(String),

    /// Missing or invalid parameters.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("unknown zone '{0}'")]
    UnknownZone(String),

    #[error("zone '{0}' defined more than once")]
    DuplicateZone(String),

    #[error("land-cover class {0} defined more than once in the pool table")]
    DuplicateClass(i32),

    /// Malformed input text.
    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CarbonError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        CarbonError::Configuration(message.into())
    }

    pub(crate) fn parse(line: usize, message: impl Into<String>) -> Self {
        CarbonError::Parse {
            line,
            message: message.into(),
        }
    }
}
