//! Error types for textual board inputs.

use thiserror::Error;

/// Errors from parsing board identifiers.
///
/// Board operations themselves never fail; they normalise their input.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BoardError {
    /// The shift literal is not `day` or `night`.
    #[error("invalid shift: {0}")]
    InvalidShift(String),

    /// The slot target could not be parsed.
    #[error("invalid slot target: {0}")]
    InvalidTarget(String),
}
