//! The crate-wide error type and result alias.

use std::io;

/// The primary error type for this crate.
#[derive(thiserror::Error, Debug)]
pub enum NanoError {
    /// Tensor, layer or model dimensions are incompatible for an operation.
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// An unknown component name or an out-of-range configuration value.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A non-finite loss or gradient was observed during training.
    #[error("divergence: {0}")]
    Divergence(String),

    /// Line search could not make progress along a descent direction.
    #[error("line search failed: {0}")]
    LineSearchFailure(String),

    /// A model file is malformed or does not match the current architecture.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Wrapper for standard I/O errors.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// A specialized `Result` type for this crate, using `NanoError`.
pub type NanoResult<T> = Result<T, NanoError>;
