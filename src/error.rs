//! Error types for template rescaling.

use std::path::PathBuf;
use std::time::Duration;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while rescaling a template for one subject.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing subject identifier or measurement set.
    #[error("invalid input: {0}")]
    Input(String),

    /// A required measurement is absent.
    #[error("missing required measurement '{0}'")]
    MissingField(&'static str),

    /// A measurement is zero, negative or not a finite number.
    #[error("measurement '{field}' must be a positive finite number, got {value}")]
    InvalidValue {
        /// Name of the offending measurement.
        field: &'static str,
        /// The rejected value.
        value: f64,
    },

    /// The height cannot form a right triangle with half the width.
    #[error(
        "height {height} cm must exceed half the width ({half_width} cm) to recover a vertical extent"
    )]
    Geometry {
        /// Ear-to-vertex measurement.
        height: f64,
        /// Half of the ear-to-ear measurement.
        half_width: f64,
    },

    /// Template or resampling engine could not be located or configured.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The resampling engine reported a failure.
    #[error("resampling engine failed: {0}")]
    ExternalEngine(String),

    /// The resampling engine did not finish in time.
    #[error("resampling engine did not finish within {0:?}")]
    EngineTimeout(Duration),

    /// The resampled volume was not found where the engine should have written it.
    #[error("expected resampled volume not found: {}", .0.display())]
    MissingOutput(PathBuf),

    /// A composed affine is singular or contains non-finite values.
    #[error("invalid affine: {0}")]
    InvalidAffine(String),

    /// Underlying filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// File does not start with a recognised NIfTI header.
    #[error("invalid NIfTI magic bytes: {0:?}")]
    InvalidMagic([u8; 4]),

    /// Header dimensions or offsets are inconsistent.
    #[error("invalid dimensions: {0}")]
    InvalidDimensions(String),

    /// Unknown NIfTI datatype code.
    #[error("unsupported data type code: {0}")]
    UnsupportedDataType(i16),

    /// Gzip stream could not be decoded.
    #[error("decompression failed: {0}")]
    Decompression(String),
}

impl Error {
    /// Whether the failure leaves the job in a state that can be retried
    /// without repeating the resample call.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::MissingOutput(_))
    }

    /// Whether the failure was raised before any file was touched.
    pub fn is_input_rejection(&self) -> bool {
        matches!(
            self,
            Self::Input(_) | Self::MissingField(_) | Self::InvalidValue { .. } | Self::Geometry { .. }
        )
    }
}
