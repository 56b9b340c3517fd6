//! Mapping of crate errors onto Python exceptions.

use pyo3::exceptions::{
    PyFileNotFoundError, PyIOError, PyRuntimeError, PyTimeoutError, PyValueError,
};

use crate::error::Error;

/// Convert a headfit error to the matching Python exception.
///
/// Bad measurements and malformed templates raise `ValueError`; missing
/// files raise `FileNotFoundError`; engine failures raise `RuntimeError`,
/// or `TimeoutError` when the engine ran out of time.
pub fn to_py_err(e: Error, context: &str) -> pyo3::PyErr {
    let message = format!("{}: {}", context, e);
    match &e {
        Error::Input(_)
        | Error::MissingField(_)
        | Error::InvalidValue { .. }
        | Error::Geometry { .. }
        | Error::InvalidAffine(_)
        | Error::InvalidMagic(_)
        | Error::InvalidDimensions(_)
        | Error::UnsupportedDataType(_)
        | Error::Decompression(_) => PyValueError::new_err(message),
        Error::MissingOutput(_) => PyFileNotFoundError::new_err(message),
        Error::Io(io_err) if io_err.kind() == std::io::ErrorKind::NotFound => {
            PyFileNotFoundError::new_err(message)
        }
        Error::Io(_) => PyIOError::new_err(message),
        Error::EngineTimeout(_) => PyTimeoutError::new_err(message),
        Error::Configuration(_) | Error::ExternalEngine(_) => PyRuntimeError::new_err(message),
    }
}
