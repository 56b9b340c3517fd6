//! Python bindings for headfit.

pub mod errors;
pub mod module;
