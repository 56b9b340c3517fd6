//! Python module definition.

use std::path::PathBuf;

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use super::errors::to_py_err;
use crate::config::{EngineKind, OptionOverrides, RescaleOptions};
use crate::measurements::{self, MeasurementInput};
use crate::resample::InterpolationMode;
use crate::scaling;

/// Rescale the template to one subject's head.
///
/// Measurements are in centimetres. Unset options fall back to the
/// configuration files and `HEADFIT_*` environment variables.
///
/// Args:
///     subject_id: Subject identifier, used for the output directory
///     width: Ear-to-ear distance
///     depth: Front-to-back distance
///     height: Ear-to-vertex distance
///     template_path: Template volume (.nii or .nii.gz)
///     output_dir: Root directory for per-subject outputs
///     interpolation: "nearest", "linear" or "spline"; configured value if unset
///     engine: "command" or "header"
///
/// Returns:
///     Tuple of the (x, y, z) scale factors
///
/// Example:
///     >>> headfit.rescale_template("sub001", 14.5, 19.2, 13.8)
///     (0.90625, 0.9142857142857143, 0.7829...)
#[pyfunction]
#[pyo3(signature = (subject_id, width, depth, height, template_path=None, output_dir=None, interpolation=None, engine=None))]
#[allow(clippy::too_many_arguments)]
pub fn rescale_template(
    py: Python<'_>,
    subject_id: &str,
    width: Option<f64>,
    depth: Option<f64>,
    height: Option<f64>,
    template_path: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    interpolation: Option<&str>,
    engine: Option<&str>,
) -> PyResult<(f64, f64, f64)> {
    let interpolation: Option<InterpolationMode> = interpolation
        .map(str::parse::<InterpolationMode>)
        .transpose()
        .map_err(|e| PyValueError::new_err(format!("{e}")))?;
    let engine: Option<EngineKind> = engine
        .map(str::parse::<EngineKind>)
        .transpose()
        .map_err(|e| PyValueError::new_err(format!("{e}")))?;

    let mut options =
        RescaleOptions::load().map_err(|e| to_py_err(e, "Failed to load configuration"))?;
    options.apply_overrides(OptionOverrides {
        template_path,
        output_dir,
        interpolation,
        engine,
        ..OptionOverrides::default()
    });

    let input = MeasurementInput {
        width,
        depth,
        height,
    };
    let subject = subject_id.to_string();
    let factors = py
        .allow_threads(move || crate::pipeline::rescale_template(&subject, input, &options))
        .map_err(|e| to_py_err(e, &format!("Failed to rescale template for {}", subject_id)))?;
    Ok((factors.fx, factors.fy, factors.fz))
}

/// Compute scale factors without touching any file.
///
/// Returns:
///     Tuple of the (x, y, z) scale factors against the MNI reference
#[pyfunction]
pub fn compute_scaling(width: f64, depth: f64, height: f64) -> PyResult<(f64, f64, f64)> {
    let factors = measurements::validate(&MeasurementInput::new(width, depth, height))
        .and_then(|m| scaling::compute(&m, &scaling::ReferenceGeometry::MNI))
        .map_err(|e| to_py_err(e, "Invalid measurements"))?;
    Ok((factors.fx, factors.fy, factors.fz))
}

#[pymodule]
fn _headfit(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(rescale_template, m)?)?;
    m.add_function(wrap_pyfunction!(compute_scaling, m)?)?;
    m.add("__version__", env!("CARGO_PKG_VERSION"))?;
    Ok(())
}
