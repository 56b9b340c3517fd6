//! Head measurements and their validation.
//!
//! Raw caller input arrives as a [`MeasurementInput`] whose fields may be
//! absent. [`validate`] checks it against a fixed set of required fields and
//! produces an immutable [`HeadMeasurements`] that the rest of the pipeline
//! can rely on.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Measurements every job must supply, in the order they are checked.
pub const REQUIRED_FIELDS: [&str; 3] = ["width", "depth", "height"];

/// Unvalidated measurements as supplied by a caller, in centimetres.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, Serialize)]
pub struct MeasurementInput {
    /// Ear-to-ear distance (preauricular points).
    #[serde(default)]
    pub width: Option<f64>,
    /// Front-to-back distance.
    #[serde(default)]
    pub depth: Option<f64>,
    /// Straight-line distance from the ear to the vertex.
    #[serde(default)]
    pub height: Option<f64>,
}

impl MeasurementInput {
    /// All three measurements present.
    pub const fn new(width: f64, depth: f64, height: f64) -> Self {
        Self {
            width: Some(width),
            depth: Some(depth),
            height: Some(height),
        }
    }

    fn field(&self, name: &str) -> Option<f64> {
        match name {
            "width" => self.width,
            "depth" => self.depth,
            "height" => self.height,
            _ => None,
        }
    }
}

/// Validated head measurements in centimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HeadMeasurements {
    width: f64,
    depth: f64,
    height: f64,
}

impl HeadMeasurements {
    /// Ear-to-ear distance.
    pub const fn width(&self) -> f64 {
        self.width
    }

    /// Front-to-back distance.
    pub const fn depth(&self) -> f64 {
        self.depth
    }

    /// Ear-to-vertex distance.
    pub const fn height(&self) -> f64 {
        self.height
    }
}

impl TryFrom<MeasurementInput> for HeadMeasurements {
    type Error = Error;

    fn try_from(input: MeasurementInput) -> Result<Self> {
        validate(&input)
    }
}

/// Validate raw measurements.
///
/// Fails with [`Error::MissingField`] for the first absent field,
/// [`Error::InvalidValue`] for the first value that is not a positive finite
/// number, and [`Error::Geometry`] when `height <= width / 2`.
pub fn validate(input: &MeasurementInput) -> Result<HeadMeasurements> {
    let mut values = [0.0f64; 3];
    for (slot, name) in values.iter_mut().zip(REQUIRED_FIELDS) {
        *slot = input.field(name).ok_or(Error::MissingField(name))?;
    }

    for (&value, name) in values.iter().zip(REQUIRED_FIELDS) {
        if !value.is_finite() || value <= 0.0 {
            return Err(Error::InvalidValue { field: name, value });
        }
    }

    let [width, depth, height] = values;
    let half_width = width / 2.0;
    if height <= half_width {
        return Err(Error::Geometry { height, half_width });
    }

    Ok(HeadMeasurements {
        width,
        depth,
        height,
    })
}
