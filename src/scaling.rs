//! Scale factors derived from head measurements.
//!
//! The ear-to-vertex measurement is the hypotenuse of a right triangle whose
//! horizontal leg is half the ear-to-ear width. The vertical leg recovered
//! from it is compared against the template's own height.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::measurements::HeadMeasurements;

/// Intrinsic head dimensions of the reference template, in centimetres.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct ReferenceGeometry {
    /// Template ear-to-ear width.
    pub ref_width: f64,
    /// Template front-to-back depth.
    pub ref_depth: f64,
    /// Template vertical extent.
    pub ref_height: f64,
}

impl ReferenceGeometry {
    /// Dimensions of the MNI152 template.
    pub const MNI: Self = Self {
        ref_width: 16.0,
        ref_depth: 21.0,
        ref_height: 15.0,
    };
}

impl Default for ReferenceGeometry {
    fn default() -> Self {
        Self::MNI
    }
}

/// Per-axis scale factors applied to the template.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScalingFactors {
    /// Left-right factor.
    pub fx: f64,
    /// Anterior-posterior factor.
    pub fy: f64,
    /// Inferior-superior factor.
    pub fz: f64,
}

impl ScalingFactors {
    /// Factors as `[fx, fy, fz]`.
    pub const fn as_array(&self) -> [f64; 3] {
        [self.fx, self.fy, self.fz]
    }
}

impl std::fmt::Display for ScalingFactors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:.3}, {:.3}, {:.3}]", self.fx, self.fy, self.fz)
    }
}

/// Vertical extent recovered from the diagonal ear-to-vertex measurement.
///
/// Fails with [`Error::Geometry`] when `height <= width / 2`.
pub fn calculated_height(width: f64, height: f64) -> Result<f64> {
    let half_width = width / 2.0;
    let radicand = height * height - half_width * half_width;
    if !(radicand > 0.0) {
        return Err(Error::Geometry { height, half_width });
    }
    Ok(radicand.sqrt())
}

/// Compute scale factors for `measurements` relative to `reference`.
#[must_use = "this function returns the computed factors"]
pub fn compute(
    measurements: &HeadMeasurements,
    reference: &ReferenceGeometry,
) -> Result<ScalingFactors> {
    let vertical = calculated_height(measurements.width(), measurements.height())?;

    let factors = ScalingFactors {
        fx: measurements.width() / reference.ref_width,
        fy: measurements.depth() / reference.ref_depth,
        fz: vertical / reference.ref_height,
    };

    if factors.as_array().iter().any(|f| !f.is_finite() || *f <= 0.0) {
        return Err(Error::Configuration(format!(
            "reference geometry {:?} yields non-positive scale factors {}",
            reference, factors
        )));
    }

    Ok(factors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurements::{validate, MeasurementInput};

    fn measure(width: f64, depth: f64, height: f64) -> HeadMeasurements {
        validate(&MeasurementInput::new(width, depth, height)).unwrap()
    }

    #[test]
    fn test_reference_example() {
        let f = compute(&measure(14.5, 19.2, 13.8), &ReferenceGeometry::MNI).unwrap();
        assert_eq!(f.fx, 0.90625);
        assert!((f.fy - 0.914_285_714).abs() < 1e-6);
        assert!((f.fz - 0.782_8).abs() < 1e-4);
        assert_eq!(f.to_string(), "[0.906, 0.914, 0.783]");
    }

    #[test]
    fn test_calculated_height_example() {
        let h = calculated_height(14.5, 13.8).unwrap();
        assert!((h - 137.8775f64.sqrt()).abs() < 1e-12);
        assert!((h - 11.742).abs() < 1e-3);
    }

    #[test]
    fn test_formula_holds_across_inputs() {
        for &(w, d, h) in &[
            (12.0, 18.0, 6.5),
            (14.5, 19.2, 13.8),
            (16.0, 21.0, 17.0),
            (20.0, 25.0, 10.01),
        ] {
            let f = compute(&measure(w, d, h), &ReferenceGeometry::MNI).unwrap();
            let vertical = (h * h - (w / 2.0) * (w / 2.0)).sqrt();
            assert_eq!(f.fx, w / 16.0);
            assert_eq!(f.fy, d / 21.0);
            assert_eq!(f.fz, vertical / 15.0);
            assert!(f.fx > 0.0 && f.fy > 0.0 && f.fz > 0.0);
            assert!(vertical <= h);
        }
    }

    #[test]
    fn test_negative_radicand_is_geometry_error() {
        // 5^2 - 10^2 = -75
        assert!(matches!(
            calculated_height(20.0, 5.0),
            Err(Error::Geometry { .. })
        ));
    }

    #[test]
    fn test_repeated_calls_are_bit_identical() {
        let m = measure(14.5, 19.2, 13.8);
        let first = compute(&m, &ReferenceGeometry::MNI).unwrap();
        let _ = compute(&measure(18.0, 20.0, 15.0), &ReferenceGeometry::MNI).unwrap();
        let second = compute(&m, &ReferenceGeometry::MNI).unwrap();
        assert_eq!(first.fx.to_bits(), second.fx.to_bits());
        assert_eq!(first.fy.to_bits(), second.fy.to_bits());
        assert_eq!(first.fz.to_bits(), second.fz.to_bits());
    }

    #[test]
    fn test_degenerate_reference_rejected() {
        let reference = ReferenceGeometry {
            ref_width: 0.0,
            ..ReferenceGeometry::MNI
        };
        assert!(matches!(
            compute(&measure(14.5, 19.2, 13.8), &reference),
            Err(Error::Configuration(_))
        ));
    }
}
