//! Voxel-to-world affine transforms and their composition with scale factors.

use crate::error::{Error, Result};
use crate::scaling::ScalingFactors;

/// A 4x4 voxel-to-world affine in row-major order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine([[f64; 4]; 4]);

impl Affine {
    /// Identity transform.
    pub const IDENTITY: Self = Self([
        [1.0, 0.0, 0.0, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ]);

    /// Wrap a row-major matrix.
    pub const fn from_rows(rows: [[f64; 4]; 4]) -> Self {
        Self(rows)
    }

    /// Diagonal matrix `diag(x, y, z, 1)`.
    pub const fn diagonal(x: f64, y: f64, z: f64) -> Self {
        Self([
            [x, 0.0, 0.0, 0.0],
            [0.0, y, 0.0, 0.0],
            [0.0, 0.0, z, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ])
    }

    /// Row-major matrix.
    pub const fn rows(&self) -> &[[f64; 4]; 4] {
        &self.0
    }

    /// Consume into the row-major matrix.
    pub const fn into_rows(self) -> [[f64; 4]; 4] {
        self.0
    }

    /// Translation column (world coordinates of voxel `(0, 0, 0)`).
    pub const fn translation(&self) -> [f64; 3] {
        [self.0[0][3], self.0[1][3], self.0[2][3]]
    }

    /// Matrix product `self × rhs`.
    #[must_use]
    pub fn matmul(&self, rhs: &Self) -> Self {
        let mut out = [[0.0f64; 4]; 4];
        for (i, row) in out.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                *cell = (0..4).map(|k| self.0[i][k] * rhs.0[k][j]).sum();
            }
        }
        Self(out)
    }

    /// Determinant of the upper-left 3x3 (rotation, zoom and shear) block.
    #[allow(clippy::many_single_char_names)]
    pub fn linear_determinant(&self) -> f64 {
        let m = &self.0;
        let [a, b, c] = [m[0][0], m[0][1], m[0][2]];
        let [d, e, f] = [m[1][0], m[1][1], m[1][2]];
        let [g, h, i] = [m[2][0], m[2][1], m[2][2]];
        a * (e * i - f * h) - b * (d * i - f * g) + c * (d * h - e * g)
    }

    /// Voxel spacing implied by the column norms of the 3x3 block.
    pub fn voxel_sizes(&self) -> [f64; 3] {
        let m = &self.0;
        let norm = |j: usize| (m[0][j] * m[0][j] + m[1][j] * m[1][j] + m[2][j] * m[2][j]).sqrt();
        [norm(0), norm(1), norm(2)]
    }

    /// Check the affine is finite, affine in its last row and invertible.
    pub fn validate(&self) -> Result<()> {
        if self.0.iter().flatten().any(|v| !v.is_finite()) {
            return Err(Error::InvalidAffine(format!(
                "non-finite entry in {:?}",
                self.0
            )));
        }
        if self.0[3] != [0.0, 0.0, 0.0, 1.0] {
            return Err(Error::InvalidAffine(format!(
                "last row must be [0, 0, 0, 1], got {:?}",
                self.0[3]
            )));
        }
        let det = self.linear_determinant();
        if det == 0.0 || !det.is_finite() {
            return Err(Error::InvalidAffine(format!(
                "singular affine (determinant {det})"
            )));
        }
        Ok(())
    }

    /// Compose this template affine with per-axis scale factors.
    ///
    /// The voxel axes are scaled by right-multiplying with
    /// `diag(fx, fy, fz, 1)`. The translation column of that product is then
    /// rescaled element-wise by `[fx, fy, fz]` so that distances from the
    /// anatomical origin shrink or grow with the head. The product alone
    /// leaves the translation untouched.
    #[must_use = "composition returns a new affine and leaves the template unchanged"]
    pub fn apply_scaling(&self, factors: &ScalingFactors) -> Result<Self> {
        let mut scaled = self.matmul(&Self::diagonal(factors.fx, factors.fy, factors.fz));

        for (row, factor) in scaled.0.iter_mut().zip(factors.as_array()) {
            row[3] *= factor;
        }

        scaled.validate()?;
        Ok(scaled)
    }
}

impl Default for Affine {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl From<[[f64; 4]; 4]> for Affine {
    fn from(rows: [[f64; 4]; 4]) -> Self {
        Self(rows)
    }
}

impl std::fmt::Display for Affine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, row) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(
                f,
                "{:>12.6} {:>12.6} {:>12.6} {:>12.6}",
                row[0], row[1], row[2], row[3]
            )?;
        }
        Ok(())
    }
}

/// Compose a template affine with scale factors. See [`Affine::apply_scaling`].
pub fn apply(template: &Affine, factors: &ScalingFactors) -> Result<Affine> {
    template.apply_scaling(factors)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// sform of the 1 mm MNI152 template.
    const MNI_1MM: [[f64; 4]; 4] = [
        [-1.0, 0.0, 0.0, 90.0],
        [0.0, 1.0, 0.0, -126.0],
        [0.0, 0.0, 1.0, -72.0],
        [0.0, 0.0, 0.0, 1.0],
    ];

    fn factors(fx: f64, fy: f64, fz: f64) -> ScalingFactors {
        ScalingFactors { fx, fy, fz }
    }

    #[test]
    fn test_identity_matmul() {
        let a = Affine::from_rows(MNI_1MM);
        assert_eq!(a.matmul(&Affine::IDENTITY), a);
        assert_eq!(Affine::IDENTITY.matmul(&a), a);
    }

    #[test]
    fn test_scaling_mni_affine() {
        let template = Affine::from_rows(MNI_1MM);
        let out = template.apply_scaling(&factors(0.5, 2.0, 0.25)).unwrap();
        let expected = Affine::from_rows([
            [-0.5, 0.0, 0.0, 45.0],
            [0.0, 2.0, 0.0, -252.0],
            [0.0, 0.0, 0.25, -18.0],
            [0.0, 0.0, 0.0, 1.0],
        ]);
        assert_eq!(out, expected);
    }

    #[test]
    fn test_translation_correction_is_separate_from_product() {
        let template = Affine::from_rows(MNI_1MM);
        let f = factors(0.9, 0.8, 0.7);
        let product = template.matmul(&Affine::diagonal(0.9, 0.8, 0.7));
        assert_eq!(product.translation(), template.translation());

        let out = template.apply_scaling(&f).unwrap();
        assert_eq!(out.translation(), [90.0 * 0.9, -126.0 * 0.8, -72.0 * 0.7]);
    }

    #[test]
    fn test_rotation_block_columns_scaled() {
        // 90 degree rotation about z with anisotropic voxels.
        let template = Affine::from_rows([
            [0.0, -2.0, 0.0, 10.0],
            [2.0, 0.0, 0.0, 20.0],
            [0.0, 0.0, 3.0, 30.0],
            [0.0, 0.0, 0.0, 1.0],
        ]);
        let out = template.apply_scaling(&factors(0.5, 0.25, 2.0)).unwrap();
        assert_eq!(out.rows()[1][0], 1.0);
        assert_eq!(out.rows()[0][1], -0.5);
        assert_eq!(out.rows()[2][2], 6.0);
        assert_eq!(out.voxel_sizes(), [1.0, 0.5, 6.0]);
    }

    #[test]
    fn test_template_not_mutated() {
        let template = Affine::from_rows(MNI_1MM);
        let before = template;
        let _ = apply(&template, &factors(0.9, 0.9, 0.8)).unwrap();
        assert_eq!(template, before);
    }

    #[test]
    fn test_result_is_invertible() {
        let out = Affine::from_rows(MNI_1MM)
            .apply_scaling(&factors(0.906, 0.914, 0.783))
            .unwrap();
        assert!(out.linear_determinant().abs() > 0.0);
    }

    #[test]
    fn test_singular_template_rejected() {
        let mut rows = MNI_1MM;
        rows[2][2] = 0.0;
        let err = Affine::from_rows(rows)
            .apply_scaling(&factors(1.0, 1.0, 1.0))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidAffine(_)));
    }
}
