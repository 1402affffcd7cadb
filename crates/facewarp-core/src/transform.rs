//! 3×3 similarity transforms in the homogeneous row-vector convention.
//!
//! A point `(u, v)` maps to `(x, y)` via `[x y 1] = [u v 1] · T`. The
//! non-reflective family is
//! ```text
//! |  sc  ss  0 |
//! | -ss  sc  0 |
//! |  tx  ty  1 |
//! ```
//! so that `x = u·sc − v·ss + tx` and `y = u·ss + v·sc + ty`. A reflected
//! transform is that matrix post-multiplied by `diag(-1, 1, 1)`.

use crate::error::AlignError;
use crate::types::Point2D;
use nalgebra::{Matrix3, RowVector3};
use serde::{Deserialize, Serialize};

const AFFINE_COLUMN_TOLERANCE: f64 = 1e-12;

/// An affine map restricted to uniform scale, rotation, translation and
/// optional reflection. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TransformRepr", into = "TransformRepr")]
pub struct SimilarityTransform {
    matrix: Matrix3<f64>,
}

impl SimilarityTransform {
    pub fn identity() -> Self {
        Self {
            matrix: Matrix3::identity(),
        }
    }

    /// Build the non-reflective transform `[sc, ss, tx, ty]`.
    pub fn from_params(sc: f64, ss: f64, tx: f64, ty: f64) -> Self {
        #[rustfmt::skip]
        let matrix = Matrix3::new(
            sc,  ss,  0.0,
            -ss, sc,  0.0,
            tx,  ty,  1.0,
        );
        Self { matrix }
    }

    /// Wrap an existing matrix. The last column must be `(0, 0, 1)` and the
    /// upper-left block a scaled rotation, with or without reflection.
    pub fn from_matrix(matrix: Matrix3<f64>) -> Result<Self, AlignError> {
        if matrix.iter().any(|v| !v.is_finite()) {
            return Err(AlignError::geometry("transform has non-finite entries"));
        }
        let last = [matrix[(0, 2)], matrix[(1, 2)], matrix[(2, 2)] - 1.0];
        if last.iter().any(|v| v.abs() > AFFINE_COLUMN_TOLERANCE) {
            return Err(AlignError::geometry(
                "transform last column must be (0, 0, 1)",
            ));
        }

        let (a, b, c, d) = (
            matrix[(0, 0)],
            matrix[(0, 1)],
            matrix[(1, 0)],
            matrix[(1, 1)],
        );
        let scale_sq = a * a + b * b;
        let tol = AFFINE_COLUMN_TOLERANCE.max(scale_sq * 1e-9);
        let rotation_like = (a - d).powi(2) + (b + c).powi(2) <= tol;
        let reflection_like = (a + d).powi(2) + (b - c).powi(2) <= tol;
        if !rotation_like && !reflection_like {
            return Err(AlignError::geometry(
                "linear part is not a uniform scale with rotation",
            ));
        }

        Ok(Self { matrix })
    }

    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.matrix
    }

    /// Compose with a mirror of the output x-axis.
    pub fn reflected(&self) -> Self {
        let mirror = Matrix3::from_diagonal(&nalgebra::Vector3::new(-1.0, 1.0, 1.0));
        Self {
            matrix: self.matrix * mirror,
        }
    }

    /// Determinant of the upper-left 2×2 block. Negative for reflections.
    pub fn linear_determinant(&self) -> f64 {
        let m = &self.matrix;
        m[(0, 0)] * m[(1, 1)] - m[(0, 1)] * m[(1, 0)]
    }

    pub fn is_reflection(&self) -> bool {
        self.linear_determinant() < 0.0
    }

    /// Uniform scale factor `sqrt(sc² + ss²)`.
    pub fn scale(&self) -> f64 {
        self.matrix[(0, 0)].hypot(self.matrix[(0, 1)])
    }

    /// Rotation angle in radians of the reflection-free part.
    pub fn rotation(&self) -> f64 {
        let (sc, ss) = if self.is_reflection() {
            (-self.matrix[(0, 0)], self.matrix[(0, 1)])
        } else {
            (self.matrix[(0, 0)], self.matrix[(0, 1)])
        };
        ss.atan2(sc)
    }

    pub fn translation(&self) -> (f64, f64) {
        (self.matrix[(2, 0)], self.matrix[(2, 1)])
    }

    /// Algebraic inverse, `None` when the transform collapses the plane.
    ///
    /// A linear part at or below the rounding error of the translation
    /// counts as collapsed.
    pub fn inverse(&self) -> Option<Self> {
        let (tx, ty) = self.translation();
        if self.linear_determinant().abs() <= f64::MIN_POSITIVE
            || self.scale() <= f64::EPSILON * tx.hypot(ty)
        {
            return None;
        }
        let mut inv = self.matrix.try_inverse()?;
        if inv.iter().any(|v| !v.is_finite()) {
            return None;
        }
        inv[(0, 2)] = 0.0;
        inv[(1, 2)] = 0.0;
        inv[(2, 2)] = 1.0;
        Some(Self { matrix: inv })
    }

    /// Apply `self` first, then `then`.
    pub fn compose(&self, then: &SimilarityTransform) -> Self {
        Self {
            matrix: self.matrix * then.matrix,
        }
    }

    pub fn apply(&self, p: Point2D) -> Point2D {
        let v = RowVector3::new(p.x, p.y, 1.0) * self.matrix;
        Point2D::new(v[0] / v[2], v[1] / v[2])
    }

    /// The affine part as a column-vector 2×3 matrix `[[a, c, tx], [b, d, ty]]`,
    /// so that `x = a·u + c·v + tx` and `y = b·u + d·v + ty`.
    pub fn affine_2x3(&self) -> [[f64; 3]; 2] {
        let m = &self.matrix;
        [
            [m[(0, 0)], m[(1, 0)], m[(2, 0)]],
            [m[(0, 1)], m[(1, 1)], m[(2, 1)]],
        ]
    }
}

impl Default for SimilarityTransform {
    fn default() -> Self {
        Self::identity()
    }
}

#[derive(Serialize, Deserialize)]
struct TransformRepr {
    matrix: [[f64; 3]; 3],
}

impl TryFrom<TransformRepr> for SimilarityTransform {
    type Error = AlignError;

    fn try_from(repr: TransformRepr) -> Result<Self, Self::Error> {
        let r = repr.matrix;
        Self::from_matrix(Matrix3::new(
            r[0][0], r[0][1], r[0][2], r[1][0], r[1][1], r[1][2], r[2][0], r[2][1], r[2][2],
        ))
    }
}

impl From<SimilarityTransform> for TransformRepr {
    fn from(t: SimilarityTransform) -> Self {
        let m = t.matrix;
        let row = |i: usize| [m[(i, 0)], m[(i, 1)], m[(i, 2)]];
        Self {
            matrix: [row(0), row(1), row(2)],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::FRAC_PI_6;

    #[test]
    fn test_params_layout() {
        let t = SimilarityTransform::from_params(2.0, 0.5, 3.0, -1.0);
        let p = t.apply(Point2D::new(1.0, 2.0));
        // x = u·sc − v·ss + tx, y = u·ss + v·sc + ty
        assert_abs_diff_eq!(p.x, 2.0 - 1.0 + 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(p.y, 0.5 + 4.0 - 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_scale_rotation_translation() {
        let (s, theta) = (1.5, FRAC_PI_6);
        let t = SimilarityTransform::from_params(s * theta.cos(), s * theta.sin(), 4.0, 5.0);
        assert_abs_diff_eq!(t.scale(), s, epsilon = 1e-12);
        assert_abs_diff_eq!(t.rotation(), theta, epsilon = 1e-12);
        assert_eq!(t.translation(), (4.0, 5.0));
        assert!(!t.is_reflection());
    }

    #[test]
    fn test_reflected_keeps_scale_and_rotation() {
        let (s, theta) = (0.75, -0.4_f64);
        let t = SimilarityTransform::from_params(s * theta.cos(), s * theta.sin(), 1.0, 2.0);
        let r = t.reflected();
        assert!(r.is_reflection());
        assert!(r.linear_determinant() < 0.0);
        assert_abs_diff_eq!(r.scale(), s, epsilon = 1e-12);
        assert_abs_diff_eq!(r.rotation(), theta, epsilon = 1e-12);

        let p = Point2D::new(3.0, -2.0);
        let a = t.apply(p);
        let b = r.apply(p);
        assert_abs_diff_eq!(b.x, -a.x, epsilon = 1e-12);
        assert_abs_diff_eq!(b.y, a.y, epsilon = 1e-12);
    }

    #[test]
    fn test_inverse_roundtrip() {
        let t = SimilarityTransform::from_params(0.9, -0.3, 12.0, -7.5).reflected();
        let inv = t.inverse().unwrap();
        let p = Point2D::new(41.0, 17.25);
        let q = inv.apply(t.apply(p));
        assert_abs_diff_eq!(q.x, p.x, epsilon = 1e-9);
        assert_abs_diff_eq!(q.y, p.y, epsilon = 1e-9);

        let id = t.compose(&inv);
        assert_abs_diff_eq!(*id.matrix(), Matrix3::identity(), epsilon = 1e-12);
    }

    #[test]
    fn test_singular_has_no_inverse() {
        let t = SimilarityTransform::from_params(0.0, 0.0, 3.0, 3.0);
        assert!(t.inverse().is_none());
    }

    #[test]
    fn test_rounding_level_scale_has_no_inverse() {
        // What a least-squares fit onto coincident points at (2, 2) returns.
        let t = SimilarityTransform::from_params(4.4e-16, 0.0, 2.0, 2.0);
        assert!(t.inverse().is_none());

        let tiny = SimilarityTransform::from_params(1e-21, 0.0, 0.0, 0.0);
        let inv = tiny.inverse().unwrap();
        assert_abs_diff_eq!(inv.scale(), 1e21, epsilon = 1e9);
    }

    #[test]
    fn test_affine_2x3_matches_apply() {
        let t = SimilarityTransform::from_params(1.2, 0.4, -3.0, 8.0);
        let [[a, c, tx], [b, d, ty]] = t.affine_2x3();
        let (u, v) = (5.0, -6.0);
        let p = t.apply(Point2D::new(u, v));
        assert_abs_diff_eq!(p.x, a * u + c * v + tx, epsilon = 1e-12);
        assert_abs_diff_eq!(p.y, b * u + d * v + ty, epsilon = 1e-12);
    }

    #[test]
    fn test_from_matrix_rejects_non_similarity() {
        let shear = Matrix3::new(1.0, 0.0, 0.0, 0.5, 1.0, 0.0, 0.0, 0.0, 1.0);
        assert!(matches!(
            SimilarityTransform::from_matrix(shear),
            Err(AlignError::InvalidGeometry(_))
        ));
        let projective = Matrix3::new(1.0, 0.0, 0.1, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0);
        assert!(SimilarityTransform::from_matrix(projective).is_err());
    }

    #[test]
    fn test_serde_matrix_rows() {
        let t = SimilarityTransform::from_params(1.0, 0.0, 1.0, 1.0);
        let json = serde_json::to_value(t).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "matrix": [[1.0, 0.0, 0.0], [-0.0, 1.0, 0.0], [1.0, 1.0, 1.0]] })
        );
        let back: SimilarityTransform = serde_json::from_value(json).unwrap();
        assert_eq!(back, t);
    }
}
