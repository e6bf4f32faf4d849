use core::ops::Mul;

use super::Vec2;

/// Affine 3×3 matrix, row-major.
///
/// Points are treated as column vectors `(x, y, 1)`; the translation lives in
/// the third column. `a * b` applies `b` first, then `a`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Matrix33 {
    m: [f32; 9],
}

impl Default for Matrix33 {
    fn default() -> Self {
        Self::identity()
    }
}

impl Matrix33 {
    pub const IDENTITY: Matrix33 = Matrix33 {
        m: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
    };

    #[inline]
    pub const fn identity() -> Self {
        Self::IDENTITY
    }

    #[inline]
    pub const fn from_rows(m: [f32; 9]) -> Self {
        Self { m }
    }

    #[inline]
    pub const fn values(&self) -> &[f32; 9] {
        &self.m
    }

    pub fn translation(x: f32, y: f32) -> Self {
        Self::from_rows([1.0, 0.0, x, 0.0, 1.0, y, 0.0, 0.0, 1.0])
    }

    pub fn scaling(sx: f32, sy: f32) -> Self {
        Self::from_rows([sx, 0.0, 0.0, 0.0, sy, 0.0, 0.0, 0.0, 1.0])
    }

    /// Counter-clockwise rotation by `degrees` (in a +Y up frame).
    pub fn rotation(degrees: f32) -> Self {
        let (sin, cos) = degrees.to_radians().sin_cos();
        Self::from_rows([cos, -sin, 0.0, sin, cos, 0.0, 0.0, 0.0, 1.0])
    }

    /// Local transform `T * R * S`: scale, then rotate, then translate.
    pub fn from_trs(position: Vec2, degrees: f32, scale: f32) -> Self {
        Self::translation(position.x, position.y)
            * Self::rotation(degrees)
            * Self::scaling(scale, scale)
    }

    /// Returns the translation column.
    #[inline]
    pub fn translation_part(&self) -> Vec2 {
        Vec2::new(self.m[2], self.m[5])
    }

    pub fn transform_point(&self, p: Vec2) -> Vec2 {
        let m = &self.m;
        Vec2::new(
            m[0] * p.x + m[1] * p.y + m[2],
            m[3] * p.x + m[4] * p.y + m[5],
        )
    }

    pub fn determinant(&self) -> f32 {
        let m = &self.m;
        m[0] * (m[4] * m[8] - m[5] * m[7]) - m[1] * (m[3] * m[8] - m[5] * m[6])
            + m[2] * (m[3] * m[7] - m[4] * m[6])
    }

    /// Returns the inverse, or `None` if the matrix is singular.
    pub fn inverse(&self) -> Option<Self> {
        let det = self.determinant();
        if det.abs() <= f32::EPSILON {
            return None;
        }

        let m = &self.m;
        let inv = 1.0 / det;
        Some(Self::from_rows([
            (m[4] * m[8] - m[5] * m[7]) * inv,
            (m[2] * m[7] - m[1] * m[8]) * inv,
            (m[1] * m[5] - m[2] * m[4]) * inv,
            (m[5] * m[6] - m[3] * m[8]) * inv,
            (m[0] * m[8] - m[2] * m[6]) * inv,
            (m[2] * m[3] - m[0] * m[5]) * inv,
            (m[3] * m[7] - m[4] * m[6]) * inv,
            (m[1] * m[6] - m[0] * m[7]) * inv,
            (m[0] * m[4] - m[1] * m[3]) * inv,
        ]))
    }

    /// Column-major copy padded to three `vec4` columns (WGSL `mat3x3<f32>` layout).
    pub fn to_std140_columns(&self) -> [[f32; 4]; 3] {
        let m = &self.m;
        [
            [m[0], m[3], m[6], 0.0],
            [m[1], m[4], m[7], 0.0],
            [m[2], m[5], m[8], 0.0],
        ]
    }

    pub fn approx_eq(&self, other: &Matrix33, eps: f32) -> bool {
        self.m
            .iter()
            .zip(other.m.iter())
            .all(|(a, b)| (a - b).abs() <= eps)
    }
}

impl Mul for Matrix33 {
    type Output = Matrix33;

    fn mul(self, rhs: Matrix33) -> Matrix33 {
        let a = &self.m;
        let b = &rhs.m;
        let mut out = [0.0f32; 9];
        for row in 0..3 {
            for col in 0..3 {
                out[row * 3 + col] = (0..3).map(|k| a[row * 3 + k] * b[k * 3 + col]).sum();
            }
        }
        Matrix33 { m: out }
    }
}

impl Mul<Vec2> for Matrix33 {
    type Output = Vec2;

    #[inline]
    fn mul(self, rhs: Vec2) -> Vec2 {
        self.transform_point(rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-5;

    // ── construction ──────────────────────────────────────────────────────

    #[test]
    fn default_is_identity() {
        assert_eq!(Matrix33::default(), Matrix33::IDENTITY);
        let p = Vec2::new(3.0, -4.0);
        assert_eq!(Matrix33::identity().transform_point(p), p);
    }

    #[test]
    fn translation_moves_points() {
        let m = Matrix33::translation(2.0, -1.0);
        assert_eq!(m.transform_point(Vec2::new(1.0, 1.0)), Vec2::new(3.0, 0.0));
        assert_eq!(m.translation_part(), Vec2::new(2.0, -1.0));
    }

    #[test]
    fn rotation_quarter_turn() {
        let p = Matrix33::rotation(90.0).transform_point(Vec2::new(1.0, 0.0));
        assert!(p.approx_eq(Vec2::new(0.0, 1.0), EPS), "{p:?}");
    }

    // ── composition ───────────────────────────────────────────────────────

    #[test]
    fn trs_scales_then_rotates_then_translates() {
        let m = Matrix33::from_trs(Vec2::new(10.0, 0.0), 90.0, 2.0);
        let p = m.transform_point(Vec2::new(1.0, 0.0));
        assert!(p.approx_eq(Vec2::new(10.0, 2.0), EPS), "{p:?}");
    }

    #[test]
    fn multiply_applies_right_operand_first() {
        let t = Matrix33::translation(5.0, 0.0);
        let s = Matrix33::scaling(2.0, 2.0);
        assert_eq!((t * s).transform_point(Vec2::new(1.0, 1.0)), Vec2::new(7.0, 2.0));
        assert_eq!((s * t).transform_point(Vec2::new(1.0, 1.0)), Vec2::new(12.0, 2.0));
    }

    // ── inverse ───────────────────────────────────────────────────────────

    #[test]
    fn inverse_round_trips() {
        let m = Matrix33::from_trs(Vec2::new(3.0, -7.0), 30.0, 1.5);
        let inv = m.inverse().unwrap();
        assert!((m * inv).approx_eq(&Matrix33::IDENTITY, 1e-4));
    }

    #[test]
    fn singular_has_no_inverse() {
        assert!(Matrix33::scaling(0.0, 1.0).inverse().is_none());
    }

    #[test]
    fn std140_columns_are_padded() {
        let cols = Matrix33::translation(4.0, 5.0).to_std140_columns();
        assert_eq!(cols[2], [4.0, 5.0, 1.0, 0.0]);
    }
}
