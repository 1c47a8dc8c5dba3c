//! 3D affine map `x ↦ M x + t`.

use nalgebra::{Matrix3, Matrix4, Point3, Rotation3, Vector3};

use crate::cfg::DET_EPS;

/// 3D affine map: `x ↦ M x + t`.
///
/// Points see the full map; vectors only the linear part `M`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Affine3 {
    pub m: Matrix3<f64>,
    pub t: Vector3<f64>,
}

impl Default for Affine3 {
    fn default() -> Self {
        Self::identity()
    }
}

impl Affine3 {
    #[inline]
    pub fn identity() -> Self {
        Self {
            m: Matrix3::identity(),
            t: Vector3::zeros(),
        }
    }

    #[inline]
    pub fn new(m: Matrix3<f64>, t: Vector3<f64>) -> Self {
        Self { m, t }
    }

    #[inline]
    pub fn translation(t: Vector3<f64>) -> Self {
        Self {
            m: Matrix3::identity(),
            t,
        }
    }

    #[inline]
    pub fn linear(m: Matrix3<f64>) -> Self {
        Self {
            m,
            t: Vector3::zeros(),
        }
    }

    /// Rotation `Rx(r.x) · Ry(r.y) · Rz(r.z)`; the z rotation acts first.
    pub fn rotation_xyz(r: Vector3<f64>) -> Matrix3<f64> {
        let rx = Rotation3::from_axis_angle(&Vector3::x_axis(), r.x);
        let ry = Rotation3::from_axis_angle(&Vector3::y_axis(), r.y);
        let rz = Rotation3::from_axis_angle(&Vector3::z_axis(), r.z);
        (rx * ry * rz).into_inner()
    }

    /// Map `q ↦ pivot + offset + L (q − pivot)`.
    pub fn about(pivot: &Point3<f64>, l: Matrix3<f64>, offset: Vector3<f64>) -> Self {
        let p = pivot.coords;
        Self {
            m: l,
            t: p + offset - l * p,
        }
    }

    /// Lift a homogeneous 4×4 matrix; `None` unless the last row is `[0 0 0 1]`.
    pub fn from_matrix4(h: &Matrix4<f64>) -> Option<Self> {
        let last = [h[(3, 0)], h[(3, 1)], h[(3, 2)], h[(3, 3)]];
        if last != [0.0, 0.0, 0.0, 1.0] {
            return None;
        }
        Some(Self {
            m: h.fixed_view::<3, 3>(0, 0).into_owned(),
            t: h.fixed_view::<3, 1>(0, 3).into_owned(),
        })
    }

    pub fn to_matrix4(&self) -> Matrix4<f64> {
        let mut h = Matrix4::identity();
        h.fixed_view_mut::<3, 3>(0, 0).copy_from(&self.m);
        h.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.t);
        h
    }

    /// Row-major 4×4 entries, the persisted layout.
    pub fn to_row_major(&self) -> [f64; 16] {
        let h = self.to_matrix4();
        let mut out = [0.0; 16];
        for r in 0..4 {
            for c in 0..4 {
                out[4 * r + c] = h[(r, c)];
            }
        }
        out
    }

    pub fn from_row_major(v: &[f64; 16]) -> Option<Self> {
        Self::from_matrix4(&Matrix4::from_row_slice(v))
    }

    #[inline]
    pub fn is_invertible(&self) -> bool {
        let det = self.m.determinant();
        det.is_finite() && det.abs() > DET_EPS
    }

    #[inline]
    pub fn inverse(&self) -> Option<Self> {
        if !self.is_invertible() {
            return None;
        }
        self.m.try_inverse().map(|minv| Self {
            m: minv,
            t: -minv * self.t,
        })
    }

    /// `self ∘ other`: apply `other` first, then `self`.
    #[inline]
    pub fn compose(&self, other: &Affine3) -> Affine3 {
        Affine3 {
            m: self.m * other.m,
            t: self.m * other.t + self.t,
        }
    }

    #[inline]
    pub fn apply_point(&self, p: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.m * p.coords + self.t)
    }

    #[inline]
    pub fn apply_vector(&self, v: &Vector3<f64>) -> Vector3<f64> {
        self.m * v
    }

    /// Max-abs distance between the 4×4 matrices.
    pub fn max_abs_diff(&self, other: &Affine3) -> f64 {
        (self.m - other.m).amax().max((self.t - other.t).amax())
    }
}

impl std::ops::Mul for Affine3 {
    type Output = Affine3;
    #[inline]
    fn mul(self, rhs: Affine3) -> Self::Output {
        self.compose(&rhs)
    }
}
