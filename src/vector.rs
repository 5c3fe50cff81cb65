//! 3-vector and affine frame algebra
//!
//! Directions are unit [`Vector`]s, frames are rotation-only [`Affine`]
//! matrices plus a translation. Degenerate inputs never panic: normalizing a
//! zero or non-finite vector returns the optical axis `ê_z` and it is up to
//! the tracer to reject the ray.

use serde::{Deserialize, Serialize};
use std::{fmt, ops};

/// Cartesian 3-vector
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}
impl Vector {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Vector { x, y, z }
    }
    pub const fn zero() -> Self {
        Vector::new(0., 0., 0.)
    }
    pub const fn ex() -> Self {
        Vector::new(1., 0., 0.)
    }
    pub const fn ey() -> Self {
        Vector::new(0., 1., 0.)
    }
    pub const fn ez() -> Self {
        Vector::new(0., 0., 1.)
    }
    pub fn dot(&self, other: &Vector) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }
    pub fn cross(&self, other: &Vector) -> Vector {
        Vector::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }
    pub fn norm(&self) -> f64 {
        self.dot(self).sqrt()
    }
    /// Radial distance from the z axis
    pub fn radius(&self) -> f64 {
        self.x.hypot(self.y)
    }
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
    /// Unit vector along `self`, `ê_z` if `self` is null or non-finite
    pub fn normalize(&self) -> Vector {
        let n = self.norm();
        if n > 0. && n.is_finite() {
            *self / n
        } else {
            Vector::ez()
        }
    }
    pub fn scale(&self, s: f64) -> Vector {
        *self * s
    }
    pub fn distance(&self, other: &Vector) -> f64 {
        (*self - *other).norm()
    }
    pub fn to_array(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}
impl From<[f64; 3]> for Vector {
    fn from(v: [f64; 3]) -> Self {
        Vector::new(v[0], v[1], v[2])
    }
}
impl fmt::Display for Vector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6}, {:.6})", self.x, self.y, self.z)
    }
}
impl ops::Add for Vector {
    type Output = Vector;
    fn add(self, rhs: Vector) -> Vector {
        Vector::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}
impl ops::AddAssign for Vector {
    fn add_assign(&mut self, rhs: Vector) {
        self.x += rhs.x;
        self.y += rhs.y;
        self.z += rhs.z;
    }
}
impl ops::Sub for Vector {
    type Output = Vector;
    fn sub(self, rhs: Vector) -> Vector {
        Vector::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}
impl ops::Mul<f64> for Vector {
    type Output = Vector;
    fn mul(self, s: f64) -> Vector {
        Vector::new(self.x * s, self.y * s, self.z * s)
    }
}
impl ops::Div<f64> for Vector {
    type Output = Vector;
    fn div(self, s: f64) -> Vector {
        Vector::new(self.x / s, self.y / s, self.z / s)
    }
}
impl ops::Neg for Vector {
    type Output = Vector;
    fn neg(self) -> Vector {
        Vector::new(-self.x, -self.y, -self.z)
    }
}

/// Rotation of angle `o` (radians) about one of the coordinate axes
///
/// `axis` is 0 for x, 1 for y and 2 for z.
pub struct Rotation {
    pub o: f64,
    pub axis: u8,
}
impl Rotation {
    pub fn new(o: f64, axis: u8) -> Rotation {
        Rotation { o, axis }
    }
    /// Rotation from an angle in degrees
    pub fn from_degrees(o: f64, axis: u8) -> Rotation {
        Rotation::new(o.to_radians(), axis)
    }
    /// Active rotation matrix, any axis other than 0,1 or 2 gives the identity
    pub fn matrix(&self) -> Affine {
        let (s, c) = self.o.sin_cos();
        let m = match self.axis {
            0 => [[1., 0., 0.], [0., c, -s], [0., s, c]],
            1 => [[c, 0., s], [0., 1., 0.], [-s, 0., c]],
            2 => [[c, -s, 0.], [s, c, 0.], [0., 0., 1.]],
            _ => {
                log::warn!("Rotation axis must be one of: 0 for x, 1 for y or 2 for z!");
                [[1., 0., 0.], [0., 1., 0.], [0., 0., 1.]]
            }
        };
        Affine::from_rotation(m)
    }
    pub fn apply(&self, v: Vector) -> Vector {
        self.matrix().rotate(v)
    }
}

/// Homogeneous 4×4 affine transform, row-major
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Affine {
    pub m: [[f64; 4]; 4],
}
impl Default for Affine {
    fn default() -> Self {
        Affine::identity()
    }
}
impl Affine {
    pub fn identity() -> Self {
        let mut m = [[0f64; 4]; 4];
        for (k, row) in m.iter_mut().enumerate() {
            row[k] = 1.;
        }
        Affine { m }
    }
    pub fn from_rotation(r: [[f64; 3]; 3]) -> Self {
        let mut a = Affine::identity();
        for i in 0..3 {
            a.m[i][..3].copy_from_slice(&r[i]);
        }
        a
    }
    pub fn from_translation(t: Vector) -> Self {
        let mut a = Affine::identity();
        a.m[0][3] = t.x;
        a.m[1][3] = t.y;
        a.m[2][3] = t.z;
        a
    }
    /// Matrix product `self·rhs`
    pub fn mul(&self, rhs: &Affine) -> Affine {
        let mut m = [[0f64; 4]; 4];
        for (i, row) in m.iter_mut().enumerate() {
            for (j, v) in row.iter_mut().enumerate() {
                *v = (0..4).map(|k| self.m[i][k] * rhs.m[k][j]).sum();
            }
        }
        Affine { m }
    }
    /// Rotation part applied to `v`
    pub fn rotate(&self, v: Vector) -> Vector {
        let m = &self.m;
        Vector::new(
            m[0][0] * v.x + m[0][1] * v.y + m[0][2] * v.z,
            m[1][0] * v.x + m[1][1] * v.y + m[1][2] * v.z,
            m[2][0] * v.x + m[2][1] * v.y + m[2][2] * v.z,
        )
    }
    /// Transposed rotation part applied to `v`
    pub fn rotate_inverse(&self, v: Vector) -> Vector {
        let m = &self.m;
        Vector::new(
            m[0][0] * v.x + m[1][0] * v.y + m[2][0] * v.z,
            m[0][1] * v.x + m[1][1] * v.y + m[2][1] * v.z,
            m[0][2] * v.x + m[1][2] * v.y + m[2][2] * v.z,
        )
    }
    pub fn transform_point(&self, p: Vector) -> Vector {
        self.rotate(p) + self.translation()
    }
    pub fn translation(&self) -> Vector {
        Vector::new(self.m[0][3], self.m[1][3], self.m[2][3])
    }
    /// Inverse of a rotation, i.e. its transpose (translation dropped)
    pub fn transpose_rotation(&self) -> Affine {
        let mut a = Affine::identity();
        for i in 0..3 {
            for j in 0..3 {
                a.m[i][j] = self.m[j][i];
            }
        }
        a
    }
    /// Column `k` of the rotation, the image of the k-th basis vector
    pub fn column(&self, k: usize) -> Vector {
        Vector::new(self.m[0][k], self.m[1][k], self.m[2][k])
    }
    /// Largest deviation of `RᵀR` from the identity
    pub fn orthonormality_error(&self) -> f64 {
        let mut err = 0f64;
        for i in 0..3 {
            for j in 0..3 {
                let d = self.column(i).dot(&self.column(j)) - if i == j { 1. } else { 0. };
                err = err.max(d.abs());
            }
        }
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn normalize_guards() {
        assert_eq!(Vector::zero().normalize(), Vector::ez());
        assert_eq!(Vector::new(f64::NAN, 0., 1.).normalize(), Vector::ez());
        let v = Vector::new(3., 4., 0.).normalize();
        assert!((v.norm() - 1.).abs() < 1e-15);
    }

    #[test]
    fn cross_is_right_handed() {
        assert_eq!(Vector::ex().cross(&Vector::ey()), Vector::ez());
        assert_eq!(Vector::ey().cross(&Vector::ez()), Vector::ex());
    }

    #[test]
    fn rotation_about_z() {
        let v = Rotation::from_degrees(90., 2).apply(Vector::ex());
        println!("Rz(90)·ex: {}", v);
        assert!((v - Vector::ey()).norm() < 1e-15);
    }

    #[test]
    fn random_rotations_stay_orthonormal() {
        let mut rng = rand::thread_rng();
        let mut r = Affine::identity();
        for _ in 0..100 {
            let axis = rng.gen_range(0u8, 3u8);
            let o = rng.gen_range(-180f64, 180f64);
            r = Rotation::from_degrees(o, axis).matrix().mul(&r);
            assert!(r.orthonormality_error() < 1e-9);
            let v = Vector::new(
                rng.gen_range(-1f64, 1f64),
                rng.gen_range(-1f64, 1f64),
                rng.gen_range(-1f64, 1f64),
            );
            let back = r.rotate_inverse(r.rotate(v));
            assert!((back - v).norm() < 1e-9);
        }
    }

    #[test]
    fn affine_point_transform() {
        let a = Affine::from_translation(Vector::new(1., 2., 3.))
            .mul(&Rotation::from_degrees(90., 0).matrix());
        let p = a.transform_point(Vector::ey());
        assert!((p - Vector::new(1., 2., 4.)).norm() < 1e-12);
        assert_eq!(a.transpose_rotation().translation(), Vector::zero());
    }
}
