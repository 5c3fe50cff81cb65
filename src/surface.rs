//! Surface rows and their geometry
//!
//! A [`Surface`] is one row of the sequential prescription. Its shape is an
//! even or odd asphere on top of a conic of revolution:
//!
//! `z(r) = r²/(R(1+√(1−(1+k)r²/R²))) + Σ Aᵢ rᵖⁱ`
//!
//! with `pᵢ = 4,6,…,22` in [`AsphereMode::Even`] and `pᵢ = 3,5,…,21` in
//! [`AsphereMode::Odd`]. A null or non-finite radius is a plane, whatever
//! the coefficients.

use crate::error::{Error, Result};
use crate::vector::{Affine, Rotation, Vector};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const N_ASPHERE: usize = 10;
/// Radius below which a point is considered on axis
pub const AXIS_EPS: f64 = 1e-10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AsphereMode {
    Even,
    Odd,
}
impl Default for AsphereMode {
    fn default() -> Self {
        AsphereMode::Even
    }
}
impl AsphereMode {
    /// Power of `r` carried by the first coefficient
    fn first_power(&self) -> i32 {
        match self {
            AsphereMode::Even => 4,
            AsphereMode::Odd => 3,
        }
    }
}

/// Order of the coordinate break operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BreakOrder {
    /// order 0: decenter along the incoming axes, then tilt
    DecenterThenTilt,
    /// order 1: tilt, then decenter along the tilted axes
    TiltThenDecenter,
}
impl Default for BreakOrder {
    fn default() -> Self {
        BreakOrder::TiltThenDecenter
    }
}
impl BreakOrder {
    pub fn from_code(order: u8) -> Self {
        if order == 0 {
            BreakOrder::DecenterThenTilt
        } else {
            BreakOrder::TiltThenDecenter
        }
    }
}

/// Coordinate break parameters, tilts in degrees
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordBreak {
    pub decenter_x: f64,
    pub decenter_y: f64,
    pub tilt_x: f64,
    pub tilt_y: f64,
    pub tilt_z: f64,
    pub order: BreakOrder,
}
impl CoordBreak {
    pub fn decenter(self, decenter_x: f64, decenter_y: f64) -> Self {
        Self {
            decenter_x,
            decenter_y,
            ..self
        }
    }
    pub fn tilt(self, tilt_x: f64, tilt_y: f64, tilt_z: f64) -> Self {
        Self {
            tilt_x,
            tilt_y,
            tilt_z,
            ..self
        }
    }
    pub fn order(self, order: BreakOrder) -> Self {
        Self { order, ..self }
    }
    /// Rotation pre-multiplying the incoming frame rotation
    pub fn rotation(&self) -> Affine {
        let rx = Rotation::from_degrees(self.tilt_x, 0).matrix();
        let ry = Rotation::from_degrees(self.tilt_y, 1).matrix();
        let rz = Rotation::from_degrees(self.tilt_z, 2).matrix();
        match self.order {
            BreakOrder::TiltThenDecenter => rz.mul(&ry).mul(&rx),
            BreakOrder::DecenterThenTilt => rx.mul(&ry).mul(&rz),
        }
    }
}

/// Surface row kinds; mirrors are standard rows with a mirror material
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SurfaceKind {
    Object,
    Standard,
    CoordBreak(CoordBreak),
    Stop,
    Image,
}
impl SurfaceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SurfaceKind::Object => "OBJECT",
            SurfaceKind::Standard => "STANDARD",
            SurfaceKind::CoordBreak(_) => "COORD_BREAK",
            SurfaceKind::Stop => "STOP",
            SurfaceKind::Image => "IMAGE",
        }
    }
    /// Object and coordinate break rows never carry a hit point
    pub fn is_skippable(&self) -> bool {
        matches!(self, SurfaceKind::Object | SurfaceKind::CoordBreak(_))
    }
}
impl fmt::Display for SurfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of a sequential prescription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Surface {
    pub kind: SurfaceKind,
    /// vertex radius of curvature, 0 or ∞ for a plane
    pub radius: f64,
    pub conic: f64,
    pub coefficients: [f64; N_ASPHERE],
    pub asphere: AsphereMode,
    /// distance to the next vertex along the local z axis
    pub thickness: f64,
    /// `None` is an unlimited ("Auto") semi-diameter
    pub semi_diameter: Option<f64>,
    /// clear aperture diameter of a stop row
    pub aperture: Option<f64>,
    /// medium following the surface
    pub material: Option<String>,
    /// index override taking precedence over the material lookup
    pub manual_index: Option<f64>,
    pub mirror: bool,
}
impl Default for Surface {
    fn default() -> Self {
        Surface {
            kind: SurfaceKind::Standard,
            radius: 0.,
            conic: 0.,
            coefficients: [0.; N_ASPHERE],
            asphere: AsphereMode::Even,
            thickness: 0.,
            semi_diameter: None,
            aperture: None,
            material: None,
            manual_index: None,
            mirror: false,
        }
    }
}
impl Surface {
    pub fn object(thickness: f64) -> Self {
        Surface {
            kind: SurfaceKind::Object,
            thickness,
            ..Default::default()
        }
    }
    pub fn standard(radius: f64, thickness: f64) -> Self {
        Surface {
            radius,
            thickness,
            ..Default::default()
        }
    }
    pub fn plane(thickness: f64) -> Self {
        Surface::standard(0., thickness)
    }
    pub fn mirror(radius: f64, thickness: f64) -> Self {
        Surface {
            radius,
            thickness,
            material: Some("MIRROR".into()),
            mirror: true,
            ..Default::default()
        }
    }
    /// Aperture stop of diameter `aperture`
    pub fn stop(aperture: f64, thickness: f64) -> Self {
        Surface {
            kind: SurfaceKind::Stop,
            aperture: Some(aperture),
            thickness,
            ..Default::default()
        }
    }
    pub fn image() -> Self {
        Surface {
            kind: SurfaceKind::Image,
            ..Default::default()
        }
    }
    pub fn coord_break(cb: CoordBreak, thickness: f64) -> Self {
        Surface {
            kind: SurfaceKind::CoordBreak(cb),
            thickness,
            ..Default::default()
        }
    }
    pub fn with_conic(self, conic: f64) -> Self {
        Self { conic, ..self }
    }
    pub fn with_semi_diameter(self, semi_diameter: f64) -> Self {
        Self {
            semi_diameter: Some(semi_diameter),
            ..self
        }
    }
    pub fn with_material(self, material: &str) -> Self {
        Self {
            material: Some(material.to_owned()),
            mirror: self.mirror || material.eq_ignore_ascii_case("MIRROR"),
            ..self
        }
    }
    pub fn with_index(self, index: f64) -> Self {
        Self {
            manual_index: Some(index),
            ..self
        }
    }
    pub fn with_aspheric(self, coefs: &[f64], asphere: AsphereMode) -> Self {
        let mut coefficients = [0f64; N_ASPHERE];
        coefs
            .iter()
            .take(N_ASPHERE)
            .zip(coefficients.iter_mut())
            .for_each(|(c, a)| *a = *c);
        Self {
            coefficients,
            asphere,
            ..self
        }
    }
    pub fn as_stop(self) -> Self {
        Self {
            kind: SurfaceKind::Stop,
            ..self
        }
    }

    pub fn is_planar(&self) -> bool {
        self.radius == 0. || !self.radius.is_finite()
    }
    pub fn is_mirror(&self) -> bool {
        self.mirror
            || self
                .material
                .as_deref()
                .map_or(false, |m| m.eq_ignore_ascii_case("MIRROR"))
    }
    /// Radius beyond which a ray is blocked, `None` if unlimited
    ///
    /// The image row is never limited.
    pub fn clear_radius(&self) -> Option<f64> {
        if self.kind == SurfaceKind::Image {
            return None;
        }
        let semi = self.semi_diameter.filter(|s| s.is_finite() && *s > 0.);
        let stop = match self.kind {
            SurfaceKind::Stop => self.aperture.filter(|a| a.is_finite() && *a > 0.).map(|a| 0.5 * a),
            _ => None,
        };
        match (semi, stop) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Sag `z(r)`
    pub fn sag(&self, r: f64) -> f64 {
        if self.is_planar() {
            return 0.;
        }
        let rr = r * r;
        let arg = (1. + self.conic) * rr / (self.radius * self.radius);
        if arg >= 1. {
            return 0.;
        }
        let root = (1. - arg).sqrt();
        if !root.is_finite() {
            return 0.;
        }
        let mut z = rr / (self.radius * (1. + root));
        let mut rp = r.powi(self.asphere.first_power());
        for a in self.coefficients.iter() {
            if *a != 0. {
                z += a * rp;
            }
            rp *= rr;
        }
        z
    }
    /// Sag evaluated on a batch of radii
    pub fn sag_batch(&self, radii: &[f64]) -> Vec<f64> {
        radii.iter().map(|r| self.sag(*r)).collect()
    }
    /// Radial slope `dz/dr`
    pub fn dsag_dr(&self, r: f64) -> f64 {
        if r < AXIS_EPS || self.is_planar() {
            return 0.;
        }
        let c = 1. / self.radius;
        let arg = (1. + self.conic) * r * r * c * c;
        if arg >= 1. {
            return 0.;
        }
        let mut dz = r * c / (1. - arg).sqrt();
        let p0 = self.asphere.first_power();
        let mut rp = r.powi(p0 - 1);
        let mut p = p0 as f64;
        for a in self.coefficients.iter() {
            if *a != 0. {
                dz += a * p * rp;
            }
            rp *= r * r;
            p += 2.;
        }
        dz
    }
    /// Unit normal `(−∂z/∂x, −∂z/∂y, 1)` at local `(x, y)`
    pub fn normal(&self, x: f64, y: f64) -> Vector {
        let r = x.hypot(y);
        if r < AXIS_EPS {
            return Vector::ez();
        }
        let dz = self.dsag_dr(r);
        Vector::new(-dz * x / r, -dz * y / r, 1.).normalize()
    }
}
impl fmt::Display for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<11} R={:>10.4} k={:>7.3} t={:>9.4}",
            self.kind.as_str(),
            self.radius,
            self.conic,
            self.thickness
        )?;
        if let Some(sd) = self.semi_diameter {
            write!(f, " sd={:.3}", sd)?;
        }
        if let Some(m) = &self.material {
            write!(f, " {}", m)?;
        }
        Ok(())
    }
}

/// Parses a semi-diameter cell, `"Auto"` (or empty) meaning no limit
pub fn parse_semi_diameter(cell: &str) -> Result<Option<f64>> {
    let cell = cell.trim();
    if cell.is_empty() || cell.eq_ignore_ascii_case("auto") {
        return Ok(None);
    }
    cell.parse::<f64>()
        .map_err(|e| Error::InvalidStack(format!("semi-diameter {:?}: {}", cell, e)))
        .and_then(|v| {
            if v.is_finite() && v >= 0. {
                Ok(Some(v))
            } else {
                Err(Error::InvalidStack(format!("semi-diameter {:?} out of range", cell)))
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paraboloid_sag_and_slope() {
        let s = Surface::standard(50., 0.).with_conic(-1.);
        for k in 0..=100 {
            let r = 0.1 * k as f64;
            assert!((s.sag(r) - r * r / 100.).abs() < 1e-12, "sag at r={}", r);
            assert!((s.dsag_dr(r) - r / 50.).abs() < 1e-12, "slope at r={}", r);
        }
    }

    #[test]
    fn sphere_sag() {
        let s = Surface::standard(-20., 0.);
        let r = 5f64;
        let z = -(20. - (400. - r * r).sqrt());
        assert!((s.sag(r) - z).abs() < 1e-12);
        assert_eq!(Surface::standard(10., 0.).sag(20.), 0.);
    }

    #[test]
    fn beyond_the_conic_limit() {
        let s = Surface::standard(10., 0.).with_aspheric(&[1e-4], AsphereMode::Even);
        for r in [10f64, 12., 20.].iter() {
            assert_eq!(s.sag(*r), 0.);
            assert_eq!(s.dsag_dr(*r), 0.);
        }
        assert_eq!(s.normal(0., 15.), Vector::ez());
    }

    #[test]
    fn batch_sag() {
        let s = Surface::standard(50., 0.).with_conic(-1.);
        let radii = [0., 2.5, 5., 10.];
        let z = s.sag_batch(&radii);
        println!("{:?}", z);
        assert_eq!(z.len(), radii.len());
        z.iter()
            .zip(radii.iter())
            .for_each(|(z, r)| assert!((z - r * r / 100.).abs() < 1e-12));
        assert!(s.sag_batch(&[]).is_empty());
    }

    #[test]
    fn aspheric_terms_follow_the_mode() {
        let even = Surface::plane(0.).with_aspheric(&[1e-3, 1e-5], AsphereMode::Even);
        assert_eq!(even.sag(2.), 0.);
        let even = Surface::standard(1e12, 0.).with_aspheric(&[1e-3, 1e-5], AsphereMode::Even);
        let r = 2f64;
        assert!((even.sag(r) - (1e-3 * r.powi(4) + 1e-5 * r.powi(6))).abs() < 1e-9);
        let odd = Surface::standard(1e12, 0.).with_aspheric(&[1e-3, 1e-5], AsphereMode::Odd);
        assert!((odd.sag(r) - (1e-3 * r.powi(3) + 1e-5 * r.powi(5))).abs() < 1e-9);
    }

    #[test]
    fn analytic_slope_matches_finite_difference() {
        let s = Surface::standard(35., 0.)
            .with_conic(-0.6)
            .with_aspheric(&[2e-6, -3e-9, 1e-12], AsphereMode::Even);
        let h = 1e-6;
        for r in [0.5f64, 3., 7.5, 12.].iter() {
            let fd = (s.sag(r + h) - s.sag(r - h)) / (2. * h);
            println!("r={} analytic={} fd={}", r, s.dsag_dr(*r), fd);
            assert!((s.dsag_dr(*r) - fd).abs() < 1e-7);
        }
    }

    #[test]
    fn normal_on_axis_and_off_axis() {
        let s = Surface::standard(10., 0.);
        assert_eq!(s.normal(0., 0.), Vector::ez());
        let n = s.normal(0., 5.);
        assert!((n.norm() - 1.).abs() < 1e-12);
        // normal of a sphere points along (−p + center)
        let p = Vector::new(0., 5., s.sag(5.));
        let expected = (Vector::new(0., 0., 10.) - p).normalize();
        assert!((n - expected).norm() < 1e-12);
    }

    #[test]
    fn clear_radius() {
        assert_eq!(Surface::plane(0.).clear_radius(), None);
        assert_eq!(Surface::plane(0.).with_semi_diameter(3.).clear_radius(), Some(3.));
        assert_eq!(Surface::stop(4., 0.).with_semi_diameter(3.).clear_radius(), Some(2.));
        assert_eq!(Surface::image().with_semi_diameter(1.).clear_radius(), None);
    }

    #[test]
    fn semi_diameter_cells() {
        assert_eq!(parse_semi_diameter("Auto").unwrap(), None);
        assert_eq!(parse_semi_diameter(" 12.5 ").unwrap(), Some(12.5));
        assert!(parse_semi_diameter("wide").is_err());
    }

    #[test]
    fn coord_break_rotation_orders() {
        let cb = CoordBreak::default().tilt(10., 20., 30.);
        let r1 = cb.order(BreakOrder::TiltThenDecenter).rotation();
        let r0 = cb.order(BreakOrder::DecenterThenTilt).rotation();
        assert!(r1.orthonormality_error() < 1e-12);
        assert!((r1.column(2) - r0.column(2)).norm() > 1e-3);
    }
}
