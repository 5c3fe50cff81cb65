//! Sequential ray tracing
//!
//! An [`OpticalSystem`] owns the surface rows, the memoized frames and the
//! index provider. A ray is pushed row by row: object and coordinate break
//! rows are skipped (their effect lives in the frames), every other row is
//! intersected in its local frame, aperture-tested, then the ray is reflected
//! or refracted into the next medium. The ray position after a row is its hit
//! point; the thickness advances are carried by the frame origins.

use crate::error::{Error, FailureKind, Result, TraceFailure};
use crate::frame::{signature, FrameCache, SurfaceFrame};
use crate::index::{is_air, Air, IndexProvider};
use crate::intersect;
use crate::surface::{Surface, SurfaceKind};
use crate::vector::Vector;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Snell's square root argument at or below which the ray is totally reflected
pub const TIR_EPS: f64 = 1e-12;

/// Ordered surface stack and its frame signature
pub trait SurfaceProvider {
    fn surfaces(&self) -> &[Surface];
    fn signature(&self) -> u64 {
        signature(self.surfaces())
    }
}
impl SurfaceProvider for Vec<Surface> {
    fn surfaces(&self) -> &[Surface] {
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ray {
    pub position: Vector,
    pub direction: Vector,
    /// wavelength in micrometers
    pub wavelength: f64,
}
impl Ray {
    pub fn new(position: Vector, direction: Vector, wavelength: f64) -> Self {
        Ray {
            position,
            direction: direction.normalize(),
            wavelength,
        }
    }
}

/// Global hit points of a ray, index 0 being its start point
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RayPath {
    pub points: Vec<Vector>,
    /// surface row of each point, the start point is attributed to row 0
    pub surfaces: Vec<usize>,
    /// direction leaving the last point
    pub direction: Vector,
    /// optical path length `Σ nᵢLᵢ` from the start point
    pub optical_path: f64,
    /// index of the medium leaving the last point
    pub index: f64,
    /// geometric length of the last segment
    pub last_segment: f64,
}
impl RayPath {
    fn start(ray: &Ray, index: f64) -> Self {
        RayPath {
            points: vec![ray.position],
            surfaces: vec![0],
            direction: ray.direction,
            optical_path: 0.,
            index,
            last_segment: 0.,
        }
    }
    pub fn len(&self) -> usize {
        self.points.len()
    }
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
    /// Last hit point
    pub fn last(&self) -> Vector {
        self.points[self.points.len() - 1]
    }
    pub fn last_surface(&self) -> usize {
        self.surfaces[self.surfaces.len() - 1]
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Mode {
    /// interact with the target too
    Full,
    /// stop on the target hit point
    HitPoint,
}

/// Mirror reflection `d − 2(d·n)n`
pub fn reflect(d: Vector, n: Vector) -> Vector {
    d - n * (2. * d.dot(&n))
}
/// Snell refraction of `d` through a normal `n` opposing `d`, `None` on TIR
pub fn refract(d: Vector, n: Vector, eta: f64) -> Option<Vector> {
    let cos_i = -n.dot(&d);
    let k = 1. - eta * eta * (1. - cos_i * cos_i);
    if k <= TIR_EPS {
        return None;
    }
    Some(d * eta + n * (eta * cos_i - k.sqrt()))
}

pub struct OpticalSystem {
    surfaces: Vec<Surface>,
    frames: FrameCache,
    index: Arc<dyn IndexProvider>,
}
impl SurfaceProvider for OpticalSystem {
    fn surfaces(&self) -> &[Surface] {
        &self.surfaces
    }
}
impl OpticalSystem {
    /// Checks the stack and wraps it, the index provider defaults to [`Air`]
    pub fn new(surfaces: Vec<Surface>) -> Result<Self> {
        if surfaces.len() < 2 {
            return Err(Error::InvalidStack(format!(
                "{} surface row(s), at least an object and one surface are required",
                surfaces.len()
            )));
        }
        if surfaces[0].kind != SurfaceKind::Object {
            return Err(Error::InvalidStack(format!(
                "first row is {}, not OBJECT",
                surfaces[0].kind
            )));
        }
        if let Some(s) = surfaces.iter().skip(1).position(|s| s.kind == SurfaceKind::Object) {
            return Err(Error::InvalidStack(format!("row #{} is a second OBJECT", s + 1)));
        }
        if surfaces.last().map_or(false, |s| s.kind != SurfaceKind::Image) {
            log::warn!("the last surface row is not an IMAGE row");
        }
        Ok(OpticalSystem {
            surfaces,
            frames: FrameCache::new(),
            index: Arc::new(Air),
        })
    }
    /// Wraps a copy of the stack held by `provider`
    pub fn from_provider<P: SurfaceProvider + ?Sized>(provider: &P) -> Result<Self> {
        let system = Self::new(provider.surfaces().to_vec())?;
        log::debug!(
            "{} surface rows loaded, signature {:016x}",
            system.len(),
            provider.signature()
        );
        Ok(system)
    }
    pub fn with_index<P: IndexProvider + 'static>(self, provider: P) -> Self {
        Self {
            index: Arc::new(provider),
            ..self
        }
    }
    pub fn len(&self) -> usize {
        self.surfaces.len()
    }
    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
    }
    pub fn surface(&self, s: usize) -> Option<&Surface> {
        self.surfaces.get(s)
    }
    /// Mutable access, the frames are rebuilt on signature change
    pub fn surface_mut(&mut self, s: usize) -> Option<&mut Surface> {
        self.surfaces.get_mut(s)
    }
    pub fn image_index(&self) -> usize {
        self.surfaces.len() - 1
    }
    pub fn frames(&self, truncation: usize) -> Arc<Vec<SurfaceFrame>> {
        self.frames.frames(&self.surfaces, truncation)
    }
    /// Checks that `target` can carry a hit point
    pub fn check_target(&self, target: usize) -> Result<()> {
        match self.surfaces.get(target) {
            None => Err(Error::InvalidStack(format!(
                "target #{} beyond the last row #{}",
                target,
                self.image_index()
            ))),
            Some(s) if s.kind.is_skippable() => Err(Error::NonSelectableTarget(target, s.kind.clone())),
            Some(_) => Ok(()),
        }
    }
    /// Index of the medium following row `s`
    pub fn medium_index(&self, s: usize, wavelength: f64) -> f64 {
        let surface = &self.surfaces[s];
        if let Some(n) = surface.manual_index {
            return n;
        }
        match surface.material.as_deref() {
            Some(m) if !is_air(m) => self.index.index(m, wavelength),
            _ => 1.,
        }
    }

    /// Full trace to the last row
    pub fn trace(&self, ray: &Ray) -> std::result::Result<RayPath, TraceFailure> {
        self.propagate(ray, self.image_index(), Mode::Full)
    }
    /// Full trace truncated at `target`, interacting with it
    pub fn trace_to(&self, ray: &Ray, target: usize) -> std::result::Result<RayPath, TraceFailure> {
        self.propagate(ray, target, Mode::Full)
    }
    /// Trace stopping on the hit point of `target`, no interaction there
    pub fn trace_hit(&self, ray: &Ray, target: usize) -> std::result::Result<RayPath, TraceFailure> {
        self.propagate(ray, target, Mode::HitPoint)
    }
    /// Global hit point of `ray` on `target`
    pub fn hit_point(&self, ray: &Ray, target: usize) -> std::result::Result<Vector, TraceFailure> {
        self.trace_hit(ray, target).map(|path| path.last())
    }
    /// Rows reached by `ray` and the failure that stopped it, if any
    pub fn probe(&self, ray: &Ray) -> (Vec<usize>, Option<TraceFailure>) {
        match self.trace(ray) {
            Ok(path) => (path.surfaces[1..].to_vec(), None),
            Err(failure) => {
                let stop = failure.surface.unwrap_or(0);
                let reached = (1..stop)
                    .filter(|s| !self.surfaces[*s].kind.is_skippable())
                    .collect();
                (reached, Some(failure))
            }
        }
    }

    fn propagate(&self, ray: &Ray, target: usize, mode: Mode) -> std::result::Result<RayPath, TraceFailure> {
        if target >= self.surfaces.len() || self.surfaces[target].kind.is_skippable() {
            return Err(TraceFailure::new(
                FailureKind::NotReachedTarget,
                Some(target),
                "target row cannot carry a hit point",
            ));
        }
        if !(ray.position.is_finite() && ray.direction.is_finite()) || ray.wavelength <= 0. {
            return Err(TraceFailure::at(FailureKind::Exception, 0, "invalid start ray"));
        }
        let frames = self.frames(target);
        let mut position = ray.position;
        let mut direction = ray.direction.normalize();
        let mut n1 = self.medium_index(0, ray.wavelength);
        let mut sense = 1f64;
        let mut path = RayPath::start(ray, n1);

        for (s, surface) in self.surfaces.iter().enumerate().take(target + 1) {
            if surface.kind.is_skippable() {
                continue;
            }
            let frame = &frames[s];
            let o = frame.to_local_point(position);
            let d = frame.to_local_direction(direction);
            let hit = if surface.is_planar() {
                intersect::plane(o, d)
            } else {
                intersect::newton(surface, o, d)
            }
            .ok_or_else(|| {
                TraceFailure::at(
                    FailureKind::NoIntersection,
                    s,
                    format!("local ray {} → {}", o, d),
                )
            })?;
            let p = hit.point;
            if !p.is_finite() || !hit.t.is_finite() {
                return Err(TraceFailure::at(
                    FailureKind::InvalidHitPoint,
                    s,
                    format!("t={}", hit.t),
                ));
            }
            if let Some(limit) = surface.clear_radius() {
                let r = p.radius();
                if r > limit {
                    return Err(TraceFailure::at(
                        FailureKind::PhysicalApertureBlock,
                        s,
                        format!("r={:.6} > {:.6}", r, limit),
                    ));
                }
            }
            let global = frame.to_global_point(p);
            path.points.push(global);
            path.surfaces.push(s);
            path.optical_path += n1 * hit.t;
            path.last_segment = hit.t;
            position = global;

            if s == target && mode == Mode::HitPoint {
                break;
            }
            if surface.kind == SurfaceKind::Image {
                break;
            }

            let raw = surface.normal(p.x, p.y);
            if surface.is_mirror() {
                let front = raw * -sense;
                if d.dot(&front) < 0. {
                    direction = reflect(direction, frame.to_global_direction(front));
                    sense = -sense;
                }
            } else {
                let n2 = self.medium_index(s, ray.wavelength);
                if (n1 - n2).abs() > f64::EPSILON {
                    let n = if d.dot(&raw) > 0. { -raw } else { raw };
                    direction = refract(direction, frame.to_global_direction(n), n1 / n2)
                        .ok_or_else(|| {
                            TraceFailure::at(
                                FailureKind::TotalInternalReflection,
                                s,
                                format!("n1={} n2={}", n1, n2),
                            )
                        })?;
                }
                n1 = n2;
            }
            if !direction.is_finite() || direction.norm() == 0. {
                return Err(TraceFailure::at(
                    FailureKind::Exception,
                    s,
                    "non-finite direction",
                ));
            }
            direction = direction.normalize();
        }
        if *path.surfaces.last().unwrap_or(&0) != target {
            return Err(TraceFailure::new(
                FailureKind::TerminatedEarly,
                path.surfaces.last().cloned(),
                format!("stopped before surface #{}", target),
            ));
        }
        path.direction = direction;
        path.index = n1;
        Ok(path)
    }

    /// Real-ray effective focal length from a collimated near-axis ray
    pub fn effective_focal_length(&self, wavelength: f64) -> Option<f64> {
        let first = (1..self.surfaces.len()).find(|s| !self.surfaces[*s].kind.is_skippable())?;
        let frames = self.frames(self.image_index());
        let h = self.surfaces[first]
            .clear_radius()
            .map_or(1e-2, |r| r * 1e-3);
        let start = frames[first].origin - Vector::ez() + Vector::ey() * h;
        let path = self.trace(&Ray::new(start, Vector::ez(), wavelength)).ok()?;
        let d = path.direction;
        if d.y.abs() < 1e-15 {
            return None;
        }
        Some(-h * d.z.abs() / d.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::MaterialTable;
    use crate::surface::{BreakOrder, CoordBreak};
    use rand::Rng;

    fn ray(x: f64, y: f64, z: f64, dx: f64, dy: f64, dz: f64) -> Ray {
        Ray::new(Vector::new(x, y, z), Vector::new(dx, dy, dz), 0.5876)
    }

    #[test]
    fn planar_refraction_at_normal_incidence() {
        let system = OpticalSystem::new(vec![
            Surface::object(f64::INFINITY),
            Surface::plane(10.).with_index(1.5),
            Surface::image(),
        ])
        .unwrap();
        let path = system.trace(&ray(0., 0., 0., 0., 0., 1.)).unwrap();
        println!("{:?}", path.points);
        assert_eq!(path.points[1], Vector::zero());
        assert!((path.direction - Vector::ez()).norm() < 1e-15);
        assert!((path.points[2] - Vector::new(0., 0., 10.)).norm() < 1e-12);
        assert!((path.optical_path - 15.).abs() < 1e-12);
    }

    #[test]
    fn mirror_reverses_the_marginal_ray() {
        let system = OpticalSystem::new(vec![
            Surface::object(5.),
            Surface::plane(-5.).with_material("MIRROR"),
            Surface::image(),
        ])
        .unwrap();
        let a = 10f64.to_radians();
        let path = system.trace_to(&ray(0., 0., 0., 0., a.sin(), a.cos()), 1).unwrap();
        assert_eq!(path.len(), 2);
        assert!((path.points[1] - Vector::new(0., 5. * a.tan(), 5.)).norm() < 1e-12);
        assert!((path.direction - Vector::new(0., a.sin(), -a.cos())).norm() < 1e-12);
        let full = system.trace(&ray(0., 0., 0., 0., a.sin(), a.cos())).unwrap();
        assert!((full.last() - Vector::new(0., 10. * a.tan(), 0.)).norm() < 1e-12);
    }

    #[test]
    fn mirror_at_normal_incidence() {
        let system = OpticalSystem::new(vec![
            Surface::object(1.),
            Surface::mirror(-30., -1.),
            Surface::image(),
        ])
        .unwrap();
        let path = system.trace_to(&ray(0., 0., 0., 0., 0., 1.), 1).unwrap();
        assert_eq!(path.direction, Vector::new(0., 0., -1.));
    }

    #[test]
    fn aperture_vignetting() {
        let system = OpticalSystem::new(vec![
            Surface::object(1.),
            Surface::plane(1.).with_semi_diameter(1.),
            Surface::image(),
        ])
        .unwrap();
        let failure = system.trace(&ray(0., 0., 0., 1., 0., 0.01)).unwrap_err();
        println!("{}", failure);
        assert_eq!(failure.kind, FailureKind::PhysicalApertureBlock);
        assert_eq!(failure.surface, Some(1));
    }

    #[test]
    fn aperture_boundary() {
        let system = OpticalSystem::new(vec![
            Surface::object(1.),
            Surface::plane(1.).with_semi_diameter(1.),
            Surface::image(),
        ])
        .unwrap();
        let eps = 1e-9;
        assert!(system.trace(&ray(1. - eps, 0., 0., 0., 0., 1.)).is_ok());
        let blocked = system.trace(&ray(1. + eps, 0., 0., 0., 0., 1.)).unwrap_err();
        assert_eq!(blocked.kind, FailureKind::PhysicalApertureBlock);
    }

    #[test]
    fn coordinate_break_decenter() {
        let system = OpticalSystem::new(vec![
            Surface::object(0.),
            Surface::plane(0.),
            Surface::coord_break(
                CoordBreak::default()
                    .decenter(1., 0.)
                    .order(BreakOrder::TiltThenDecenter),
                0.,
            ),
            Surface::plane(0.),
            Surface::image(),
        ])
        .unwrap();
        let frame = system.frames(4)[3];
        assert_eq!(frame.origin, Vector::new(1., 0., 0.));
        // a ray along the decentered axis lands on the vertex
        let on_axis = system.hit_point(&ray(1., 0., 0., 0., 0., 1.), 3).unwrap();
        assert_eq!(on_axis, Vector::new(1., 0., 0.));
        assert_eq!(frame.to_local_point(on_axis), Vector::zero());
        // the axial ray is unaffected globally and 1mm off the new vertex
        let axial = system.hit_point(&ray(0., 0., 0., 0., 0., 1.), 3).unwrap();
        assert_eq!(axial, Vector::zero());
        assert_eq!(frame.to_local_point(axial), Vector::new(-1., 0., 0.));
    }

    #[test]
    fn identity_coordinate_break_round_trip() {
        let lens = vec![
            Surface::object(5.),
            Surface::standard(20., 4.).with_index(1.5),
            Surface::standard(-20., 30.),
            Surface::image(),
        ];
        let cb = CoordBreak::default().decenter(0.5, -0.25).tilt(3., -2., 10.);
        let undo = CoordBreak::default()
            .decenter(-0.5, 0.25)
            .tilt(-3., 2., -10.)
            .order(BreakOrder::DecenterThenTilt);
        let mut broken = lens.clone();
        broken.insert(2, Surface::coord_break(cb, 0.));
        broken.insert(3, Surface::coord_break(undo, 0.));
        let a = OpticalSystem::new(lens).unwrap();
        let b = OpticalSystem::new(broken).unwrap();
        let frames = b.frames(b.image_index());
        assert!(frames[4].rotation.orthonormality_error() < 1e-9);
        assert!((frames[4].origin - Vector::new(0., 0., 9.)).norm() < 1e-9);
        let r = ray(0., 1.5, 0., 0., 0.02, 1.);
        let pa = a.trace(&r).unwrap();
        let pb = b.trace(&r).unwrap();
        assert!((pa.last() - pb.last()).norm() < 1e-9);
        assert!((pa.direction - pb.direction).norm() < 1e-9);
        assert!((pa.optical_path - pb.optical_path).abs() < 1e-9);
    }

    #[test]
    fn built_from_a_surface_provider() {
        let rows = vec![
            Surface::object(f64::INFINITY),
            Surface::plane(10.).with_index(1.5),
            Surface::image(),
        ];
        let system = OpticalSystem::from_provider(&rows).unwrap();
        assert_eq!(system.len(), 3);
        assert_eq!(system.signature(), rows.signature());
        let copy = OpticalSystem::from_provider(&system).unwrap();
        let r = ray(0.5, 0., 0., 0., 0.1, 1.);
        assert_eq!(system.trace(&r).unwrap(), copy.trace(&r).unwrap());
        assert!(OpticalSystem::from_provider(&vec![Surface::image()]).is_err());
    }

    #[test]
    fn total_internal_reflection_at_critical_angle() {
        let system = OpticalSystem::new(vec![
            Surface::object(1.).with_index(1.5),
            Surface::plane(1.),
            Surface::image(),
        ])
        .unwrap();
        let sin_c: f64 = 1. / 1.5;
        let cos_c = (1. - sin_c * sin_c).sqrt();
        let failure = system.trace(&ray(0., 0., 0., sin_c, 0., cos_c)).unwrap_err();
        assert_eq!(failure.kind, FailureKind::TotalInternalReflection);
        assert!(system.trace(&ray(0., 0., 0., 0.6, 0., 0.8)).is_ok());
    }

    #[test]
    fn refracted_directions_stay_unit() {
        let system = OpticalSystem::new(vec![
            Surface::object(10.),
            Surface::standard(25., 5.).with_material("N-BK7").with_semi_diameter(12.),
            Surface::standard(-25., 5.).with_material("F2").with_semi_diameter(12.),
            Surface::standard(-80., 40.).with_semi_diameter(12.),
            Surface::image(),
        ])
        .unwrap()
        .with_index(MaterialTable::new().insert("N-BK7", 1.5168).insert("F2", 1.62));
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let r = ray(
                rng.gen_range(-5f64, 5f64),
                rng.gen_range(-5f64, 5f64),
                0.,
                rng.gen_range(-0.05f64, 0.05f64),
                rng.gen_range(-0.05f64, 0.05f64),
                1.,
            );
            let path = system.trace(&r).unwrap();
            assert!((path.direction.norm() - 1.).abs() < 1e-9);
            assert_eq!(path.len(), 5);
        }
    }

    #[test]
    fn non_selectable_targets() {
        let system = OpticalSystem::new(vec![
            Surface::object(1.),
            Surface::coord_break(CoordBreak::default(), 0.),
            Surface::plane(1.),
            Surface::image(),
        ])
        .unwrap();
        assert!(matches!(system.check_target(1), Err(Error::NonSelectableTarget(1, _))));
        assert!(system.check_target(9).is_err());
        assert!(system.check_target(2).is_ok());
        let failure = system.hit_point(&ray(0., 0., 0., 0., 0., 1.), 0).unwrap_err();
        assert_eq!(failure.kind, FailureKind::NotReachedTarget);
        assert!(OpticalSystem::new(vec![Surface::plane(0.), Surface::image()]).is_err());
    }

    #[test]
    fn probe_lists_reached_rows() {
        let system = OpticalSystem::new(vec![
            Surface::object(1.),
            Surface::plane(1.),
            Surface::plane(1.).with_semi_diameter(0.1),
            Surface::image(),
        ])
        .unwrap();
        let (reached, failure) = system.probe(&ray(0.5, 0., 0., 0., 0., 1.));
        assert_eq!(reached, vec![1]);
        assert_eq!(failure.map(|f| f.surface), Some(Some(2)));
    }

    #[test]
    fn paraboloid_focal_length() {
        let system = crate::samples::paraboloid(200., 10.).unwrap();
        let f = system.effective_focal_length(0.5876).unwrap();
        println!("EFL: {}", f);
        assert!((f - 100.).abs() < 1e-3);
    }
}
