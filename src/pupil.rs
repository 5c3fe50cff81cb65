//! Pupil sampling
//!
//! A field point is turned into an [`EmissionBasis`]: where rays start, the
//! chief direction and two pupil axes perpendicular to it. Pupil coordinates
//! `(u, v)` in the unit disk are mapped onto the basis by the emission
//! radius, the radius that fills the aperture stop.
//!
//! The chief ray is solved so that it crosses the stop center, either with a
//! coarse grid followed by Brent root finding on each pupil axis or by the
//! straight-line geometric guess alone. When vignetting leaves no ray on the
//! target, the bundle is retried with smaller pupil scales and, for angle
//! fields, with the stop aiming and chief solve toggled; every attempt lands
//! in the retry ledger.

use crate::context::{RunContext, CHECKPOINT};
use crate::diagnostics::{Diagnostics, FieldFailure, RetryAttempt};
use crate::error::{Error, Result, TraceFailure};
use crate::surface::SurfaceKind;
use crate::trace::{OpticalSystem, Ray, RayPath};
use crate::vector::Vector;
use rayon::prelude::*;
use roots::find_root_brent;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;

/// Pupil scales tried in turn until a ray reaches the target
pub const PUPIL_SCALES: [f64; 12] = [1.0, 0.7, 0.5, 0.35, 0.25, 0.18, 0.12, 0.08, 0.05, 0.03, 0.02, 0.01];
const MAX_FIELD_ANGLE: f64 = 89.;
const CHIEF_GRID: usize = 9;
const BRENT_ROUNDS: usize = 4;

/// Field point: angles in degrees for an object at infinity, heights in mm
/// on the object plane otherwise
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Field {
    Angle { x: f64, y: f64 },
    Height { x: f64, y: f64 },
}
impl Field {
    pub fn angle(x: f64, y: f64) -> Self {
        Field::Angle { x, y }
    }
    pub fn height(x: f64, y: f64) -> Self {
        Field::Height { x, y }
    }
    pub fn on_axis() -> Self {
        Field::angle(0., 0.)
    }
    pub fn is_angle(&self) -> bool {
        matches!(self, Field::Angle { .. })
    }
    pub fn validate(&self) -> Result<()> {
        match *self {
            Field::Angle { x, y } => {
                if !(x.is_finite() && y.is_finite()) || x.abs() >= MAX_FIELD_ANGLE || y.abs() >= MAX_FIELD_ANGLE {
                    return Err(Error::InvalidField(format!("angles ({}, {})°", x, y)));
                }
            }
            Field::Height { x, y } => {
                if !(x.is_finite() && y.is_finite()) {
                    return Err(Error::InvalidField(format!("heights ({}, {})mm", x, y)));
                }
            }
        }
        Ok(())
    }
}
impl Default for Field {
    fn default() -> Self {
        Field::on_axis()
    }
}
impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Angle { x, y } => write!(f, "({:.3}°, {:.3}°)", x, y),
            Field::Height { x, y } => write!(f, "({:.3}mm, {:.3}mm)", x, y),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PupilPattern {
    /// hexapolar rings, the count is derived from the ray budget if `None`
    Annular { rings: Option<usize> },
    /// square grid clipped to the unit disk
    Grid,
    /// points along both pupil axes
    Cross,
}
impl Default for PupilPattern {
    fn default() -> Self {
        PupilPattern::Annular { rings: None }
    }
}
impl PupilPattern {
    /// Pupil coordinates, chief `(0,0)` first, and the number of rings used
    pub fn points(&self, rays: usize) -> (Vec<(f64, f64)>, usize) {
        let rays = rays.max(1);
        let mut points = vec![(0., 0.)];
        match *self {
            PupilPattern::Annular { rings } => {
                let rings = rings
                    .unwrap_or_else(|| (1..).find(|r| 1 + 3 * r * (r + 1) >= rays).unwrap_or(1))
                    .max(1);
                for i in 1..=rings {
                    let rho = i as f64 / rings as f64;
                    let m = 6 * i;
                    for k in 0..m {
                        let (s, c) = (2. * PI * k as f64 / m as f64).sin_cos();
                        points.push((rho * c, rho * s));
                    }
                }
                (points, rings)
            }
            PupilPattern::Grid => {
                let mut n = ((rays as f64 * 4. / PI).sqrt().ceil() as usize).max(3);
                if n % 2 == 0 {
                    n += 1;
                }
                let h = (n - 1) as f64 / 2.;
                for j in 0..n {
                    for i in 0..n {
                        let u = (i as f64 - h) / h;
                        let v = (j as f64 - h) / h;
                        if (u != 0. || v != 0.) && u * u + v * v <= 1. + 1e-12 {
                            points.push((u, v));
                        }
                    }
                }
                (points, 0)
            }
            PupilPattern::Cross => {
                let arm = ((rays - 1) / 4).max(1);
                for j in 1..=arm {
                    let rho = j as f64 / arm as f64;
                    points.extend_from_slice(&[(rho, 0.), (-rho, 0.), (0., rho), (0., -rho)]);
                }
                (points, 0)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChiefStrategy {
    /// grid search refined by Brent root finding
    Accurate,
    /// straight line guess through the stop center
    Fast,
}
impl Default for ChiefStrategy {
    fn default() -> Self {
        ChiefStrategy::Accurate
    }
}

/// Rays sharing a start point (`Point`) or a direction (`Collimated`)
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Emission {
    Collimated,
    /// aim point on the plane through the stop center, normal to the chief
    Point { aim: Vector },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EmissionBasis {
    pub origin: Vector,
    pub uhat: Vector,
    pub vhat: Vector,
    pub direction: Vector,
    /// emission radius filling the stop at pupil scale 1
    pub stop_radius: f64,
    pub scale: f64,
    pub emission: Emission,
}
impl EmissionBasis {
    /// Basis with `direction` as chief direction
    pub fn new(origin: Vector, direction: Vector, stop_radius: f64, emission: Emission) -> Self {
        let direction = direction.normalize();
        let reference = if direction.z.abs() < 0.99 {
            Vector::ez()
        } else {
            Vector::ey()
        };
        let uhat = reference.cross(&direction).normalize();
        let vhat = direction.cross(&uhat).normalize();
        EmissionBasis {
            origin,
            uhat,
            vhat,
            direction,
            stop_radius,
            scale: 1.,
            emission,
        }
    }
    /// Moves the chief ray by `(a, b)` mm along the pupil axes
    pub fn shifted(&self, a: f64, b: f64) -> Self {
        let offset = self.uhat * a + self.vhat * b;
        match self.emission {
            Emission::Collimated => Self {
                origin: self.origin + offset,
                ..*self
            },
            Emission::Point { aim } => Self {
                emission: Emission::Point { aim: aim + offset },
                ..*self
            },
        }
    }
    pub fn with_radius(&self, stop_radius: f64) -> Self {
        Self {
            stop_radius,
            ..*self
        }
    }
    pub fn with_scale(&self, scale: f64) -> Self {
        Self { scale, ..*self }
    }
    /// Ray through pupil coordinates `(u, v)`
    pub fn ray(&self, u: f64, v: f64, wavelength: f64) -> Ray {
        let offset = (self.uhat * u + self.vhat * v) * (self.stop_radius * self.scale);
        match self.emission {
            Emission::Collimated => Ray::new(self.origin + offset, self.direction, wavelength),
            Emission::Point { aim } => Ray::new(self.origin, aim + offset - self.origin, wavelength),
        }
    }
    pub fn chief(&self, wavelength: f64) -> Ray {
        self.ray(0., 0., wavelength)
    }
}

/// Aperture stop row and its clear radius
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Stop {
    pub index: usize,
    pub radius: f64,
}
impl Stop {
    /// First STOP row with a finite aperture, else the first limited row
    pub fn find(system: &OpticalSystem) -> Result<Stop> {
        let rows = (1..system.len()).filter_map(|s| system.surface(s).map(|x| (s, x)));
        let mut fallback: Option<Stop> = None;
        for (index, surface) in rows {
            if surface.kind.is_skippable() || surface.kind == SurfaceKind::Image {
                continue;
            }
            if let Some(radius) = surface.clear_radius() {
                if surface.kind == SurfaceKind::Stop {
                    return Ok(Stop { index, radius });
                }
                if fallback.is_none() {
                    fallback = Some(Stop { index, radius });
                }
            }
        }
        fallback.ok_or_else(|| {
            Error::InvalidStack("no stop row and no row with a finite aperture".into())
        })
    }
}

/// Outcome of the chief ray search
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChiefSolution {
    pub offset: (f64, f64),
    /// distance of the chief ray to the stop center (mm), NaN if it misses
    pub residual: f64,
    pub converged: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    pub rays: usize,
    pub pattern: PupilPattern,
    /// µm
    pub wavelength: f64,
    pub chief: ChiefStrategy,
    pub aim_through_stop: bool,
    pub solve_chief: bool,
    pub physical_vignetting: bool,
    pub schedule: Vec<f64>,
    pub parallel: bool,
}
impl Default for SamplerConfig {
    fn default() -> Self {
        SamplerConfig {
            rays: 127,
            pattern: PupilPattern::default(),
            wavelength: 0.5876,
            chief: ChiefStrategy::Accurate,
            aim_through_stop: true,
            solve_chief: true,
            physical_vignetting: true,
            schedule: PUPIL_SCALES.to_vec(),
            parallel: true,
        }
    }
}

/// Rays of one pupil sampling, chief ray first
#[derive(Debug, Clone, Serialize)]
pub struct PupilBundle {
    pub basis: EmissionBasis,
    pub pupil: Vec<(f64, f64)>,
    pub rays: Vec<Ray>,
    pub chief: Option<usize>,
    pub rings: usize,
}
impl PupilBundle {
    pub fn len(&self) -> usize {
        self.rays.len()
    }
    pub fn is_empty(&self) -> bool {
        self.rays.is_empty()
    }
}

/// Successful sampling with its per ray traces
#[derive(Debug, Clone)]
pub struct SampledBundle {
    pub bundle: PupilBundle,
    pub traces: Vec<std::result::Result<RayPath, TraceFailure>>,
    pub chief: ChiefSolution,
    pub diagnostics: Diagnostics,
}
impl SampledBundle {
    pub fn ok(&self) -> usize {
        self.traces.iter().filter(|t| t.is_ok()).count()
    }
}

pub struct PupilSampler<'a> {
    system: &'a OpticalSystem,
    config: &'a SamplerConfig,
}
impl<'a> PupilSampler<'a> {
    pub fn new(system: &'a OpticalSystem, config: &'a SamplerConfig) -> Self {
        PupilSampler { system, config }
    }
    pub fn wavelength(&self) -> f64 {
        self.config.wavelength
    }

    /// Straight line basis aiming the field at the stop center
    pub fn geometric_basis(&self, field: &Field, stop: &Stop) -> Result<EmissionBasis> {
        field.validate()?;
        let system = self.system;
        let frames = system.frames(stop.index);
        let center = frames[stop.index].origin;
        match *field {
            Field::Angle { x, y } => {
                let direction =
                    Vector::new(x.to_radians().tan(), y.to_radians().tan(), 1.).normalize();
                let first = (1..=stop.index)
                    .find(|s| system.surface(*s).map_or(false, |x| !x.kind.is_skippable()))
                    .unwrap_or(stop.index);
                let start_z = frames[first].origin.z - stop.radius.max(1.);
                let l = (center.z - start_z) / direction.z;
                Ok(EmissionBasis::new(
                    center - direction * l,
                    direction,
                    stop.radius,
                    Emission::Collimated,
                ))
            }
            Field::Height { x, y } => {
                let distance = system.surface(0).map_or(f64::INFINITY, |s| s.thickness);
                if !distance.is_finite() {
                    return Err(Error::InvalidField(format!(
                        "height field {} with the object at infinity",
                        field
                    )));
                }
                let origin = Vector::new(x, y, 0.);
                if (center - origin).norm() < 1e-12 {
                    return Err(Error::InvalidField(format!("field {} sits on the stop", field)));
                }
                Ok(EmissionBasis::new(
                    origin,
                    center - origin,
                    stop.radius,
                    Emission::Point { aim: center },
                ))
            }
        }
    }

    /// Chief ray miss distance projected on the pupil axes
    fn stop_residual(&self, basis: &EmissionBasis, stop: &Stop, a: f64, b: f64) -> Option<(f64, f64)> {
        let ray = basis.shifted(a, b).chief(self.config.wavelength);
        let hit = self.system.hit_point(&ray, stop.index).ok()?;
        let center = self.system.frames(stop.index)[stop.index].origin;
        let miss = hit - center;
        Some((miss.dot(&basis.uhat), miss.dot(&basis.vhat)))
    }

    /// Searches the pupil offset of the chief ray
    pub fn solve_chief(&self, basis: &EmissionBasis, stop: &Stop, strategy: ChiefStrategy) -> ChiefSolution {
        let tol = 1e-6 * stop.radius.max(1.);
        let norm = |r: Option<(f64, f64)>| r.map_or(f64::NAN, |(x, y)| x.hypot(y));
        let mut offset = (0f64, 0f64);
        let mut residual = norm(self.stop_residual(basis, stop, 0., 0.));
        if strategy == ChiefStrategy::Fast || residual < tol {
            return ChiefSolution {
                offset,
                residual,
                converged: residual < tol,
            };
        }
        // coarse grid
        let span = basis.stop_radius.max(1e-3);
        let step = 2. * span / (CHIEF_GRID - 1) as f64;
        for i in 0..CHIEF_GRID {
            for j in 0..CHIEF_GRID {
                let a = -span + i as f64 * step;
                let b = -span + j as f64 * step;
                let r = norm(self.stop_residual(basis, stop, a, b));
                if r < residual || residual.is_nan() {
                    offset = (a, b);
                    residual = r;
                }
            }
        }
        if residual.is_nan() {
            log::warn!("no chief ray candidate reached the stop #{}", stop.index);
            return ChiefSolution {
                offset: (0., 0.),
                residual,
                converged: false,
            };
        }
        // axis by axis refinement
        for round in 0..BRENT_ROUNDS {
            if residual < tol {
                break;
            }
            for axis in 0..2 {
                let g = |x: f64| -> f64 {
                    let (a, b) = if axis == 0 { (x, offset.1) } else { (offset.0, x) };
                    self.stop_residual(basis, stop, a, b)
                        .map_or(f64::NAN, |r| if axis == 0 { r.0 } else { r.1 })
                };
                let x0 = if axis == 0 { offset.0 } else { offset.1 };
                if let Some(x) = bracket_root(&g, x0, step, 0.1 * tol) {
                    let candidate = if axis == 0 { (x, offset.1) } else { (offset.0, x) };
                    let r = norm(self.stop_residual(basis, stop, candidate.0, candidate.1));
                    if r < residual {
                        offset = candidate;
                        residual = r;
                    }
                }
            }
            log::trace!("chief solve round #{}: residual {:e}", round, residual);
        }
        ChiefSolution {
            offset,
            residual,
            converged: residual < tol,
        }
    }

    /// Emission radius putting the half pupil ray on the half stop radius
    fn aim_radius(&self, basis: &EmissionBasis, stop: &Stop) -> Option<f64> {
        let frame = self.system.frames(stop.index)[stop.index];
        let wl = self.config.wavelength;
        let chief = frame.to_local_point(self.system.hit_point(&basis.chief(wl), stop.index).ok()?);
        let mut rho = basis.stop_radius;
        for _ in 0..6 {
            let hit = self
                .system
                .hit_point(&basis.with_radius(rho).ray(0., 0.5, wl), stop.index)
                .ok()?;
            let h = (frame.to_local_point(hit) - chief).radius();
            if h < 1e-12 || !h.is_finite() {
                return None;
            }
            let ratio = 0.5 * stop.radius / h;
            rho *= ratio;
            if (ratio - 1.).abs() < 1e-9 {
                break;
            }
        }
        log::trace!(
            "aimed emission radius {:.6} (chief at {:.3e} from the stop center)",
            rho,
            chief.radius()
        );
        Some(rho)
    }

    /// Basis of `field` with optional chief solve and stop aiming
    pub fn basis(&self, field: &Field, stop: &Stop, aim: bool, solve: bool) -> Result<(EmissionBasis, ChiefSolution)> {
        let mut basis = self.geometric_basis(field, stop)?;
        let strategy = if solve { self.config.chief } else { ChiefStrategy::Fast };
        let chief = self.solve_chief(&basis, stop, strategy);
        if !chief.converged && solve {
            log::debug!(
                "field {}: chief ray misses the stop center by {:e}mm",
                field,
                chief.residual
            );
        }
        basis = basis.shifted(chief.offset.0, chief.offset.1);
        if aim {
            if let Some(rho) = self.aim_radius(&basis, stop) {
                basis = basis.with_radius(rho);
            }
        }
        Ok((basis, chief))
    }

    /// Bundle through the pupil `points` at a pupil scale
    ///
    /// `points[0]` is expected to be the chief `(0,0)`.
    pub fn bundle(&self, basis: &EmissionBasis, scale: f64, points: &[(f64, f64)], rings: usize) -> PupilBundle {
        let basis = basis.with_scale(scale);
        let rays = points
            .iter()
            .map(|(u, v)| basis.ray(*u, *v, self.config.wavelength))
            .collect();
        PupilBundle {
            basis,
            pupil: points.to_vec(),
            rays,
            chief: points.first().filter(|p| **p == (0., 0.)).map(|_| 0),
            rings,
        }
    }

    /// Hit-point traces of `rays` on `target`, checking for cancellation
    pub fn trace_rays(
        &self,
        rays: &[Ray],
        target: usize,
        ctx: &RunContext,
    ) -> Result<Vec<std::result::Result<RayPath, TraceFailure>>> {
        let mut traces = Vec::with_capacity(rays.len());
        for chunk in rays.chunks(CHECKPOINT) {
            ctx.cancel.check()?;
            if self.config.parallel {
                let mut part: Vec<_> = chunk
                    .par_iter()
                    .map(|ray| self.system.trace_hit(ray, target))
                    .collect();
                traces.append(&mut part);
            } else {
                traces.extend(chunk.iter().map(|ray| self.system.trace_hit(ray, target)));
            }
        }
        Ok(traces)
    }

    /// Samples `field` until at least one ray reaches `target`
    pub fn sample(&self, field_index: usize, field: &Field, target: usize, ctx: &RunContext) -> Result<SampledBundle> {
        let (points, rings) = self.config.pattern.points(self.config.rays);
        self.sample_points(field_index, field, target, &points, rings, ctx)
    }
    /// Same as [`sample`](Self::sample) through the given pupil points
    pub fn sample_points(
        &self,
        field_index: usize,
        field: &Field,
        target: usize,
        points: &[(f64, f64)],
        rings: usize,
        ctx: &RunContext,
    ) -> Result<SampledBundle> {
        self.system.check_target(target)?;
        let stop = Stop::find(self.system)?;
        let base = (self.config.aim_through_stop, self.config.solve_chief);
        let mut variants = vec![base];
        if self.config.physical_vignetting && field.is_angle() {
            variants.push((!base.0, base.1));
            variants.push((base.0, !base.1));
        }
        let mut bases: Vec<Option<(EmissionBasis, ChiefSolution)>> = vec![None; variants.len()];
        let mut diagnostics = Diagnostics::new();
        let mut generated = 0usize;
        for &scale in self.config.schedule.iter() {
            for (k, &(aim, solve)) in variants.iter().enumerate() {
                ctx.cancel.check()?;
                let (basis, chief) = match bases[k] {
                    Some(b) => b,
                    None => {
                        let b = self.basis(field, &stop, aim, solve)?;
                        bases[k] = Some(b);
                        b
                    }
                };
                let bundle = self.bundle(&basis, scale, points, rings);
                let traces = self.trace_rays(&bundle.rays, target, ctx)?;
                generated += traces.len();
                let mut attempt = Diagnostics::new();
                for failure in traces.iter().filter_map(|t| t.as_ref().err()) {
                    attempt.record(failure);
                    ctx.diagnostics.failure(field_index, failure);
                }
                let ok = traces.len() - attempt.failures();
                log::debug!(
                    "field {} scale {} aim={} solve={}: {}/{} rays on surface #{}",
                    field,
                    scale,
                    aim,
                    solve,
                    ok,
                    traces.len(),
                    target
                );
                diagnostics.retry.push(RetryAttempt {
                    pupil_scale: scale,
                    aim_through_stop: aim,
                    solve_chief: solve,
                    ok,
                    generated: traces.len(),
                    top_kind: attempt.top_kind(),
                    top_surface: attempt.top_surface(),
                    first_start: bundle.rays.first().map(|r| r.position),
                    first_direction: bundle.rays.first().map(|r| r.direction),
                });
                if ok > 0 {
                    diagnostics.merge(&attempt);
                    return Ok(SampledBundle {
                        bundle,
                        traces,
                        chief,
                        diagnostics,
                    });
                }
                diagnostics.merge(&attempt);
            }
        }
        let (reachable, probe) = match bases.iter().flatten().next() {
            Some((basis, _)) => self.system.probe(&basis.chief(self.config.wavelength)),
            None => (vec![], None),
        };
        let failure = FieldFailure {
            field: field_index,
            target,
            rays_total: generated,
            rays_reached: 0,
            reachable,
            probe,
            diagnostics,
        };
        log::warn!("{}", failure);
        Err(Error::RetriesExhausted(Box::new(failure)))
    }
}

/// Root of `g` near `x0`, expanding the bracket until the sign changes
fn bracket_root<G: Fn(f64) -> f64>(g: &G, x0: f64, step: f64, tol: f64) -> Option<f64> {
    let mut h = step.max(1e-9);
    for _ in 0..8 {
        let (lo, hi) = (x0 - h, x0 + h);
        let (glo, ghi) = (g(lo), g(hi));
        if glo.is_finite() && ghi.is_finite() && glo * ghi <= 0. {
            let mut convergency = tol;
            return find_root_brent(lo, hi, g, &mut convergency).ok();
        }
        h *= 2.;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::samples;

    #[test]
    fn annular_ring_count_from_budget() {
        let (points, rings) = PupilPattern::default().points(37);
        assert_eq!(rings, 3);
        assert_eq!(points.len(), 37);
        assert_eq!(points[0], (0., 0.));
        assert!(points.iter().all(|(u, v)| u * u + v * v <= 1. + 1e-12));
        let (points, rings) = PupilPattern::Annular { rings: Some(2) }.points(1000);
        assert_eq!((points.len(), rings), (19, 2));
    }

    #[test]
    fn grid_and_cross_patterns() {
        let (grid, _) = PupilPattern::Grid.points(100);
        assert_eq!(grid[0], (0., 0.));
        assert_eq!(grid.iter().filter(|p| **p == (0., 0.)).count(), 1);
        assert!(grid.len() >= 80);
        let (cross, _) = PupilPattern::Cross.points(21);
        assert_eq!(cross.len(), 21);
        assert!(cross.iter().all(|(u, v)| *u == 0. || *v == 0.));
    }

    #[test]
    fn basis_axes_are_orthonormal() {
        for d in [Vector::ez(), Vector::new(0.3, -0.2, 1.), Vector::new(1., 0., 0.05)].iter() {
            let b = EmissionBasis::new(Vector::zero(), *d, 1., Emission::Collimated);
            assert!(b.uhat.dot(&b.vhat).abs() < 1e-12);
            assert!(b.uhat.dot(&b.direction).abs() < 1e-12);
            assert!((b.uhat.norm() - 1.).abs() < 1e-12);
        }
        let b = EmissionBasis::new(Vector::zero(), Vector::ez(), 1., Emission::Collimated);
        assert_eq!(b.uhat, Vector::ex());
        assert_eq!(b.vhat, Vector::ey());
    }

    #[test]
    fn stop_lookup() {
        let system = samples::singlet().unwrap();
        let stop = Stop::find(&system).unwrap();
        assert_eq!(stop.index, 1);
        assert!((stop.radius - 5.).abs() < 1e-12);
        let mirror = samples::paraboloid(200., 10.).unwrap();
        assert_eq!(Stop::find(&mirror).unwrap().index, 1);
    }

    #[test]
    fn chief_ray_goes_through_the_stop_center() {
        let system = samples::singlet().unwrap();
        let config = SamplerConfig::default();
        let sampler = PupilSampler::new(&system, &config);
        let stop = Stop::find(&system).unwrap();
        let (basis, chief) = sampler.basis(&Field::angle(0., 3.), &stop, true, true).unwrap();
        println!("{:?}", chief);
        assert!(chief.converged);
        let hit = system.hit_point(&basis.chief(0.5876), stop.index).unwrap();
        let center = system.frames(stop.index)[stop.index].origin;
        assert!((hit - center).norm() < 1e-5);
    }

    #[test]
    fn chief_solve_corrects_a_lens_ahead_of_the_stop() {
        let system = samples::rear_stop_singlet().unwrap();
        let config = SamplerConfig::default();
        let sampler = PupilSampler::new(&system, &config);
        let stop = Stop::find(&system).unwrap();
        let field = Field::angle(0., 5.);
        let guess = sampler.geometric_basis(&field, &stop).unwrap();
        let fast = sampler.solve_chief(&guess, &stop, ChiefStrategy::Fast);
        let accurate = sampler.solve_chief(&guess, &stop, ChiefStrategy::Accurate);
        println!("fast: {:?}\naccurate: {:?}", fast, accurate);
        assert!(fast.residual > 1e-3);
        assert!(accurate.converged);
        assert!(accurate.residual < fast.residual);
    }

    #[test]
    fn sample_puts_chief_first() {
        let system = samples::singlet().unwrap();
        let config = SamplerConfig {
            rays: 19,
            ..Default::default()
        };
        let sampler = PupilSampler::new(&system, &config);
        let sampled = sampler
            .sample(0, &Field::angle(0., 2.), system.image_index(), &RunContext::new())
            .unwrap();
        assert_eq!(sampled.bundle.chief, Some(0));
        assert_eq!(sampled.bundle.pupil[0], (0., 0.));
        assert!(sampled.ok() >= 7);
        assert_eq!(sampled.diagnostics.retry.len(), 1);
        assert_eq!(sampled.diagnostics.retry[0].pupil_scale, 1.);
    }

    #[test]
    fn retries_exhausted_with_ledger() {
        let system = samples::blocked().unwrap();
        let config = SamplerConfig {
            rays: 7,
            ..Default::default()
        };
        let sampler = PupilSampler::new(&system, &config);
        let err = sampler
            .sample(4, &Field::angle(0., 5.), system.image_index(), &RunContext::new())
            .unwrap_err();
        match err {
            Error::RetriesExhausted(failure) => {
                println!("{}", failure);
                assert_eq!(failure.field, 4);
                assert_eq!(failure.rays_reached, 0);
                assert_eq!(failure.diagnostics.retry.len(), 3 * PUPIL_SCALES.len());
                assert_eq!(failure.reachable, vec![1]);
                assert_eq!(
                    failure.diagnostics.top_surface().as_deref(),
                    Some("3:PHYSICAL_APERTURE_BLOCK")
                );
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn cancelled_before_tracing() {
        let system = samples::singlet().unwrap();
        let config = SamplerConfig::default();
        let ctx = RunContext::new();
        ctx.cancel.cancel();
        let err = PupilSampler::new(&system, &config)
            .sample(0, &Field::on_axis(), system.image_index(), &ctx)
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[test]
    fn height_field_needs_a_finite_object() {
        let system = samples::singlet().unwrap();
        let config = SamplerConfig::default();
        let sampler = PupilSampler::new(&system, &config);
        let stop = Stop::find(&system).unwrap();
        assert!(matches!(
            sampler.geometric_basis(&Field::height(0., 1.), &stop),
            Err(Error::InvalidField(_))
        ));
        assert!(Field::angle(0., 90.).validate().is_err());
    }
}
