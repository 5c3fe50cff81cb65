//! Wavefront (optical path difference) maps
//!
//! The [`WAVEFRONT`] builder configures a [`Wavefront`] engine that traces a
//! regular `n×n` grid of pupil rays to the image row. Cell `(i,j)` sits at
//! `u = (i - n/2)/(n/2)`, `v = (j - n/2)/(n/2)` so the center cell is the
//! chief ray. The optical path is referenced either to the chief ray or to a
//! sphere centered on the chief image point; a best-fit piston/tilt plane can
//! be removed and is kept in the record.

use crate::context::RunContext;
use crate::diagnostics::Diagnostics;
use crate::error::{Error, FailureKind, Result, TraceFailure};
use crate::pupil::{ChiefStrategy, EmissionBasis, Field, PupilSampler, SamplerConfig};
use crate::trace::OpticalSystem;
use crate::vector::Vector;
use crate::{Builder, Conversion};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Optical path baseline
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Reference {
    /// chief ray optical path (piston)
    ChiefRay,
    /// sphere centered on the chief image point, the radius defaults to
    /// the chief ray last segment
    Sphere { radius: Option<f64> },
}
impl Default for Reference {
    fn default() -> Self {
        Reference::Sphere { radius: None }
    }
}

/// Wavefront builder
///
/// Default properties:
///  * grid        : 64×64
///  * wavelength  : 0.5876µm
///  * reference   : sphere on the chief image point
///  * tilt        : kept
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WAVEFRONT {
    pub sampler: SamplerConfig,
    pub grid: usize,
    pub reference: Reference,
    pub remove_tilt: bool,
}
impl Default for WAVEFRONT {
    fn default() -> Self {
        WAVEFRONT {
            sampler: SamplerConfig::default(),
            grid: 64,
            reference: Reference::default(),
            remove_tilt: false,
        }
    }
}
impl WAVEFRONT {
    pub fn set_grid(self, grid: usize) -> Self {
        Self { grid, ..self }
    }
    /// Sets the wavelength in micrometers
    pub fn set_wavelength(self, wavelength: f64) -> Self {
        Self {
            sampler: SamplerConfig {
                wavelength,
                ..self.sampler
            },
            ..self
        }
    }
    pub fn set_reference(self, reference: Reference) -> Self {
        Self { reference, ..self }
    }
    pub fn set_remove_tilt(self, remove_tilt: bool) -> Self {
        Self {
            remove_tilt,
            ..self
        }
    }
    pub fn set_chief_strategy(self, chief: ChiefStrategy) -> Self {
        Self {
            sampler: SamplerConfig {
                chief,
                ..self.sampler
            },
            ..self
        }
    }
    pub fn set_parallel(self, parallel: bool) -> Self {
        Self {
            sampler: SamplerConfig {
                parallel,
                ..self.sampler
            },
            ..self
        }
    }
}
impl Builder for WAVEFRONT {
    type Component = Wavefront;
    fn build(self) -> Wavefront {
        Wavefront {
            config: self.sampler,
            grid: self.grid.max(2),
            reference: self.reference,
            remove_tilt: self.remove_tilt,
        }
    }
}

/// Plane `piston + tilt_u·u + tilt_v·v` over the pupil coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaneFit {
    pub piston: f64,
    pub tilt_u: f64,
    pub tilt_v: f64,
}
impl PlaneFit {
    /// Weighted least squares fit of `(u, v, value, weight)` samples
    pub fn fit<I>(samples: I) -> Option<PlaneFit>
    where
        I: IntoIterator<Item = (f64, f64, f64, f64)>,
    {
        let mut s = [0f64; 9];
        for (u, v, z, w) in samples {
            s[0] += w;
            s[1] += w * u;
            s[2] += w * v;
            s[3] += w * u * u;
            s[4] += w * u * v;
            s[5] += w * v * v;
            s[6] += w * z;
            s[7] += w * u * z;
            s[8] += w * v * z;
        }
        let [sw, su, sv, suu, suv, svv, sz, suz, svz] = s;
        let det3 = |m: [[f64; 3]; 3]| {
            m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
                - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
                + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
        };
        let a = [[sw, su, sv], [su, suu, suv], [sv, suv, svv]];
        let det = det3(a);
        if !det.is_finite() || det.abs() <= 1e-12 * sw.powi(3).max(f64::MIN_POSITIVE) {
            return None;
        }
        let b = [sz, suz, svz];
        let solve = |k: usize| {
            let mut m = a;
            for r in 0..3 {
                m[r][k] = b[r];
            }
            det3(m) / det
        };
        Some(PlaneFit {
            piston: solve(0),
            tilt_u: solve(1),
            tilt_v: solve(2),
        })
    }
    pub fn value(&self, u: f64, v: f64) -> f64 {
        self.piston + self.tilt_u * u + self.tilt_v * v
    }
}

/// Statistics over the valid cells
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct OpdStats {
    pub valid: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub rms: f64,
    pub peak_to_valley: f64,
}
impl OpdStats {
    pub fn from_values<'a, I: IntoIterator<Item = &'a f64>>(values: I) -> Self {
        let values: Vec<f64> = values.into_iter().cloned().filter(|x| x.is_finite()).collect();
        if values.is_empty() {
            return Default::default();
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let rms = (values.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / n).sqrt();
        OpdStats {
            valid: values.len(),
            min,
            max,
            mean,
            rms,
            peak_to_valley: max - min,
        }
    }
}

/// Normalized pupil coordinate of cell `i` on an `n` grid
pub fn cell_coordinate(i: usize, n: usize) -> f64 {
    let h = (n / 2) as f64;
    (i as f64 - h) / h
}

/// Wavefront map of one field
///
/// Arrays are indexed `[[j, i]]` (row `v`, column `u`); invalid cells hold NaN.
#[derive(Debug, Clone, Serialize)]
pub struct OpdRecord {
    pub field_index: usize,
    pub field: Field,
    pub size: usize,
    /// µm
    pub wavelength: f64,
    /// OPD in mm
    pub opd: Array2<f64>,
    /// OPD in waves
    pub opd_waves: Array2<f64>,
    pub mask: Array2<bool>,
    pub amplitude: Array2<f64>,
    pub failures: Array2<Option<FailureKind>>,
    pub reference: Reference,
    /// reference sphere radius (mm)
    pub reference_radius: Option<f64>,
    pub chief_optical_path: f64,
    pub chief_hit: Vector,
    /// plane removed from `opd_waves`, in waves
    pub plane: Option<PlaneFit>,
    /// statistics of `opd_waves`
    pub stats: OpdStats,
    pub basis: EmissionBasis,
    pub diagnostics: Diagnostics,
}
impl OpdRecord {
    pub fn valid(&self) -> usize {
        self.mask.iter().filter(|m| **m).count()
    }
    /// OPD in waves with the removed plane added back
    pub fn restore_plane(&self) -> Array2<f64> {
        let n = self.size;
        match self.plane {
            None => self.opd_waves.clone(),
            Some(plane) => Array2::from_shape_fn((n, n), |(j, i)| {
                self.opd_waves[[j, i]] + plane.value(cell_coordinate(i, n), cell_coordinate(j, n))
            }),
        }
    }
}

/// Nearest neighbour `n×n` resampling of scattered `(u, v, value)` samples
///
/// Cells outside the unit disk are NaN.
pub fn from_scattered(n: usize, samples: &[(f64, f64, f64)]) -> Array2<f64> {
    Array2::from_shape_fn((n, n), |(j, i)| {
        let (u, v) = (cell_coordinate(i, n), cell_coordinate(j, n));
        if u * u + v * v > 1. {
            return f64::NAN;
        }
        samples
            .iter()
            .map(|(x, y, z)| ((x - u).hypot(y - v), *z))
            .fold((f64::INFINITY, f64::NAN), |a, b| if b.0 < a.0 { b } else { a })
            .1
    })
}

pub struct Wavefront {
    config: SamplerConfig,
    grid: usize,
    reference: Reference,
    remove_tilt: bool,
}
impl Wavefront {
    pub fn size(&self) -> usize {
        self.grid
    }
    pub fn wavelength(&self) -> f64 {
        self.config.wavelength
    }
    /// Pupil cells inside the unit disk, chief cell first
    fn cells(&self) -> Vec<(usize, usize)> {
        let n = self.grid;
        let h = n / 2;
        let mut cells = vec![(h, h)];
        for j in 0..n {
            for i in 0..n {
                let (u, v) = (cell_coordinate(i, n), cell_coordinate(j, n));
                if (i, j) != (h, h) && u * u + v * v <= 1. {
                    cells.push((i, j));
                }
            }
        }
        cells
    }
    /// Wavefront map of one field on the image row
    pub fn run(&self, system: &OpticalSystem, field_index: usize, field: &Field, ctx: &RunContext) -> Result<OpdRecord> {
        let n = self.grid;
        let target = system.image_index();
        let cells = self.cells();
        let points: Vec<(f64, f64)> = cells
            .iter()
            .map(|(i, j)| (cell_coordinate(*i, n), cell_coordinate(*j, n)))
            .collect();
        let sampled = PupilSampler::new(system, &self.config)
            .sample_points(field_index, field, target, &points, 0, ctx)?;
        let mut diagnostics = sampled.diagnostics;
        let chief = match sampled.traces[0].as_ref() {
            Ok(path) => path.clone(),
            Err(failure) => {
                return Err(Error::ChiefRay(failure.clone()));
            }
        };
        let chief_hit = chief.last();
        let (reference_radius, baseline) = match self.reference {
            Reference::ChiefRay => (None, chief.optical_path),
            Reference::Sphere { radius } => {
                let r = radius.unwrap_or(chief.last_segment);
                (Some(r), chief.optical_path - chief.index * r)
            }
        };
        let wavelength_mm = self.config.wavelength.from_um();

        let mut opd = Array2::from_elem((n, n), f64::NAN);
        let mut mask = Array2::from_elem((n, n), false);
        let mut failures: Array2<Option<FailureKind>> = Array2::from_elem((n, n), None);
        for (k, (&(i, j), trace)) in cells.iter().zip(sampled.traces.iter()).enumerate() {
            let path = match trace {
                Ok(path) => path,
                Err(failure) => {
                    failures[[j, i]] = Some(failure.kind);
                    continue;
                }
            };
            let value = match reference_radius {
                _ if k == 0 => Some(0.),
                None => Some(path.optical_path - baseline),
                Some(r) => {
                    let w = path.last() - chief_hit;
                    let wd = w.dot(&path.direction);
                    let arg = wd * wd - w.dot(&w) + r * r;
                    if arg < 0. {
                        None
                    } else {
                        let s = wd + arg.sqrt();
                        Some(path.optical_path - path.index * s - baseline)
                    }
                }
            };
            match value {
                Some(x) if x.is_finite() => {
                    opd[[j, i]] = x;
                    mask[[j, i]] = true;
                }
                _ => {
                    let failure = TraceFailure::new(
                        FailureKind::InvalidHitPoint,
                        Some(target),
                        format!("cell ({},{}) misses the reference sphere", i, j),
                    );
                    ctx.diagnostics.failure(field_index, &failure);
                    diagnostics.record(&failure);
                    failures[[j, i]] = Some(failure.kind);
                }
            }
        }
        let mut opd_waves = opd.mapv(|x| x / wavelength_mm);
        let amplitude = mask.mapv(|m| if m { 1. } else { 0. });

        let plane = if self.remove_tilt {
            let fit = PlaneFit::fit(opd_waves.indexed_iter().filter_map(|((j, i), x)| {
                if mask[[j, i]] {
                    Some((cell_coordinate(i, n), cell_coordinate(j, n), *x, amplitude[[j, i]]))
                } else {
                    None
                }
            }));
            if let Some(plane) = fit {
                opd_waves.indexed_iter_mut().for_each(|((j, i), x)| {
                    *x -= plane.value(cell_coordinate(i, n), cell_coordinate(j, n));
                });
            } else {
                log::warn!("field #{}: not enough valid cells to fit a plane", field_index);
            }
            fit
        } else {
            None
        };
        let stats = OpdStats::from_values(opd_waves.iter());
        ctx.diagnostics.field_completed(field_index, &diagnostics);
        log::info!(
            "wavefront field #{} {}: {}/{} cells, RMS {:.4} waves, PV {:.4} waves",
            field_index,
            field,
            stats.valid,
            cells.len(),
            stats.rms,
            stats.peak_to_valley
        );
        Ok(OpdRecord {
            field_index,
            field: *field,
            size: n,
            wavelength: self.config.wavelength,
            opd,
            opd_waves,
            mask,
            amplitude,
            failures,
            reference: self.reference,
            reference_radius,
            chief_optical_path: chief.optical_path,
            chief_hit,
            plane,
            stats,
            basis: sampled.bundle.basis,
            diagnostics,
        })
    }
    /// Wavefront maps of all `fields`, a failed field does not stop the others
    pub fn run_all(&self, system: &OpticalSystem, fields: &[Field], ctx: &RunContext) -> Vec<Result<OpdRecord>> {
        let n = fields.len().max(1) as f64;
        let mut records = Vec::with_capacity(fields.len());
        for (k, field) in fields.iter().enumerate() {
            ctx.report(100. * k as f64 / n, "wavefront", &format!("field #{} {}", k, field));
            if let Err(e) = ctx.cancel.check() {
                records.push(Err(e));
                break;
            }
            records.push(self.run(system, k, field, ctx));
        }
        ctx.report(100., "wavefront", "done");
        records
    }
}
