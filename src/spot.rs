//! Spot diagrams
//!
//! The [`SPOT`] builder configures a [`SpotDiagram`] engine. For each field
//! the engine samples the pupil (with the vignetting retries of
//! [`PupilSampler`]), keeps the hit points of the rays that reached the
//! target row in that row's local frame and centers the diagram on the chief
//! ray.

use crate::context::RunContext;
use crate::diagnostics::Diagnostics;
use crate::error::{Result, TraceFailure};
use crate::pupil::{
    ChiefSolution, ChiefStrategy, EmissionBasis, Field, PupilPattern, PupilSampler, SampledBundle,
    SamplerConfig,
};
use crate::trace::{OpticalSystem, RayPath};
use crate::vector::Vector;
use crate::Builder;
use serde::{Deserialize, Serialize};

/// Spot diagram builder
///
/// Default properties:
///  * rays              : 127 (6 hexapolar rings)
///  * wavelength        : 0.5876µm
///  * target            : the image row
///  * chief ray         : accurate solve
///  * aim through stop  : yes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SPOT {
    pub sampler: SamplerConfig,
    pub target: Option<usize>,
}
impl SPOT {
    pub fn set_rays(self, rays: usize) -> Self {
        Self {
            sampler: SamplerConfig {
                rays,
                ..self.sampler
            },
            ..self
        }
    }
    pub fn set_pattern(self, pattern: PupilPattern) -> Self {
        Self {
            sampler: SamplerConfig {
                pattern,
                ..self.sampler
            },
            ..self
        }
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
    pub fn set_chief_strategy(self, chief: ChiefStrategy) -> Self {
        Self {
            sampler: SamplerConfig {
                chief,
                ..self.sampler
            },
            ..self
        }
    }
    pub fn set_aim_through_stop(self, aim_through_stop: bool) -> Self {
        Self {
            sampler: SamplerConfig {
                aim_through_stop,
                ..self.sampler
            },
            ..self
        }
    }
    pub fn set_physical_vignetting(self, physical_vignetting: bool) -> Self {
        Self {
            sampler: SamplerConfig {
                physical_vignetting,
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
    /// Sets the surface row the spots are collected on
    pub fn set_target(self, target: usize) -> Self {
        Self {
            target: Some(target),
            ..self
        }
    }
}
impl Builder for SPOT {
    type Component = SpotDiagram;
    fn build(self) -> SpotDiagram {
        SpotDiagram {
            config: self.sampler,
            target: self.target,
        }
    }
}

/// One ray landing on the target row
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SpotPoint {
    /// hit point in the target local frame
    pub local: Vector,
    pub global: Vector,
    pub wavelength: f64,
    /// index of the ray in the pupil bundle
    pub ray: usize,
    pub chief: bool,
    pub pupil: (f64, f64),
    pub start: Vector,
    pub direction: Vector,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpotRecord {
    pub field_index: usize,
    pub field: Field,
    pub target: usize,
    /// points in ray order
    pub points: Vec<SpotPoint>,
    pub rays_attempted: usize,
    pub rays_traced: usize,
    /// position of the chief ray in `points`
    pub chief: Option<usize>,
    pub chief_hit: Option<Vector>,
    pub centroid: Vector,
    /// plot center: the chief hit or the point nearest to the centroid
    pub center: Vector,
    /// RMS radius about `center` (mm)
    pub rms_radius: f64,
    /// largest distance to `center` (mm)
    pub geometric_radius: f64,
    pub rings: usize,
    pub pupil_scale: f64,
    pub basis: EmissionBasis,
    pub chief_solution: ChiefSolution,
    pub diagnostics: Diagnostics,
}
impl SpotRecord {
    pub fn success_rate(&self) -> f64 {
        if self.rays_attempted == 0 {
            0.
        } else {
            self.rays_traced as f64 / self.rays_attempted as f64
        }
    }
    /// Point offsets `(x,y)` from the plot center in mm
    pub fn offsets(&self) -> Vec<(f64, f64)> {
        self.points
            .iter()
            .map(|p| (p.local.x - self.center.x, p.local.y - self.center.y))
            .collect()
    }
}

pub struct SpotDiagram {
    config: SamplerConfig,
    target: Option<usize>,
}
impl SpotDiagram {
    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }
    pub fn target(&self, system: &OpticalSystem) -> usize {
        self.target.unwrap_or_else(|| system.image_index())
    }
    /// Spot diagram of one field
    pub fn run(&self, system: &OpticalSystem, field_index: usize, field: &Field, ctx: &RunContext) -> Result<SpotRecord> {
        let target = self.target(system);
        system.check_target(target)?;
        let sampled = PupilSampler::new(system, &self.config).sample(field_index, field, target, ctx)?;
        let record = self.record(system, field_index, field, target, sampled);
        ctx.diagnostics.field_completed(field_index, &record.diagnostics);
        log::info!(
            "spot field #{} {}: {}/{} rays, RMS radius {:.3e}mm",
            field_index,
            field,
            record.rays_traced,
            record.rays_attempted,
            record.rms_radius
        );
        Ok(record)
    }
    /// Spot diagrams of all `fields`, a failed field does not stop the others
    pub fn run_all(&self, system: &OpticalSystem, fields: &[Field], ctx: &RunContext) -> Vec<Result<SpotRecord>> {
        let n = fields.len().max(1) as f64;
        let mut records = Vec::with_capacity(fields.len());
        for (k, field) in fields.iter().enumerate() {
            ctx.report(100. * k as f64 / n, "spot", &format!("field #{} {}", k, field));
            if let Err(e) = ctx.cancel.check() {
                records.push(Err(e));
                break;
            }
            records.push(self.run(system, k, field, ctx));
        }
        ctx.report(100., "spot", "done");
        records
    }

    fn record(&self, system: &OpticalSystem, field_index: usize, field: &Field, target: usize, sampled: SampledBundle) -> SpotRecord {
        let SampledBundle {
            bundle,
            traces,
            chief: chief_solution,
            mut diagnostics,
        } = sampled;
        let frame = system.frames(target)[target];
        let wavelength = self.config.wavelength;
        let points: Vec<SpotPoint> = traces
            .iter()
            .enumerate()
            .filter_map(|(k, t): (usize, &std::result::Result<RayPath, TraceFailure>)| {
                t.as_ref().ok().map(|path| {
                    let global = path.last();
                    let ray = &bundle.rays[k];
                    SpotPoint {
                        local: frame.to_local_point(global),
                        global,
                        wavelength,
                        ray: k,
                        chief: bundle.chief == Some(k),
                        pupil: bundle.pupil[k],
                        start: ray.position,
                        direction: ray.direction,
                    }
                })
            })
            .collect();
        let n = points.len().max(1) as f64;
        let centroid = points
            .iter()
            .fold(Vector::zero(), |c, p| c + p.local)
            / n;
        let chief = points.iter().position(|p| p.chief);
        let chief_hit = chief.map(|k| points[k].local);
        let center = match chief_hit {
            Some(hit) => hit,
            None => {
                diagnostics.chief_fallback = true;
                let nearest = points
                    .iter()
                    .map(|p| p.local)
                    .min_by(|a, b| {
                        let da = (*a - centroid).radius();
                        let db = (*b - centroid).radius();
                        da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
                    })
                    .unwrap_or(centroid);
                log::warn!(
                    "field #{} {}: no chief ray on surface #{}, spot centered on the point nearest to the centroid",
                    field_index,
                    field,
                    target
                );
                nearest
            }
        };
        let radii: Vec<f64> = points.iter().map(|p| (p.local - center).radius()).collect();
        let rms_radius = (radii.iter().map(|r| r * r).sum::<f64>() / n).sqrt();
        let geometric_radius = radii.iter().cloned().fold(0f64, f64::max);
        SpotRecord {
            field_index,
            field: *field,
            target,
            rays_attempted: traces.len(),
            rays_traced: points.len(),
            chief,
            chief_hit,
            centroid,
            center,
            rms_radius,
            geometric_radius,
            rings: bundle.rings,
            pupil_scale: bundle.basis.scale,
            basis: bundle.basis,
            chief_solution,
            diagnostics,
            points,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, FailureKind};
    use crate::samples;

    #[test]
    fn paraboloid_on_axis_is_a_point() {
        let system = samples::paraboloid(200., 10.).unwrap();
        let spot = SPOT::new().set_rays(61).build();
        let record = spot.run(&system, 0, &Field::on_axis(), &RunContext::new()).unwrap();
        println!(
            "{}/{} rays, RMS: {:e}mm",
            record.rays_traced, record.rays_attempted, record.rms_radius
        );
        assert_eq!(record.rings, 4);
        assert_eq!(record.chief, Some(0));
        assert!(record.rays_traced > 30);
        assert!(record.rms_radius < 1e-6);
        assert!(record.chief_hit.unwrap().radius() < 1e-9);
    }

    #[test]
    fn ellipsoid_images_an_object_point() {
        let system = samples::ellipsoid(200., 100., 10.).unwrap();
        let spot = SPOT::new().set_rays(61).build();
        let ctx = RunContext::new();
        let on_axis = spot.run(&system, 0, &Field::height(0., 0.), &ctx).unwrap();
        println!(
            "{}/{} rays, RMS: {:e}mm",
            on_axis.rays_traced, on_axis.rays_attempted, on_axis.rms_radius
        );
        assert_eq!(on_axis.chief, Some(0));
        assert!(on_axis.rays_traced > 30);
        assert!(on_axis.rms_radius < 1e-5);
        let off_axis = spot.run(&system, 1, &Field::height(0., 2.), &ctx).unwrap();
        let hit = off_axis.chief_hit.unwrap();
        println!("chief hit: {}", hit);
        assert_eq!(off_axis.chief, Some(0));
        assert!(hit.x.abs() < 1e-6);
        assert!((hit.y.abs() - 1.).abs() < 1e-3);
    }

    #[test]
    fn points_follow_ray_order() {
        let system = samples::singlet().unwrap();
        let spot = SPOT::new().set_rays(37).set_parallel(false).build();
        let record = spot
            .run(&system, 2, &Field::angle(0., 2.), &RunContext::new())
            .unwrap();
        assert_eq!(record.field_index, 2);
        assert!(record.points[0].chief);
        assert!(record.points.windows(2).all(|w| w[0].ray < w[1].ray));
        assert!(record.geometric_radius >= record.rms_radius);
        assert!((record.center - record.points[0].local).norm() < 1e-15);
        assert!(!record.diagnostics.chief_fallback);
        // 2° off axis lands about f·tan(2°) away from the axis
        assert!(record.center.y > 1.);
    }

    #[test]
    fn missing_chief_falls_back_to_centroid_neighbour() {
        let system = samples::singlet().unwrap();
        let spot = SPOT::new().set_rays(19).build();
        let field = Field::angle(0., 1.);
        let target = system.image_index();
        let mut sampled = PupilSampler::new(&system, spot.config())
            .sample(0, &field, target, &RunContext::new())
            .unwrap();
        let ok = sampled.ok();
        sampled.traces[0] = Err(TraceFailure::at(FailureKind::PhysicalApertureBlock, 2, "test"));
        let record = spot.record(&system, 0, &field, target, sampled);
        assert_eq!(record.chief, None);
        assert!(record.diagnostics.chief_fallback);
        assert_eq!(record.rays_traced, ok - 1);
        let nearest = record
            .points
            .iter()
            .map(|p| (p.local - record.centroid).radius())
            .fold(f64::INFINITY, f64::min);
        assert!(((record.center - record.centroid).radius() - nearest).abs() < 1e-15);
    }

    #[test]
    fn fully_vignetted_field_reports_blockers() {
        let system = samples::blocked().unwrap();
        let spot = SPOT::new().set_rays(7).build();
        let records = spot.run_all(
            &system,
            &[Field::on_axis(), Field::angle(0., 5.)],
            &RunContext::new(),
        );
        assert_eq!(records.len(), 2);
        assert!(records[0].is_ok());
        match &records[1] {
            Err(Error::RetriesExhausted(failure)) => {
                assert_eq!(failure.field, 1);
                assert!(failure.rays_total > 0);
                assert_eq!(failure.reachable, vec![1]);
            }
            other => panic!("unexpected {:?}", other.as_ref().map(|r| r.rays_traced)),
        }
    }

    #[test]
    fn object_row_is_not_a_target() {
        let system = samples::singlet().unwrap();
        let spot = SPOT::new().set_target(0).build();
        assert!(matches!(
            spot.run(&system, 0, &Field::on_axis(), &RunContext::new()),
            Err(Error::NonSelectableTarget(0, _))
        ));
    }
}
