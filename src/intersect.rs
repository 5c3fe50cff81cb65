//! Newton intersection of a ray with a surface
//!
//! The ray is given in the surface local frame. Roots of
//! `F(t) = z(t) − sag(r(t))` are searched from a list of seeds: the roots of
//! the osculating sphere, the vertex plane, points aimed at 0.8 and 1.0 of the
//! semi-diameter and finally a geometric series of distances.

use crate::surface::Surface;
use crate::vector::Vector;

pub const TOLERANCE: f64 = 1e-7;
const MAX_ITERATIONS: usize = 20;
const MIN_SLOPE: f64 = 1e-12;
const MAX_DISTANCE: f64 = 1e4;
const SEED_EPS: f64 = 1e-10;
const FALLBACK_SEEDS: [f64; 8] = [1e-6, 1e-5, 1e-4, 1e-3, 1e-2, 1e-1, 1., 10.];

/// Converged intersection
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intersection {
    /// distance along the ray
    pub t: f64,
    /// local hit point
    pub point: Vector,
    /// residual `z − sag(r)` at the hit point
    pub residual: f64,
    pub iterations: usize,
}

/// Intersection of the plane `z=0`, `None` if the ray is parallel to it
pub fn plane(origin: Vector, direction: Vector) -> Option<Intersection> {
    if direction.z.abs() <= SEED_EPS {
        return None;
    }
    let t = -origin.z / direction.z;
    if !t.is_finite() {
        return None;
    }
    Some(Intersection {
        t,
        point: origin + direction * t,
        residual: 0.,
        iterations: 0,
    })
}

/// Oversize allowance of the semi-diameter at a given Newton iteration
fn guard(iteration: usize) -> f64 {
    match iteration {
        0..=2 => 0.2,
        3..=9 => 0.1,
        _ => 0.,
    }
}

fn seeds(surface: &Surface, o: Vector, d: Vector) -> Vec<f64> {
    let mut seeds: Vec<f64> = vec![];
    if !surface.is_planar() {
        let r = surface.radius;
        let oc = Vector::new(o.x, o.y, o.z - r);
        let a = d.dot(&d);
        let b = 2. * oc.dot(&d);
        let c = oc.dot(&oc) - r * r;
        let disc = b * b - 4. * a * c;
        if disc >= 0. {
            let q = disc.sqrt();
            let mut roots = [(-b - q) / (2. * a), (-b + q) / (2. * a)];
            roots.sort_by(|x, y| x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal));
            seeds.extend(roots.iter().filter(|t| **t > SEED_EPS));
        }
    }
    if d.z.abs() > SEED_EPS {
        let t = -o.z / d.z;
        if t.is_finite() && t > -1e-6 {
            seeds.push(t);
        }
    }
    if let Some(sd) = surface.semi_diameter.filter(|s| s.is_finite() && *s > 0.) {
        let r0 = o.radius();
        let dr = d.radius();
        if dr > 1e-14 {
            for f in [0.8, 1.0].iter() {
                let target = f * sd;
                if target > r0 {
                    let t = (target - r0) / dr;
                    if t > SEED_EPS {
                        seeds.push(t);
                    }
                }
            }
        }
    }
    seeds.extend_from_slice(&FALLBACK_SEEDS);
    let mut unique: Vec<f64> = Vec::with_capacity(seeds.len());
    for t in seeds {
        if unique
            .iter()
            .all(|u| (u - t).abs() > 1e-12 * u.abs().max(1.))
        {
            unique.push(t);
        }
    }
    unique
}

fn residual(surface: &Surface, p: &Vector) -> f64 {
    p.z - surface.sag(p.radius())
}

/// Newton search for the intersection of the ray `o + t·d` with `surface`
pub fn newton(surface: &Surface, o: Vector, d: Vector) -> Option<Intersection> {
    let semi = surface.semi_diameter.filter(|s| s.is_finite() && *s > 0.);
    let inside = |r: f64, allowance: f64| semi.map_or(true, |sd| r <= sd * (1. + allowance));
    for (k, seed) in seeds(surface, o, d).into_iter().enumerate() {
        let mut t = seed;
        let mut best: Option<Intersection> = None;
        let mut abandoned = false;
        for iteration in 0..MAX_ITERATIONS {
            let p = o + d * t;
            let r = p.radius();
            let f = residual(surface, &p);
            if !f.is_finite() {
                abandoned = true;
                break;
            }
            if inside(r, 0.1) && best.map_or(true, |b| f.abs() < b.residual.abs()) {
                best = Some(Intersection {
                    t,
                    point: p,
                    residual: f,
                    iterations: iteration,
                });
            }
            if f.abs() < TOLERANCE {
                if !inside(r, guard(iteration)) {
                    log::trace!(
                        "seed #{}: converged at r={:.6} beyond the semi-diameter guard",
                        k,
                        r
                    );
                }
                return Some(Intersection {
                    t,
                    point: p,
                    residual: f,
                    iterations: iteration,
                });
            }
            let drdt = if r > crate::surface::AXIS_EPS {
                (p.x * d.x + p.y * d.y) / r
            } else {
                0.
            };
            let slope = d.z - surface.dsag_dr(r) * drdt;
            if slope.abs() < MIN_SLOPE {
                abandoned = true;
                break;
            }
            let limit = t.abs() * 0.5 + 1.;
            let step = (f / slope).max(-limit).min(limit);
            t -= step;
            if !t.is_finite() || t.abs() > MAX_DISTANCE {
                abandoned = true;
                break;
            }
        }
        if !abandoned {
            let p = o + d * t;
            let f = residual(surface, &p);
            if f.abs() < 10. * TOLERANCE && inside(p.radius(), 0.1) {
                return Some(Intersection {
                    t,
                    point: p,
                    residual: f,
                    iterations: MAX_ITERATIONS,
                });
            }
        }
        if let Some(b) = best {
            if b.residual.abs() < 50. * TOLERANCE {
                return Some(b);
            }
        }
        log::trace!("seed #{} (t0={:e}) failed", k, seed);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::AsphereMode;

    #[test]
    fn plane_is_exact() {
        let o = Vector::new(0.3, -0.7, -12.5);
        let d = Vector::new(0.1, 0.2, 0.9).normalize();
        let hit = plane(o, d).unwrap();
        assert_eq!(hit.t, -o.z / d.z);
        assert!(plane(o, Vector::ex()).is_none());
    }

    #[test]
    fn sphere_from_the_left() {
        let s = Surface::standard(20., 0.).with_semi_diameter(10.);
        let o = Vector::new(0., 4., -5.);
        let d = Vector::ez();
        let hit = newton(&s, o, d).unwrap();
        println!("{:?}", hit);
        assert!((hit.point.z - s.sag(4.)).abs() <= 10. * TOLERANCE);
        assert!((hit.t - (5. + s.sag(4.))).abs() < 1e-6);
    }

    #[test]
    fn asphere_converges_within_tolerance() {
        let s = Surface::standard(-40., 0.)
            .with_conic(-2.5)
            .with_aspheric(&[1e-5, -2e-8], AsphereMode::Even)
            .with_semi_diameter(12.);
        for k in 0..20 {
            let y = -10. + k as f64;
            let o = Vector::new(0.5, y, -3.);
            let d = Vector::new(0., -0.05, 1.).normalize();
            let hit = newton(&s, o, d).unwrap();
            let p = hit.point;
            assert!((p.z - s.sag(p.radius())).abs() <= 10. * TOLERANCE, "y={}", y);
        }
    }

    #[test]
    fn parallel_ray_is_abandoned_without_panic() {
        let s = Surface::standard(1e6, 0.);
        // never crosses the surface, slope vanishes along the ray
        assert!(newton(&s, Vector::new(0., 0., -1.), Vector::ex()).is_none());
    }

    #[test]
    fn guard_schedule() {
        assert_eq!(guard(0), 0.2);
        assert_eq!(guard(5), 0.1);
        assert_eq!(guard(12), 0.);
    }
}
