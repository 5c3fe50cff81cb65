//! Surface frames
//!
//! Every row of a prescription gets a frame `{O(s), R(s)}` placing its local
//! coordinates in the global (object) frame. Standard rows inherit the
//! rotation of the row before and move along its z axis by its thickness;
//! coordinate breaks rotate and decenter the downstream frames. Thicknesses of
//! coordinate break rows and an infinite object distance do not advance.

use crate::surface::{BreakOrder, Surface, SurfaceKind};
use crate::vector::{Affine, Vector};
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, RwLock};

/// Quantum of the frame signature
const SIGNATURE_QUANTUM: f64 = 1e-6;

/// Origin and orientation of a surface in the global frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SurfaceFrame {
    pub origin: Vector,
    pub rotation: Affine,
}
impl Default for SurfaceFrame {
    fn default() -> Self {
        SurfaceFrame {
            origin: Vector::zero(),
            rotation: Affine::identity(),
        }
    }
}
impl SurfaceFrame {
    pub fn to_local_point(&self, p: Vector) -> Vector {
        self.rotation.rotate_inverse(p - self.origin)
    }
    pub fn to_local_direction(&self, d: Vector) -> Vector {
        self.rotation.rotate_inverse(d)
    }
    pub fn to_global_point(&self, p: Vector) -> Vector {
        self.origin + self.rotation.rotate(p)
    }
    pub fn to_global_direction(&self, d: Vector) -> Vector {
        self.rotation.rotate(d)
    }
    /// Local optical axis in global coordinates
    pub fn axis(&self) -> Vector {
        self.rotation.column(2)
    }
}

/// Advance contributed by row `s` to row `s+1`
fn advance(surface: &Surface) -> f64 {
    match surface.kind {
        SurfaceKind::CoordBreak(_) => 0.,
        _ if surface.thickness.is_finite() => surface.thickness,
        _ => 0.,
    }
}

fn quantize(v: f64) -> i64 {
    (v / SIGNATURE_QUANTUM).round() as i64
}

/// Content signature of everything the frames depend on
pub fn signature(surfaces: &[Surface]) -> u64 {
    let mut hasher = DefaultHasher::new();
    surfaces.len().hash(&mut hasher);
    for (s, surface) in surfaces.iter().enumerate() {
        surface.kind.as_str().hash(&mut hasher);
        let t_prev = if s > 0 { advance(&surfaces[s - 1]) } else { 0. };
        quantize(t_prev).hash(&mut hasher);
        if let SurfaceKind::CoordBreak(cb) = &surface.kind {
            for v in [cb.decenter_x, cb.decenter_y, cb.tilt_x, cb.tilt_y, cb.tilt_z].iter() {
                quantize(*v).hash(&mut hasher);
            }
            cb.order.hash(&mut hasher);
        }
    }
    hasher.finish()
}

/// Builds the frames of all the rows of `surfaces`
pub fn build_frames(surfaces: &[Surface]) -> Vec<SurfaceFrame> {
    let mut frames: Vec<SurfaceFrame> = Vec::with_capacity(surfaces.len());
    for (s, surface) in surfaces.iter().enumerate() {
        if s == 0 {
            frames.push(SurfaceFrame::default());
            continue;
        }
        let prev = frames[s - 1];
        let step = prev.axis() * advance(&surfaces[s - 1]);
        let frame = match &surface.kind {
            SurfaceKind::CoordBreak(cb) => {
                let rotation = cb.rotation().mul(&prev.rotation);
                let axes = match cb.order {
                    BreakOrder::TiltThenDecenter => &rotation,
                    BreakOrder::DecenterThenTilt => &prev.rotation,
                };
                SurfaceFrame {
                    origin: prev.origin
                        + axes.column(0) * cb.decenter_x
                        + axes.column(1) * cb.decenter_y
                        + step,
                    rotation,
                }
            }
            _ => SurfaceFrame {
                origin: prev.origin + step,
                rotation: prev.rotation,
            },
        };
        frames.push(frame);
    }
    frames
}

struct CacheEntry {
    signature: u64,
    frames: Arc<Vec<SurfaceFrame>>,
}

/// Memoized frames keyed by (surface list identity, truncation index)
///
/// Entries are checked against the content signature on every lookup and
/// rebuilt on mismatch. The lock is only taken for writing on a miss.
#[derive(Default)]
pub struct FrameCache {
    entries: RwLock<HashMap<(usize, usize, usize), CacheEntry>>,
}
impl FrameCache {
    pub fn new() -> Self {
        Default::default()
    }
    /// Frames of `surfaces[..=truncation]`
    pub fn frames(&self, surfaces: &[Surface], truncation: usize) -> Arc<Vec<SurfaceFrame>> {
        let rows = &surfaces[..=truncation.min(surfaces.len().saturating_sub(1))];
        let key = (surfaces.as_ptr() as usize, surfaces.len(), truncation);
        let sig = signature(rows);
        if let Ok(entries) = self.entries.read() {
            if let Some(entry) = entries.get(&key) {
                if entry.signature == sig {
                    return entry.frames.clone();
                }
            }
        }
        log::trace!("building {} surface frames (signature {:016x})", rows.len(), sig);
        let frames = Arc::new(build_frames(rows));
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(
                key,
                CacheEntry {
                    signature: sig,
                    frames: frames.clone(),
                },
            );
        }
        frames
    }
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
