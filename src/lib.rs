//! Sequential geometric ray tracing with spot, wavefront and PSF evaluation
//!
//! A lens prescription is a stack of [`Surface`] rows wrapped into an
//! [`OpticalSystem`]. The evaluation engines are configured with builders
//! ([`SPOT`], [`WAVEFRONT`], [`PSF`]) and run per field against a
//! [`RunContext`]:
//!
//! ```no_run
//! use lentrace::{samples, Builder, Conversion, Field, RunContext, SPOT};
//! let system = samples::singlet().unwrap();
//! let spot = SPOT::new().set_rays(61).build();
//! let record = spot.run(&system, 0, &Field::angle(0., 1.), &RunContext::new()).unwrap();
//! println!("RMS spot radius: {:.3}µm", record.rms_radius.to_um());
//! ```

pub mod config;
pub mod context;
pub mod diagnostics;
pub mod error;
pub mod fft;
pub mod frame;
pub mod index;
pub mod intersect;
pub mod opd;
pub mod psf;
pub mod pupil;
pub mod samples;
pub mod spot;
pub mod surface;
pub mod trace;
pub mod vector;

pub use self::config::Settings;
pub use self::context::{CancelToken, DiagnosticsSink, ProgressSink, RunContext};
pub use self::diagnostics::{Diagnostics, FieldFailure};
pub use self::error::{Error, FailureKind, Result, TraceFailure};
pub use self::index::{IndexProvider, MaterialTable};
pub use self::opd::{OpdRecord, Reference, Wavefront, WAVEFRONT};
pub use self::psf::{Psf, PsfRecord, PSF};
pub use self::pupil::{ChiefStrategy, Field, PupilPattern};
pub use self::spot::{SpotDiagram, SpotRecord, SPOT};
pub use self::surface::{AsphereMode, BreakOrder, CoordBreak, Surface, SurfaceKind};
pub use self::trace::{OpticalSystem, Ray, RayPath, SurfaceProvider};
pub use self::vector::Vector;

/// Engine builder
pub trait Builder: Default {
    type Component;
    fn new() -> Self {
        Default::default()
    }
    fn build(self) -> Self::Component;
}

/// Unit conversions between the length units of the crate
///
/// Lengths are in millimeters, wavelengths in micrometers.
pub trait Conversion<T> {
    fn from_um(self) -> T;
    fn from_nm(self) -> T;
    fn to_um(self) -> T;
    fn to_nm(self) -> T;
}
impl Conversion<f64> for f64 {
    /// Converts micrometers to millimeters
    fn from_um(self) -> f64 {
        self * 1e-3
    }
    /// Converts nanometers to millimeters
    fn from_nm(self) -> f64 {
        self.from_um() * 1e-3
    }
    /// Converts millimeters to micrometers
    fn to_um(self) -> f64 {
        self * 1e3
    }
    /// Converts millimeters to nanometers
    fn to_nm(self) -> f64 {
        1e3 * self.to_um()
    }
}
impl Conversion<Vec<f64>> for Vec<f64> {
    fn from_um(self) -> Vec<f64> {
        self.into_iter().map(|x| x.from_um()).collect()
    }
    fn from_nm(self) -> Vec<f64> {
        self.into_iter().map(|x| x.from_nm()).collect()
    }
    fn to_um(self) -> Vec<f64> {
        self.into_iter().map(|x| x.to_um()).collect()
    }
    fn to_nm(self) -> Vec<f64> {
        self.into_iter().map(|x| x.to_nm()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_conversions() {
        assert!((0.5876f64.from_um() - 5.876e-4).abs() < 1e-18);
        assert!((1f64.to_nm() - 1e6).abs() < 1e-9);
        assert_eq!(vec![1f64, 2.].to_um(), vec![1e3, 2e3]);
    }
}
