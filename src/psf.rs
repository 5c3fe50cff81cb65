//! Point spread function
//!
//! The [`PSF`] builder configures a [`Psf`] engine turning a wavefront map
//! into a peak-normalized image plane intensity. The pupil is resampled into
//! the FFT grid so that its diameter spans `d = p·N·D/(λ·F)` cells, `p` being
//! the requested pixel size: the image pixels are then physical.
//!
//! Metrics: Strehl ratio against the same pipeline fed with a flat
//! wavefront, FWHM along the row and column through the peak and the
//! encircled energy about the peak.

use crate::context::RunContext;
use crate::error::{Error, Result};
use crate::fft::{circular_shift, fft_shift, Fft2};
use crate::opd::{cell_coordinate, OpdRecord, PlaneFit};
use crate::{Builder, Conversion};
use libm::j1;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Relative width of the border triggering the peak recentering
pub const RECENTER_BORDER: f64 = 0.08;

/// Wavefront terms removed before the transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Removal {
    Nothing,
    Piston,
    PistonTilt,
}
impl Default for Removal {
    fn default() -> Self {
        Removal::Nothing
    }
}

/// PSF builder
///
/// Default properties:
///  * sampling        : 64×64
///  * wavelength      : 0.5876µm
///  * pupil diameter  : 10mm
///  * focal length    : 100mm
///  * pixel size      : 1.22λF/D/(N/8)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PSF {
    pub size: usize,
    /// µm
    pub wavelength: f64,
    /// mm
    pub pupil_diameter: f64,
    /// mm
    pub focal_length: f64,
    /// µm
    pub pixel_size: Option<f64>,
    pub removal: Removal,
    /// keeps the PSF where the tilt puts it
    pub keep_tilt: bool,
}
impl Default for PSF {
    fn default() -> Self {
        PSF {
            size: 64,
            wavelength: 0.5876,
            pupil_diameter: 10.,
            focal_length: 100.,
            pixel_size: None,
            removal: Removal::Nothing,
            keep_tilt: false,
        }
    }
}
impl PSF {
    pub fn set_size(self, size: usize) -> Self {
        Self { size, ..self }
    }
    /// Sets the wavelength in micrometers
    pub fn set_wavelength(self, wavelength: f64) -> Self {
        Self { wavelength, ..self }
    }
    /// Sets the pupil diameter and the focal length in millimeters
    pub fn set_optics(self, pupil_diameter: f64, focal_length: f64) -> Self {
        Self {
            pupil_diameter,
            focal_length,
            ..self
        }
    }
    /// Sets the image pixel size in micrometers
    pub fn set_pixel_size(self, pixel_size: f64) -> Self {
        Self {
            pixel_size: Some(pixel_size),
            ..self
        }
    }
    pub fn set_removal(self, removal: Removal) -> Self {
        Self { removal, ..self }
    }
    pub fn set_keep_tilt(self, keep_tilt: bool) -> Self {
        Self { keep_tilt, ..self }
    }
}
impl Builder for PSF {
    type Component = Psf;
    fn build(self) -> Psf {
        Psf { config: self }
    }
}

/// Analytic Airy intensity `(2J1(v)/v)²` at `radii` (µm)
pub fn airy_profile(radii: &[f64], wavelength: f64, pupil_diameter: f64, focal_length: f64) -> Vec<f64> {
    let lambda = wavelength.from_um();
    radii
        .iter()
        .map(|r| {
            let v = PI * r.from_um() * pupil_diameter / (lambda * focal_length);
            if v.abs() < 1e-12 {
                1.
            } else {
                let a = 2. * j1(v) / v;
                a * a
            }
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct PsfRecord {
    pub size: usize,
    /// peak-normalized intensity, indexed `[[row, column]]`
    pub intensity: Array2<f64>,
    /// µm
    pub pixel_size: f64,
    /// µm
    pub airy_radius: f64,
    pub strehl: f64,
    /// µm
    pub fwhm_x: f64,
    /// µm
    pub fwhm_y: f64,
    /// `(radius µm, fraction)`, cumulative up to `N/2` pixels
    pub encircled_energy: Vec<(f64, f64)>,
    /// `(row, column)` of the peak
    pub peak: (usize, usize),
    pub recentered: bool,
    /// pupil diameter in FFT cells
    pub pupil_cells: f64,
    /// µm
    pub wavelength: f64,
    /// mm
    pub pupil_diameter: f64,
    /// mm
    pub focal_length: f64,
    pub removal: Removal,
    /// removed wavefront plane (waves)
    pub plane: Option<PlaneFit>,
    pub implementation: &'static str,
}
impl PsfRecord {
    /// Encircled energy at `radius` (µm), linearly interpolated
    pub fn ee_at(&self, radius: f64) -> f64 {
        let mut previous = (0f64, 0f64);
        for &(r, e) in self.encircled_energy.iter() {
            if radius <= r {
                let t = (radius - previous.0) / (r - previous.0);
                return previous.1 + t.max(0.) * (e - previous.1);
            }
            previous = (r, e);
        }
        previous.1
    }
    pub fn ee_at_radii(&self, radii: &[f64]) -> Vec<f64> {
        radii.iter().map(|r| self.ee_at(*r)).collect()
    }
    /// Mean intensity in rounded-radius pixel rings about the peak
    pub fn radial_profile(&self) -> Vec<f64> {
        let n = self.size;
        let (pr, pc) = self.peak;
        let mut sum = vec![0f64; n / 2 + 1];
        let mut count = vec![0usize; n / 2 + 1];
        for ((r, c), x) in self.intensity.indexed_iter() {
            let k = (r as f64 - pr as f64).hypot(c as f64 - pc as f64).round() as usize;
            if k < sum.len() {
                sum[k] += x;
                count[k] += 1;
            }
        }
        sum.iter()
            .zip(count.iter())
            .map(|(s, c)| if *c > 0 { s / *c as f64 } else { 0. })
            .collect()
    }
    /// Radius of the first minimum of the radial profile (µm)
    pub fn first_minimum(&self) -> Option<f64> {
        let profile = self.radial_profile();
        (1..profile.len().saturating_sub(1))
            .find(|&k| profile[k] < profile[k - 1] && profile[k] <= profile[k + 1])
            .map(|k| k as f64 * self.pixel_size)
    }
}

pub struct Psf {
    config: PSF,
}
impl Psf {
    pub fn config(&self) -> &PSF {
        &self.config
    }
    /// PSF of a wavefront record, using its wavelength and amplitude
    pub fn run(&self, record: &OpdRecord, ctx: &RunContext) -> Result<PsfRecord> {
        self.transform(&record.opd_waves, Some(&record.amplitude), record.wavelength, ctx)
    }
    /// PSF of an `m×m` OPD map in waves, NaN cells are outside the pupil
    pub fn compute(&self, opd_waves: &Array2<f64>, amplitude: Option<&Array2<f64>>, ctx: &RunContext) -> Result<PsfRecord> {
        self.transform(opd_waves, amplitude, self.config.wavelength, ctx)
    }
    fn transform(
        &self,
        opd_waves: &Array2<f64>,
        amplitude: Option<&Array2<f64>>,
        wavelength: f64,
        ctx: &RunContext,
    ) -> Result<PsfRecord> {
        let PSF {
            size: n,
            pupil_diameter,
            focal_length,
            ..
        } = self.config;
        let (rows, cols) = opd_waves.dim();
        if rows != cols || rows < 2 {
            return Err(Error::UnsupportedSampling(rows.max(cols)));
        }
        if let Some(a) = amplitude {
            if a.dim() != opd_waves.dim() {
                return Err(Error::InvalidOptics(format!(
                    "amplitude grid {:?} does not match the {}×{} OPD grid",
                    a.dim(),
                    rows,
                    cols
                )));
            }
        }
        if !(wavelength > 0. && pupil_diameter > 0. && focal_length > 0.) {
            return Err(Error::InvalidOptics(format!(
                "λ={}µm D={}mm F={}mm",
                wavelength, pupil_diameter, focal_length
            )));
        }
        let m = rows;
        let mut fft = Fft2::new(n)?;
        ctx.cancel.check()?;
        ctx.report(0., "psf", "pupil field");

        let amp = |j: usize, i: usize| amplitude.map_or(1., |a| a[[j, i]]);
        let valid = |j: usize, i: usize| opd_waves[[j, i]].is_finite() && amp(j, i) > 0.;
        let samples = || {
            opd_waves.indexed_iter().filter_map(move |((j, i), w)| {
                if valid(j, i) {
                    Some((cell_coordinate(i, m), cell_coordinate(j, m), *w, amp(j, i)))
                } else {
                    None
                }
            })
        };
        let plane = match self.config.removal {
            Removal::Nothing => None,
            Removal::Piston => {
                let (s, sw) = samples().fold((0f64, 0f64), |(s, sw), (_, _, w, a)| (s + a * w, sw + a));
                if sw > 0. {
                    Some(PlaneFit {
                        piston: s / sw,
                        ..Default::default()
                    })
                } else {
                    None
                }
            }
            Removal::PistonTilt => PlaneFit::fit(samples()),
        };

        // image sampling
        let lambda = wavelength.from_um();
        let airy = 1.22 * lambda * focal_length / pupil_diameter;
        let mut pixel = self
            .config
            .pixel_size
            .map_or(airy / (n as f64 / 8.), |p| p.from_um());
        let mut cells = pixel * n as f64 * pupil_diameter / (lambda * focal_length);
        if cells > n as f64 {
            log::warn!(
                "pixel size {:.4}µm needs a {:.1} cells pupil, clamped to {}",
                pixel.to_um(),
                cells,
                n
            );
            cells = n as f64;
            pixel = cells * lambda * focal_length / (n as f64 * pupil_diameter);
        }
        if cells < 4. {
            log::warn!("the pupil spans only {:.2} FFT cells", cells);
        }

        let mut re = vec![0f64; n * n];
        let mut im = vec![0f64; n * n];
        let mut ideal_re = vec![0f64; n * n];
        let mut ideal_im = vec![0f64; n * n];
        let h = (n / 2) as f64;
        let half_m = (m / 2) as f64;
        let radius = 0.5 * cells;
        for row in 0..n {
            let v = (row as f64 - h) / radius;
            for col in 0..n {
                let u = (col as f64 - h) / radius;
                if u * u + v * v > 1. {
                    continue;
                }
                let i = (u * half_m + half_m).round().max(0.).min((m - 1) as f64) as usize;
                let j = (v * half_m + half_m).round().max(0.).min((m - 1) as f64) as usize;
                if !valid(j, i) {
                    continue;
                }
                let a = amp(j, i);
                let w = opd_waves[[j, i]]
                    - plane.map_or(0., |p| p.value(cell_coordinate(i, m), cell_coordinate(j, m)));
                let (s, c) = (-2. * PI * w).sin_cos();
                let k = row * n + col;
                re[k] = a * c;
                im[k] = a * s;
                ideal_re[k] = a;
            }
        }

        fft.forward(&mut re, &mut im, Some(ctx))?;
        fft.forward(&mut ideal_re, &mut ideal_im, Some(ctx))?;
        let intensity: Vec<f64> = re.iter().zip(im.iter()).map(|(r, i)| r * r + i * i).collect();
        let ideal_peak = ideal_re
            .iter()
            .zip(ideal_im.iter())
            .map(|(r, i)| r * r + i * i)
            .fold(0f64, f64::max);
        let mut intensity = fft_shift(&intensity, n);

        let (mut peak_k, peak) = argmax(&intensity);
        if peak <= 0. || ideal_peak <= 0. {
            return Err(Error::InvalidOptics("empty pupil".into()));
        }
        let strehl = (peak / ideal_peak).max(0.).min(1.);
        let border = RECENTER_BORDER * n as f64;
        let (r, c) = (peak_k / n, peak_k % n);
        let near_edge = |x: usize| (x as f64) < border || (x as f64) >= n as f64 - border;
        let mut recentered = false;
        if (near_edge(r) || near_edge(c)) && !self.config.keep_tilt {
            intensity = circular_shift(&intensity, n, n as isize / 2 - r as isize, n as isize / 2 - c as isize);
            peak_k = (n / 2) * n + n / 2;
            recentered = true;
            log::debug!("PSF peak ({},{}) recentered", r, c);
        }
        intensity.iter_mut().for_each(|x| *x /= peak);
        let peak_rc = (peak_k / n, peak_k % n);
        let intensity = Array2::from_shape_vec((n, n), intensity)
            .map_err(|_| Error::UnsupportedSampling(n))?;

        let pixel_um = pixel.to_um();
        let fwhm_x = half_width(intensity.row(peak_rc.0).iter().cloned().collect(), peak_rc.1) * pixel_um;
        let fwhm_y = half_width(intensity.column(peak_rc.1).iter().cloned().collect(), peak_rc.0) * pixel_um;
        let encircled_energy = encircled_energy(&intensity, peak_rc)
            .into_iter()
            .enumerate()
            .map(|(k, e)| ((k + 1) as f64 * pixel_um, e))
            .collect();
        ctx.report(100., "psf", "done");
        log::info!(
            "PSF {}×{}: Strehl {:.4}, FWHM {:.3}×{:.3}µm, pixel {:.4}µm",
            n,
            n,
            strehl,
            fwhm_x,
            fwhm_y,
            pixel_um
        );
        Ok(PsfRecord {
            size: n,
            intensity,
            pixel_size: pixel_um,
            airy_radius: airy.to_um(),
            strehl,
            fwhm_x,
            fwhm_y,
            encircled_energy,
            peak: peak_rc,
            recentered,
            pupil_cells: cells,
            wavelength,
            pupil_diameter,
            focal_length,
            removal: self.config.removal,
            plane,
            implementation: "radix2-split-plane",
        })
    }
}

fn argmax(data: &[f64]) -> (usize, f64) {
    data.iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |a, (k, x)| if *x > a.1 { (k, *x) } else { a })
}

/// Full width at half the value at `peak`, in pixels
fn half_width(line: Vec<f64>, peak: usize) -> f64 {
    let half = 0.5 * line[peak];
    let crossing = |mut k: usize, step: isize| -> f64 {
        loop {
            let next = k as isize + step;
            if next < 0 || next as usize >= line.len() {
                return k as f64;
            }
            let next = next as usize;
            if line[next] < half {
                let t = (line[k] - half) / (line[k] - line[next]);
                return k as f64 + step as f64 * t;
            }
            k = next;
        }
    };
    crossing(peak, 1) - crossing(peak, -1)
}

/// Cumulative energy fraction within `floor(distance) ≤ k`, `k` in `0..=n/2`
fn encircled_energy(intensity: &Array2<f64>, peak: (usize, usize)) -> Vec<f64> {
    let n = intensity.nrows();
    let mut buckets = vec![0f64; n / 2 + 1];
    let mut total = 0f64;
    for ((r, c), x) in intensity.indexed_iter() {
        total += x;
        let k = (r as f64 - peak.0 as f64).hypot(c as f64 - peak.1 as f64).floor() as usize;
        if k < buckets.len() {
            buckets[k] += x;
        }
    }
    let mut cumulative = 0f64;
    buckets
        .into_iter()
        .map(|b| {
            cumulative += b;
            if total > 0. {
                cumulative / total
            } else {
                0.
            }
        })
        .collect()
}
