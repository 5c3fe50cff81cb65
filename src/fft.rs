//! Radix-2 2D FFT on split real/imaginary planes
//!
//! Grids are `n×n`, row-major, `n` a power of two. The row pass completes
//! before the column pass; the column pass goes through a scratch column.

use crate::context::RunContext;
use crate::error::{Error, Result};
use std::f64::consts::PI;

pub struct Fft2 {
    n: usize,
    cos: Vec<f64>,
    sin: Vec<f64>,
    bitrev: Vec<usize>,
    scratch_re: Vec<f64>,
    scratch_im: Vec<f64>,
}
impl Fft2 {
    /// Plans an `n×n` transform
    pub fn new(n: usize) -> Result<Self> {
        if n < 2 || !n.is_power_of_two() {
            return Err(Error::UnsupportedSampling(n));
        }
        let bits = n.trailing_zeros();
        let bitrev = (0..n)
            .map(|k| k.reverse_bits() >> (usize::BITS - bits))
            .collect();
        let (sin, cos) = (0..n / 2)
            .map(|k| (2. * PI * k as f64 / n as f64).sin_cos())
            .unzip();
        Ok(Fft2 {
            n,
            cos,
            sin,
            bitrev,
            scratch_re: vec![0.; n],
            scratch_im: vec![0.; n],
        })
    }
    pub fn size(&self) -> usize {
        self.n
    }
    fn line(&self, re: &mut [f64], im: &mut [f64], inverse: bool) {
        let n = self.n;
        for (k, &j) in self.bitrev.iter().enumerate() {
            if j > k {
                re.swap(k, j);
                im.swap(k, j);
            }
        }
        let sign = if inverse { 1. } else { -1. };
        let mut len = 2;
        while len <= n {
            let half = len / 2;
            let step = n / len;
            for start in (0..n).step_by(len) {
                for k in 0..half {
                    let wr = self.cos[k * step];
                    let wi = sign * self.sin[k * step];
                    let a = start + k;
                    let b = a + half;
                    let tr = re[b] * wr - im[b] * wi;
                    let ti = re[b] * wi + im[b] * wr;
                    re[b] = re[a] - tr;
                    im[b] = im[a] - ti;
                    re[a] += tr;
                    im[a] += ti;
                }
            }
            len <<= 1;
        }
        if inverse {
            let s = 1. / n as f64;
            re.iter_mut().chain(im.iter_mut()).for_each(|x| *x *= s);
        }
    }
    fn transform(&mut self, re: &mut [f64], im: &mut [f64], inverse: bool, ctx: Option<&RunContext>) -> Result<()> {
        let n = self.n;
        if re.len() != n * n || im.len() != n * n {
            return Err(Error::UnsupportedSampling(re.len().max(im.len())));
        }
        if let Some(ctx) = ctx {
            ctx.cancel.check()?;
        }
        for (r, i) in re.chunks_mut(n).zip(im.chunks_mut(n)) {
            self.line(r, i, inverse);
        }
        if let Some(ctx) = ctx {
            ctx.report(50., "fft", "row pass");
            ctx.cancel.check()?;
        }
        let mut col_re = std::mem::take(&mut self.scratch_re);
        let mut col_im = std::mem::take(&mut self.scratch_im);
        for c in 0..n {
            for r in 0..n {
                col_re[r] = re[r * n + c];
                col_im[r] = im[r * n + c];
            }
            self.line(&mut col_re, &mut col_im, inverse);
            for r in 0..n {
                re[r * n + c] = col_re[r];
                im[r * n + c] = col_im[r];
            }
        }
        self.scratch_re = col_re;
        self.scratch_im = col_im;
        if let Some(ctx) = ctx {
            ctx.report(100., "fft", "column pass");
        }
        Ok(())
    }
    /// In-place forward transform, `exp(-i2πkx/n)` kernel
    pub fn forward(&mut self, re: &mut [f64], im: &mut [f64], ctx: Option<&RunContext>) -> Result<()> {
        self.transform(re, im, false, ctx)
    }
    /// In-place inverse transform scaled by `1/n²`
    pub fn inverse(&mut self, re: &mut [f64], im: &mut [f64], ctx: Option<&RunContext>) -> Result<()> {
        self.transform(re, im, true, ctx)
    }
}

/// Rolls an `n×n` grid by `rows` and `cols`
pub fn circular_shift<T: Copy + Default>(data: &[T], n: usize, rows: isize, cols: isize) -> Vec<T> {
    let mut out = vec![T::default(); data.len()];
    let m = n as isize;
    for r in 0..n {
        let rr = (r as isize + rows).rem_euclid(m) as usize;
        for c in 0..n {
            let cc = (c as isize + cols).rem_euclid(m) as usize;
            out[rr * n + cc] = data[r * n + c];
        }
    }
    out
}

/// Moves the zero frequency to `(n/2, n/2)`
pub fn fft_shift<T: Copy + Default>(data: &[T], n: usize) -> Vec<T> {
    let h = (n / 2) as isize;
    circular_shift(data, n, h, h)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use rustfft::{num_complex::Complex64, FftPlanner};

    #[test]
    fn sampling_must_be_a_power_of_two() {
        assert!(matches!(Fft2::new(48), Err(Error::UnsupportedSampling(48))));
        assert!(Fft2::new(1).is_err());
        assert_eq!(Fft2::new(64).unwrap().size(), 64);
    }

    #[test]
    fn delta_has_a_flat_spectrum() {
        let n = 8;
        let mut re = vec![0f64; n * n];
        let mut im = vec![0f64; n * n];
        re[0] = 1.;
        Fft2::new(n).unwrap().forward(&mut re, &mut im, None).unwrap();
        assert!(re.iter().all(|x| (x - 1.).abs() < 1e-15));
        assert!(im.iter().all(|x| x.abs() < 1e-15));
    }

    #[test]
    fn matches_rustfft() {
        let n = 16;
        let mut rng = rand::thread_rng();
        let mut re: Vec<f64> = (0..n * n).map(|_| rng.gen_range(-1f64, 1f64)).collect();
        let mut im: Vec<f64> = (0..n * n).map(|_| rng.gen_range(-1f64, 1f64)).collect();
        let mut reference: Vec<Complex64> = re
            .iter()
            .zip(im.iter())
            .map(|(r, i)| Complex64::new(*r, *i))
            .collect();
        let mut planner = FftPlanner::new();
        let plan = planner.plan_fft_forward(n);
        for row in reference.chunks_mut(n) {
            plan.process(row);
        }
        let mut column = vec![Complex64::new(0., 0.); n];
        for c in 0..n {
            for r in 0..n {
                column[r] = reference[r * n + c];
            }
            plan.process(&mut column);
            for r in 0..n {
                reference[r * n + c] = column[r];
            }
        }
        Fft2::new(n).unwrap().forward(&mut re, &mut im, None).unwrap();
        let err = reference
            .iter()
            .zip(re.iter().zip(im.iter()))
            .map(|(z, (r, i))| (z.re - r).hypot(z.im - i))
            .fold(0f64, f64::max);
        println!("max error: {:e}", err);
        assert!(err < 1e-12);
    }

    #[test]
    fn inverse_undoes_forward() {
        let n = 32;
        let mut rng = rand::thread_rng();
        let original: Vec<f64> = (0..n * n).map(|_| rng.gen_range(-1f64, 1f64)).collect();
        let mut re = original.clone();
        let mut im = vec![0f64; n * n];
        let mut fft = Fft2::new(n).unwrap();
        fft.forward(&mut re, &mut im, None).unwrap();
        fft.inverse(&mut re, &mut im, None).unwrap();
        assert!(re
            .iter()
            .zip(original.iter())
            .all(|(a, b)| (a - b).abs() < 1e-12));
        assert!(im.iter().all(|x| x.abs() < 1e-12));
    }

    #[test]
    fn fft_shift_is_an_involution() {
        let n = 8;
        let data: Vec<usize> = (0..n * n).collect();
        let shifted = fft_shift(&data, n);
        assert_eq!(shifted[(n / 2) * n + n / 2], 0);
        assert_eq!(fft_shift(&shifted, n), data);
    }

    #[test]
    fn cancelled_between_passes() {
        let ctx = RunContext::new();
        ctx.cancel.cancel();
        let mut re = vec![0f64; 16];
        let mut im = vec![0f64; 16];
        assert!(matches!(
            Fft2::new(4).unwrap().forward(&mut re, &mut im, Some(&ctx)),
            Err(Error::Cancelled)
        ));
    }
}
