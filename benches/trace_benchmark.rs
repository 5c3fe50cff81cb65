extern crate lentrace;
use lentrace::pupil::{PupilSampler, SamplerConfig};
use lentrace::{samples, Builder, Field, RunContext, PSF, WAVEFRONT};

#[macro_use]
extern crate criterion;

use criterion::Criterion;

fn bundle_trace(c: &mut Criterion) {
    let system = samples::singlet().unwrap();
    let target = system.image_index();
    let ctx = RunContext::new();
    let mut group = c.benchmark_group("BUNDLE");
    group.sample_size(20);
    for &parallel in [false, true].iter() {
        let config = SamplerConfig {
            rays: 1027,
            parallel,
            ..Default::default()
        };
        let sampler = PupilSampler::new(&system, &config);
        let fname = if parallel { "rayon" } else { "sequential" };
        group.bench_function(fname, |b| {
            b.iter(|| {
                sampler
                    .sample(0, &Field::angle(0., 2.), target, &ctx)
                    .unwrap()
            })
        });
    }
}

fn opd_grid(c: &mut Criterion) {
    let system = samples::singlet().unwrap();
    let ctx = RunContext::new();
    let mut group = c.benchmark_group("WAVEFRONT");
    group.sample_size(10);
    for &n in [32usize, 64, 128].iter() {
        let wavefront = WAVEFRONT::new().set_grid(n).build();
        group.bench_function(format!("n={}", n), |b| {
            b.iter(|| wavefront.run(&system, 0, &Field::angle(0., 1.), &ctx).unwrap())
        });
    }
}

fn psf_pipeline(c: &mut Criterion) {
    let system = samples::singlet().unwrap();
    let ctx = RunContext::new();
    let opd = WAVEFRONT::new()
        .build()
        .run(&system, 0, &Field::on_axis(), &ctx)
        .unwrap();
    let mut group = c.benchmark_group("PSF");
    group.sample_size(10);
    for &n in [64usize, 128, 256].iter() {
        let psf = PSF::new().set_size(n).build();
        group.bench_function(format!("n={}", n), |b| b.iter(|| psf.run(&opd, &ctx).unwrap()));
    }
}

criterion_group!(benches, bundle_trace, opd_grid, psf_pipeline);
criterion_main!(benches);
