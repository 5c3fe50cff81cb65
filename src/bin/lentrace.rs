use console::{style, Term};
use csv::Writer;
use indicatif::{ProgressBar, ProgressStyle};
use lentrace::context::LogSink;
use lentrace::pupil::Stop;
use lentrace::{
    samples, Builder, Conversion, Field, OpdRecord, OpticalSystem, ProgressSink, Psf, PsfRecord,
    RunContext, Settings, SpotDiagram, SpotRecord, Wavefront,
};
use log::LevelFilter;
use ndarray_npy::WriteNpyExt;
use simple_logger::SimpleLogger;
use std::error::Error;
use std::fs::{self, File};
use std::sync::Arc;

struct Bar(ProgressBar);
impl ProgressSink for Bar {
    fn report(&self, percent: f64, phase: &str, message: &str) {
        self.0.set_position(percent.round().max(0.).min(100.) as u64);
        self.0.set_message(&format!("{}: {}", phase, message));
    }
}

struct Engines {
    spot: SpotDiagram,
    wavefront: Wavefront,
    psf: Psf,
}
struct FieldReport {
    spot: SpotRecord,
    opd: OpdRecord,
    psf: PsfRecord,
}
impl Engines {
    fn evaluate(
        &self,
        system: &OpticalSystem,
        k: usize,
        field: &Field,
        ctx: &RunContext,
    ) -> lentrace::Result<FieldReport> {
        let spot = self.spot.run(system, k, field, ctx)?;
        let opd = self.wavefront.run(system, k, field, ctx)?;
        let psf = self.psf.run(&opd, ctx)?;
        Ok(FieldReport { spot, opd, psf })
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    SimpleLogger::new()
        .with_level(LevelFilter::Warn)
        .with_module_level("lentrace", LevelFilter::Info)
        .init()?;

    let settings = match std::env::args().nth(1) {
        Some(path) => Settings::from_json_file(path)?,
        None => Settings::default(),
    };
    fs::create_dir_all(&settings.output)?;

    let system = samples::singlet()?;
    let stop = Stop::find(&system)?;
    let focal_length = system
        .effective_focal_length(settings.wavelength)
        .ok_or("the reference system has no finite focal length")?;
    log::info!(
        "singlet: EFL {:.3}mm, stop #{} radius {:.3}mm",
        focal_length,
        stop.index,
        stop.radius
    );

    let engines = Engines {
        spot: settings.spot().build(),
        wavefront: settings.wavefront().build(),
        psf: settings
            .psf()
            .set_optics(2. * stop.radius, focal_length)
            .build(),
    };

    let term = Term::stdout();
    term.write_line(&format!("{:=>75}", ""))?;
    term.write_line(&format!(
        "{} @ {:.4}µm, F/{:.2}",
        style("LENTRACE").bold(),
        settings.wavelength,
        focal_length / (2. * stop.radius)
    ))?;
    term.write_line(&format!("{:=>75}", ""))?;

    let mut spots = Writer::from_path(settings.output.join("spots.csv"))?;
    spots.write_record(&["field", "ray", "chief", "px", "py", "x[mm]", "y[mm]"])?;

    for (k, field) in settings.fields.iter().enumerate() {
        let pb = ProgressBar::new(100);
        pb.set_style(ProgressStyle::default_bar().template("{eta} {bar:40.cyan/blue} {msg}"));
        let ctx = RunContext::new()
            .with_progress(Arc::new(Bar(pb.clone())))
            .with_diagnostics(Arc::new(LogSink));

        let report = engines.evaluate(&system, k, field, &ctx);
        pb.finish_and_clear();
        let FieldReport {
            spot: spot_record,
            opd,
            psf: psf_record,
        } = match report {
            Ok(report) => report,
            Err(e) => {
                term.write_line(&format!("field #{} {}: {}", k, field, style(e).red()))?;
                continue;
            }
        };
        for p in spot_record.points.iter() {
            spots.serialize((k, p.ray, p.chief, p.pupil.0, p.pupil.1, p.local.x, p.local.y))?;
        }
        opd.opd_waves.write_npy(File::create(settings.output.join(format!("opd_{}.npy", k)))?)?;
        psf_record
            .intensity
            .write_npy(File::create(settings.output.join(format!("psf_{}.npy", k)))?)?;

        term.write_line(&format!("{} {}", style(format!("FIELD #{}", k)).cyan(), field))?;
        term.write_line(&format!(
            " . spot: {}/{} rays, RMS {:.3}µm, GEO {:.3}µm, pupil scale {}",
            spot_record.rays_traced,
            spot_record.rays_attempted,
            spot_record.rms_radius.to_um(),
            spot_record.geometric_radius.to_um(),
            spot_record.pupil_scale
        ))?;
        term.write_line(&format!(
            " . wavefront: {} cells, PV {:.4}λ, RMS {:.4}λ",
            opd.stats.valid, opd.stats.peak_to_valley, opd.stats.rms
        ))?;
        let strehl = if psf_record.strehl > 0.8 {
            style(format!("{:.3}", psf_record.strehl)).green()
        } else {
            style(format!("{:.3}", psf_record.strehl)).yellow()
        };
        term.write_line(&format!(
            " . psf: Strehl {}, FWHM {:.2}x{:.2}µm, EE(Airy) {:.3}",
            strehl,
            psf_record.fwhm_x,
            psf_record.fwhm_y,
            psf_record.ee_at(psf_record.airy_radius)
        ))?;
    }
    spots.flush()?;
    term.write_line(&format!(
        "outputs written to {}",
        style(settings.output.display()).bold()
    ))?;
    Ok(())
}
