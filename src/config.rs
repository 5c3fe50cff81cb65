//! Run settings
//!
//! A [`Settings`] document bundles the field list and the three engine
//! builders. Every entry has a default so a partial JSON document is valid:
//!
//! ```json
//! { "wavelength": 0.6563, "fields": [{"Angle": {"x": 0, "y": 1}}], "psf": {"size": 128} }
//! ```

use crate::error::{Error, Result};
use crate::opd::WAVEFRONT;
use crate::psf::PSF;
use crate::pupil::Field;
use crate::spot::SPOT;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Wavelength in micrometers, applied to every engine
    pub wavelength: f64,
    pub fields: Vec<Field>,
    pub spot: SPOT,
    pub wavefront: WAVEFRONT,
    pub psf: PSF,
    /// Directory receiving the CSV and `.npy` outputs
    pub output: PathBuf,
}
impl Default for Settings {
    fn default() -> Self {
        Settings {
            wavelength: 0.5876,
            fields: vec![Field::on_axis(), Field::angle(0., 1.), Field::angle(0., 2.)],
            spot: SPOT::default(),
            wavefront: WAVEFRONT::default(),
            psf: PSF::default(),
            output: PathBuf::from("lentrace-out"),
        }
    }
}
impl Settings {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let settings: Settings = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.display().to_string(),
            source,
        })?;
        log::info!("settings loaded from {}", path.display());
        Self::from_json_str(&json)
    }
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
    fn validate(&self) -> Result<()> {
        if !(self.wavelength.is_finite() && self.wavelength > 0.) {
            return Err(Error::InvalidOptics(format!("wavelength {}µm", self.wavelength)));
        }
        self.fields.iter().try_for_each(|f| f.validate())
    }
    /// Spot builder at the settings wavelength
    pub fn spot(&self) -> SPOT {
        self.spot.clone().set_wavelength(self.wavelength)
    }
    /// Wavefront builder at the settings wavelength
    pub fn wavefront(&self) -> WAVEFRONT {
        self.wavefront.clone().set_wavelength(self.wavelength)
    }
    /// PSF builder at the settings wavelength
    pub fn psf(&self) -> PSF {
        self.psf.clone().set_wavelength(self.wavelength)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_document() {
        let settings = Settings::from_json_str(
            r#"{"wavelength": 0.6563, "fields": [{"Angle": {"x": 0, "y": 1.5}}], "psf": {"size": 128}}"#,
        )
        .unwrap();
        println!("{:#?}", settings);
        assert_eq!(settings.fields, vec![Field::angle(0., 1.5)]);
        assert_eq!(settings.psf.size, 128);
        assert_eq!(settings.wavefront, WAVEFRONT::default());
        assert!((settings.psf().wavelength - 0.6563).abs() < 1e-15);
        assert!((settings.spot().sampler.wavelength - 0.6563).abs() < 1e-15);
    }

    #[test]
    fn json_round_trip() {
        let settings = Settings::default();
        let json = settings.to_json().unwrap();
        assert_eq!(Settings::from_json_str(&json).unwrap(), settings);
    }

    #[test]
    fn rejects_bad_documents() {
        assert!(matches!(Settings::from_json_str("{"), Err(Error::Settings(_))));
        assert!(matches!(
            Settings::from_json_str(r#"{"fields": [{"Angle": {"x": 0, "y": 90}}]}"#),
            Err(Error::InvalidField(_))
        ));
        assert!(matches!(
            Settings::from_json_str(r#"{"wavelength": -1}"#),
            Err(Error::InvalidOptics(_))
        ));
        assert!(matches!(
            Settings::from_json_file("/nonexistent/settings.json"),
            Err(Error::Io { .. })
        ));
    }
}
