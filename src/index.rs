//! Refractive index lookup
//!
//! The tracer asks an [`IndexProvider`] for the index of the medium that
//! follows a surface. Unknown or blank materials are air.

use std::collections::HashMap;
use std::sync::RwLock;

/// Wavelength quantum of [`CachedIndex`] in micrometers
pub const WAVELENGTH_QUANTUM: f64 = 1e-9;

pub trait IndexProvider: Send + Sync {
    /// Refractive index of `material` at `wavelength` (µm)
    fn index(&self, material: &str, wavelength: f64) -> f64;
}

pub fn is_air(material: &str) -> bool {
    let m = material.trim();
    m.is_empty() || m.eq_ignore_ascii_case("AIR")
}

/// Vacuum/air everywhere
#[derive(Debug, Default, Clone, Copy)]
pub struct Air;
impl IndexProvider for Air {
    fn index(&self, _material: &str, _wavelength: f64) -> f64 {
        1.
    }
}

/// Wavelength independent index table keyed by upper-cased material name
#[derive(Debug, Default, Clone)]
pub struct MaterialTable {
    entries: HashMap<String, f64>,
}
impl MaterialTable {
    pub fn new() -> Self {
        Default::default()
    }
    pub fn insert(mut self, material: &str, index: f64) -> Self {
        self.entries.insert(material.trim().to_uppercase(), index);
        self
    }
    pub fn len(&self) -> usize {
        self.entries.len()
    }
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
impl IndexProvider for MaterialTable {
    fn index(&self, material: &str, _wavelength: f64) -> f64 {
        if is_air(material) {
            return 1.;
        }
        match self.entries.get(&material.trim().to_uppercase()) {
            Some(n) => *n,
            None => {
                log::debug!("unknown material {:?}, using air", material);
                1.
            }
        }
    }
}

/// Memoizes another provider per (material, quantized wavelength)
pub struct CachedIndex<P> {
    provider: P,
    cache: RwLock<HashMap<(String, i64), f64>>,
}
impl<P: IndexProvider> CachedIndex<P> {
    pub fn new(provider: P) -> Self {
        CachedIndex {
            provider,
            cache: RwLock::new(HashMap::new()),
        }
    }
    pub fn len(&self) -> usize {
        self.cache.read().map(|c| c.len()).unwrap_or(0)
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
impl<P: IndexProvider> IndexProvider for CachedIndex<P> {
    fn index(&self, material: &str, wavelength: f64) -> f64 {
        let key = (
            material.trim().to_uppercase(),
            (wavelength / WAVELENGTH_QUANTUM).round() as i64,
        );
        if let Ok(cache) = self.cache.read() {
            if let Some(n) = cache.get(&key) {
                return *n;
            }
        }
        let n = self.provider.index(material, wavelength);
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(key, n);
        }
        n
    }
}
