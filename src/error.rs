use crate::diagnostics::FieldFailure;
use crate::surface::SurfaceKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Why a single ray did not make it
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    NoIntersection,
    PhysicalApertureBlock,
    TotalInternalReflection,
    TerminatedEarly,
    InvalidHitPoint,
    NotReachedTarget,
    Exception,
    Cancelled,
}
impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        use FailureKind::*;
        match self {
            NoIntersection => "NO_INTERSECTION",
            PhysicalApertureBlock => "PHYSICAL_APERTURE_BLOCK",
            TotalInternalReflection => "TOTAL_INTERNAL_REFLECTION",
            TerminatedEarly => "TERMINATED_EARLY",
            InvalidHitPoint => "INVALID_HIT_POINT",
            NotReachedTarget => "NOT_REACHED_TARGET",
            Exception => "EXCEPTION",
            Cancelled => "CANCELLED",
        }
    }
}
impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of one ray trace, local to that ray
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{kind} at surface #{}: {details}", .surface.map(|s| s.to_string()).unwrap_or_else(|| "-".into()))]
pub struct TraceFailure {
    pub kind: FailureKind,
    /// 0-based index of the surface row where the ray stopped
    pub surface: Option<usize>,
    pub details: String,
}
impl TraceFailure {
    pub fn new<S: Into<String>>(kind: FailureKind, surface: Option<usize>, details: S) -> Self {
        TraceFailure {
            kind,
            surface,
            details: details.into(),
        }
    }
    pub fn at(kind: FailureKind, surface: usize, details: impl Into<String>) -> Self {
        TraceFailure::new(kind, Some(surface), details)
    }
    /// Diagnostics key `"{1-based surface index}:{kind}"`
    pub fn surface_key(&self) -> String {
        match self.surface {
            Some(s) => format!("{}:{}", s + 1, self.kind),
            None => format!("-:{}", self.kind),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid field: {0}")]
    InvalidField(String),
    #[error("invalid surface stack: {0}")]
    InvalidStack(String),
    #[error("unsupported sampling size {0}: must be a power of two")]
    UnsupportedSampling(usize),
    #[error("invalid imaging parameters: {0}")]
    InvalidOptics(String),
    #[error("surface #{0} ({1}) cannot be selected as a target")]
    NonSelectableTarget(usize, SurfaceKind),
    #[error("{0}")]
    RetriesExhausted(Box<FieldFailure>),
    #[error("chief ray failed: {0}")]
    ChiefRay(#[source] TraceFailure),
    #[error("computation cancelled")]
    Cancelled,
    #[error("failed to read or write {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid settings document")]
    Settings(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
