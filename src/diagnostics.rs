//! Failure bookkeeping shared by the engines
//!
//! A [`Diagnostics`] accumulates the failures of one field run: counts per
//! failure kind, counts per blocking surface (keyed `"{1-based index}:{kind}"`),
//! the first few failures verbatim and the ledger of pupil sampling attempts.

use crate::error::{FailureKind, TraceFailure};
use crate::vector::Vector;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Number of failure examples kept
pub const MAX_EXAMPLES: usize = 8;

/// One pupil sampling attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetryAttempt {
    pub pupil_scale: f64,
    pub aim_through_stop: bool,
    pub solve_chief: bool,
    pub ok: usize,
    pub generated: usize,
    pub top_kind: Option<FailureKind>,
    pub top_surface: Option<String>,
    pub first_start: Option<Vector>,
    pub first_direction: Option<Vector>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Diagnostics {
    pub kind_counts: BTreeMap<FailureKind, usize>,
    pub surface_counts: BTreeMap<String, usize>,
    pub examples: Vec<TraceFailure>,
    pub retry: Vec<RetryAttempt>,
    /// spot centered on the point nearest to the centroid for lack of a chief ray
    pub chief_fallback: bool,
}
impl Diagnostics {
    pub fn new() -> Self {
        Default::default()
    }
    pub fn record(&mut self, failure: &TraceFailure) {
        *self.kind_counts.entry(failure.kind).or_insert(0) += 1;
        if failure.surface.is_some() {
            *self.surface_counts.entry(failure.surface_key()).or_insert(0) += 1;
        }
        if self.examples.len() < MAX_EXAMPLES {
            self.examples.push(failure.clone());
        }
    }
    pub fn failures(&self) -> usize {
        self.kind_counts.values().sum()
    }
    pub fn is_clean(&self) -> bool {
        self.kind_counts.is_empty()
    }
    /// Failure kinds, most frequent first
    pub fn top_kinds(&self) -> Vec<(FailureKind, usize)> {
        let mut kinds: Vec<_> = self.kind_counts.iter().map(|(k, n)| (*k, *n)).collect();
        kinds.sort_by(|a, b| b.1.cmp(&a.1));
        kinds
    }
    /// Blocking surface keys, most frequent first
    pub fn top_surfaces(&self) -> Vec<(String, usize)> {
        let mut surfaces: Vec<_> = self
            .surface_counts
            .iter()
            .map(|(k, n)| (k.clone(), *n))
            .collect();
        surfaces.sort_by(|a, b| b.1.cmp(&a.1));
        surfaces
    }
    pub fn top_kind(&self) -> Option<FailureKind> {
        self.top_kinds().first().map(|x| x.0)
    }
    pub fn top_surface(&self) -> Option<String> {
        self.top_surfaces().first().map(|x| x.0.clone())
    }
    /// Folds `other` into `self`, retry ledgers are concatenated
    pub fn merge(&mut self, other: &Diagnostics) {
        for (k, n) in other.kind_counts.iter() {
            *self.kind_counts.entry(*k).or_insert(0) += n;
        }
        for (k, n) in other.surface_counts.iter() {
            *self.surface_counts.entry(k.clone()).or_insert(0) += n;
        }
        for e in other.examples.iter() {
            if self.examples.len() < MAX_EXAMPLES {
                self.examples.push(e.clone());
            }
        }
        self.retry.extend(other.retry.iter().cloned());
        self.chief_fallback |= other.chief_fallback;
    }
}

/// Caller facing summary of a field where no ray reached the target
#[derive(Debug, Clone, Serialize)]
pub struct FieldFailure {
    pub field: usize,
    pub target: usize,
    pub rays_total: usize,
    pub rays_reached: usize,
    /// surfaces (0-based) reached by the probe ray before it failed
    pub reachable: Vec<usize>,
    pub probe: Option<TraceFailure>,
    pub diagnostics: Diagnostics,
}
impl fmt::Display for FieldFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "field #{}: {}/{} rays reached surface #{}",
            self.field, self.rays_reached, self.rays_total, self.target
        )?;
        let kinds: Vec<String> = self
            .diagnostics
            .top_kinds()
            .iter()
            .take(3)
            .map(|(k, n)| format!("{} x{}", k, n))
            .collect();
        if !kinds.is_empty() {
            write!(f, "; top failures: {}", kinds.join(", "))?;
        }
        let surfaces: Vec<String> = self
            .diagnostics
            .top_surfaces()
            .iter()
            .take(3)
            .map(|(k, n)| format!("{} x{}", k, n))
            .collect();
        if !surfaces.is_empty() {
            write!(f, "; blockers: {}", surfaces.join(", "))?;
        }
        write!(f, "; reachable surfaces: {:?}", self.reachable)
    }
}
