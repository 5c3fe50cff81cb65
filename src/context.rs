//! Run context: cancellation, progress and diagnostics sinks
//!
//! Engines receive a [`RunContext`] and poll its [`CancelToken`] at field and
//! attempt boundaries, every [`CHECKPOINT`] rays and at FFT passes.

use crate::diagnostics::Diagnostics;
use crate::error::{Error, Result, TraceFailure};
use crossbeam_channel::{Receiver, Sender};
use crossbeam_utils::atomic::AtomicCell;
use std::sync::{Arc, Mutex};

/// Rays traced between two cancellation checks
pub const CHECKPOINT: usize = 256;

/// Shared cancellation flag
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicCell<bool>>,
}
impl CancelToken {
    pub fn new() -> Self {
        Default::default()
    }
    pub fn cancel(&self) {
        self.flag.store(true);
    }
    pub fn is_cancelled(&self) -> bool {
        self.flag.load()
    }
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

pub trait ProgressSink: Send + Sync {
    /// `percent` in [0,100]
    fn report(&self, percent: f64, phase: &str, message: &str);
}

pub trait DiagnosticsSink: Send + Sync {
    fn failure(&self, _field: usize, _failure: &TraceFailure) {}
    fn field_completed(&self, _field: usize, _diagnostics: &Diagnostics) {}
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct Silent;
impl ProgressSink for Silent {
    fn report(&self, _percent: f64, _phase: &str, _message: &str) {}
}
impl DiagnosticsSink for Silent {}

/// Forwards to the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;
impl ProgressSink for LogSink {
    fn report(&self, percent: f64, phase: &str, message: &str) {
        log::debug!("[{:>5.1}%] {}: {}", percent, phase, message);
    }
}
impl DiagnosticsSink for LogSink {
    fn failure(&self, field: usize, failure: &TraceFailure) {
        log::trace!("field #{}: {}", field, failure);
    }
    fn field_completed(&self, field: usize, diagnostics: &Diagnostics) {
        if diagnostics.is_clean() {
            log::debug!("field #{} completed without failures", field);
        } else {
            log::info!(
                "field #{} completed with {} failed rays (top: {:?} at {:?})",
                field,
                diagnostics.failures(),
                diagnostics.top_kind(),
                diagnostics.top_surface()
            );
        }
    }
}

/// Keeps the last failure and the last completed field run
#[derive(Default)]
pub struct SnapshotSink {
    last_failure: Mutex<Option<(usize, TraceFailure)>>,
    last_run: Mutex<Option<(usize, Diagnostics)>>,
}
impl SnapshotSink {
    pub fn new() -> Self {
        Default::default()
    }
    pub fn last_failure(&self) -> Option<(usize, TraceFailure)> {
        self.last_failure.lock().ok().and_then(|x| x.clone())
    }
    pub fn last_run(&self) -> Option<(usize, Diagnostics)> {
        self.last_run.lock().ok().and_then(|x| x.clone())
    }
}
impl DiagnosticsSink for SnapshotSink {
    fn failure(&self, field: usize, failure: &TraceFailure) {
        if let Ok(mut last) = self.last_failure.lock() {
            *last = Some((field, failure.clone()));
        }
    }
    fn field_completed(&self, field: usize, diagnostics: &Diagnostics) {
        if let Ok(mut last) = self.last_run.lock() {
            *last = Some((field, diagnostics.clone()));
        }
    }
}

#[derive(Debug, Clone)]
pub enum DiagnosticsEvent {
    Failure(usize, TraceFailure),
    FieldCompleted(usize, Diagnostics),
}

/// Publishes diagnostics events on a channel
pub struct ChannelSink {
    sender: Sender<DiagnosticsEvent>,
}
impl ChannelSink {
    pub fn unbounded() -> (Self, Receiver<DiagnosticsEvent>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (ChannelSink { sender }, receiver)
    }
}
impl DiagnosticsSink for ChannelSink {
    fn failure(&self, field: usize, failure: &TraceFailure) {
        // a dropped receiver only means nobody listens anymore
        let _ = self
            .sender
            .send(DiagnosticsEvent::Failure(field, failure.clone()));
    }
    fn field_completed(&self, field: usize, diagnostics: &Diagnostics) {
        let _ = self
            .sender
            .send(DiagnosticsEvent::FieldCompleted(field, diagnostics.clone()));
    }
}

/// What an engine call gets besides its inputs
#[derive(Clone)]
pub struct RunContext {
    pub cancel: CancelToken,
    pub progress: Arc<dyn ProgressSink>,
    pub diagnostics: Arc<dyn DiagnosticsSink>,
}
impl Default for RunContext {
    fn default() -> Self {
        RunContext {
            cancel: CancelToken::new(),
            progress: Arc::new(Silent),
            diagnostics: Arc::new(LogSink),
        }
    }
}
impl RunContext {
    pub fn new() -> Self {
        Default::default()
    }
    pub fn with_cancel(self, cancel: CancelToken) -> Self {
        Self { cancel, ..self }
    }
    pub fn with_progress(self, progress: Arc<dyn ProgressSink>) -> Self {
        Self { progress, ..self }
    }
    pub fn with_diagnostics(self, diagnostics: Arc<dyn DiagnosticsSink>) -> Self {
        Self {
            diagnostics,
            ..self
        }
    }
    pub fn report(&self, percent: f64, phase: &str, message: &str) {
        self.progress.report(percent.max(0.).min(100.), phase, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;

    #[test]
    fn cancel_token_is_shared() {
        let token = CancelToken::new();
        let ctx = RunContext::new().with_cancel(token.clone());
        assert!(ctx.cancel.check().is_ok());
        token.cancel();
        assert!(matches!(ctx.cancel.check(), Err(Error::Cancelled)));
    }

    #[test]
    fn channel_sink_publishes() {
        let (sink, rx) = ChannelSink::unbounded();
        sink.failure(1, &TraceFailure::at(FailureKind::NoIntersection, 2, "miss"));
        sink.field_completed(1, &Diagnostics::new());
        match rx.try_recv() {
            Ok(DiagnosticsEvent::Failure(1, f)) => assert_eq!(f.kind, FailureKind::NoIntersection),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(matches!(rx.try_recv(), Ok(DiagnosticsEvent::FieldCompleted(1, _))));
    }

    #[test]
    fn snapshot_sink_keeps_last() {
        let sink = SnapshotSink::new();
        sink.failure(0, &TraceFailure::at(FailureKind::NoIntersection, 1, "a"));
        sink.failure(2, &TraceFailure::at(FailureKind::Exception, 3, "b"));
        let (field, failure) = sink.last_failure().unwrap();
        assert_eq!(field, 2);
        assert_eq!(failure.kind, FailureKind::Exception);
        assert!(sink.last_run().is_none());
    }
}
