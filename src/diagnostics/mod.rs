//! Failure reporting.
//!
//! Every failure the cache raises to a caller (engine initialization,
//! write, read, close) is also handed to [`Diagnostics::capture`], which
//! logs it at `error` through `tracing` and forwards a [`FailureReport`]
//! to the configured [`DiagnosticsSink`].
//!
//! Sinks are fire-and-forget. A sink that cannot deliver a report logs the
//! problem and moves on; reporting never changes what the cache returns.
//!
//! # Sinks
//!
//! - [`NoopSink`]: drops everything. Used when no DSN is configured.
//! - [`MemorySink`]: keeps reports in memory, for tests and embedding.
//! - [`CompositeSink`]: fans out to several sinks.
//! - [`HttpSink`](http::HttpSink): posts reports as JSON. Behind the
//!   `http-sink` feature flag.

#[cfg(feature = "http-sink")]
pub mod http;

use std::error::Error as StdError;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::DiagnosticsSettings;

/// A captured failure, ready for delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReport {
    /// Display form of the top-level error.
    pub error: String,
    /// Display forms of the error's sources, outermost first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<String>,
    /// Short description of what was being attempted.
    pub context: String,
    /// Structured fields such as `task_id` and `size`.
    #[serde(default)]
    pub extra: Value,
    /// Release tag of the reporting process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    /// Module tag of the reporting process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    /// When the failure was captured.
    pub timestamp: DateTime<Utc>,
}

impl FailureReport {
    /// Returns `extra[key]` if present.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }
}

/// Destination for failure reports.
pub trait DiagnosticsSink: Send + Sync + 'static {
    /// Delivers one report. Must not block the caller on network I/O.
    fn report(&self, report: &FailureReport);

    /// Sink name, for logging.
    fn name(&self) -> &'static str;

    /// Whether [`report`](Self::report) does anything.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Sink that discards every report.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl DiagnosticsSink for NoopSink {
    fn report(&self, _report: &FailureReport) {}

    fn name(&self) -> &'static str {
        "noop"
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// Sink that keeps reports in memory.
///
/// Clones share storage, so a test can keep one handle and give another to
/// the cache.
///
/// ```
/// use serde_json::json;
/// use task_cache::diagnostics::{Diagnostics, MemorySink};
///
/// let sink = MemorySink::new();
/// let diagnostics = Diagnostics::new(sink.clone());
/// let err = std::io::Error::other("disk full");
/// diagnostics.capture(&err, "failed to insert task", json!({"task_id": "t1"}));
///
/// let reports = sink.reports();
/// assert_eq!(reports.len(), 1);
/// assert_eq!(reports[0].field("task_id"), Some(&json!("t1")));
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    reports: Arc<Mutex<Vec<FailureReport>>>,
}

impl MemorySink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all reports received so far.
    pub fn reports(&self) -> Vec<FailureReport> {
        self.reports.lock().clone()
    }

    /// Number of reports received so far.
    pub fn len(&self) -> usize {
        self.reports.lock().len()
    }

    /// Returns `true` if nothing was reported.
    pub fn is_empty(&self) -> bool {
        self.reports.lock().is_empty()
    }

    /// Removes and returns all reports.
    pub fn drain(&self) -> Vec<FailureReport> {
        std::mem::take(&mut *self.reports.lock())
    }
}

impl DiagnosticsSink for MemorySink {
    fn report(&self, report: &FailureReport) {
        self.reports.lock().push(report.clone());
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Sink that forwards every report to several sinks.
pub struct CompositeSink {
    sinks: Vec<Arc<dyn DiagnosticsSink>>,
}

impl CompositeSink {
    /// Creates a composite from the given sinks.
    pub fn new(sinks: Vec<Arc<dyn DiagnosticsSink>>) -> Self {
        Self { sinks }
    }
}

impl std::fmt::Debug for CompositeSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.sinks.iter().map(|s| s.name()).collect();
        f.debug_struct("CompositeSink").field("sinks", &names).finish()
    }
}

impl DiagnosticsSink for CompositeSink {
    fn report(&self, report: &FailureReport) {
        for sink in self.sinks.iter().filter(|s| s.is_enabled()) {
            sink.report(report);
        }
    }

    fn name(&self) -> &'static str {
        "composite"
    }

    fn is_enabled(&self) -> bool {
        self.sinks.iter().any(|s| s.is_enabled())
    }
}

/// Handle used by the cache to record failures.
#[derive(Clone)]
pub struct Diagnostics {
    sink: Arc<dyn DiagnosticsSink>,
    release: Option<String>,
    module: Option<String>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::disabled()
    }
}

impl std::fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Diagnostics")
            .field("sink", &self.sink.name())
            .field("release", &self.release)
            .field("module", &self.module)
            .finish()
    }
}

impl Diagnostics {
    /// Reports to `sink`.
    pub fn new(sink: impl DiagnosticsSink) -> Self {
        Self::from_arc(Arc::new(sink))
    }

    /// Reports to a shared sink.
    pub fn from_arc(sink: Arc<dyn DiagnosticsSink>) -> Self {
        Self {
            sink,
            release: None,
            module: None,
        }
    }

    /// Logs failures locally and reports nothing remotely.
    pub fn disabled() -> Self {
        Self::new(NoopSink)
    }

    /// Builds the handle described by `settings`.
    ///
    /// Without a DSN remote reporting is disabled. A DSN that cannot be
    /// used is logged at `warn` and also leaves reporting disabled.
    pub fn from_settings(settings: &DiagnosticsSettings) -> Self {
        let diagnostics = match settings.dsn.as_deref() {
            Some(dsn) => Self::remote(dsn, settings.debug),
            None => Self::disabled(),
        };
        let diagnostics = diagnostics.with_module(settings.module.clone());
        match &settings.release {
            Some(release) => diagnostics.with_release(release.clone()),
            None => diagnostics,
        }
    }

    #[cfg(feature = "http-sink")]
    fn remote(dsn: &str, debug: bool) -> Self {
        match http::HttpSink::new(dsn) {
            Ok(sink) => Self::new(sink.with_debug(debug)),
            Err(e) => {
                tracing::warn!(error = %e, "remote diagnostics disabled");
                Self::disabled()
            },
        }
    }

    #[cfg(not(feature = "http-sink"))]
    fn remote(_dsn: &str, _debug: bool) -> Self {
        tracing::warn!("diagnostics DSN configured but the http-sink feature is not enabled");
        Self::disabled()
    }

    /// Tags every report with a release.
    pub fn with_release(mut self, release: impl Into<String>) -> Self {
        self.release = Some(release.into());
        self
    }

    /// Tags every report with a module name.
    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    /// Whether reports leave the process.
    pub fn is_enabled(&self) -> bool {
        self.sink.is_enabled()
    }

    /// Logs `error` at `error` level and forwards it to the sink.
    pub fn capture(&self, error: &(dyn StdError + 'static), context: &str, extra: Value) {
        tracing::error!(error = %error, extra = %extra, "{context}");

        if !self.sink.is_enabled() {
            return;
        }
        let report = FailureReport {
            error: error.to_string(),
            causes: causes(error),
            context: context.to_string(),
            extra,
            release: self.release.clone(),
            module: self.module.clone(),
            timestamp: Utc::now(),
        };
        self.sink.report(&report);
    }
}

fn causes(error: &(dyn StdError + 'static)) -> Vec<String> {
    let mut causes = Vec::new();
    let mut current = error.source();
    while let Some(source) = current {
        causes.push(source.to_string());
        current = source.source();
    }
    causes
}
