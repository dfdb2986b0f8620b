//! JSON-over-HTTP diagnostics sink.
//!
//! Each report is POSTed as a JSON [`FailureReport`] to the DSN. Delivery
//! runs on a spawned tokio task; when called outside a runtime the report
//! is dropped with a `debug` log line.

use std::time::Duration;

use reqwest::{Client, Url};

use super::{DiagnosticsSink, FailureReport};
use crate::config::ConfigError;

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Sink posting reports to an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpSink {
    client: Client,
    endpoint: Url,
    debug: bool,
}

impl HttpSink {
    /// Creates a sink posting to `dsn`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidDsn`] if `dsn` is not an `http(s)` URL or the
    /// client cannot be built.
    pub fn new(dsn: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidDsn {
            dsn: dsn.to_string(),
            reason,
        };
        let endpoint = Url::parse(dsn).map_err(|e| invalid(e.to_string()))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme {}", endpoint.scheme())));
        }
        let client = Client::builder()
            .timeout(DELIVERY_TIMEOUT)
            .build()
            .map_err(|e| invalid(e.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            debug: false,
        })
    }

    /// Logs successful deliveries at `debug` as well as failures.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// The endpoint reports are posted to.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

impl DiagnosticsSink for HttpSink {
    fn report(&self, report: &FailureReport) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("no async runtime, dropping diagnostics report");
            return;
        };
        let request = self.client.post(self.endpoint.clone()).json(report);
        let debug = self.debug;
        handle.spawn(async move {
            match request.send().await.and_then(|r| r.error_for_status()) {
                Ok(response) => {
                    if debug {
                        tracing::debug!(status = %response.status(), "diagnostics report delivered");
                    }
                },
                Err(e) => tracing::warn!(error = %e, "failed to deliver diagnostics report"),
            }
        });
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
