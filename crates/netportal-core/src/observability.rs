//! Logging initialisation and span helpers.
//!
//! All netportal components log through `tracing`; binaries and test
//! harnesses call [`init_logging`] once to install a subscriber.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Safe to call multiple times; subsequent calls are no-ops. `RUST_LOG`
/// controls levels (e.g. `info`, `netportal_jobs=debug`), defaulting to
/// `info`.
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let result = match format {
            LogFormat::Json => tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .try_init(),
            LogFormat::Pretty => tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .try_init(),
        };
        // Another subscriber (e.g. a test writer) may already be installed.
        if let Err(err) = result {
            tracing::debug!(error = %err, "global subscriber already set");
        }
    });
}

/// Creates a span for job operations with the standard fields.
///
/// ```rust
/// use netportal_core::observability::job_span;
///
/// let span = job_span("run", "01HZX3V6J4N0KQ0S8Y4C9W2M7B", "interfaces");
/// let _guard = span.enter();
/// ```
#[must_use]
pub fn job_span(operation: &str, job_id: &str, table: &str) -> Span {
    tracing::info_span!("job", op = operation, job_id = job_id, table = table)
}

/// Creates a span for a batch of dependent jobs driven on behalf of a base job.
#[must_use]
pub fn batch_span(base_job_id: &str, total: usize, batch_size: usize) -> Span {
    tracing::info_span!(
        "batch",
        base_job_id = base_job_id,
        total = total,
        batch_size = batch_size,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_logging_is_idempotent() {
        init_logging(LogFormat::Pretty);
        init_logging(LogFormat::Json);
    }

    #[test]
    fn job_span_can_be_entered() {
        let span = job_span("run", "job-1", "table");
        let _guard = span.enter();
        tracing::info!("inside job span");
    }

    #[test]
    fn batch_span_can_be_entered() {
        let span = batch_span("job-1", 5, 2);
        let _guard = span.enter();
        tracing::debug!("inside batch span");
    }
}
