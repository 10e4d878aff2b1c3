use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

/// Initialize structured logging on stderr.
///
/// `RUST_LOG` takes precedence over the configured level. JSON output carries
/// the current span and span list so run ids travel with every event.
pub fn init_telemetry(log_level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(log_level))?;

    if json {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(true)
                    .with_span_list(true),
            )
            .with(filter)
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false),
            )
            .with(filter)
            .try_init()?;
    }

    tracing::info!("iac-conductor telemetry initialized");
    Ok(())
}

/// Generate a correlation ID for linking related operations
pub fn generate_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Span wrapping every driver step of one workflow run
pub fn create_run_span(run_id: &str, repository: &str, correlation_id: &str) -> tracing::Span {
    tracing::info_span!(
        "workflow_run",
        run.id = run_id,
        repository = repository,
        correlation.id = correlation_id,
    )
}

/// Flush logs at shutdown
pub fn shutdown_telemetry() {
    crate::observability::engine_metrics().log_stats();
    tracing::info!("iac-conductor telemetry shutdown complete");
}
