//! Structured logging.
//!
//! Level comes from `REPORTGEN_LOG` (an `EnvFilter` directive) and falls back
//! to a default chosen by `REPORTGEN_ENV`.
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Install the global subscriber. Safe to call more than once; if the host
/// already installed a subscriber it is kept.
pub fn init_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = environment();
        let filter = std::env::var("REPORTGEN_LOG")
            .ok()
            .and_then(|directive| EnvFilter::try_new(directive).ok())
            .unwrap_or_else(|| EnvFilter::new(default_level(&environment)));

        let json = environment == "production";
        let result = if json {
            tracing_subscriber::registry()
                .with(fmt::layer().json().with_target(true).with_filter(filter))
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_filter(filter))
                .try_init()
        };

        if result.is_err() {
            tracing::debug!("global tracing subscriber already set, keeping it");
        }
        tracing::info!(environment = %environment, "logging initialized");
    });
}

fn environment() -> String {
    std::env::var("REPORTGEN_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

fn default_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

/// One line per report lifecycle event.
pub fn log_report_operation(operation: &str, report_id: &str, status: &str, details: Option<&str>) {
    tracing::info!(
        operation = %operation,
        report_id = %report_id,
        status = %status,
        details = details,
        "report operation"
    );
}

/// One line per source fetch outcome.
pub fn log_fetch(source: &str, kind: &str, cached: bool, rows: Option<usize>, error: Option<&str>) {
    match error {
        None => tracing::info!(
            source = %source,
            kind = %kind,
            cached = cached,
            rows = rows,
            "source fetched"
        ),
        Some(err) => tracing::warn!(
            source = %source,
            kind = %kind,
            error = %err,
            "source fetch failed"
        ),
    }
}
