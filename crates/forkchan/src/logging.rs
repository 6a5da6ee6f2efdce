//! Tracing set-up for binaries built on forkchan.
//!
//! Workers inherit the parent's environment and stderr, so calling
//! [`init_tracing`] before dispatching gives both sides the same filter and format.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Crate log level when `RUST_LOG` is unset: debug, info, warn or error.
pub const LOG_LEVEL_ENV: &str = "FORKCHAN_LOG";

/// Set to `json` for JSON log lines.
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

fn filter_directive(level: Option<&str>) -> String {
    let base_level = match level {
        Some("trace") => "trace",
        Some("debug") => "debug",
        Some("warn") | Some("warning") => "warn",
        Some("error") => "error",
        _ => "info",
    };
    format!("forkchan={base_level}")
}

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    fn from_env_value(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Text,
        }
    }
}

/// `RUST_LOG` wins when set; otherwise [`LOG_LEVEL_ENV`] picks the crate level.
fn env_filter() -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        return EnvFilter::from_default_env();
    }
    let level = std::env::var(LOG_LEVEL_ENV).ok();
    EnvFilter::new(filter_directive(level.as_deref()))
}

/// Install a stderr subscriber. Later calls are no-ops.
pub fn init_tracing() {
    let format = LogFormat::from_env_value(std::env::var(LOG_FORMAT_ENV).ok().as_deref());

    // Exactly one of the two layers is present.
    let (json, text) = match format {
        LogFormat::Json => (Some(fmt::layer().json().with_writer(std::io::stderr)), None),
        LogFormat::Text => (None, Some(fmt::layer().with_writer(std::io::stderr))),
    };

    let _ = tracing_subscriber::registry()
        .with(env_filter())
        .with(json)
        .with(text)
        .try_init();
}
