//! Telemetry initialization.
//!
//! All output goes to stderr so stdout stays clean for bundle IDs and
//! reports. Controlled by two environment variables:
//!
//! - `BUNDLEMERGE_LOG`: an [`EnvFilter`] directive such as `info` or
//!   `bundlemerge=debug,bundle_store=warn` (default `warn`).
//! - `BUNDLEMERGE_LOG_FORMAT`: `json` for one JSON object per event with
//!   span close timings, anything else for compact human-readable text.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

/// Filter directive variable.
pub const LOG_ENV: &str = "BUNDLEMERGE_LOG";
/// Output format variable.
pub const LOG_FORMAT_ENV: &str = "BUNDLEMERGE_LOG_FORMAT";

/// Output format for log events.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    /// Compact text.
    Compact,
    /// JSON lines.
    Json,
}

impl LogFormat {
    /// Parse a `BUNDLEMERGE_LOG_FORMAT` value. Unknown values mean compact.
    #[must_use]
    pub fn from_env_value(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Compact,
        }
    }
}

/// Install the global subscriber. Call once, early in `main`.
///
/// Does nothing if a subscriber is already installed (e.g. by a test).
pub fn init() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let format = LogFormat::from_env_value(std::env::var(LOG_FORMAT_ENV).ok().as_deref());

    let registry = tracing_subscriber::registry().with(filter);
    let result = match format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init(),
        LogFormat::Compact => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };
    if let Err(e) = result {
        tracing::debug!("telemetry already initialized: {e}");
    }
}
