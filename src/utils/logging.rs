use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Resolves the filter directive for the relay.
///
/// `RUST_LOG` wins when set and parseable. Otherwise `configured` is used;
/// unknown level names fall back to `info`.
pub fn filter_for(configured: &str) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    let level = match configured.trim().to_lowercase().as_str() {
        "error" => "error",
        "warn" | "warning" => "warn",
        "debug" => "debug",
        "trace" => "trace",
        "off" => "off",
        _ => "info",
    };
    EnvFilter::new(level)
}

/// Installs the global tracing subscriber. Safe to call more than once; later
/// calls are ignored.
pub fn init(configured: &str) {
    let _ = tracing_subscriber::registry()
        .with(filter_for(configured))
        .with(tracing_subscriber::fmt::layer().with_target(false).compact())
        .try_init();
}
