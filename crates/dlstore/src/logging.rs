//! Process-wide log setup.
//!
//! The store logs through both `log` and `tracing`. `init` installs a
//! `tracing` subscriber and forwards `log` records into it, so a host
//! application sees a single stream.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info";

/// Installs the global subscriber. `RUST_LOG` takes precedence over
/// `default_filter`.
///
/// Returns `false` if a global logger or subscriber was already installed;
/// the existing one is left in place.
pub fn init(default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let subscriber = Registry::default()
        .with(filter)
        .with(fmt::layer().with_target(true));

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return false;
    }

    if let Err(e) = tracing_log::LogTracer::init() {
        tracing::debug!("log records not bridged: {}", e);
    }

    tracing::debug!("Logging initialized");
    true
}
