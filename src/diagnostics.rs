//! Logging setup shared by the binaries.
//!
//! All tracing output goes to stderr. `RUST_LOG` overrides the default
//! filter.

use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "xiaot=info";

/// Build the filter from `RUST_LOG`, falling back to `default_filter`.
pub fn env_filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
}

/// Install the global stderr subscriber.
///
/// Returns `false` if a subscriber was already installed (e.g. by a test
/// harness); that is not an error.
pub fn init_tracing(default_filter: &str) -> bool {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(env_filter(default_filter))
        .try_init()
        .is_ok()
}
