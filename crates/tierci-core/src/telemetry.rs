//! Tracing initialisation for the tierci binary.
//!
//! Call [`init_tracing`] once at program start. `RUST_LOG` wins when set;
//! otherwise the tierci crates log at the requested level and everything
//! else at `warn`.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Crates whose logs follow the requested level.
const OWN_CRATES: &[&str] = &["tierci", "tierci_core", "tierci_ci", "compose_env_manager"];

/// Default filter directives for `level`.
pub fn default_directives(level: Level) -> String {
    std::iter::once("warn".to_string())
        .chain(OWN_CRATES.iter().map(|c| format!("{c}={level}")))
        .collect::<Vec<_>>()
        .join(",")
}

/// Initialise the global tracing subscriber. Logs always go to stderr;
/// stdout is reserved for command results.
///
/// * `json`: emit newline-delimited JSON instead of human-readable lines.
/// * `level`: verbosity for the tierci crates when `RUST_LOG` is unset.
///
/// Later calls are no-ops.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .ok();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
            .ok();
    }
}
