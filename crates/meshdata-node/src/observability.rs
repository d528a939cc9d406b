//! Structured logging initialization.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Crates whose events pass the default filter.
const TARGETS: [&str; 5] = [
    "meshdata_node",
    "meshdata_shared",
    "meshdata_rpc",
    "meshdata_codec",
    "meshdata_transport",
];

/// Default filter directives for `level`, used when `RUST_LOG` is unset.
#[must_use]
pub fn default_directives(level: &str) -> String {
    TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Initialize the logging system.
///
/// `RUST_LOG` takes precedence over `level`. Fails if a global subscriber
/// is already installed.
///
/// ```rust,no_run
/// use meshdata_node::observability::init_logging;
///
/// init_logging("info", true).unwrap();
/// ```
pub fn init_logging(level: &str, json_format: bool) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directives(level)))?;

    let registry = tracing_subscriber::registry().with(env_filter);

    if json_format {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(true)
                    .with_thread_names(true),
            )
            .try_init()?;
    } else {
        registry
            .with(fmt::layer().with_thread_names(true))
            .try_init()?;
    }

    tracing::info!(
        level = %level,
        format = if json_format { "json" } else { "pretty" },
        "Logging initialized"
    );
    Ok(())
}
