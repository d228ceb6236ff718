use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Filter used when `RUST_LOG` is not set
pub const DEFAULT_LOG_FILTER: &str = "radiocast=info,radiocast_lib=info,warn";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Initialize logging with tracing
///
/// This function sets up the tracing subscriber with the following configuration:
/// - Reads filter from RUST_LOG environment variable if available
/// - Falls back to `DEFAULT_LOG_FILTER` if RUST_LOG is not set
/// - Uses a formatted output layer on stderr, keeping stdout for device listings
///
/// Panics if a global subscriber is already installed; use
/// `try_init_logging` where that can happen.
///
/// # Example
///
/// ```no_run
/// use radiocast_lib::utils::logging::init_logging;
///
/// init_logging();
/// ```
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter())
        .init();

    tracing::info!("radiocast logging initialized");
}

/// Test-friendly variant of `init_logging`: output goes through the test
/// harness capture, and it returns `false` instead of panicking when a
/// subscriber is already installed
pub fn try_init_logging() -> bool {
    tracing_subscriber::registry()
        .with(fmt::layer().with_test_writer())
        .with(env_filter())
        .try_init()
        .is_ok()
}
