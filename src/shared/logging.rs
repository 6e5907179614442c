use tracing_subscriber::EnvFilter;

pub const LOG_FILTER_ENV: &str = "SCANWARD_LOG";

/// Installs the process-wide `tracing` subscriber. Safe to call more than once;
/// later calls are ignored.
pub fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV)
        .unwrap_or_else(|_| EnvFilter::new("scanward=info,warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
