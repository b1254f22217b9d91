use log::{info, log_enabled, Level};

/// Initializes the logger with the `env_logger` crate.
///
/// Safe to call more than once; later calls leave the installed logger alone.
pub fn init_logger() {
    let _ = env_logger::Builder::from_default_env()
        .format_timestamp_millis()
        .try_init();
}

/// Logs an informational message.
pub fn log_info(message: &str) {
    if log_enabled!(Level::Info) {
        info!("{message}");
    }
}
