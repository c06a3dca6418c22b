//! Logger setup for the responder binary.
//!
//! Verbosity comes from `RUST_LOG` as usual; when it is unset the binary
//! defaults to `info` so TX/RX records stay visible during field runs.

use log::{error, info};

/// Initializes the logger with the `env_logger` crate, defaulting the
/// filter to `info`.
pub fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

/// Logs an error message.
pub fn log_error(message: &str) {
    error!("{message}");
}

/// Logs an informational message.
pub fn log_info(message: &str) {
    info!("{message}");
}
