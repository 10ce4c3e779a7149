//! Logging setup for hosts, binaries, and examples.
//!
//! The library itself only emits through the `log` facade; linking a backend
//! is the host's call. This helper wires up `flexi_logger` from the
//! environment for hosts that do not already carry one.

use flexi_logger::{opt_format, FlexiLoggerError, Logger, LoggerHandle};

/// Start a `flexi_logger` backend using `RUST_LOG` when set, `info` otherwise.
///
/// Keep the returned handle alive for the duration of the program.
pub fn setup_logging() -> Result<LoggerHandle, FlexiLoggerError> {
    Logger::try_with_env_or_str("info")?
        .format(opt_format)
        .start()
}
