//! Logging bootstrap for the binaries.
//!
//! Library code only uses the `log` macros with `event=... module=...`
//! messages; this module wires the `flexi_logger` backend. Without a log
//! directory everything goes to stderr, with one it goes to size-rotated
//! files.

use flexi_logger::{
    Cleanup, Criterion, FileSpec, FlexiLoggerError, Logger, LoggerHandle, Naming, WriteMode,
};
use log::info;
use std::path::Path;

const LOG_FILE_BASENAME: &str = "postal-history";
const MAX_LOG_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
const MAX_LOG_FILES: usize = 5;

pub const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Lowercased level if it is one of [`LOG_LEVELS`].
pub fn normalize_level(level: &str) -> Option<&'static str> {
    let wanted = level.trim().to_ascii_lowercase();
    LOG_LEVELS.iter().copied().find(|l| *l == wanted)
}

/// Start the logger. Keep the returned handle alive for the process lifetime.
pub fn init_logging(level: &str, log_dir: Option<&Path>) -> Result<LoggerHandle, FlexiLoggerError> {
    let logger = Logger::try_with_str(level)?;
    let handle = match log_dir {
        Some(dir) => logger
            .log_to_file(
                FileSpec::default()
                    .directory(dir)
                    .basename(LOG_FILE_BASENAME),
            )
            .rotate(
                Criterion::Size(MAX_LOG_FILE_SIZE_BYTES),
                Naming::Numbers,
                Cleanup::KeepLogFiles(MAX_LOG_FILES),
            )
            .write_mode(WriteMode::BufferAndFlush)
            .append()
            .format_for_files(flexi_logger::detailed_format)
            .start()?,
        None => logger.format(flexi_logger::default_format).start()?,
    };

    info!(
        "event=app_start module=logging status=ok level={} destination={} version={}",
        level,
        log_dir.map_or_else(|| "stderr".to_string(), |d| d.display().to_string()),
        env!("CARGO_PKG_VERSION")
    );
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_level() {
        assert_eq!(normalize_level(" WARN "), Some("warn"));
        assert_eq!(normalize_level("trace"), Some("trace"));
        assert_eq!(normalize_level("verbose"), None);
    }
}
