use flexi_logger::{
    detailed_format, Cleanup, Criterion, Duplicate, FileSpec, Logger, LoggerHandle, Naming,
};

use crate::config::LoggingConfig;
use crate::error::UpkeepError;

const LOG_BASENAME: &str = "netwatch-upkeep";
const ROTATE_BYTES: u64 = 5 * 1024 * 1024;
const KEEP_LOG_FILES: usize = 7;

/// Start the file logger. `RUST_LOG` takes precedence over the configured level.
/// Warnings and errors are also written to stderr.
///
/// The returned handle must be kept alive for the life of the process.
pub fn setup_logging(config: &LoggingConfig) -> Result<LoggerHandle, UpkeepError> {
    Logger::try_with_env_or_str(&config.level)
        .and_then(|logger| {
            logger
                .log_to_file(
                    FileSpec::default()
                        .directory(&config.directory)
                        .basename(LOG_BASENAME),
                )
                .rotate(
                    Criterion::Size(ROTATE_BYTES),
                    Naming::Timestamps,
                    Cleanup::KeepLogFiles(KEEP_LOG_FILES),
                )
                .duplicate_to_stderr(Duplicate::Warn)
                .format_for_files(detailed_format)
                .start()
        })
        .map_err(|e| UpkeepError::Error(format!("Failed to start logger: {}", e)))
}
