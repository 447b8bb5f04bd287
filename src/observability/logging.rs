use std::fs;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;

/// Initializes logging with console output and a daily-rolling JSON file.
///
/// `RUST_LOG` overrides the configured level when set.
pub fn init_logging(config: &LoggingConfig) {
    let _ = fs::create_dir_all(&config.directory);

    let file_appender = tracing_appender::rolling::daily(&config.directory, "humanitix-importer.log");
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer().json().with_writer(non_blocking_writer);
    let console_layer = fmt::layer().with_target(false).with_writer(std::io::stdout);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("humanitix_importer={0},import_log={0}", config.level)));

    // A subscriber may already be installed (tests, embedding hosts)
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init();

    // Keep the writer alive for the life of the process so logs are flushed
    std::mem::forget(guard);
}
