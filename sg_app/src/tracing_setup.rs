use std::io;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use crate::config_loader::LoggingConfig;
use crate::errors::AppError;
use crate::errors::Result;

/// Surfaces every group reacquire round, which explains `remaining` briefly dipping
/// and recovering while a group waits
const GROUP_RETRY_DIRECTIVE: &str = "sg_ratelimit::multi_acquire=debug";

/// Build the event filter for `logging`
///
/// `RUST_LOG` still wins over the configured level.
pub fn env_filter(logging: &LoggingConfig) -> Result<EnvFilter> {
    let level: LevelFilter = logging.level.parse().map_err(|_| AppError::LogLevel(logging.level.clone()))?;
    let filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();

    if logging.group_retries {
        return Ok(filter.add_directive(GROUP_RETRY_DIRECTIVE.parse()?));
    }
    Ok(filter)
}

/// Initialise tracing with an hourly log file under `logging.directory` and stdout
///
/// Keep the returned guard alive for as long as logs should be flushed.
pub fn init(app_name: &str, logging: &LoggingConfig) -> Result<WorkerGuard> {
    let filter = env_filter(logging)?;
    let _ = std::fs::create_dir_all(&logging.directory);

    let file_appender = tracing_appender::rolling::hourly(&logging.directory, format!("{app_name}.log"));
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer().with_writer(non_blocking).with_thread_ids(true).with_line_number(true).with_ansi(false).compact();
    let stdout_layer = fmt::layer().with_writer(io::stdout).with_target(logging.group_retries).compact();

    tracing_subscriber::registry().with(filter).with(file_layer).with(stdout_layer).init();

    Ok(guard)
}
