use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Failed to load configuration: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid limit '{name}': {source}")]
    InvalidLimit { name: String, source: sg_ratelimit::RateLimitError },

    #[error("No rate limits configured")]
    NoLimits,

    #[error("Failed to install shutdown handler: {0}")]
    ShutdownHandler(#[from] ctrlc::Error),

    #[error("Unknown log level '{0}'")]
    LogLevel(String),

    #[error("Invalid log filter: {0}")]
    LogFilter(#[from] tracing_subscriber::filter::ParseError),

    #[error("Rate limiting error: {0}")]
    RateLimit(#[from] sg_ratelimit::RateLimitError),
}

pub type Result<T> = std::result::Result<T, AppError>;
