use thiserror::Error;

/// Result type for rate limiting operations
pub type Result<T> = std::result::Result<T, RateLimitError>;

/// Errors that can occur during rate limiting operations
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitError {
    /// A waiting caller was interrupted; no unit is held on its behalf
    #[error("Slot acquisition interrupted")]
    Interrupted,

    /// Invalid configuration
    #[error("Invalid rate limit configuration: {0}")]
    InvalidConfig(&'static str),
}
