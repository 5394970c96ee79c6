//! # sg_ratelimit
//!
//! Lock-free windowed rate limits and deadlock-free acquisition of one unit from
//! several limits at once.

pub mod config;
pub mod error;
pub mod interrupt;
pub mod limiter;
pub mod multi_acquire;
pub mod rate_limit;
pub mod rate_limited;
pub mod slot;
pub mod time;
mod versioned;
pub mod yield_strategy;

pub use config::LimitConfig;
pub use error::RateLimitError;
pub use error::Result;
pub use interrupt::Interrupt;
pub use limiter::Limiter;
pub use limiter::SlotFuture;
pub use multi_acquire::AcquireCost;
pub use multi_acquire::MultiAcquire;
pub use multi_acquire::MultiAcquireBuilder;
pub use multi_acquire::acquire_all;
pub use multi_acquire::acquire_all_until;
pub use rate_limit::RateLimit;
pub use rate_limit::RateLimitBuilder;
pub use rate_limit::RateLimitState;
pub use rate_limit::ResetterToken;
pub use rate_limited::RateLimited;
pub use slot::SlotHandle;
pub use time::Clock;
pub use time::ManualClock;
pub use time::MonotonicClock;
pub use yield_strategy::SleepYield;
pub use yield_strategy::SpinYield;
pub use yield_strategy::YieldStrategy;
pub use yield_strategy::YieldTier;
