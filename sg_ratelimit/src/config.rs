use std::time::Duration;

use serde::Deserialize;

use crate::error::Result;
use crate::rate_limit::RateLimit;
use crate::yield_strategy::YieldTier;

/// Description of one rate limit as read from configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LimitConfig {
    pub name: String,
    pub capacity: u32,
    pub reset_interval_ms: u64,
    #[serde(default)]
    pub yield_tier: YieldTier,
}

impl LimitConfig {
    pub fn new(name: impl Into<String>, capacity: u32, reset_interval: Duration) -> Self {
        let reset_interval_ms = u64::try_from(reset_interval.as_millis()).unwrap_or(u64::MAX);
        Self { name: name.into(), capacity, reset_interval_ms, yield_tier: YieldTier::default() }
    }

    pub fn reset_interval(&self) -> Duration {
        Duration::from_millis(self.reset_interval_ms)
    }

    /// Validate and build the limiter
    pub fn build(&self) -> Result<RateLimit> {
        RateLimit::builder().capacity(self.capacity).reset_interval(self.reset_interval()).yield_strategy(self.yield_tier.strategy()).build()
    }
}
