use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

/// Cooperative backoff used while a caller waits on a contended or exhausted limit
///
/// Implementations must give the executor a chance to run other work; they must never
/// park the OS thread.
pub trait YieldStrategy: Send + Sync {
    /// Yield the current execution context once
    fn pause(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Spins by handing control back to the scheduler a fixed number of times
///
/// Fewer rounds react faster to a reset at the cost of more CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpinYield {
    rounds: u32,
}

impl SpinYield {
    /// Frequent, low-latency spinning
    pub const HIGH_RESOLUTION: SpinYield = SpinYield { rounds: 1 };

    pub const BALANCED: SpinYield = SpinYield { rounds: 5 };

    /// Sparse, low-overhead spinning
    pub const LOW_RESOLUTION: SpinYield = SpinYield { rounds: 10 };

    pub fn new(rounds: u32) -> Self {
        Self { rounds: rounds.max(1) }
    }

    pub fn rounds(&self) -> u32 {
        self.rounds
    }
}

impl Default for SpinYield {
    fn default() -> Self {
        Self::BALANCED
    }
}

impl YieldStrategy for SpinYield {
    fn pause(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            for _ in 0..self.rounds {
                std::hint::spin_loop();
                tokio::task::yield_now().await;
            }
        })
    }
}

/// Sleeps on the runtime timer between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SleepYield {
    period: Duration,
}

impl SleepYield {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

impl Default for SleepYield {
    fn default() -> Self {
        Self::new(Duration::from_millis(1))
    }
}

impl YieldStrategy for SleepYield {
    fn pause(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(self.period))
    }
}

/// Named yield tiers, as selected from configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum YieldTier {
    HighResolution,
    #[default]
    Balanced,
    LowResolution,
    Sleep,
}

impl YieldTier {
    pub fn strategy(self) -> Arc<dyn YieldStrategy> {
        match self {
            YieldTier::HighResolution => Arc::new(SpinYield::HIGH_RESOLUTION),
            YieldTier::Balanced => Arc::new(SpinYield::BALANCED),
            YieldTier::LowResolution => Arc::new(SpinYield::LOW_RESOLUTION),
            YieldTier::Sleep => Arc::new(SleepYield::default()),
        }
    }
}
