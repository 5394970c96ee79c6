use std::sync::Arc;

use crate::error::Result;
use crate::interrupt::Interrupt;
use crate::multi_acquire::acquire_all;
use crate::multi_acquire::acquire_all_until;
use crate::rate_limit::RateLimit;

/// A value that may only be used once every associated rate limit granted a unit
#[derive(Debug)]
pub struct RateLimited<T> {
    value: T,
    limits: Vec<Arc<RateLimit>>,
}

impl<T> RateLimited<T> {
    pub fn new(value: T, limits: Vec<Arc<RateLimit>>) -> Self {
        Self { value, limits }
    }

    /// Wait until every limit grants a unit, then hand out the value
    pub async fn acquire(&self) -> &T {
        acquire_all(&self.limits).await;
        &self.value
    }

    pub async fn acquire_until(&self, interrupt: &Interrupt) -> Result<&T> {
        acquire_all_until(&self.limits, interrupt).await?;
        Ok(&self.value)
    }

    pub fn rate_limits(&self) -> &[Arc<RateLimit>] {
        &self.limits
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::RateLimitError;
    use crate::time::ManualClock;

    #[tokio::test]
    async fn test_acquire_hands_out_value() {
        let clock = Arc::new(ManualClock::new(0));
        let limit = Arc::new(RateLimit::builder().capacity(2).reset_interval(Duration::from_secs(1)).clock(clock).build().unwrap());
        let counter = limit.limit(41u32);

        assert_eq!(*counter.acquire().await + 1, 42);
        assert_eq!(limit.remaining(), 1);
        assert_eq!(counter.rate_limits().len(), 1);
        assert!(Arc::ptr_eq(&counter.rate_limits()[0], &limit));
        assert_eq!(counter.into_inner(), 41);
    }

    #[tokio::test]
    async fn test_every_limit_is_charged() {
        let clock = Arc::new(ManualClock::new(0));
        let a = Arc::new(RateLimit::builder().capacity(3).reset_interval(Duration::from_secs(1)).clock(clock.clone()).build().unwrap());
        let b = Arc::new(RateLimit::builder().capacity(5).reset_interval(Duration::from_secs(2)).clock(clock).build().unwrap());
        let gated = RateLimited::new("endpoint", vec![Arc::clone(&a), Arc::clone(&b)]);

        assert_eq!(*gated.acquire().await, "endpoint");
        assert_eq!(a.remaining(), 2);
        assert_eq!(b.remaining(), 4);
    }

    #[tokio::test]
    async fn test_interrupted_acquire() {
        let limit = Arc::new(RateLimit::new(1, Duration::from_secs(10)));
        limit.acquire_slot().await;
        let gated = limit.limit(());
        let interrupt = Interrupt::new();
        interrupt.raise();

        assert_eq!(gated.acquire_until(&interrupt).await.unwrap_err(), RateLimitError::Interrupted);
    }
}
