use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use crate::error::RateLimitError;
use crate::limiter::Limiter;
use crate::limiter::SlotFuture;

/// Cloneable flag that unwinds callers waiting for a slot
///
/// Raising it makes every `*_until` acquisition sharing the flag return
/// [`RateLimitError::Interrupted`] at its next step.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    raised: Arc<AtomicBool>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.raised.store(true, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }

    /// Lower the flag so it can be reused
    pub fn clear(&self) {
        self.raised.store(false, Ordering::Release);
    }
}

/// Source of interruption checked before each state step of an acquisition
pub(crate) trait Interruptible: Sync {
    type Error;

    fn check(&self) -> Result<(), Self::Error>;

    /// Wait for a unit from `limiter` under this interruption source
    fn acquire_from<'a, L: Limiter + ?Sized>(&'a self, limiter: &'a L) -> SlotFuture<'a, Result<u64, Self::Error>>;
}

/// Acquisitions that can only be cancelled by dropping their future
pub(crate) struct Uninterruptible;

impl Interruptible for Uninterruptible {
    type Error = Infallible;

    #[inline(always)]
    fn check(&self) -> Result<(), Infallible> {
        Ok(())
    }

    fn acquire_from<'a, L: Limiter + ?Sized>(&'a self, limiter: &'a L) -> SlotFuture<'a, Result<u64, Infallible>> {
        Box::pin(async move { Ok(limiter.acquire_slot().await) })
    }
}

impl Interruptible for Interrupt {
    type Error = RateLimitError;

    #[inline(always)]
    fn check(&self) -> Result<(), RateLimitError> {
        if self.is_raised() { Err(RateLimitError::Interrupted) } else { Ok(()) }
    }

    fn acquire_from<'a, L: Limiter + ?Sized>(&'a self, limiter: &'a L) -> SlotFuture<'a, Result<u64, RateLimitError>> {
        limiter.acquire_slot_until(self)
    }
}

/// Unwrap the outcome of an acquisition that cannot be interrupted
#[inline(always)]
pub(crate) fn settled<T>(result: Result<T, Infallible>) -> T {
    match result {
        Ok(value) => value,
        Err(never) => match never {},
    }
}
