use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use crossbeam_epoch as epoch;
use crossbeam_epoch::Guard;
use tracing::error;
use tracing::trace;
use tracing::warn;

use crate::error::RateLimitError;
use crate::error::Result;
use crate::interrupt::Interrupt;
use crate::interrupt::Interruptible;
use crate::interrupt::Uninterruptible;
use crate::interrupt::settled;
use crate::limiter::Limiter;
use crate::limiter::SlotFuture;
use crate::multi_acquire::AcquireCost;
use crate::rate_limited::RateLimited;
use crate::slot::SlotHandle;
use crate::time::Clock;
use crate::time::MonotonicClock;
use crate::time::duration_to_nanos;
use crate::versioned::Versioned;
use crate::versioned::VersionedCell;
use crate::yield_strategy::SpinYield;
use crate::yield_strategy::YieldStrategy;

/// Identifies the acquisition appointed to roll the window over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResetterToken(u64);

impl ResetterToken {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Immutable snapshot of a rate limit window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitState {
    /// Deadline of the current window, in clock nanoseconds
    pub next_reset: u64,

    /// Units left in the current window
    pub remaining: u32,

    /// Window identifier
    pub generation: u64,

    /// Acquisition appointed to perform the next reset
    pub resetter: Option<ResetterToken>,
}

/// Deadline of a window that never expires
///
/// Reached when deadline arithmetic saturates the clock range.
const NEVER: u64 = u64::MAX;

impl RateLimitState {
    #[inline(always)]
    fn is_stale(&self, now: u64) -> bool {
        self.next_reset != NEVER && now >= self.next_reset
    }

    /// Window that contains `now`, skipping every whole interval that elapsed unobserved
    ///
    /// Only meaningful for a stale state.
    #[inline]
    pub(crate) fn reset_at(&self, now: u64, capacity: u32, interval: u64) -> Self {
        let skipped = now.saturating_sub(self.next_reset) / interval + 1;
        Self {
            next_reset: self.next_reset.saturating_add(skipped.saturating_mul(interval)),
            remaining: capacity,
            generation: self.generation.saturating_add(skipped),
            resetter: None,
        }
    }

    #[inline]
    fn appointing(&self, token: ResetterToken) -> Self {
        Self { resetter: Some(token), ..*self }
    }

    #[inline]
    fn decremented(&self) -> Self {
        Self { remaining: self.remaining - 1, ..*self }
    }

    #[inline]
    fn incremented(&self) -> Self {
        Self { remaining: self.remaining + 1, ..*self }
    }
}

/// Outcome of one step of the acquisition state machine
enum Attempt {
    Acquired(u64),
    Retry,
    Wait,
}

/// Lock-free windowed rate limit
///
/// Grants at most `capacity` units per `reset_interval`. Windows roll over lazily: the
/// first caller that observes an expired deadline installs the next window for everyone,
/// fast-forwarding over any number of idle intervals in one step. All state lives in a
/// single versioned cell and every mutation is one compare-and-swap on it.
///
/// Waiting callers back off through the configured [`YieldStrategy`]; there is no
/// ordering between them.
pub struct RateLimit {
    capacity: u32,
    reset_interval: u64,
    state: VersionedCell<RateLimitState>,
    clock: Arc<dyn Clock>,
    yield_strategy: Arc<dyn YieldStrategy>,
}

impl RateLimit {
    /// Create a rate limit on the monotonic clock with balanced spinning
    ///
    /// # Panics
    /// Panics if `capacity` or `reset_interval` is zero, or if `reset_interval` does not
    /// fit in `u64` nanoseconds.
    pub fn new(capacity: u32, reset_interval: Duration) -> Self {
        assert!(capacity > 0, "Capacity must be greater than 0");
        assert!(!reset_interval.is_zero(), "Reset interval must be greater than 0");
        let Some(reset_interval) = duration_to_nanos(reset_interval) else {
            panic!("Reset interval must fit in u64 nanoseconds");
        };

        Self::from_parts(capacity, reset_interval, Arc::new(MonotonicClock::new()), Arc::new(SpinYield::default()))
    }

    /// Create a rate limit granting `capacity` units per second
    pub fn per_second(capacity: u32) -> Self {
        Self::new(capacity, Duration::from_secs(1))
    }

    /// Create a rate limit granting `capacity` units per minute
    pub fn per_minute(capacity: u32) -> Self {
        Self::new(capacity, Duration::from_secs(60))
    }

    /// Create a builder for configuring a rate limit
    pub fn builder() -> RateLimitBuilder {
        RateLimitBuilder::new()
    }

    fn from_parts(capacity: u32, reset_interval: u64, clock: Arc<dyn Clock>, yield_strategy: Arc<dyn YieldStrategy>) -> Self {
        let initial =
            RateLimitState { next_reset: clock.now_nanos().saturating_add(reset_interval), remaining: capacity, generation: 0, resetter: None };

        Self { capacity, reset_interval, state: VersionedCell::new(initial), clock, yield_strategy }
    }

    /// Wait for a unit and return the generation it was granted from
    ///
    /// Dropping the returned future abandons the attempt without consuming a unit.
    pub async fn acquire_slot(&self) -> u64 {
        settled(self.acquire_slot_with(&Uninterruptible).await)
    }

    /// Wait for a unit unless `interrupt` is raised first
    pub async fn acquire_slot_until(&self, interrupt: &Interrupt) -> Result<u64> {
        self.acquire_slot_with(interrupt).await
    }

    async fn acquire_slot_with<I: Interruptible>(&self, interrupt: &I) -> std::result::Result<u64, I::Error> {
        let token = ResetterToken::next();

        loop {
            interrupt.check()?;

            // The guard is not Send, so it never lives across the pause below
            let attempt = {
                let guard = epoch::pin();
                self.step(token, &guard)
            };

            match attempt {
                Attempt::Acquired(generation) => return Ok(generation),
                Attempt::Retry => continue,
                Attempt::Wait => self.yield_strategy.pause().await,
            }
        }
    }

    fn step(&self, token: ResetterToken, guard: &Guard) -> Attempt {
        let current = self.state.load(guard);
        let state = *current.value();
        self.check_invariant(&state);

        let now = self.clock.now_nanos();
        if state.is_stale(now) {
            self.roll_over(current, now, guard);
            return Attempt::Retry;
        }

        if state.remaining == 0 {
            return match state.resetter {
                Some(owner) if owner == token => {
                    let now = self.clock.now_nanos();
                    if state.is_stale(now) {
                        self.roll_over(current, now, guard);
                        Attempt::Retry
                    } else {
                        Attempt::Wait
                    }
                }
                Some(_) => Attempt::Wait,
                None => {
                    if self.state.compare_and_set(current, state.appointing(token), guard) {
                        trace!(generation = state.generation, next_reset = state.next_reset, "Resetter appointed");
                    }
                    Attempt::Retry
                }
            };
        }

        if self.state.compare_and_set(current, state.decremented(), guard) { Attempt::Acquired(state.generation) } else { Attempt::Retry }
    }

    /// Install the window containing `now` in place of `current`
    fn roll_over(&self, current: Versioned<'_, RateLimitState>, now: u64, guard: &Guard) -> bool {
        let state = current.value();
        let next = state.reset_at(now, self.capacity, self.reset_interval);
        let swapped = self.state.compare_and_set(current, next, guard);
        if swapped {
            trace!(
                generation = next.generation,
                skipped = next.generation - state.generation,
                next_reset = next.next_reset,
                "Rate limit window reset"
            );
        }
        swapped
    }

    /// Load the current state, rolling an expired window over first
    fn resolve<'g>(&self, guard: &'g Guard) -> Versioned<'g, RateLimitState> {
        loop {
            let current = self.state.load(guard);
            let now = self.clock.now_nanos();
            if !current.value().is_stale(now) {
                self.check_invariant(current.value());
                return current;
            }
            self.roll_over(current, now, guard);
        }
    }

    #[inline(always)]
    fn check_invariant(&self, state: &RateLimitState) {
        if state.remaining > self.capacity {
            error!(remaining = state.remaining, capacity = self.capacity, generation = state.generation, "Rate limit state corrupted");
            panic!("remaining {} exceeds capacity {}", state.remaining, self.capacity);
        }
    }

    /// Return a unit granted from `generation`
    ///
    /// Returns `false` without touching the state when the window has already rolled
    /// over, since the unit expired with it.
    pub fn cancel_slot(&self, generation: u64) -> bool {
        let guard = epoch::pin();
        loop {
            let current = self.resolve(&guard);
            let state = current.value();

            if state.generation != generation {
                return false;
            }
            if state.remaining == self.capacity {
                warn!(generation, capacity = self.capacity, "Cancel without an outstanding slot ignored");
                return false;
            }
            if self.state.compare_and_set(current, state.incremented(), &guard) {
                return true;
            }
        }
    }

    /// Units left in the current window
    pub fn remaining(&self) -> u32 {
        self.snapshot().remaining
    }

    /// Deadline of the current window, in clock nanoseconds
    pub fn next_reset(&self) -> u64 {
        self.snapshot().next_reset
    }

    /// Identifier of the current window
    pub fn generation(&self) -> u64 {
        self.snapshot().generation
    }

    /// Current window, rolled over if it had expired
    pub fn snapshot(&self) -> RateLimitState {
        let guard = epoch::pin();
        *self.resolve(&guard).value()
    }

    /// Time left until the current window expires
    pub fn time_until_reset(&self) -> Duration {
        let next_reset = self.next_reset();
        Duration::from_nanos(next_reset.saturating_sub(self.clock.now_nanos()))
    }

    pub fn reset_interval(&self) -> Duration {
        Duration::from_nanos(self.reset_interval)
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Wait for a unit and wrap it in a handle
    pub async fn acquire(self: &Arc<Self>) -> SlotHandle {
        let generation = self.acquire_slot().await;
        SlotHandle::new(Arc::clone(self), generation)
    }

    pub async fn acquire_until(self: &Arc<Self>, interrupt: &Interrupt) -> Result<SlotHandle> {
        let generation = self.acquire_slot_until(interrupt).await?;
        Ok(SlotHandle::new(Arc::clone(self), generation))
    }

    /// Gate `value` behind this rate limit
    pub fn limit<T>(self: &Arc<Self>, value: T) -> RateLimited<T> {
        RateLimited::new(value, vec![Arc::clone(self)])
    }
}

impl Limiter for RateLimit {
    fn acquire_slot(&self) -> SlotFuture<'_, u64> {
        Box::pin(RateLimit::acquire_slot(self))
    }

    fn acquire_slot_until<'a>(&'a self, interrupt: &'a Interrupt) -> SlotFuture<'a, Result<u64>> {
        Box::pin(RateLimit::acquire_slot_until(self, interrupt))
    }

    fn cancel_slot(&self, generation: u64) -> bool {
        RateLimit::cancel_slot(self, generation)
    }

    fn remaining(&self) -> u32 {
        RateLimit::remaining(self)
    }

    fn next_reset(&self) -> u64 {
        RateLimit::next_reset(self)
    }

    fn generation(&self) -> u64 {
        RateLimit::generation(self)
    }

    fn reset_interval(&self) -> Duration {
        RateLimit::reset_interval(self)
    }

    fn capacity(&self) -> u32 {
        RateLimit::capacity(self)
    }

    fn cost(&self) -> AcquireCost {
        let state = self.snapshot();
        AcquireCost::new(state.remaining, state.next_reset)
    }
}

impl fmt::Debug for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimit")
            .field("capacity", &self.capacity)
            .field("reset_interval", &self.reset_interval())
            .field("state", &self.snapshot())
            .finish_non_exhaustive()
    }
}

/// Builder for configuring a rate limit
pub struct RateLimitBuilder {
    capacity: Option<u32>,
    reset_interval: Option<Duration>,
    clock: Option<Arc<dyn Clock>>,
    yield_strategy: Option<Arc<dyn YieldStrategy>>,
}

impl RateLimitBuilder {
    pub fn new() -> Self {
        Self { capacity: None, reset_interval: None, clock: None, yield_strategy: None }
    }

    /// Set the units granted per window
    pub fn capacity(mut self, capacity: u32) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Set the window length
    pub fn reset_interval(mut self, reset_interval: Duration) -> Self {
        self.reset_interval = Some(reset_interval);
        self
    }

    /// Set the time source, the shared monotonic clock by default
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Set how waiting callers back off, balanced spinning by default
    pub fn yield_strategy(mut self, yield_strategy: Arc<dyn YieldStrategy>) -> Self {
        self.yield_strategy = Some(yield_strategy);
        self
    }

    pub fn build(self) -> Result<RateLimit> {
        let capacity = self.capacity.ok_or(RateLimitError::InvalidConfig("capacity must be set"))?;
        let reset_interval = self.reset_interval.ok_or(RateLimitError::InvalidConfig("reset interval must be set"))?;
        if capacity == 0 {
            return Err(RateLimitError::InvalidConfig("capacity must be greater than 0"));
        }
        let reset_interval = match duration_to_nanos(reset_interval) {
            Some(0) => return Err(RateLimitError::InvalidConfig("reset interval must be at least 1ns")),
            Some(nanos) => nanos,
            None => return Err(RateLimitError::InvalidConfig("reset interval must fit in u64 nanoseconds")),
        };

        let clock = self.clock.unwrap_or_else(|| Arc::new(MonotonicClock::new()));
        let yield_strategy = self.yield_strategy.unwrap_or_else(|| Arc::new(SpinYield::default()));
        Ok(RateLimit::from_parts(capacity, reset_interval, clock, yield_strategy))
    }
}

impl Default for RateLimitBuilder {
    fn default() -> Self {
        Self::new()
    }
}
