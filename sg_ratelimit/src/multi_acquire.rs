use std::cmp::Ordering;
use std::cmp::Reverse;
use std::mem;
use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::interrupt::Interrupt;
use crate::interrupt::Interruptible;
use crate::interrupt::Uninterruptible;
use crate::interrupt::settled;
use crate::limiter::Limiter;
use crate::rate_limit::RateLimit;
use crate::slot::SlotHandle;

/// Estimated cost of taking one unit from a limiter
///
/// Orders nearer-exhaustion limits first and, among equals, the one that refills last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquireCost {
    remaining: u32,
    next_reset: u64,
}

impl AcquireCost {
    pub fn new(remaining: u32, next_reset: u64) -> Self {
        Self { remaining, next_reset }
    }

    /// Cost of `limiter` as of now
    pub fn of<L: Limiter + ?Sized>(limiter: &L) -> Self {
        limiter.cost()
    }

    fn key(&self) -> (u32, Reverse<u64>) {
        (self.remaining, Reverse(self.next_reset))
    }
}

impl Ord for AcquireCost {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl PartialOrd for AcquireCost {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Take one unit from every limiter in `limiters`
///
/// Returns one handle per limiter, in the same order, all valid at a common point after
/// acquisition. A window rolling over right after that point is the caller's race.
/// Dropping the future hands back every unit taken so far.
pub async fn acquire_all<L: Limiter + ?Sized>(limiters: &[Arc<L>]) -> Vec<SlotHandle<L>> {
    settled(coordinate(limiters, &Uninterruptible).await)
}

/// Like [`acquire_all`], but gives up when `interrupt` is raised
///
/// On interruption every unit taken so far is handed back before returning.
pub async fn acquire_all_until<L: Limiter + ?Sized>(limiters: &[Arc<L>], interrupt: &Interrupt) -> Result<Vec<SlotHandle<L>>> {
    coordinate(limiters, interrupt).await
}

/// Units a group acquisition currently holds, tagged with their caller index
///
/// Every unit still held when this is dropped goes back to its limiter.
struct HeldSlots<L: Limiter + ?Sized>(Vec<(usize, SlotHandle<L>)>);

impl<L: Limiter + ?Sized> HeldSlots<L> {
    fn with_capacity(capacity: usize) -> Self {
        Self(Vec::with_capacity(capacity))
    }

    fn all_valid(&self) -> bool {
        self.0.iter().all(|(_, slot)| slot.is_valid())
    }

    /// Hand every unit back and take the handles out for reacquisition
    fn release_all(&mut self) -> Vec<(usize, SlotHandle<L>)> {
        for (_, slot) in self.0.iter_mut() {
            slot.cancel();
        }
        mem::take(&mut self.0)
    }

    /// Keep the units and return the handles in caller order
    fn into_caller_order(mut self) -> Vec<SlotHandle<L>> {
        let mut slots = mem::take(&mut self.0);
        slots.sort_by_key(|(index, _)| *index);
        slots.into_iter().map(|(_, slot)| slot).collect()
    }
}

impl<L: Limiter + ?Sized> Drop for HeldSlots<L> {
    fn drop(&mut self) {
        if !self.0.is_empty() {
            debug!(held = self.0.len(), "Group acquisition abandoned, returning held units");
            self.release_all();
        }
    }
}

async fn coordinate<L: Limiter + ?Sized, I: Interruptible>(limiters: &[Arc<L>], interrupt: &I) -> std::result::Result<Vec<SlotHandle<L>>, I::Error> {
    match limiters {
        [] => return Ok(Vec::new()),
        [only] => {
            let generation = interrupt.acquire_from(&**only).await?;
            return Ok(vec![SlotHandle::new(Arc::clone(only), generation)]);
        }
        _ => {}
    }

    // Costliest first; the caller's slice keeps its order
    let mut order: Vec<(AcquireCost, usize)> = limiters.iter().map(|limiter| limiter.cost()).zip(0..).collect();
    order.sort();

    let mut held = HeldSlots::with_capacity(limiters.len());
    for (_, index) in order {
        let limiter = &limiters[index];
        let generation = interrupt.acquire_from(&**limiter).await?;
        held.0.push((index, SlotHandle::new(Arc::clone(limiter), generation)));
    }

    let mut round = 0u32;
    while !held.all_valid() {
        round += 1;
        debug!(round, limiters = held.0.len(), "Group acquisition invalidated, reacquiring");

        let mut costed: Vec<(AcquireCost, (usize, SlotHandle<L>))> =
            held.release_all().into_iter().map(|entry| (entry.1.limiter().cost(), entry)).collect();
        costed.sort_by(|a, b| a.0.cmp(&b.0));

        for (_, (index, mut slot)) in costed {
            slot.reacquire_with(interrupt).await?;
            held.0.push((index, slot));
        }
    }

    Ok(held.into_caller_order())
}

/// Fixed group of limiters acquired together
///
/// Some APIs enforce several limits at once, e.g. a per-second burst cap next to a
/// per-minute quota. Every acquisition takes one unit from each.
#[derive(Debug, Clone)]
pub struct MultiAcquire {
    limiters: Vec<Arc<RateLimit>>,
}

impl MultiAcquire {
    pub fn builder() -> MultiAcquireBuilder {
        MultiAcquireBuilder::new()
    }

    pub async fn acquire_all(&self) -> Vec<SlotHandle> {
        acquire_all(&self.limiters).await
    }

    pub async fn acquire_all_until(&self, interrupt: &Interrupt) -> Result<Vec<SlotHandle>> {
        acquire_all_until(&self.limiters, interrupt).await
    }

    /// Fewest units left across the group
    pub fn remaining(&self) -> u32 {
        self.limiters.iter().map(|l| l.remaining()).min().unwrap_or(u32::MAX)
    }

    /// Smallest capacity across the group
    pub fn capacity(&self) -> u32 {
        self.limiters.iter().map(|l| l.capacity()).min().unwrap_or(u32::MAX)
    }

    pub fn limiters(&self) -> &[Arc<RateLimit>] {
        &self.limiters
    }
}

/// Builder for a limiter group
pub struct MultiAcquireBuilder {
    limiters: Vec<Arc<RateLimit>>,
}

impl MultiAcquireBuilder {
    pub fn new() -> Self {
        Self { limiters: Vec::new() }
    }

    pub fn with_limit(mut self, limiter: RateLimit) -> Self {
        self.limiters.push(Arc::new(limiter));
        self
    }

    /// Add a limiter that is shared with other groups
    pub fn with_limit_arc(mut self, limiter: Arc<RateLimit>) -> Self {
        self.limiters.push(limiter);
        self
    }

    pub fn build(self) -> MultiAcquire {
        MultiAcquire { limiters: self.limiters }
    }
}

impl Default for MultiAcquireBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use proptest::prelude::*;

    use super::*;
    use crate::RateLimitError;
    use crate::time::ManualClock;
    use crate::time::millis_to_nanos;

    fn limit_on(clock: &Arc<ManualClock>, capacity: u32, interval: Duration) -> Arc<RateLimit> {
        Arc::new(RateLimit::builder().capacity(capacity).reset_interval(interval).clock(clock.clone()).build().unwrap())
    }

    #[tokio::test]
    async fn test_empty_group() {
        assert!(acquire_all::<RateLimit>(&[]).await.is_empty());
        let group = MultiAcquire::builder().build();
        assert_eq!(group.remaining(), u32::MAX);
        assert_eq!(group.capacity(), u32::MAX);
    }

    #[tokio::test]
    async fn test_single_limiter_skips_validation() {
        let clock = Arc::new(ManualClock::new(0));
        let a = limit_on(&clock, 2, Duration::from_secs(1));

        let slots = acquire_all(std::slice::from_ref(&a)).await;
        assert_eq!(slots.len(), 1);
        assert!(Arc::ptr_eq(slots[0].limiter(), &a));
        assert_eq!(a.remaining(), 1);
    }

    #[tokio::test]
    async fn test_handles_follow_caller_order() {
        let clock = Arc::new(ManualClock::new(0));
        let roomy = limit_on(&clock, 10, Duration::from_secs(1));
        let tight = limit_on(&clock, 1, Duration::from_secs(1));
        let limiters = vec![Arc::clone(&roomy), Arc::clone(&tight)];

        let slots = acquire_all(&limiters).await;
        assert!(Arc::ptr_eq(slots[0].limiter(), &roomy));
        assert!(Arc::ptr_eq(slots[1].limiter(), &tight));
        assert!(slots.iter().all(SlotHandle::is_valid));
        assert_eq!(roomy.remaining(), 9);
        assert_eq!(tight.remaining(), 0);
        assert!(Arc::ptr_eq(&limiters[0], &roomy));
    }

    #[tokio::test]
    async fn test_exhausted_group_waits_for_slowest() {
        let clock = Arc::new(ManualClock::new(0));
        let fast = limit_on(&clock, 1, Duration::from_millis(250));
        let slow = limit_on(&clock, 1, Duration::from_millis(500));
        let _ = fast.acquire_slot().await;
        let _ = slow.acquire_slot().await;

        let group = {
            let limiters = vec![Arc::clone(&fast), Arc::clone(&slow)];
            tokio::spawn(async move { acquire_all(&limiters).await })
        };

        // The slow limiter is taken first and parks the group on its window
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
        assert!(!group.is_finished());
        clock.set(millis_to_nanos(500));

        let slots = group.await.unwrap();
        assert!(slots.iter().all(SlotHandle::is_valid));
        assert_eq!(slots[0].generation(), 2);
        assert_eq!(slots[1].generation(), 1);
        assert_eq!(fast.remaining(), 0);
        assert_eq!(slow.remaining(), 0);
    }

    #[tokio::test]
    async fn test_invalidated_group_is_reacquired() {
        let clock = Arc::new(ManualClock::new(0));
        let early = limit_on(&clock, 1, Duration::from_millis(100));
        let late = limit_on(&clock, 1, Duration::from_millis(1_000));
        let _ = early.acquire_slot().await;

        // `early` is exhausted and sorts first; `late` still has its unit
        let group = {
            let limiters = vec![Arc::clone(&early), Arc::clone(&late)];
            tokio::spawn(async move { acquire_all(&limiters).await })
        };
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }

        // Another consumer drains `late` while the group waits on `early`
        assert_eq!(late.acquire_slot().await, 0);
        clock.set(millis_to_nanos(100));
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
        assert_eq!(early.remaining(), 0);
        assert!(!group.is_finished());

        // By the time `late` refills, the unit taken from `early` has expired
        clock.set(millis_to_nanos(1_000));
        let slots = group.await.unwrap();

        assert!(slots.iter().all(SlotHandle::is_valid));
        assert_eq!(slots[0].generation(), 10);
        assert_eq!(slots[1].generation(), 1);
        assert_eq!(early.remaining(), 0);
        assert_eq!(late.remaining(), 0);
    }

    #[tokio::test]
    async fn test_interrupt_before_any_grant() {
        let clock = Arc::new(ManualClock::new(0));
        let roomy = limit_on(&clock, 5, Duration::from_secs(10));
        let blocked = limit_on(&clock, 1, Duration::from_secs(10));
        let _ = blocked.acquire_slot().await;

        let interrupt = Interrupt::new();
        let group = {
            let limiters = vec![Arc::clone(&roomy), Arc::clone(&blocked)];
            let interrupt = interrupt.clone();
            tokio::spawn(async move { acquire_all_until(&limiters, &interrupt).await })
        };

        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
        interrupt.raise();

        assert_eq!(group.await.unwrap().unwrap_err(), RateLimitError::Interrupted);
        assert_eq!(roomy.remaining(), 5);
        assert_eq!(blocked.remaining(), 0);
    }

    #[tokio::test]
    async fn test_interrupt_after_partial_grant_returns_units() {
        let clock = Arc::new(ManualClock::new(0));
        let first = limit_on(&clock, 1, Duration::from_millis(100));
        let second = limit_on(&clock, 1, Duration::from_secs(10));
        let _ = first.acquire_slot().await;
        let interrupt = Interrupt::new();

        let group = {
            let limiters = vec![Arc::clone(&second), Arc::clone(&first)];
            let interrupt = interrupt.clone();
            tokio::spawn(async move { acquire_all_until(&limiters, &interrupt).await })
        };
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }

        // Drain `second` behind the group's back, then let `first` refill
        assert_eq!(second.acquire_slot().await, 0);
        clock.set(millis_to_nanos(100));
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
        assert_eq!(first.remaining(), 0);

        interrupt.raise();
        assert_eq!(group.await.unwrap().unwrap_err(), RateLimitError::Interrupted);
        assert_eq!(first.remaining(), 1);
        assert_eq!(second.remaining(), 0);
    }

    #[tokio::test]
    async fn test_aborted_group_returns_units() {
        let clock = Arc::new(ManualClock::new(0));
        let first = limit_on(&clock, 1, Duration::from_millis(100));
        let second = limit_on(&clock, 1, Duration::from_secs(10));
        let _ = first.acquire_slot().await;

        let group = {
            let limiters = vec![Arc::clone(&first), Arc::clone(&second)];
            tokio::spawn(async move { acquire_all(&limiters).await })
        };
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }

        // The group takes `first` once it refills, then parks on the drained `second`
        assert_eq!(second.acquire_slot().await, 0);
        clock.set(millis_to_nanos(100));
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
        assert_eq!(first.remaining(), 0);
        assert!(!group.is_finished());

        group.abort();
        assert!(group.await.unwrap_err().is_cancelled());
        assert_eq!(first.remaining(), 1);
        assert_eq!(second.remaining(), 0);
    }

    #[tokio::test]
    async fn test_timed_out_rate_limited_returns_units() {
        let clock = Arc::new(ManualClock::new(0));
        let first = limit_on(&clock, 1, Duration::from_millis(100));
        let second = limit_on(&clock, 1, Duration::from_secs(10));
        let _ = first.acquire_slot().await;
        let gated = Arc::new(crate::RateLimited::new((), vec![Arc::clone(&first), Arc::clone(&second)]));

        let waiter = {
            let gated = Arc::clone(&gated);
            tokio::spawn(async move { tokio::time::timeout(Duration::from_millis(200), gated.acquire()).await.is_err() })
        };
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
        assert_eq!(second.acquire_slot().await, 0);
        clock.set(millis_to_nanos(100));

        assert!(waiter.await.unwrap());
        assert_eq!(first.remaining(), 1);
        assert_eq!(second.remaining(), 0);
    }

    #[tokio::test]
    async fn test_multi_acquire_group() {
        let clock = Arc::new(ManualClock::new(0));
        let group = MultiAcquire::builder()
            .with_limit(RateLimit::builder().capacity(20).reset_interval(Duration::from_secs(60)).clock(clock.clone()).build().unwrap())
            .with_limit_arc(limit_on(&clock, 10, Duration::from_secs(1)))
            .build();

        assert_eq!(group.remaining(), 10);
        assert_eq!(group.capacity(), 10);

        for _ in 0..5 {
            assert_eq!(group.acquire_all().await.len(), 2);
        }
        assert_eq!(group.remaining(), 5);
        assert_eq!(group.limiters()[0].remaining(), 15);
    }

    #[test]
    fn test_cost_prefers_exhausted_then_slower() {
        let exhausted = AcquireCost { remaining: 0, next_reset: 100 };
        let roomy = AcquireCost { remaining: 4, next_reset: 900 };
        let slow = AcquireCost { remaining: 0, next_reset: 500 };

        let mut costs = vec![roomy, exhausted, slow];
        costs.sort();
        assert_eq!(costs, vec![slow, exhausted, roomy]);
    }

    proptest! {
        #[test]
        fn prop_cost_order_is_total(a in (0u32..8, 0u64..1_000), b in (0u32..8, 0u64..1_000)) {
            let a = AcquireCost { remaining: a.0, next_reset: a.1 };
            let b = AcquireCost { remaining: b.0, next_reset: b.1 };

            prop_assert_eq!(a.cmp(&b), b.cmp(&a).reverse());
            if a.remaining < b.remaining {
                prop_assert_eq!(a.cmp(&b), Ordering::Less);
            }
            if a.remaining == b.remaining && a.next_reset > b.next_reset {
                prop_assert_eq!(a.cmp(&b), Ordering::Less);
            }
        }
    }
}
