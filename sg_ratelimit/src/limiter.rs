use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::error::Result;
use crate::interrupt::Interrupt;
use crate::multi_acquire::AcquireCost;

/// Future returned by the acquisition methods of a [`Limiter`]
pub type SlotFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Windowed limiter that hands out units tagged with the window they came from
///
/// [`SlotHandle`](crate::SlotHandle) and group acquisition only talk to limiters
/// through this trait, so anything that keeps generation-tagged windows can take part
/// in [`acquire_all`](crate::acquire_all) next to a [`RateLimit`](crate::RateLimit).
pub trait Limiter: Send + Sync {
    /// Wait for a unit and return the generation it was granted from
    fn acquire_slot(&self) -> SlotFuture<'_, u64>;

    /// Wait for a unit unless `interrupt` is raised first
    fn acquire_slot_until<'a>(&'a self, interrupt: &'a Interrupt) -> SlotFuture<'a, Result<u64>>;

    /// Return a unit granted from `generation`, if that window is still current
    fn cancel_slot(&self, generation: u64) -> bool;

    /// Units left in the current window
    fn remaining(&self) -> u32;

    /// Deadline of the current window, in clock nanoseconds
    fn next_reset(&self) -> u64;

    /// Identifier of the current window
    fn generation(&self) -> u64;

    fn reset_interval(&self) -> Duration;

    fn capacity(&self) -> u32;

    /// Cost of taking a unit right now
    ///
    /// The default reads `remaining` and `next_reset` separately; implementations that
    /// can read both from one snapshot should.
    fn cost(&self) -> AcquireCost {
        AcquireCost::new(self.remaining(), self.next_reset())
    }
}
