use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::interrupt::Interrupt;
use crate::interrupt::Interruptible;
use crate::interrupt::Uninterruptible;
use crate::interrupt::settled;
use crate::limiter::Limiter;
use crate::rate_limit::RateLimit;

/// One unit granted by a limiter in a given generation
///
/// Dropping a handle does not give the unit back; use [`SlotHandle::cancel`].
pub struct SlotHandle<L: Limiter + ?Sized = RateLimit> {
    limiter: Arc<L>,
    generation: u64,
}

impl<L: Limiter + ?Sized> SlotHandle<L> {
    /// Wrap a unit already granted by `limiter` from `generation`
    pub fn new(limiter: Arc<L>, generation: u64) -> Self {
        Self { limiter, generation }
    }

    /// Try to return the unit to its limiter
    ///
    /// The recorded generation is stepped back whether or not the unit could be
    /// returned, so the handle can no longer pass [`is_valid`](Self::is_valid) until it
    /// is reacquired.
    pub fn cancel(&mut self) -> bool {
        let returned = self.limiter.cancel_slot(self.generation);
        self.generation = self.generation.wrapping_sub(1);
        returned
    }

    /// Whether the limiter is still in the generation this unit was granted from
    pub fn is_valid(&self) -> bool {
        self.limiter.generation() == self.generation
    }

    /// Wait for a fresh unit from the same limiter
    pub async fn reacquire(&mut self) {
        settled(self.reacquire_with(&Uninterruptible).await)
    }

    /// Like [`reacquire`](Self::reacquire), but gives up when `interrupt` is raised
    pub async fn reacquire_until(&mut self, interrupt: &Interrupt) -> Result<()> {
        self.reacquire_with(interrupt).await
    }

    pub(crate) async fn reacquire_with<I: Interruptible>(&mut self, interrupt: &I) -> std::result::Result<(), I::Error> {
        self.generation = interrupt.acquire_from(&*self.limiter).await?;
        Ok(())
    }

    /// Limiter the unit was granted by
    pub fn limiter(&self) -> &Arc<L> {
        &self.limiter
    }

    /// Generation the unit was granted from
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl<L: Limiter + ?Sized> Clone for SlotHandle<L> {
    fn clone(&self) -> Self {
        Self { limiter: Arc::clone(&self.limiter), generation: self.generation }
    }
}

impl<L: Limiter + ?Sized> fmt::Debug for SlotHandle<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotHandle")
            .field("capacity", &self.limiter.capacity())
            .field("reset_interval", &self.limiter.reset_interval())
            .field("generation", &self.generation)
            .finish()
    }
}
