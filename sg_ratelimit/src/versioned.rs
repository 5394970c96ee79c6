use std::sync::atomic::Ordering;

use crossbeam_epoch::Atomic;
use crossbeam_epoch::Guard;
use crossbeam_epoch::Owned;
use crossbeam_epoch::Shared;

/// Immutable `(value, stamp)` pair; a new one is allocated for every transition
struct Stamped<T> {
    value: T,
    stamp: u64,
}

/// Atomically swappable `(snapshot, stamp)` pair
///
/// Every successful swap installs a freshly allocated pair whose stamp is one past the
/// replaced pair's. Comparing the pair pointer therefore compares value and stamp at
/// once, and two transitions that yield bit-identical snapshots still differ. Retired
/// pairs are reclaimed through epochs, so a pointer cannot be recycled while any
/// reader still holds a guard on it.
pub(crate) struct VersionedCell<T> {
    current: Atomic<Stamped<T>>,
}

/// A pair observed under a pinned guard
pub(crate) struct Versioned<'g, T> {
    shared: Shared<'g, Stamped<T>>,
    stamped: &'g Stamped<T>,
}

impl<'g, T> Versioned<'g, T> {
    #[inline(always)]
    pub fn value(&self) -> &'g T {
        &self.stamped.value
    }

    #[inline(always)]
    pub fn stamp(&self) -> u64 {
        self.stamped.stamp
    }
}

impl<T> Clone for Versioned<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Versioned<'_, T> {}

impl<T: Send + Sync + 'static> VersionedCell<T> {
    pub fn new(initial: T) -> Self {
        Self { current: Atomic::new(Stamped { value: initial, stamp: 0 }) }
    }

    #[inline(always)]
    pub fn load<'g>(&self, guard: &'g Guard) -> Versioned<'g, T> {
        let shared = self.current.load(Ordering::Acquire, guard);
        // SAFETY: the cell is never null and `guard` keeps the pair alive for 'g.
        let stamped = unsafe { shared.deref() };
        Versioned { shared, stamped }
    }

    /// Replace `expected` with `next`, bumping the stamp, if nothing else swapped in between
    #[inline]
    pub fn compare_and_set(&self, expected: Versioned<'_, T>, next: T, guard: &Guard) -> bool {
        let replacement = Owned::new(Stamped { value: next, stamp: expected.stamp().wrapping_add(1) });
        match self.current.compare_exchange(expected.shared, replacement, Ordering::AcqRel, Ordering::Acquire, guard) {
            Ok(_) => {
                // SAFETY: the old pair is unlinked; readers pinned before this point keep it alive.
                unsafe { guard.defer_destroy(expected.shared) };
                true
            }
            Err(_) => false,
        }
    }
}

impl<T> Drop for VersionedCell<T> {
    fn drop(&mut self) {
        // SAFETY: `&mut self` means no other thread can still observe the current pair.
        unsafe {
            let current = self.current.load(Ordering::Relaxed, crossbeam_epoch::unprotected());
            drop(current.into_owned());
        }
    }
}
