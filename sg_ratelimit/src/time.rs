use std::fmt;
use std::sync::OnceLock;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

/// Process-wide anchor so that timestamps of independent limiters are comparable
static ANCHOR: OnceLock<Instant> = OnceLock::new();

/// Monotonic time source for rate limits
///
/// Timestamps are nanosecond deltas from an arbitrary fixed point and must never be
/// interpreted as wall-clock time.
pub trait Clock: Send + Sync {
    /// Current time in nanoseconds
    fn now_nanos(&self) -> u64;
}

/// Clock backed by `Instant`, shared by every limiter in the process
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl MonotonicClock {
    pub fn new() -> Self {
        Self
    }
}

impl Clock for MonotonicClock {
    #[inline(always)]
    fn now_nanos(&self) -> u64 {
        duration_to_nanos(ANCHOR.get_or_init(Instant::now).elapsed()).unwrap_or(u64::MAX)
    }
}

/// Clock that only moves when told to
///
/// Used to drive window rollovers deterministically.
#[derive(Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    pub fn new(start_nanos: u64) -> Self {
        Self { nanos: AtomicU64::new(start_nanos) }
    }

    /// Move the clock forward, stopping at the end of the range
    pub fn advance(&self, by: Duration) {
        let by = duration_to_nanos(by).unwrap_or(u64::MAX);
        let _ = self.nanos.fetch_update(Ordering::AcqRel, Ordering::Acquire, |nanos| Some(nanos.saturating_add(by)));
    }

    /// Jump to an absolute timestamp; moving backwards is ignored
    pub fn set(&self, nanos: u64) {
        self.nanos.fetch_max(nanos, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    #[inline(always)]
    fn now_nanos(&self) -> u64 {
        self.nanos.load(Ordering::Acquire)
    }
}

impl fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualClock").field("nanos", &self.now_nanos()).finish()
    }
}

/// Convert milliseconds to nanoseconds
#[inline(always)]
#[allow(dead_code)]
pub(crate) const fn millis_to_nanos(millis: u64) -> u64 {
    millis * 1_000_000
}

/// Convert duration to nanoseconds, `None` past roughly 584 years
#[inline(always)]
pub(crate) fn duration_to_nanos(duration: Duration) -> Option<u64> {
    u64::try_from(duration.as_nanos()).ok()
}
