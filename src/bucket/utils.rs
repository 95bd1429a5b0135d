//! # Utility Functions (utils.rs)
//!
//! The monotonic clock and spin helpers backing the pacer.
//!
//! ## The clock
//!
//! Pacing arithmetic needs a timestamp that only ever moves forward: a
//! wall-clock source that steps backward (NTP correction, manual adjust)
//! would refill the bucket with negative elapsed time. The clock here is
//! anchored to a process-wide [`Instant`] captured on first use, and every
//! reading is the microseconds elapsed since that anchor.
//!
//! ```text
//!     process start ──► first call: anchor = Instant::now()
//!                              │
//!     monotonic_us() ──────────┴──► anchor.elapsed().as_micros()
//! ```
//!
//! Absolute wall-clock time never enters the picture; two readings can only
//! compare against each other, which is all the bucket needs.

use std::sync::OnceLock;
use std::time::Instant;

// Anchor for the monotonic clock, captured on first use.
static CLOCK_ANCHOR: OnceLock<Instant> = OnceLock::new();

/// Returns monotonic microseconds since the first call in this process.
///
/// Microsecond resolution is what the refill arithmetic is written
/// against; the value never decreases across calls.
///
/// # Example
///
/// ```rust
/// use pacer::monotonic_us;
///
/// let t0 = monotonic_us();
/// let t1 = monotonic_us();
/// assert!(t1 >= t0);
/// ```
#[inline(always)]
pub fn monotonic_us() -> u64 {
    CLOCK_ANCHOR.get_or_init(Instant::now).elapsed().as_micros() as u64
}

/// Returns monotonic milliseconds since the first call in this process.
///
/// Coarser reading of the same anchor, used for idle-channel tracking
/// where millisecond granularity is plenty.
#[inline(always)]
pub fn monotonic_ms() -> u64 {
    CLOCK_ANCHOR.get_or_init(Instant::now).elapsed().as_millis() as u64
}

/// CPU-specific relaxation hint for spin loops.
///
/// Tells the CPU the caller is spinning so it can back off speculative
/// execution and share resources with the sibling hyperthread.
///
/// - **x86_64**: PAUSE instruction
/// - **ARM64**: YIELD via the standard spin-loop hint
/// - **Others**: standard spin-loop hint
#[inline(always)]
pub fn cpu_relax() {
    #[cfg(target_arch = "x86_64")]
    {
        #[cfg(any(target_feature = "sse2", target_feature = "sse"))]
        unsafe {
            std::arch::x86_64::_mm_pause();
        }
        #[cfg(not(any(target_feature = "sse2", target_feature = "sse")))]
        {
            std::hint::spin_loop();
        }
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        std::hint::spin_loop();
    }
}

/// Escalating backoff for spin-wait loops.
///
/// Early iterations spin with [`cpu_relax`]; once the step count passes 4
/// the caller is yielded to the OS scheduler instead. Used by the deficit
/// catch-up wait in the pacer core, which resamples the clock between
/// iterations.
///
/// ```text
///     Iteration 1: spin 1×
///     Iteration 2: spin 2×
///     Iteration 3: spin 4×
///     Iteration 4: spin 8×
///     Iteration 5+: thread::yield_now()
/// ```
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    /// Current backoff step (increases with each retry)
    step: u32,
    /// Maximum step the counter saturates at
    max_step: u32,
}

impl Backoff {
    /// Creates a new backoff helper saturating at `max_step`.
    pub fn new(max_step: u32) -> Self {
        Self { step: 0, max_step }
    }

    /// Performs one backoff step with increasing delay.
    #[inline]
    pub fn backoff(&mut self) {
        if self.step < 4 {
            for _ in 0..(1u32 << self.step) {
                cpu_relax();
            }
        } else {
            std::thread::yield_now();
        }
        self.step = (self.step + 1).min(self.max_step);
    }

    /// Resets the backoff counter to start over.
    #[inline]
    pub fn reset(&mut self) {
        self.step = 0;
    }

    /// Whether the counter has saturated at its maximum step.
    #[inline]
    pub fn is_at_max(&self) -> bool {
        self.step >= self.max_step
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_us() {
        let t0 = monotonic_us();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let t1 = monotonic_us();

        assert!(t1 > t0);
        // 5ms sleep should register as at least 4000us of elapsed time
        assert!(t1 - t0 >= 4_000);
    }

    #[test]
    fn test_monotonic_ms_tracks_us() {
        let ms = monotonic_ms();
        let us = monotonic_us();

        // Both readings come off the same anchor
        assert!(us / 1000 >= ms);
    }

    #[test]
    fn test_monotonicity() {
        let mut last = 0;
        for _ in 0..100 {
            let now = monotonic_us();
            assert!(now >= last);
            last = now;
        }
    }

    #[test]
    fn test_cpu_relax() {
        // Just ensure it doesn't panic
        for _ in 0..100 {
            cpu_relax();
        }
    }

    #[test]
    fn test_backoff() {
        let mut backoff = Backoff::new(5);

        assert!(!backoff.is_at_max());

        for _ in 0..5 {
            backoff.backoff();
        }

        assert!(backoff.is_at_max());

        backoff.reset();
        assert!(!backoff.is_at_max());
    }

    #[test]
    fn test_backoff_saturates() {
        let mut backoff = Backoff::new(3);

        backoff.backoff();
        backoff.backoff();
        backoff.backoff();
        assert!(backoff.is_at_max());

        // Should stay at max
        backoff.backoff();
        assert!(backoff.is_at_max());
    }
}
