//! # Core Pacer Implementation
//!
//! The leaky bucket that bounds how fast a sender may put bytes on the
//! wire. One instance regulates one outgoing channel; the transmit path
//! asks it for admission immediately before each packet goes out.
//!
//! ## The leaky bucket
//!
//! ```text
//!     refill ──► credit accrues with elapsed time, capped at the quantum
//!
//!     ┌────────────────────┐ ◄── refill_quantum (cap)
//!     │ ░░░░░░░░░░░░       │ ◄── level (signed: may go negative)
//!     └────────────────────┘
//!              │
//!     check() ─┴─► debit header_overhead + data_size
//!                  │
//!                  ├── level stays ≥ 0 ──► admitted
//!                  ├── would go < 0, non-blocking ──► rejected, no commit
//!                  └── goes < 0, blocking ──► spin until credit repays
//!                                             the deficit, then admitted
//! ```
//!
//! ## Locking
//!
//! The two mutable fields (bucket level and last-check timestamp) live
//! behind a single [`parking_lot::Mutex`]; every read or write of them
//! holds that lock. There is no lock-free path for an enabled pacer; the
//! only lock-free case is a disabled one, whose configuration is immutable.
//! A blocking caller in deficit keeps the lock for the whole catch-up
//! wait, so concurrent `check` calls serialize behind it.
//!
//! Metric counters sit outside the lock as relaxed atomics; they observe
//! the bucket, they are not part of it.

use super::{
    config::{PacerConfig, RefillGranularity},
    metrics::PacerMetrics,
    utils::{monotonic_ms, monotonic_us, Backoff},
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Minimum interval between last-access timestamp updates (milliseconds).
///
/// The timestamp only feeds idle-channel cleanup, so 100ms granularity is
/// plenty and keeps the hot path from hammering the atomic.
const LAST_ACCESS_UPDATE_INTERVAL_MS: u64 = 100;

/// Backoff saturation for the deficit catch-up spin.
///
/// The first four iterations spin on `cpu_relax`; beyond that every
/// iteration yields to the scheduler, matching a plain yield loop for
/// long deficits.
const DEFICIT_BACKOFF_MAX_STEP: u32 = 8;

/// Mutex-guarded mutable state of the bucket.
struct BucketState {
    /// Current credit in bytes. Signed: a blocking admission may drive it
    /// negative, a deficit repaid by waiting.
    level: i64,
    /// Monotonic microsecond timestamp of the last committed check.
    last_check_us: u64,
}

/// Leaky-bucket byte pacer for one outgoing channel.
///
/// A `Pacer` bounds the rate at which its channel may transmit bytes,
/// protocol framing included. The transmit path calls [`check`] right
/// before sending each unit; [`remaining`] gives schedulers an advisory
/// hint of how long until the next admission is likely to succeed.
///
/// Constructed with a rate of zero, the pacer is permanently disabled:
/// every check passes immediately and nothing is locked.
///
/// ## Thread safety
///
/// All operations are safe to call from multiple threads; the mutable
/// bucket state is serialized by an internal mutex. Share across threads
/// with `Arc` (see [`SharedPacer`](crate::SharedPacer)). Dropping the
/// pacer releases the lock with it; ownership rules guarantee no check
/// can still be in flight at that point.
///
/// ## Example
///
/// ```rust
/// use pacer::Pacer;
///
/// // 100 KB/s ceiling, 28 bytes of framing per packet, 1500-byte MTU
/// let pacer = Pacer::new(100_000, 28, 1500);
///
/// if pacer.check(1400, true) {
///     // put the packet on the wire
/// } else {
///     // bucket exhausted: requeue and try later
///     let hint = pacer.remaining(1400);
///     println!("retry in roughly {:?}", hint);
/// }
/// ```
///
/// [`check`]: Pacer::check
/// [`remaining`]: Pacer::remaining
pub struct Pacer {
    // Immutable configuration, fixed at construction

    /// Bandwidth ceiling in bytes per second; 0 = disabled.
    rate_bytes_per_sec: u32,

    /// Framing bytes debited on top of every payload.
    header_overhead: u32,

    /// Refill clock, decided once from rate and max unit.
    granularity: RefillGranularity,

    /// Per-period refill amount and cap on the level.
    refill_quantum: u32,

    // Mutable bucket state, all access under the lock

    state: Mutex<BucketState>,

    // Observability, outside the lock

    /// Monotonic milliseconds of the last admission attempt.
    /// Feeds idle-channel cleanup, not the pacing math.
    pub(crate) last_access_ms: AtomicU64,

    /// Checks that were admitted (immediately or after a deficit wait).
    total_admitted: AtomicU64,

    /// Non-blocking checks that were rejected.
    total_rejected: AtomicU64,

    /// Blocking checks that had to wait out a deficit.
    total_deficit_waits: AtomicU64,

    /// Bytes admitted onto the wire, framing included.
    bytes_admitted: AtomicU64,

    /// Rejections since the last admission. High values mean the channel
    /// is pushing well past its ceiling.
    consecutive_rejections: AtomicU32,

    /// Longest deficit wait observed, in nanoseconds.
    max_deficit_wait_ns: AtomicU64,
}

impl Pacer {
    /// Creates a pacer from the three raw parameters.
    ///
    /// `rate_bytes_per_sec` of zero disables pacing permanently.
    /// `max_unit` is consulted once to pick the refill granularity and
    /// not stored.
    ///
    /// # Panics
    ///
    /// Panics if the parameters are invalid (see
    /// [`PacerConfig::validate`]): an enabled rate below `max_unit` is a
    /// caller bug, not a runtime condition.
    ///
    /// # Example
    ///
    /// ```rust
    /// use pacer::Pacer;
    ///
    /// let pacer = Pacer::new(64 * 1024, 28, 1500);
    /// assert!(!pacer.is_disabled());
    /// ```
    #[inline]
    pub fn new(rate_bytes_per_sec: u32, header_overhead: u32, max_unit: u32) -> Self {
        Self::with_config(PacerConfig::new(rate_bytes_per_sec, header_overhead, max_unit))
    }

    /// Creates a pacer from a [`PacerConfig`].
    ///
    /// # Panics
    ///
    /// Panics if `config.validate()` fails. Use
    /// [`PacerBuilder::try_build`](crate::PacerBuilder::try_build) for a
    /// non-panicking construction path.
    pub fn with_config(config: PacerConfig) -> Self {
        config.validate().expect("invalid pacer configuration");

        let quantum = config.refill_quantum();
        let now_us = monotonic_us();

        Self {
            rate_bytes_per_sec: config.rate_bytes_per_sec,
            header_overhead: config.header_overhead,
            granularity: config.granularity(),
            refill_quantum: quantum,
            // Bucket starts pre-filled to its quantum
            state: Mutex::new(BucketState {
                level: i64::from(quantum),
                last_check_us: now_us,
            }),
            last_access_ms: AtomicU64::new(monotonic_ms()),
            total_admitted: AtomicU64::new(0),
            total_rejected: AtomicU64::new(0),
            total_deficit_waits: AtomicU64::new(0),
            bytes_admitted: AtomicU64::new(0),
            consecutive_rejections: AtomicU32::new(0),
            max_deficit_wait_ns: AtomicU64::new(0),
        }
    }

    /// Asks for admission to transmit `data_size` payload bytes.
    ///
    /// The debit charged against the bucket is `header_overhead +
    /// data_size`. Three outcomes:
    ///
    /// - **Admitted immediately**: the refilled bucket covered the debit
    ///   (or the pacer is disabled). Returns `true`.
    /// - **Rejected** (`nonblocking = true` only): the debit would drive
    ///   the level negative. Nothing is committed (level and timestamp
    ///   are exactly as before the call) and `false` is returned. The
    ///   caller defers or requeues the packet; rejection is a normal
    ///   outcome, not an error.
    /// - **Admitted after waiting** (`nonblocking = false`): the debit is
    ///   committed, the level goes negative, and the call busy-waits,
    ///   resampling the clock each iteration with the lock held, until credit
    ///   earned at the full per-second rate repays the deficit. Always
    ///   returns `true`. There is no timeout.
    ///
    /// # Panics
    ///
    /// Panics if `data_size` is zero (caller bug).
    ///
    /// # Example
    ///
    /// ```rust
    /// use pacer::Pacer;
    ///
    /// let pacer = Pacer::new(1000, 0, 100);
    ///
    /// assert!(pacer.check(400, true));   // bucket starts with 1000 bytes
    /// assert!(!pacer.check(700, true));  // 600 left: rejected, no commit
    /// assert!(pacer.check(600, true));   // the rejected call changed nothing
    /// ```
    pub fn check(&self, data_size: u32, nonblocking: bool) -> bool {
        assert!(data_size > 0, "data_size must be greater than 0");

        // Disabled pacers never throttle and keep no state
        if self.rate_bytes_per_sec == 0 {
            return true;
        }

        self.touch();

        let cost = i64::from(self.header_overhead) + i64::from(data_size);

        let mut state = self.state.lock();
        let now_us = monotonic_us();
        let elapsed_us = now_us.saturating_sub(state.last_check_us);

        let new_level = self.refilled_level(state.level, elapsed_us) - cost;

        if nonblocking && new_level < 0 {
            // Reject without committing: the next caller sees the bucket
            // exactly as this one found it.
            drop(state);
            self.on_rejection();
            return false;
        }

        state.level = new_level;
        state.last_check_us = now_us;

        if state.level < 0 {
            self.repay_deficit(&mut state);
        }

        drop(state);
        self.on_admission(cost as u64);
        true
    }

    /// Advisory estimate of how long until a `packet_len`-byte admission
    /// is likely to succeed.
    ///
    /// Read-only: nothing is debited or committed, so this is safe to
    /// call at high frequency as a scheduling probe. Returns
    /// [`Duration::ZERO`] when the packet would be admitted now (or the
    /// pacer is disabled). The non-zero estimate is a rough hint, not a
    /// deadline.
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::time::Duration;
    /// use pacer::Pacer;
    ///
    /// let pacer = Pacer::new(1000, 0, 100);
    /// assert_eq!(pacer.remaining(500), Duration::ZERO);
    /// ```
    pub fn remaining(&self, packet_len: usize) -> Duration {
        if self.rate_bytes_per_sec == 0 {
            return Duration::ZERO;
        }

        let state = self.state.lock();
        let now_us = monotonic_us();
        let elapsed_us = now_us.saturating_sub(state.last_check_us);
        let earned = i64::from(self.rate_bytes_per_sec)
            .saturating_mul(elapsed_us as i64)
            / 1_000_000;
        let hypothetical =
            state.level + earned - i64::try_from(packet_len).unwrap_or(i64::MAX);
        drop(state);

        if hypothetical >= 0 {
            Duration::ZERO
        } else {
            Duration::from_micros(u64::from(self.rate_bytes_per_sec) / (-hypothetical) as u64)
        }
    }

    /// Computes the refilled level for `elapsed_us` of elapsed time,
    /// without committing it.
    ///
    /// Elapsed time beyond one full refill period saturates the level at
    /// the quantum; idle time never banks more than one period of credit.
    /// Within a period, credit accrues proportionally and is clamped to
    /// the quantum.
    #[inline]
    fn refilled_level(&self, level: i64, elapsed_us: u64) -> i64 {
        let quantum = i64::from(self.refill_quantum);
        let period_us = self.granularity.period_us();

        if elapsed_us > period_us {
            quantum
        } else {
            let earned = quantum.saturating_mul(elapsed_us as i64) / period_us as i64;
            (level + earned).min(quantum)
        }
    }

    /// Busy-waits until credit earned at the full per-second rate repays
    /// the committed deficit, then folds that credit in.
    ///
    /// Resamples the monotonic clock every iteration rather than
    /// computing a sleep target up front; the lock stays held throughout,
    /// so other callers queue behind the wait. Earned credit is always
    /// computed at the per-second rate, in per-millisecond mode too.
    fn repay_deficit(&self, state: &mut BucketState) {
        self.total_deficit_waits.fetch_add(1, Ordering::Relaxed);
        debug!("bucket {} bytes in deficit, waiting for credit", -state.level);

        let wait_start = Instant::now();
        let mut backoff = Backoff::new(DEFICIT_BACKOFF_MAX_STEP);

        loop {
            backoff.backoff();

            let now_us = monotonic_us();
            let elapsed_us = now_us.saturating_sub(state.last_check_us);
            let earned = i64::from(self.rate_bytes_per_sec)
                .saturating_mul(elapsed_us as i64)
                / 1_000_000;

            if earned + state.level >= 0 {
                state.level += earned;
                state.last_check_us = now_us;
                break;
            }
        }

        self.record_deficit_wait(wait_start.elapsed().as_nanos() as u64);
    }

    /// Records an admission for the metrics counters.
    #[inline]
    fn on_admission(&self, cost: u64) {
        self.total_admitted.fetch_add(1, Ordering::Relaxed);
        self.bytes_admitted.fetch_add(cost, Ordering::Relaxed);

        // Only clear the streak when it's actually non-zero, sparing the
        // write on the common path
        if self.consecutive_rejections.load(Ordering::Relaxed) > 0 {
            self.consecutive_rejections.store(0, Ordering::Relaxed);
        }
    }

    /// Records a non-blocking rejection for the metrics counters.
    #[inline]
    fn on_rejection(&self) {
        self.total_rejected.fetch_add(1, Ordering::Relaxed);
        self.consecutive_rejections.fetch_add(1, Ordering::Relaxed);
    }

    /// Folds a deficit wait duration into the high-water mark.
    #[inline]
    fn record_deficit_wait(&self, wait_ns: u64) {
        self.max_deficit_wait_ns.fetch_max(wait_ns, Ordering::Relaxed);
    }

    /// Updates the last-access timestamp, at most once per
    /// [`LAST_ACCESS_UPDATE_INTERVAL_MS`].
    #[inline]
    fn touch(&self) {
        let now_ms = monotonic_ms();
        let last = self.last_access_ms.load(Ordering::Relaxed);
        if now_ms.saturating_sub(last) > LAST_ACCESS_UPDATE_INTERVAL_MS {
            self.last_access_ms.store(now_ms, Ordering::Relaxed);
        }
    }

    /// The committed bucket level in bytes, as of the last check.
    ///
    /// Reads under the lock but performs no refill; a long-idle bucket
    /// reports the level its last check left behind, not what the next
    /// check would see.
    pub fn level(&self) -> i64 {
        self.state.lock().level
    }

    /// Whether pacing is disabled (rate of zero). Fixed at construction.
    #[inline]
    pub fn is_disabled(&self) -> bool {
        self.rate_bytes_per_sec == 0
    }

    /// The configured bandwidth ceiling in bytes per second.
    #[inline]
    pub fn rate_bytes_per_sec(&self) -> u32 {
        self.rate_bytes_per_sec
    }

    /// The framing overhead debited on top of every payload.
    #[inline]
    pub fn header_overhead(&self) -> u32 {
        self.header_overhead
    }

    /// The refill granularity selected at construction.
    #[inline]
    pub fn granularity(&self) -> RefillGranularity {
        self.granularity
    }

    /// The refill quantum: per-period refill amount and level cap.
    #[inline]
    pub fn refill_quantum(&self) -> u32 {
        self.refill_quantum
    }

    /// Whether no admission has been attempted for `inactive_duration_ms`.
    ///
    /// Used by [`ChannelPacerManager`](crate::ChannelPacerManager) to
    /// clean up channels that stopped sending.
    #[inline]
    pub fn is_inactive(&self, inactive_duration_ms: u64) -> bool {
        let now_ms = monotonic_ms();
        let last_ms = self.last_access_ms.load(Ordering::Relaxed);
        now_ms.saturating_sub(last_ms) > inactive_duration_ms
    }

    /// Snapshot of the pacer's metrics.
    ///
    /// # Example
    ///
    /// ```rust
    /// use pacer::Pacer;
    ///
    /// let pacer = Pacer::new(100_000, 28, 1500);
    /// pacer.check(1400, true);
    ///
    /// let metrics = pacer.metrics();
    /// assert_eq!(metrics.total_admitted, 1);
    /// assert_eq!(metrics.bytes_admitted, 1428);
    /// ```
    pub fn metrics(&self) -> PacerMetrics {
        PacerMetrics {
            total_admitted: self.total_admitted.load(Ordering::Relaxed),
            total_rejected: self.total_rejected.load(Ordering::Relaxed),
            total_deficit_waits: self.total_deficit_waits.load(Ordering::Relaxed),
            bytes_admitted: self.bytes_admitted.load(Ordering::Relaxed),
            consecutive_rejections: self.consecutive_rejections.load(Ordering::Relaxed),
            max_deficit_wait_ns: self.max_deficit_wait_ns.load(Ordering::Relaxed),
            level: self.level(),
            refill_quantum: self.refill_quantum,
        }
    }

    /// Restores the pre-filled bucket and zeroes the metrics.
    ///
    /// The configuration (rate, overhead, granularity) is untouched;
    /// only the level, timestamp, and counters go back to their
    /// construction-time values.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.level = i64::from(self.refill_quantum);
        state.last_check_us = monotonic_us();
        drop(state);

        self.last_access_ms.store(monotonic_ms(), Ordering::Relaxed);
        self.total_admitted.store(0, Ordering::Relaxed);
        self.total_rejected.store(0, Ordering::Relaxed);
        self.total_deficit_waits.store(0, Ordering::Relaxed);
        self.bytes_admitted.store(0, Ordering::Relaxed);
        self.consecutive_rejections.store(0, Ordering::Relaxed);
        self.max_deficit_wait_ns.store(0, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for Pacer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pacer")
            .field("rate_bytes_per_sec", &self.rate_bytes_per_sec)
            .field("header_overhead", &self.header_overhead)
            .field("granularity", &self.granularity)
            .field("refill_quantum", &self.refill_quantum)
            .field("level", &self.level())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_disabled_bypass() {
        let pacer = Pacer::new(0, 0, 0);

        assert!(pacer.is_disabled());
        for size in [1, 1500, 65_536, u32::MAX] {
            assert!(pacer.check(size, true));
            assert!(pacer.check(size, false));
        }
        assert_eq!(pacer.remaining(usize::MAX), Duration::ZERO);
    }

    #[test]
    #[should_panic(expected = "invalid pacer configuration")]
    fn test_rate_below_max_unit_panics() {
        let _ = Pacer::new(50, 0, 100);
    }

    #[test]
    #[should_panic(expected = "data_size must be greater than 0")]
    fn test_zero_data_size_panics() {
        let pacer = Pacer::new(1000, 0, 100);
        pacer.check(0, true);
    }

    #[test]
    fn test_fresh_bucket_admits() {
        let pacer = Pacer::new(1000, 0, 100);
        assert!(pacer.check(100, true));

        let pacer = Pacer::new(1000, 0, 100);
        assert!(pacer.check(100, false));
    }

    #[test]
    fn test_concrete_scenario() {
        // 1000 B/s, no overhead, 100-byte unit: per-second granularity,
        // quantum 1000, bucket starts at 1000
        let pacer = Pacer::new(1000, 0, 100);
        assert_eq!(pacer.granularity(), RefillGranularity::PerSecond);
        assert_eq!(pacer.refill_quantum(), 1000);
        assert_eq!(pacer.level(), 1000);

        assert!(pacer.check(400, true));
        assert_eq!(pacer.level(), 600);

        assert!(!pacer.check(700, true));
        assert_eq!(pacer.level(), 600);

        // Blocking call commits the deficit, waits it out, and admits
        assert!(pacer.check(700, false));
        assert!(pacer.level() >= 0);
    }

    #[test]
    fn test_rejection_commits_nothing() {
        let pacer = Pacer::new(1000, 0, 100);
        assert!(pacer.check(400, true));

        // Two identical back-to-back rejections: the first left no trace
        assert!(!pacer.check(700, true));
        assert!(!pacer.check(700, true));
        assert_eq!(pacer.level(), 600);

        // And the untouched level still admits what it should
        assert!(pacer.check(600, true));
    }

    #[test]
    fn test_header_overhead_debited() {
        let pacer = Pacer::new(1000, 50, 100);
        assert!(pacer.check(100, true));
        assert_eq!(pacer.level(), 850);
    }

    #[test]
    fn test_refill_saturates_per_second() {
        let pacer = Pacer::new(1000, 0, 100);
        assert!(pacer.check(400, true));
        assert_eq!(pacer.level(), 600);

        // Far longer than one refill period: level refills exactly to
        // the quantum, never beyond
        thread::sleep(Duration::from_millis(1100));
        assert!(pacer.check(1, true));
        assert_eq!(pacer.level(), 999);
    }

    #[test]
    fn test_refill_saturates_per_millisecond() {
        let pacer = Pacer::new(1_000_000, 0, 1000);
        assert_eq!(pacer.granularity(), RefillGranularity::PerMillisecond);
        assert_eq!(pacer.refill_quantum(), 1000);

        assert!(pacer.check(500, true));
        assert_eq!(pacer.level(), 500);

        thread::sleep(Duration::from_millis(5));
        assert!(pacer.check(1, true));
        assert_eq!(pacer.level(), 999);
    }

    #[test]
    fn test_proportional_refill() {
        let pacer = Pacer::new(1000, 0, 100);
        assert!(pacer.check(400, true));
        assert_eq!(pacer.level(), 600);

        // ~300ms at 1000 B/s earns ~300 bytes of credit
        thread::sleep(Duration::from_millis(300));
        assert!(pacer.check(1, true));
        let level = pacer.level();
        assert!(
            (899..=999).contains(&level),
            "level after proportional refill: {}",
            level
        );
    }

    #[test]
    fn test_blocking_deficit_repaid() {
        // Quantum 10_000; drain to 1000 then ask for 3000: ~0.2s deficit
        let pacer = Pacer::new(10_000, 0, 100);
        assert!(pacer.check(9_000, true));

        let start = Instant::now();
        assert!(pacer.check(3_000, false));
        let waited = start.elapsed();

        assert!(pacer.level() >= 0);
        // The deficit cannot repay instantaneously
        assert!(waited >= Duration::from_millis(50), "waited {:?}", waited);
        assert_eq!(pacer.metrics().total_deficit_waits, 1);
    }

    #[test]
    fn test_remaining_is_read_only() {
        let pacer = Pacer::new(1000, 0, 100);
        assert!(pacer.check(900, true));
        assert_eq!(pacer.level(), 100);

        assert_eq!(pacer.remaining(50), Duration::ZERO);
        assert!(pacer.remaining(600) > Duration::ZERO);

        // The probes changed nothing
        assert_eq!(pacer.level(), 100);
    }

    #[test]
    fn test_metrics_counters() {
        let pacer = Pacer::new(1000, 0, 100);

        assert!(pacer.check(400, true));
        assert!(!pacer.check(700, true));
        assert!(!pacer.check(700, true));

        let metrics = pacer.metrics();
        assert_eq!(metrics.total_admitted, 1);
        assert_eq!(metrics.total_rejected, 2);
        assert_eq!(metrics.consecutive_rejections, 2);
        assert_eq!(metrics.bytes_admitted, 400);

        // An admission clears the streak
        assert!(pacer.check(100, true));
        assert_eq!(pacer.metrics().consecutive_rejections, 0);
    }

    #[test]
    fn test_reset() {
        let pacer = Pacer::new(1000, 0, 100);
        assert!(pacer.check(800, true));
        assert!(!pacer.check(900, true));

        pacer.reset();

        assert_eq!(pacer.level(), 1000);
        let metrics = pacer.metrics();
        assert_eq!(metrics.total_admitted, 0);
        assert_eq!(metrics.total_rejected, 0);
        assert!(pacer.check(1000, true));
    }

    #[test]
    fn test_is_inactive() {
        let pacer = Pacer::new(1000, 0, 100);

        assert!(!pacer.is_inactive(1000));

        thread::sleep(Duration::from_millis(150));
        assert!(pacer.is_inactive(100));
        assert!(!pacer.is_inactive(10_000));
    }

    #[test]
    fn test_debug_impl() {
        let pacer = Pacer::new(1000, 28, 100);
        let debug_str = format!("{:?}", pacer);

        assert!(debug_str.contains("Pacer"));
        assert!(debug_str.contains("rate_bytes_per_sec: 1000"));
        assert!(debug_str.contains("refill_quantum: 1000"));
    }
}
