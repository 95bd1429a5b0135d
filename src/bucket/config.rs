//! # Pacer Configuration
//!
//! Configuration for the leaky-bucket pacer: the target byte rate, the
//! per-packet framing overhead, and the largest unit the transport will
//! ever hand to [`check`](crate::Pacer::check).
//!
//! ## Refill granularity
//!
//! The bucket refills on one of two clocks, decided once from the
//! configuration and never changed afterwards:
//!
//! ```text
//!     rate / 1000 >= max_unit ?
//!          │
//!          ├── yes ──► PerMillisecond   quantum = rate / 1000
//!          │           (fast senders: one packet could otherwise
//!          │            drain a whole second of credit at once)
//!          │
//!          └── no ───► PerSecond        quantum = rate
//! ```
//!
//! The quantum is both the refill amount per period and the cap the bucket
//! level can never exceed.

use std::fmt;

/// Refill clock for the bucket, fixed at construction.
///
/// Fast buckets (where a millisecond of credit already covers a maximum-
/// size unit) are tracked per millisecond so a single packet cannot eat a
/// full second of allowance ahead of time. Everything else is tracked per
/// second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefillGranularity {
    /// Credit accrues against a one-millisecond period.
    PerMillisecond,
    /// Credit accrues against a one-second period.
    PerSecond,
}

impl RefillGranularity {
    /// The refill period in microseconds.
    ///
    /// Elapsed time beyond one period saturates the refill at the quantum;
    /// the same value is the divisor when converting microsecond elapsed
    /// time into earned bytes.
    #[inline(always)]
    pub(crate) fn period_us(self) -> u64 {
        match self {
            Self::PerMillisecond => 1_000,
            Self::PerSecond => 1_000_000,
        }
    }
}

impl fmt::Display for RefillGranularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PerMillisecond => write!(f, "per-millisecond"),
            Self::PerSecond => write!(f, "per-second"),
        }
    }
}

/// Configuration for a [`Pacer`](crate::Pacer).
///
/// Three numbers describe a paced channel:
///
/// - `rate_bytes_per_sec`: the bandwidth ceiling, protocol headers
///   included. Zero disables pacing entirely.
/// - `header_overhead`: bytes of framing the transport adds to every
///   packet (IP + UDP + protocol header), debited on top of each payload.
/// - `max_unit`: the largest transmissible unit. Only consulted when
///   picking the refill granularity; a pacer never stores it.
///
/// ## Examples
///
/// ```rust
/// use pacer::PacerConfig;
///
/// // 64 KB/s with 28 bytes of IPv4+UDP overhead, 1500-byte MTU
/// let config = PacerConfig::new(64 * 1024, 28, 1500);
/// assert!(config.validate().is_ok());
///
/// // Rate expressed on the wire in kilobits
/// let config = PacerConfig::from_kbps(512, 28, 1500);
/// assert_eq!(config.rate_bytes_per_sec, 64_000);
///
/// // No pacing at all
/// let config = PacerConfig::disabled();
/// assert!(config.is_disabled());
/// ```
#[derive(Debug, Clone)]
pub struct PacerConfig {
    /// Bandwidth ceiling in bytes per second, headers included.
    ///
    /// Zero means pacing is disabled: every admission check passes
    /// immediately and no state is kept.
    pub rate_bytes_per_sec: u32,

    /// Framing overhead in bytes added to every debited payload.
    pub header_overhead: u32,

    /// Largest transmissible unit in bytes.
    ///
    /// Used once, at construction, to choose the refill granularity.
    /// An enabled pacer must be able to admit at least one maximum-size
    /// unit per second, so `rate_bytes_per_sec >= max_unit` is required.
    pub max_unit: u32,
}

impl Default for PacerConfig {
    /// A disabled configuration; every check passes.
    fn default() -> Self {
        Self::disabled()
    }
}

impl PacerConfig {
    /// Creates a configuration from the three raw parameters.
    ///
    /// # Example
    ///
    /// ```rust
    /// use pacer::PacerConfig;
    ///
    /// let config = PacerConfig::new(100_000, 48, 1500);
    /// assert_eq!(config.rate_bytes_per_sec, 100_000);
    /// ```
    pub fn new(rate_bytes_per_sec: u32, header_overhead: u32, max_unit: u32) -> Self {
        Self {
            rate_bytes_per_sec,
            header_overhead,
            max_unit,
        }
    }

    /// A configuration with pacing switched off.
    ///
    /// Disabled is a permanent state: a pacer built from this never
    /// throttles and cannot be enabled later.
    pub fn disabled() -> Self {
        Self {
            rate_bytes_per_sec: 0,
            header_overhead: 0,
            max_unit: 0,
        }
    }

    /// Creates a configuration with the rate given in kilobits per second.
    ///
    /// Link budgets are usually quoted in bits; this converts to the byte
    /// rate the bucket runs on (1 kbit = 125 bytes).
    ///
    /// # Example
    ///
    /// ```rust
    /// use pacer::PacerConfig;
    ///
    /// let config = PacerConfig::from_kbps(1024, 28, 1500);
    /// assert_eq!(config.rate_bytes_per_sec, 128_000);
    /// ```
    pub fn from_kbps(kbps: u32, header_overhead: u32, max_unit: u32) -> Self {
        Self {
            rate_bytes_per_sec: kbps.saturating_mul(125),
            header_overhead,
            max_unit,
        }
    }

    /// Creates a configuration with the rate given in megabits per second.
    ///
    /// # Example
    ///
    /// ```rust
    /// use pacer::PacerConfig;
    ///
    /// let config = PacerConfig::from_mbps(10, 28, 1500);
    /// assert_eq!(config.rate_bytes_per_sec, 1_250_000);
    /// ```
    pub fn from_mbps(mbps: u32, header_overhead: u32, max_unit: u32) -> Self {
        Self {
            rate_bytes_per_sec: mbps.saturating_mul(125_000),
            header_overhead,
            max_unit,
        }
    }

    /// Whether this configuration disables pacing.
    #[inline]
    pub fn is_disabled(&self) -> bool {
        self.rate_bytes_per_sec == 0
    }

    /// The refill granularity this configuration selects.
    ///
    /// # Example
    ///
    /// ```rust
    /// use pacer::{PacerConfig, RefillGranularity};
    ///
    /// // 1 MB/s with a 1000-byte unit: a millisecond of credit already
    /// // covers a unit, so refill is tracked per millisecond.
    /// let fast = PacerConfig::new(1_000_000, 0, 1000);
    /// assert_eq!(fast.granularity(), RefillGranularity::PerMillisecond);
    ///
    /// // 1 KB/s: per-second tracking.
    /// let slow = PacerConfig::new(1000, 0, 100);
    /// assert_eq!(slow.granularity(), RefillGranularity::PerSecond);
    /// ```
    pub fn granularity(&self) -> RefillGranularity {
        if self.max_unit > 0 && self.rate_bytes_per_sec / 1000 >= self.max_unit {
            RefillGranularity::PerMillisecond
        } else {
            RefillGranularity::PerSecond
        }
    }

    /// The refill quantum in bytes: the per-period refill amount and the
    /// cap on the bucket level.
    ///
    /// # Example
    ///
    /// ```rust
    /// use pacer::PacerConfig;
    ///
    /// assert_eq!(PacerConfig::new(1_000_000, 0, 1000).refill_quantum(), 1000);
    /// assert_eq!(PacerConfig::new(1000, 0, 100).refill_quantum(), 1000);
    /// ```
    pub fn refill_quantum(&self) -> u32 {
        match self.granularity() {
            RefillGranularity::PerMillisecond => self.rate_bytes_per_sec / 1000,
            RefillGranularity::PerSecond => self.rate_bytes_per_sec,
        }
    }

    /// Validates the configuration.
    ///
    /// A violation here is a caller bug, not a runtime condition:
    /// [`Pacer::with_config`](crate::Pacer::with_config) panics on it,
    /// while [`PacerBuilder::try_build`](crate::PacerBuilder::try_build)
    /// surfaces it as an `Err`.
    ///
    /// # Errors
    ///
    /// For an enabled configuration (`rate_bytes_per_sec > 0`):
    /// - `max_unit` is 0
    /// - `rate_bytes_per_sec` is below `max_unit` (the rate could never
    ///   admit a single maximum-size unit)
    ///
    /// A disabled configuration always validates.
    ///
    /// # Example
    ///
    /// ```rust
    /// use pacer::PacerConfig;
    ///
    /// let config = PacerConfig::new(500, 0, 1500); // rate below one MTU
    /// assert!(config.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.rate_bytes_per_sec == 0 {
            return Ok(());
        }

        if self.max_unit == 0 {
            return Err("max_unit must be greater than 0 when pacing is enabled");
        }

        if self.rate_bytes_per_sec < self.max_unit {
            return Err("rate_bytes_per_sec must be at least max_unit");
        }

        Ok(())
    }

    /// The effective payload rate per second once framing is accounted for,
    /// assuming maximum-size units.
    ///
    /// Useful for displaying what a configured ceiling leaves for actual
    /// data.
    ///
    /// # Example
    ///
    /// ```rust
    /// use pacer::PacerConfig;
    ///
    /// let config = PacerConfig::new(100_000, 500, 1500);
    /// // 500 of every 2000 debited bytes is framing
    /// assert_eq!(config.effective_payload_rate(), 75_000.0);
    /// ```
    pub fn effective_payload_rate(&self) -> f64 {
        if self.max_unit == 0 {
            return 0.0;
        }
        let unit_on_wire = self.max_unit as f64 + self.header_overhead as f64;
        self.rate_bytes_per_sec as f64 * (self.max_unit as f64 / unit_on_wire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_granularity_selection() {
        // 1 MB/s, 1000-byte unit: rate/1000 = 1000 >= 1000
        let fast = PacerConfig::new(1_000_000, 0, 1000);
        assert_eq!(fast.granularity(), RefillGranularity::PerMillisecond);
        assert_eq!(fast.refill_quantum(), 1000);

        // 1 KB/s, 100-byte unit: rate/1000 = 1 < 100
        let slow = PacerConfig::new(1000, 0, 100);
        assert_eq!(slow.granularity(), RefillGranularity::PerSecond);
        assert_eq!(slow.refill_quantum(), 1000);
    }

    #[test]
    fn test_granularity_boundary() {
        // Exactly at the threshold goes per-millisecond
        let config = PacerConfig::new(100_000, 0, 100);
        assert_eq!(config.granularity(), RefillGranularity::PerMillisecond);

        // One byte per second below falls back to per-second
        let config = PacerConfig::new(99_999, 0, 100);
        assert_eq!(config.granularity(), RefillGranularity::PerSecond);
    }

    #[test]
    fn test_validation() {
        assert!(PacerConfig::new(100_000, 28, 1500).validate().is_ok());
        assert!(PacerConfig::disabled().validate().is_ok());

        // Rate below one maximum-size unit
        assert!(PacerConfig::new(500, 0, 1500).validate().is_err());

        // Enabled but no unit size to judge the rate against
        assert!(PacerConfig::new(1000, 0, 0).validate().is_err());
    }

    #[test]
    fn test_validation_rate_equals_unit() {
        // One full-size unit per second is the minimum admissible rate
        assert!(PacerConfig::new(1500, 0, 1500).validate().is_ok());
    }

    #[test]
    fn test_kbps_mbps_conversion() {
        assert_eq!(PacerConfig::from_kbps(8, 0, 100).rate_bytes_per_sec, 1000);
        assert_eq!(
            PacerConfig::from_mbps(100, 0, 1500).rate_bytes_per_sec,
            12_500_000
        );
    }

    #[test]
    fn test_kbps_saturates() {
        let config = PacerConfig::from_mbps(u32::MAX, 0, 1500);
        assert_eq!(config.rate_bytes_per_sec, u32::MAX);
    }

    #[test]
    fn test_disabled_default() {
        let config = PacerConfig::default();
        assert!(config.is_disabled());
        assert_eq!(config.refill_quantum(), 0);
    }

    #[test]
    fn test_period_us() {
        assert_eq!(RefillGranularity::PerMillisecond.period_us(), 1_000);
        assert_eq!(RefillGranularity::PerSecond.period_us(), 1_000_000);
    }

    #[test]
    fn test_effective_payload_rate() {
        let config = PacerConfig::new(100_000, 500, 1500);
        assert_eq!(config.effective_payload_rate(), 75_000.0);

        assert_eq!(PacerConfig::disabled().effective_payload_rate(), 0.0);
    }

    #[test]
    fn test_granularity_display() {
        assert_eq!(
            RefillGranularity::PerMillisecond.to_string(),
            "per-millisecond"
        );
        assert_eq!(RefillGranularity::PerSecond.to_string(), "per-second");
    }
}
