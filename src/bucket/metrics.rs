//! Observability for paced channels: snapshot counters, derived rates,
//! and a coarse health assessment.
//!
//! A [`PacerMetrics`] snapshot answers the questions a sender's operator
//! actually asks:
//!
//! ```text
//!     How much of what I tried to send was admitted?   admission_rate()
//!     Is the channel pushing past its ceiling?         is_under_pressure()
//!     Has it been pushing past it for a while?         is_saturated()
//!     How long did the worst blocking send stall?      max_deficit_wait_ms()
//! ```
//!
//! Counters are maintained with relaxed atomics beside the bucket; taking
//! a snapshot never touches the pacing lock.

use std::fmt;

/// Snapshot of a pacer's counters and current bucket state.
///
/// Obtained from [`Pacer::metrics`](crate::Pacer::metrics). The fields
/// are read individually with relaxed ordering, so a snapshot taken under
/// concurrent traffic is approximately consistent, not transactionally so.
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
/// println!("admission rate: {:.1}%", metrics.admission_rate() * 100.0);
/// println!("{}", metrics.summary());
/// ```
#[derive(Debug, Clone)]
pub struct PacerMetrics {
    /// Checks admitted, immediately or after a deficit wait.
    pub total_admitted: u64,

    /// Non-blocking checks rejected for insufficient credit.
    pub total_rejected: u64,

    /// Blocking checks that drove the bucket into deficit and waited.
    pub total_deficit_waits: u64,

    /// Bytes admitted onto the wire, framing overhead included.
    pub bytes_admitted: u64,

    /// Rejections since the last admission.
    pub consecutive_rejections: u32,

    /// Longest deficit wait observed, in nanoseconds.
    pub max_deficit_wait_ns: u64,

    /// Committed bucket level at snapshot time (negative = deficit).
    pub level: i64,

    /// The bucket's refill quantum (level cap).
    pub refill_quantum: u32,
}

impl PacerMetrics {
    /// Fraction of checks that were admitted, 0.0 to 1.0.
    ///
    /// A pacer that has seen no traffic reports 1.0.
    #[inline]
    pub fn admission_rate(&self) -> f64 {
        let total = self.total_admitted + self.total_rejected;
        if total == 0 {
            1.0
        } else {
            self.total_admitted as f64 / total as f64
        }
    }

    /// Fraction of checks that were rejected (inverse of
    /// [`admission_rate`](Self::admission_rate)).
    #[inline]
    pub fn rejection_rate(&self) -> f64 {
        1.0 - self.admission_rate()
    }

    /// Total admission attempts observed.
    #[inline]
    pub fn total_checks(&self) -> u64 {
        self.total_admitted + self.total_rejected
    }

    /// How full the bucket is, 0.0 (empty or in deficit) to 1.0 (at the
    /// quantum).
    #[inline]
    pub fn fill_ratio(&self) -> f64 {
        if self.refill_quantum == 0 || self.level <= 0 {
            0.0
        } else {
            (self.level as f64 / self.refill_quantum as f64).min(1.0)
        }
    }

    /// Whether the channel is pushing past its ceiling right now.
    ///
    /// True when fewer than half of all checks were admitted or the
    /// bucket is empty.
    #[inline]
    pub fn is_under_pressure(&self) -> bool {
        self.admission_rate() < 0.5 || self.level <= 0
    }

    /// Whether the channel has been pushing past its ceiling for a while.
    ///
    /// True on a long rejection streak (more than 10 in a row) or an
    /// overall rejection rate above 30%.
    #[inline]
    pub fn is_saturated(&self) -> bool {
        self.consecutive_rejections > 10 || self.rejection_rate() > 0.3
    }

    /// Longest deficit wait in microseconds.
    #[inline]
    pub fn max_deficit_wait_us(&self) -> f64 {
        self.max_deficit_wait_ns as f64 / 1000.0
    }

    /// Longest deficit wait in milliseconds.
    #[inline]
    pub fn max_deficit_wait_ms(&self) -> f64 {
        self.max_deficit_wait_ns as f64 / 1_000_000.0
    }

    /// Three-level health assessment of the channel.
    ///
    /// # Example
    ///
    /// ```rust
    /// use pacer::{HealthStatus, Pacer};
    ///
    /// let pacer = Pacer::new(100_000, 28, 1500);
    /// match pacer.metrics().health_status() {
    ///     HealthStatus::Healthy => {}
    ///     HealthStatus::Degraded => eprintln!("channel near its ceiling"),
    ///     HealthStatus::Saturated => eprintln!("channel sending too fast"),
    /// }
    /// ```
    pub fn health_status(&self) -> HealthStatus {
        if self.is_saturated() {
            HealthStatus::Saturated
        } else if self.is_under_pressure() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    /// Human-readable report of the snapshot, suitable for logging.
    ///
    /// # Example Output
    ///
    /// ```text
    /// Pacer Metrics:
    /// ├─ Admission:
    /// │  ├─ Admitted: 982 (98.20%)
    /// │  ├─ Rejected: 18 (1.80%)
    /// │  └─ Deficit Waits: 3 (max 12.400ms)
    /// ├─ Throughput:
    /// │  └─ Bytes Admitted: 1403296
    /// ├─ Bucket:
    /// │  ├─ Level: 512/1000
    /// │  └─ Fill: 51.20%
    /// └─ Health: Healthy
    /// ```
    pub fn summary(&self) -> String {
        format!(
            "Pacer Metrics:\n\
             ├─ Admission:\n\
             │  ├─ Admitted: {} ({:.2}%)\n\
             │  ├─ Rejected: {} ({:.2}%)\n\
             │  └─ Deficit Waits: {} (max {:.3}ms)\n\
             ├─ Throughput:\n\
             │  └─ Bytes Admitted: {}\n\
             ├─ Bucket:\n\
             │  ├─ Level: {}/{}\n\
             │  └─ Fill: {:.2}%\n\
             └─ Health: {:?}",
            self.total_admitted,
            self.admission_rate() * 100.0,
            self.total_rejected,
            self.rejection_rate() * 100.0,
            self.total_deficit_waits,
            self.max_deficit_wait_ms(),
            self.bytes_admitted,
            self.level,
            self.refill_quantum,
            self.fill_ratio() * 100.0,
            self.health_status(),
        )
    }
}

impl fmt::Display for PacerMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())
    }
}

/// Coarse health assessment of a paced channel.
///
/// ```text
///     Healthy ────► admissions flowing, credit available
///        │
///     Degraded ───► bucket empty or most checks rejected
///        │
///     Saturated ──► sustained rejection: the sender is consistently
///                   offering more than the configured ceiling
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Normal operation.
    Healthy,
    /// Credit exhausted or admission rate below half.
    Degraded,
    /// Sustained overload; the caller should slow its offered load.
    Saturated,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> PacerMetrics {
        PacerMetrics {
            total_admitted: 0,
            total_rejected: 0,
            total_deficit_waits: 0,
            bytes_admitted: 0,
            consecutive_rejections: 0,
            max_deficit_wait_ns: 0,
            level: 1000,
            refill_quantum: 1000,
        }
    }

    #[test]
    fn test_admission_rate_no_traffic() {
        let m = snapshot();
        assert_eq!(m.admission_rate(), 1.0);
        assert_eq!(m.rejection_rate(), 0.0);
        assert_eq!(m.total_checks(), 0);
    }

    #[test]
    fn test_admission_rate() {
        let m = PacerMetrics {
            total_admitted: 75,
            total_rejected: 25,
            ..snapshot()
        };
        assert_eq!(m.admission_rate(), 0.75);
        assert_eq!(m.rejection_rate(), 0.25);
        assert_eq!(m.total_checks(), 100);
    }

    #[test]
    fn test_fill_ratio() {
        let m = PacerMetrics {
            level: 500,
            ..snapshot()
        };
        assert_eq!(m.fill_ratio(), 0.5);

        let deficit = PacerMetrics {
            level: -200,
            ..snapshot()
        };
        assert_eq!(deficit.fill_ratio(), 0.0);

        let disabled = PacerMetrics {
            refill_quantum: 0,
            level: 0,
            ..snapshot()
        };
        assert_eq!(disabled.fill_ratio(), 0.0);
    }

    #[test]
    fn test_pressure_predicates() {
        let fresh = snapshot();
        assert!(!fresh.is_under_pressure());
        assert!(!fresh.is_saturated());

        let empty = PacerMetrics {
            level: 0,
            ..snapshot()
        };
        assert!(empty.is_under_pressure());

        let streak = PacerMetrics {
            total_admitted: 100,
            total_rejected: 11,
            consecutive_rejections: 11,
            ..snapshot()
        };
        assert!(streak.is_saturated());

        let high_rejection = PacerMetrics {
            total_admitted: 60,
            total_rejected: 40,
            ..snapshot()
        };
        assert!(high_rejection.is_saturated());
    }

    #[test]
    fn test_health_status() {
        assert_eq!(snapshot().health_status(), HealthStatus::Healthy);

        let degraded = PacerMetrics {
            level: -10,
            ..snapshot()
        };
        assert_eq!(degraded.health_status(), HealthStatus::Degraded);

        let saturated = PacerMetrics {
            consecutive_rejections: 20,
            ..snapshot()
        };
        assert_eq!(saturated.health_status(), HealthStatus::Saturated);
    }

    #[test]
    fn test_wait_conversions() {
        let m = PacerMetrics {
            max_deficit_wait_ns: 12_400_000,
            ..snapshot()
        };
        assert_eq!(m.max_deficit_wait_us(), 12_400.0);
        assert_eq!(m.max_deficit_wait_ms(), 12.4);
    }

    #[test]
    fn test_summary_renders() {
        let m = PacerMetrics {
            total_admitted: 982,
            total_rejected: 18,
            total_deficit_waits: 3,
            bytes_admitted: 1_403_296,
            level: 512,
            ..snapshot()
        };
        let summary = m.summary();

        assert!(summary.contains("Admitted: 982"));
        assert!(summary.contains("Bytes Admitted: 1403296"));
        assert!(summary.contains("512/1000"));
        assert_eq!(summary, m.to_string());
    }
}
