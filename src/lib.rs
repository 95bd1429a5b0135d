//! # Pacer - Leaky-Bucket Byte Pacing for Datagram Senders
//!
//! A small, thread-safe leaky bucket that bounds the rate at which a
//! sender may put bytes on the wire. Built for reliable-multicast and
//! datagram transports that must hold an outgoing channel to a configured
//! bandwidth ceiling, protocol-header overhead included.
//!
//! ## What byte pacing is
//!
//! A paced sender asks for admission right before transmitting each
//! packet. The bucket holds a credit of bytes that refills with elapsed
//! time up to a cap; every admitted packet debits its payload plus the
//! per-packet framing overhead:
//!
//! ```text
//!     Leaky Bucket:
//!
//!     t=0        [██████████]  level = quantum (pre-filled)
//!     send 400B  [██████░░░░]  level -= header + 400
//!     +250ms     [████████░░]  credit accrues with elapsed time
//!     idle 10s   [██████████]  refill saturates at the quantum;
//!                              idle time never banks extra burst
//! ```
//!
//! Two admission policies cover the two shapes of a transmit path:
//!
//! - **Non-blocking**: insufficient credit rejects the packet with no
//!   state change; the caller requeues it and may ask
//!   [`Pacer::remaining`] how long to wait.
//! - **Blocking**: the debit always commits; if the bucket goes into
//!   deficit, the call busy-waits until elapsed time repays it, pacing
//!   the sender at exactly the configured rate.
//!
//! ## Quick Start
//!
//! ```rust
//! use pacer::Pacer;
//!
//! // 512 kbit/s ceiling, 28 bytes IPv4+UDP framing, 1500-byte MTU
//! let pacer = Pacer::new(64_000, 28, 1500);
//!
//! if pacer.check(1400, true) {
//!     // transmit the packet
//! } else {
//!     // bucket exhausted: defer and retry after the advisory hint
//!     let wait = pacer.remaining(1400);
//! }
//! ```
//!
//! ## Per-channel pacing
//!
//! ```rust
//! use std::net::SocketAddr;
//! use pacer::{ChannelPacerManager, PacerConfig};
//!
//! let manager = ChannelPacerManager::new(PacerConfig::new(64_000, 28, 1500));
//! let group: SocketAddr = "239.192.0.1:7500".parse().unwrap();
//!
//! if manager.check(group, 1400, true) {
//!     // transmit on this channel
//! }
//! ```
//!
//! ## Refill granularity
//!
//! Fast channels, where a millisecond of credit already covers a
//! maximum-size unit, refill against a one-millisecond period so a
//! single packet cannot consume a whole second of allowance up front.
//! Slower channels refill against a one-second period. The choice is
//! made once at construction; see [`RefillGranularity`].
//!
//! ## Concurrency
//!
//! A [`Pacer`] is safe to share across the threads of a multi-threaded
//! sender; the bucket state sits behind one mutex and every operation is
//! synchronized. A blocking caller waiting out a deficit holds that
//! mutex, so concurrent checks on the same channel serialize behind it:
//! the pacing contract is per channel, not per caller. [`Pacer::remaining`]
//! never blocks and never mutates, so it is safe as a high-frequency
//! probe.
//!
//! A pacer constructed with a rate of zero is permanently disabled:
//! every check passes without touching the lock.

#![warn(
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    missing_debug_implementations
)]

// Internal module
mod bucket;

// Public re-exports
pub use bucket::{
    cpu_relax, monotonic_ms, monotonic_us, ChannelPacerManager, HealthStatus, ManagerStats,
    Pacer, PacerConfig, PacerMetrics, RefillGranularity,
};

/// A pacer wrapped in `Arc` for sharing across a sender's threads.
///
/// # Example
/// ```rust
/// use std::sync::Arc;
/// use pacer::{Pacer, SharedPacer};
///
/// let pacer: SharedPacer = Arc::new(Pacer::new(64_000, 28, 1500));
///
/// let worker = pacer.clone();
/// std::thread::spawn(move || {
///     worker.check(1400, true);
/// });
/// ```
pub type SharedPacer = std::sync::Arc<Pacer>;

/// A channel manager wrapped in `Arc` for sharing across a transport.
pub type SharedChannelManager = std::sync::Arc<ChannelPacerManager>;

/// Version information for the crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Minimum supported Rust version.
pub const MSRV: &str = "1.70.0";

/// Prelude module for convenient imports.
///
/// ```rust
/// use pacer::prelude::*;
///
/// let pacer = Pacer::new(64_000, 28, 1500);
/// let config = PacerConfig::disabled();
/// ```
pub mod prelude {
    //! Common imports for typical pacing use cases.

    pub use crate::{
        ChannelPacerManager, HealthStatus, ManagerStats, Pacer, PacerConfig, PacerMetrics,
        RefillGranularity, SharedChannelManager, SharedPacer,
    };
}

/// Builder for pacers with a fluent configuration surface.
///
/// The builder is the recommended construction path when the parameters
/// come from configuration rather than constants: `try_build` reports an
/// invalid combination as an error instead of panicking.
///
/// # Example
///
/// ```rust
/// use pacer::PacerBuilder;
///
/// let pacer = PacerBuilder::new()
///     .rate_bytes_per_sec(64_000)
///     .header_overhead(28)
///     .max_unit(1500)
///     .build();
///
/// // A rate that cannot admit one full-size unit is a configuration bug
/// let result = PacerBuilder::new()
///     .rate_bytes_per_sec(500)
///     .max_unit(1500)
///     .try_build();
/// assert!(result.is_err());
/// ```
#[derive(Debug, Clone)]
pub struct PacerBuilder {
    config: PacerConfig,
}

impl PacerBuilder {
    /// Creates a builder for a disabled pacer; set a rate to enable it.
    pub fn new() -> Self {
        Self {
            config: PacerConfig::disabled(),
        }
    }

    /// Sets the bandwidth ceiling in bytes per second (0 disables pacing).
    pub fn rate_bytes_per_sec(mut self, rate: u32) -> Self {
        self.config.rate_bytes_per_sec = rate;
        self
    }

    /// Sets the bandwidth ceiling in kilobits per second.
    pub fn rate_kbps(mut self, kbps: u32) -> Self {
        self.config.rate_bytes_per_sec = kbps.saturating_mul(125);
        self
    }

    /// Sets the per-packet framing overhead in bytes.
    pub fn header_overhead(mut self, bytes: u32) -> Self {
        self.config.header_overhead = bytes;
        self
    }

    /// Sets the maximum transmissible unit in bytes.
    ///
    /// Consulted once at build time to pick the refill granularity.
    pub fn max_unit(mut self, bytes: u32) -> Self {
        self.config.max_unit = bytes;
        self
    }

    /// Builds the pacer.
    ///
    /// # Panics
    ///
    /// Panics if the configuration is invalid (see
    /// [`PacerConfig::validate`]). Use [`try_build`](Self::try_build) to
    /// handle the error instead.
    pub fn build(self) -> Pacer {
        Pacer::with_config(self.config)
    }

    /// Builds the pacer, returning an error on invalid configuration.
    ///
    /// # Errors
    ///
    /// Returns the validation message from [`PacerConfig::validate`].
    pub fn try_build(self) -> Result<Pacer, &'static str> {
        self.config.validate()?;
        Ok(Pacer::with_config(self.config))
    }
}

impl Default for PacerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
