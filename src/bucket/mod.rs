//! # Bucket Module
//!
//! Internal implementation of the leaky-bucket pacer.
//!
//! ```text
//!     bucket/
//!     ├── mod.rs          (module organization)
//!     ├── config.rs       (rate, overhead, granularity selection)
//!     ├── core.rs         (the leaky bucket and its lock)
//!     ├── manager.rs      (per-channel pacer lifecycle)
//!     ├── metrics.rs      (counters and health)
//!     └── utils.rs        (monotonic clock, spin helpers)
//! ```
//!
//! The transmit path talks to [`core::Pacer`] (usually through
//! [`manager::ChannelPacerManager`]); everything else supports those two.

mod config;
mod core;
mod manager;
mod metrics;
mod utils;

/// Configuration and refill-granularity selection
pub use self::config::{PacerConfig, RefillGranularity};

/// The leaky-bucket pacer itself
pub use self::core::Pacer;

/// Per-channel pacer lifecycle management
pub use self::manager::{ChannelPacerManager, ManagerStats};

/// Observability types
pub use self::metrics::{HealthStatus, PacerMetrics};

/// Monotonic clock and spin helpers
pub use self::utils::{cpu_relax, monotonic_ms, monotonic_us};
