//! # Per-Channel Pacer Management
//!
//! A transport that fans out to many destinations runs one [`Pacer`] per
//! outgoing channel. This module wires that lifecycle: pacers are created
//! on first use, shared by reference, released on channel teardown, and
//! reaped automatically once a channel stops sending.
//!
//! ```text
//!     transmit path:
//!     239.1.2.3:7500 ──┐
//!     239.1.2.4:7500 ──┼──► ChannelPacerManager ──► per-channel Pacer
//!     10.9.0.1:3055 ───┘            │
//!                            ┌──────▼───────┐
//!                            │   DashMap    │
//!                            │ addr → Pacer │
//!                            └──────────────┘
//! ```
//!
//! Every pacer is built from the same [`PacerConfig`] template; the
//! manager bounds how many channels it will track and cleans up idle
//! entries, either on demand ([`cleanup`](ChannelPacerManager::cleanup))
//! or from a background thread.

use super::{config::PacerConfig, core::Pacer};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Maximum number of channels tracked simultaneously.
///
/// A sender has orders of magnitude fewer outgoing channels than a web
/// frontend has client IPs; past this bound something is leaking channels.
const MAX_TRACKED_CHANNELS: usize = 1024;

/// Occupancy at which get-or-create starts emergency cleanup (90% of max).
const CLEANUP_THRESHOLD: usize = (MAX_TRACKED_CHANNELS * 90) / 100;

/// Occupancy emergency cleanup tries to get back under (70% of max).
const CLEANUP_TARGET: usize = (MAX_TRACKED_CHANNELS * 70) / 100;

/// Divisor applied to the idle threshold during emergency cleanup.
const EMERGENCY_CLEANUP_INACTIVE_FACTOR: u64 = 2;

/// Floor on the emergency idle threshold (milliseconds). Channels that
/// sent within the last second are never reaped, even under pressure.
const EMERGENCY_CLEANUP_MIN_INACTIVE_MS: u64 = 1000;

/// Manager for per-channel pacing.
///
/// Each outgoing channel (multicast group or unicast destination, keyed
/// by socket address) gets its own [`Pacer`] built from a shared
/// configuration template. The manager caps how many channels it tracks
/// and reaps pacers whose channels have gone quiet.
///
/// ## Example
///
/// ```rust
/// use std::net::SocketAddr;
/// use pacer::{ChannelPacerManager, PacerConfig};
///
/// let config = PacerConfig::new(100_000, 28, 1500);
/// let manager = ChannelPacerManager::new(config);
///
/// let group: SocketAddr = "239.192.0.1:7500".parse().unwrap();
/// if manager.check(group, 1400, true) {
///     // transmit on this channel
/// }
/// ```
///
/// ## Background cleanup
///
/// ```rust
/// use std::sync::Arc;
/// use pacer::{ChannelPacerManager, PacerConfig};
///
/// let manager = Arc::new(ChannelPacerManager::with_cleanup_settings(
///     PacerConfig::new(100_000, 28, 1500),
///     60_000,  // sweep every minute
///     300_000, // reap channels idle for 5 minutes
/// ));
/// let handle = manager.clone().start_cleanup_thread();
/// ```
#[derive(Clone)]
pub struct ChannelPacerManager {
    /// Channel address to pacer. DashMap shards the lock so concurrent
    /// transmit paths rarely contend.
    pacers: Arc<DashMap<SocketAddr, Arc<Pacer>, ahash::RandomState>>,

    /// Current number of tracked channels, maintained beside the map for
    /// cheap capacity checks.
    active_count: Arc<AtomicUsize>,

    /// Configuration template for new pacers.
    config: PacerConfig,

    /// Interval between background cleanup sweeps (milliseconds).
    cleanup_interval_ms: u64,

    /// Idle time after which a channel is reaped (milliseconds).
    inactive_duration_ms: u64,

    /// Pacers created since startup.
    total_created: Arc<AtomicU64>,

    /// Pacers reaped since startup.
    total_cleaned: Arc<AtomicU64>,

    /// Guards against concurrent emergency cleanups.
    cleanup_in_progress: Arc<AtomicBool>,
}

impl ChannelPacerManager {
    /// Creates a manager with default cleanup settings: sweep every
    /// minute, reap channels idle for five minutes.
    pub fn new(config: PacerConfig) -> Self {
        let num_shards = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(8)
            .next_power_of_two()
            .clamp(4, 64);

        let initial_capacity = (MAX_TRACKED_CHANNELS / num_shards).max(16);

        Self {
            pacers: Arc::new(DashMap::with_capacity_and_hasher_and_shard_amount(
                initial_capacity,
                ahash::RandomState::new(),
                num_shards,
            )),
            active_count: Arc::new(AtomicUsize::new(0)),
            config,
            cleanup_interval_ms: 60_000,
            inactive_duration_ms: 300_000,
            total_created: Arc::new(AtomicU64::new(0)),
            total_cleaned: Arc::new(AtomicU64::new(0)),
            cleanup_in_progress: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Creates a manager with custom cleanup cadence and idle threshold.
    pub fn with_cleanup_settings(
        config: PacerConfig,
        cleanup_interval_ms: u64,
        inactive_duration_ms: u64,
    ) -> Self {
        let mut manager = Self::new(config);
        manager.cleanup_interval_ms = cleanup_interval_ms;
        manager.inactive_duration_ms = inactive_duration_ms;
        manager
    }

    /// Gets or creates the pacer for a channel.
    ///
    /// Fast path returns the existing pacer. The slow path creates one,
    /// unless the manager is at capacity and emergency cleanup cannot
    /// free a slot, in which case `None` is returned and the caller
    /// should treat the channel as unpaceable (and fix the leak).
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::net::SocketAddr;
    /// use pacer::{ChannelPacerManager, PacerConfig};
    ///
    /// let manager = ChannelPacerManager::new(PacerConfig::new(100_000, 28, 1500));
    /// let addr: SocketAddr = "239.192.0.1:7500".parse().unwrap();
    ///
    /// let pacer = manager.pacer(addr).expect("capacity available");
    /// assert!(pacer.check(1400, true));
    /// ```
    #[inline]
    pub fn pacer(&self, addr: SocketAddr) -> Option<Arc<Pacer>> {
        if let Some(pacer) = self.pacers.get(&addr) {
            return Some(pacer.clone());
        }

        let current = self.active_count.load(Ordering::Acquire);

        if current >= MAX_TRACKED_CHANNELS {
            warn!("channel pacer capacity reached, refusing {}", addr);
            return None;
        }

        if current >= CLEANUP_THRESHOLD {
            self.emergency_cleanup();

            if self.active_count.load(Ordering::Acquire) >= MAX_TRACKED_CHANNELS {
                warn!("channel pacer capacity reached after cleanup, refusing {}", addr);
                return None;
            }
        }

        match self.pacers.entry(addr) {
            dashmap::mapref::entry::Entry::Occupied(occupied) => {
                // Another thread created it between our get and here
                Some(occupied.get().clone())
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let prev = self.active_count.fetch_add(1, Ordering::AcqRel);

                if prev >= MAX_TRACKED_CHANNELS {
                    // Lost a race past the capacity check; roll back
                    self.active_count.fetch_sub(1, Ordering::AcqRel);
                    warn!("channel pacer capacity race detected, refusing {}", addr);
                    return None;
                }

                let pacer = Arc::new(Pacer::with_config(self.config.clone()));
                vacant.insert(pacer.clone());

                self.total_created.fetch_add(1, Ordering::Relaxed);
                debug!("created pacer for channel {} (total: {})", addr, prev + 1);

                Some(pacer)
            }
        }
    }

    /// Admission check for one channel; see [`Pacer::check`].
    ///
    /// Returns `false` if the manager is at capacity and no pacer could
    /// be created: a full manager fails closed rather than letting an
    /// untracked channel send unpaced.
    #[inline]
    pub fn check(&self, addr: SocketAddr, data_size: u32, nonblocking: bool) -> bool {
        match self.pacer(addr) {
            Some(pacer) => pacer.check(data_size, nonblocking),
            None => false,
        }
    }

    /// Advisory wait hint for one channel; see [`Pacer::remaining`].
    ///
    /// A channel the manager has never seen reports
    /// [`Duration::ZERO`]; nothing has been debited against it yet.
    /// Probing never creates a pacer.
    #[inline]
    pub fn remaining(&self, addr: SocketAddr, packet_len: usize) -> Duration {
        match self.pacers.get(&addr) {
            Some(pacer) => pacer.remaining(packet_len),
            None => Duration::ZERO,
        }
    }

    /// Releases the pacer for a torn-down channel.
    ///
    /// Returns `true` if the channel was tracked. Call this from the
    /// channel teardown path; idle cleanup will eventually reap leaked
    /// entries, but teardown should not rely on it.
    pub fn release(&self, addr: SocketAddr) -> bool {
        if self.pacers.remove(&addr).is_some() {
            self.active_count.fetch_sub(1, Ordering::AcqRel);
            debug!("released pacer for channel {}", addr);
            true
        } else {
            false
        }
    }

    /// Reaps channels that have gone idle.
    ///
    /// Removes pacers with no admission attempt for the configured idle
    /// duration (half of it when the manager is close to capacity).
    pub fn cleanup(&self) {
        if self.cleanup_in_progress.load(Ordering::Acquire) {
            return;
        }

        let before = self.active_count.load(Ordering::Acquire);

        let threshold = if before > CLEANUP_THRESHOLD {
            self.inactive_duration_ms / 2
        } else {
            self.inactive_duration_ms
        };

        let mut removed = 0u64;

        self.pacers.retain(|addr, pacer| {
            if pacer.is_inactive(threshold) {
                debug!("reaping idle channel {}", addr);
                removed += 1;
                self.active_count.fetch_sub(1, Ordering::AcqRel);
                false
            } else {
                true
            }
        });

        if removed > 0 {
            self.total_cleaned.fetch_add(removed, Ordering::Relaxed);
            debug!("cleanup reaped {} idle channels", removed);
            self.pacers.shrink_to_fit();
        }
    }

    /// Aggressive cleanup when get-or-create finds the manager close to
    /// capacity: reaps the most idle channels first, with a halved idle
    /// threshold, until occupancy is back under the target.
    fn emergency_cleanup(&self) {
        if self
            .cleanup_in_progress
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            // Another cleanup is already running
            return;
        }

        let _guard = CleanupGuard {
            flag: &self.cleanup_in_progress,
        };

        let before = self.active_count.load(Ordering::Acquire);
        if before <= CLEANUP_TARGET {
            return;
        }

        info!("emergency cleanup starting ({} channels tracked)", before);

        let to_remove = before.saturating_sub(CLEANUP_TARGET);
        let inactive_threshold = (self.inactive_duration_ms / EMERGENCY_CLEANUP_INACTIVE_FACTOR)
            .max(EMERGENCY_CLEANUP_MIN_INACTIVE_MS);

        // Collect idle candidates, most idle first
        let mut candidates: Vec<(u64, SocketAddr)> = Vec::with_capacity(to_remove);
        for entry in self.pacers.iter() {
            if entry.value().is_inactive(inactive_threshold) {
                let last = entry.value().last_access_ms.load(Ordering::Relaxed);
                candidates.push((last, *entry.key()));
            }
        }
        candidates.sort_by_key(|(last, _)| *last);

        let mut removed = 0u64;
        for (_, addr) in candidates.into_iter().take(to_remove) {
            if self.pacers.remove(&addr).is_some() {
                self.active_count.fetch_sub(1, Ordering::AcqRel);
                removed += 1;
            }
        }

        if removed > 0 {
            self.total_cleaned.fetch_add(removed, Ordering::Relaxed);
            info!("emergency cleanup reaped {} channels (wanted {})", removed, to_remove);
        } else {
            warn!(
                "emergency cleanup found no idle channels to reap ({} tracked)",
                before
            );
        }
    }

    /// Number of channels currently tracked.
    #[inline]
    pub fn active_channels(&self) -> usize {
        self.active_count.load(Ordering::Acquire)
    }

    /// Whether no channels are tracked.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.active_channels() == 0
    }

    /// Snapshot of the manager's bookkeeping.
    pub fn stats(&self) -> ManagerStats {
        let active = self.active_channels();
        ManagerStats {
            active_channels: active,
            total_created: self.total_created.load(Ordering::Relaxed),
            total_cleaned: self.total_cleaned.load(Ordering::Relaxed),
            capacity_used: active as f64 / MAX_TRACKED_CHANNELS as f64,
            max_capacity: MAX_TRACKED_CHANNELS,
        }
    }

    /// Spawns a detached background thread that sweeps idle channels on
    /// the configured interval, forever.
    ///
    /// For a thread that can be stopped, use
    /// [`start_cleanup_thread_with_shutdown`](Self::start_cleanup_thread_with_shutdown).
    pub fn start_cleanup_thread(self: Arc<Self>) -> thread::JoinHandle<()> {
        let manager = self.clone();

        thread::Builder::new()
            .name("pacer-cleanup".to_string())
            .spawn(move || {
                info!(
                    "started cleanup thread (interval: {}ms, idle threshold: {}ms)",
                    manager.cleanup_interval_ms, manager.inactive_duration_ms
                );

                loop {
                    thread::sleep(Duration::from_millis(manager.cleanup_interval_ms));
                    manager.cleanup();

                    let active = manager.active_channels();
                    if active > CLEANUP_THRESHOLD {
                        warn!(
                            "high channel usage: {} tracked ({}% of capacity)",
                            active,
                            (active * 100) / MAX_TRACKED_CHANNELS
                        );
                    }
                }
            })
            .expect("failed to spawn cleanup thread")
    }

    /// Spawns a cleanup thread that stops when the returned sender is
    /// signalled (or dropped).
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::sync::Arc;
    /// use pacer::{ChannelPacerManager, PacerConfig};
    ///
    /// let manager = Arc::new(ChannelPacerManager::with_cleanup_settings(
    ///     PacerConfig::new(100_000, 28, 1500),
    ///     50,
    ///     1000,
    /// ));
    /// let (handle, shutdown) = manager.clone().start_cleanup_thread_with_shutdown();
    ///
    /// // ... run the transport ...
    ///
    /// shutdown.send(()).ok();
    /// handle.join().unwrap();
    /// ```
    pub fn start_cleanup_thread_with_shutdown(
        self: Arc<Self>,
    ) -> (thread::JoinHandle<()>, mpsc::Sender<()>) {
        let manager = self.clone();
        let (tx, rx) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name("pacer-cleanup".to_string())
            .spawn(move || {
                info!(
                    "started stoppable cleanup thread (interval: {}ms)",
                    manager.cleanup_interval_ms
                );

                loop {
                    match rx.recv_timeout(Duration::from_millis(manager.cleanup_interval_ms)) {
                        // Shutdown signal, or the sender side went away
                        Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                            info!("cleanup thread stopping");
                            break;
                        }
                        Err(mpsc::RecvTimeoutError::Timeout) => {
                            manager.cleanup();
                        }
                    }
                }
            })
            .expect("failed to spawn cleanup thread");

        (handle, tx)
    }
}

impl std::fmt::Debug for ChannelPacerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelPacerManager")
            .field("active_channels", &self.active_channels())
            .field("config", &self.config)
            .field("cleanup_interval_ms", &self.cleanup_interval_ms)
            .field("inactive_duration_ms", &self.inactive_duration_ms)
            .finish()
    }
}

/// Resets the cleanup-in-progress flag when an emergency cleanup exits.
struct CleanupGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for CleanupGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Bookkeeping snapshot of a [`ChannelPacerManager`].
#[derive(Debug, Clone)]
pub struct ManagerStats {
    /// Channels currently tracked.
    pub active_channels: usize,

    /// Pacers created since startup.
    pub total_created: u64,

    /// Pacers reaped since startup.
    pub total_cleaned: u64,

    /// Fraction of capacity in use, 0.0 to 1.0.
    pub capacity_used: f64,

    /// Maximum channels the manager will track.
    pub max_capacity: usize,
}

impl ManagerStats {
    /// Whether the manager is close to its channel capacity.
    #[inline]
    pub fn near_capacity(&self) -> bool {
        self.capacity_used >= 0.9
    }
}

impl std::fmt::Display for ManagerStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "channels: {}/{} ({:.1}% used), created: {}, cleaned: {}",
            self.active_channels,
            self.max_capacity,
            self.capacity_used * 100.0,
            self.total_created,
            self.total_cleaned
        )
    }
}
