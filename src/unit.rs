//! Channel Unit: per-group state and the public handle to it (spec §3, §4).
//!
//! The state machine itself lives in [`crate::group`]'s actor loop, which
//! is the sole writer of [`UnitState`]; this module defines the data it
//! owns and the cheap, lock-backed snapshot read synchronously by
//! [`ChannelUnit`] handles (spec §4.1: "Synchronous variants exist only for
//! teardown tests").

use crate::config::GroupConfig;
use crate::delegate::DelegateHandle;
use crate::pause::PauseRegistry;
use crate::record::{Device, Log};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// The four states of spec §4.9's state machine. `target-key-gated` is
/// tracked orthogonally on [`UnitState`] via `PauseRegistry` and does not
/// appear here, since it narrows the eligible record set without changing
/// state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnitLifecycle {
    Active,
    PausedById,
    Disabled,
    DisabledWiped,
}

/// A cheap, synchronous point-in-time view of a unit's state, for tests and
/// diagnostics. Always slightly behind the authoritative state owned by the
/// actor (it is updated after each command is processed), which is why the
/// spec marks synchronous reads as a test-only affordance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UnitSnapshot {
    pub enabled: bool,
    pub paused_by_id: bool,
    pub discard_logs: bool,
    pub items_count: usize,
    pub pending_batch_count: usize,
}

impl UnitSnapshot {
    pub fn paused(&self) -> bool {
        self.paused_by_id || !self.enabled
    }

    pub fn lifecycle(&self) -> UnitLifecycle {
        match (self.enabled, self.discard_logs, self.paused_by_id) {
            (false, true, _) => UnitLifecycle::DisabledWiped,
            (false, false, _) => UnitLifecycle::Disabled,
            (true, _, true) => UnitLifecycle::PausedById,
            (true, _, false) => UnitLifecycle::Active,
        }
    }
}

impl Default for UnitLifecycle {
    fn default() -> Self {
        UnitLifecycle::Active
    }
}

/// Authoritative, actor-owned state for one group's Channel Unit.
pub(crate) struct UnitState {
    pub config: GroupConfig,
    pub delegates: Vec<DelegateHandle>,
    pub pause: PauseRegistry,
    pub enabled: bool,
    pub discard_logs: bool,
    pub items_count: usize,
    /// Ordered set of batch ids currently in flight, oldest first.
    pub pending_batch_ids: Vec<String>,
    /// Records belonging to each in-flight batch, kept so that
    /// disable-with-wipe can synthesize `did_fail_sending_log` and so a
    /// completion for an already-wiped batch can be recognized as stale and
    /// dropped.
    pub in_flight_records: HashMap<String, Vec<Log>>,
    pub device: Device,
    pub ambient_user_id: Option<String>,
    pub next_internal_id: u64,
    pub flush_armed: bool,
    pub flush_timer_key: Option<tokio_util::time::delay_queue::Key>,
    /// Reserved backpressure slots for flushes that have been dispatched to
    /// the store but have not yet produced a `batch_id` (spec §4.3's
    /// `pending_batch_queue_full` is defined purely over `pending_batch_ids`,
    /// but that undercounts in-flight loads — this closes the gap so
    /// concurrent flushes never overshoot `pending_batches_limit`).
    pub in_flight_loads: usize,
    pub snapshot: Arc<RwLock<UnitSnapshot>>,
}

impl UnitState {
    pub fn new(config: GroupConfig, snapshot: Arc<RwLock<UnitSnapshot>>) -> Self {
        Self {
            config,
            delegates: Vec::new(),
            pause: PauseRegistry::default(),
            enabled: true,
            discard_logs: false,
            items_count: 0,
            pending_batch_ids: Vec::new(),
            in_flight_records: HashMap::new(),
            device: Device::default(),
            ambient_user_id: None,
            next_internal_id: 0,
            flush_armed: false,
            flush_timer_key: None,
            in_flight_loads: 0,
            snapshot,
        }
    }

    pub fn paused(&self) -> bool {
        self.pause.is_paused_by_id() || !self.enabled
    }

    pub fn pending_batch_queue_full(&self) -> bool {
        self.pending_batch_ids.len() + self.in_flight_loads >= self.config.pending_batches_limit
    }

    pub fn sync_snapshot(&self) {
        *self.snapshot.write() = UnitSnapshot {
            enabled: self.enabled,
            paused_by_id: self.pause.is_paused_by_id(),
            discard_logs: self.discard_logs,
            items_count: self.items_count,
            pending_batch_count: self.pending_batch_ids.len(),
        };
    }
}
