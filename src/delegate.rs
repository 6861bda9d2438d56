//! Delegate fan-out (spec §2 item 6, §6 "Delegate interface").
//!
//! Observers register in an ordered list and are invoked in registration
//! order. Per the design notes, the list is snapshotted before each
//! dispatch pass so a delegate that reenters the channel (e.g. pausing it
//! from inside a callback) cannot observe or mutate the list mid-iteration.

use crate::error::DeliveryError;
use crate::pause::PauseId;
use crate::record::{Flags, Log};
use std::sync::Arc;

/// Lifecycle observer for a Channel Unit.
///
/// All methods have no-op default implementations; implement only the
/// hooks you need. Callback order for a single record is I6:
/// `prepare_log` → `did_prepare_log` → `did_complete_enqueueing_log` →
/// zero or more of `will_send_log`, `did_succeed_sending_log`,
/// `did_fail_sending_log`.
pub trait Delegate: Send + Sync {
    /// Called first, before persistence, even if the record is later
    /// filtered or discarded. Delegates may attach transient metadata here;
    /// per spec §4.2, this runs regardless of persistence outcome so
    /// observability stays symmetric.
    fn prepare_log(&self, _record: &mut Log) {}

    /// Called once an internal monotonic id has been assigned. Per I7,
    /// `record`'s id/timestamp/device/user fields are final after this
    /// point.
    fn did_prepare_log(&self, _record: &Log, _internal_id: u64, _flags: Flags) {}

    /// Called once enqueueing bookkeeping (not persistence) has completed.
    fn did_complete_enqueueing_log(&self, _record: &Log, _internal_id: u64) {}

    /// Veto persistence of this record. If any delegate returns `true` the
    /// record is dropped silently (`FilteredOut`): no error, no save.
    fn should_filter_log(&self, _record: &Log) -> bool {
        false
    }

    fn will_send_log(&self, _record: &Log) {}
    fn did_succeed_sending_log(&self, _record: &Log) {}
    fn did_fail_sending_log(&self, _record: &Log, _error: &DeliveryError) {}

    /// Fired on every id-axis pause transition (a `pause(id)` call that
    /// actually added `id` to the pause set), including ingestion-driven
    /// pauses.
    fn did_pause(&self, _identifier: &PauseId) {}

    /// Fired on every id-axis resume transition (a `resume(id)` call that
    /// actually removed `id`).
    fn did_resume(&self, _identifier: &PauseId) {}
}

/// A registered delegate, type-erased and shared.
pub type DelegateHandle = Arc<dyn Delegate>;

/// Take a snapshot of the delegate list's current contents, suitable for a
/// single dispatch pass. A plain `Vec::clone` is the whole mechanism: `Arc`
/// clones are cheap and the snapshot is immune to concurrent registration
/// because both live behind the same serial execution context.
pub(crate) fn snapshot(delegates: &[DelegateHandle]) -> Vec<DelegateHandle> {
    delegates.to_vec()
}
