//! Terminus-side change tracker.
//!
//! Accumulates pending add/delete/modify entries as the local repository
//! mutates, then composes one `pldmPDRRepositoryChgEvent` in the canonical
//! deletes → adds → modifies order. If the composed event would exceed the
//! transport MTU, the tracker refuses to emit a potentially-truncated delta
//! and falls back to `refreshEntireRepository` (the peer re-syncs in full).

use crate::chg_event::{ChangeEvent, ChangeEventFormat, ChangeOp, ChangeRecord};
use crate::error::{PdrError, PdrResult};
use crate::formats::CHG_EVENT_MAX_ENTRIES;

/// Accumulator of pending repository changes on the terminus side.
#[derive(Debug, Default)]
pub struct ChangeTracker {
    deletes: Vec<u32>,
    adds: Vec<u32>,
    modifies: Vec<u32>,
}

impl ChangeTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    fn push(pending: &mut Vec<u32>, entry: u32, what: &str) -> PdrResult<()> {
        if pending.len() >= CHG_EVENT_MAX_ENTRIES {
            return Err(PdrError::Full(format!("pending {what} entries")));
        }
        pending.push(entry);
        Ok(())
    }

    /// Record an added PDR (entry is a record handle or a PDR type,
    /// matching the format the event will be built with).
    pub fn record_add(&mut self, entry: u32) -> PdrResult<()> {
        Self::push(&mut self.adds, entry, "add")
    }

    /// Record a deleted PDR.
    pub fn record_delete(&mut self, entry: u32) -> PdrResult<()> {
        Self::push(&mut self.deletes, entry, "delete")
    }

    /// Record a modified PDR.
    pub fn record_modify(&mut self, entry: u32) -> PdrResult<()> {
        Self::push(&mut self.modifies, entry, "modify")
    }

    /// Whether any change is pending.
    pub fn has_changes(&self) -> bool {
        !(self.deletes.is_empty() && self.adds.is_empty() && self.modifies.is_empty())
    }

    /// Compose an event from the accumulated changes.
    ///
    /// With nothing pending, or when `max_msg_size > 0` and the encoded
    /// delta would exceed it, this returns `refreshEntireRepository`
    /// instead (the size fallback). The tracker is not cleared; call
    /// [`ChangeTracker::clear`] once the event has been delivered.
    pub fn build_event(&self, format: ChangeEventFormat, max_msg_size: u16) -> ChangeEvent {
        if !self.has_changes() || format == ChangeEventFormat::RefreshEntireRepository {
            return ChangeEvent::refresh_entire_repository();
        }

        let mut records = Vec::new();
        for (op, pending) in [
            (ChangeOp::RecordsDeleted, &self.deletes),
            (ChangeOp::RecordsAdded, &self.adds),
            (ChangeOp::RecordsModified, &self.modifies),
        ] {
            if !pending.is_empty() {
                records.push(ChangeRecord {
                    op,
                    entries: pending.clone(),
                });
            }
        }

        let event = ChangeEvent { format, records };
        if max_msg_size > 0 && event.encoded_size() > usize::from(max_msg_size) {
            return ChangeEvent::refresh_entire_repository();
        }
        event
    }

    /// Drop all pending changes.
    pub fn clear(&mut self) {
        self.deletes.clear();
        self.adds.clear();
        self.modifies.clear();
    }
}
