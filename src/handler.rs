//! Manager-side change-event handler.
//!
//! Applies a received `pldmPDRRepositoryChgEvent` to the consolidated
//! repository. Handle-format events are applied incrementally through the
//! terminus's handle map; refresh and type-format events delegate to a
//! full re-sync. The robustness rule: a partial delta never survives — any
//! sub-operation failure aborts incremental application and converges via
//! [`PdrManager::sync_terminus`].

use crate::chg_event::{ChangeEvent, ChangeEventFormat, ChangeOp, ChangeRecord};
use crate::error::{PdrError, PdrResult};
use crate::fetch;
use crate::manager::{PdrManager, insert_reassembled};

/// Process a received PDR repository change event from terminus `eid`.
///
/// Returns the decode error on malformed input. Otherwise either the
/// delta applies cleanly, or the outcome of the fallback re-sync is
/// returned.
pub fn handle_chg_event(mgr: &mut PdrManager, eid: u8, event_data: &[u8]) -> PdrResult<()> {
    let event = ChangeEvent::decode(event_data)?;

    // Type-based deltas are not applied incrementally; a full re-sync is
    // the safe interpretation for both of these formats.
    if matches!(
        event.format,
        ChangeEventFormat::RefreshEntireRepository | ChangeEventFormat::PdrTypes
    ) {
        return mgr.sync_terminus(eid);
    }

    let idx = mgr
        .find_terminus_idx(eid)
        .ok_or_else(|| PdrError::NotFound(format!("terminus eid {eid}")))?;

    for record in &event.records {
        if apply_record(mgr, idx, record).is_err() {
            // Incremental application failed; converge via full re-sync.
            return mgr.sync_terminus(eid);
        }
    }
    Ok(())
}

fn apply_record(mgr: &mut PdrManager, idx: usize, record: &ChangeRecord) -> PdrResult<()> {
    match record.op {
        ChangeOp::RecordsDeleted => apply_deletes(mgr, idx, &record.entries),
        ChangeOp::RecordsAdded => apply_adds(mgr, idx, &record.entries),
        ChangeOp::RecordsModified => apply_modifies(mgr, idx, &record.entries),
        // Excluded by validation (V2); reaching here means corruption.
        ChangeOp::RefreshAllRecords => Err(PdrError::Validation(
            "refreshAllRecords is not valid in a handle-format event".into(),
        )),
    }
}

/// Deletes are idempotent: an unknown remote handle is skipped, so the
/// same delete event applied twice is a no-op the second time.
fn apply_deletes(mgr: &mut PdrManager, idx: usize, entries: &[u32]) -> PdrResult<()> {
    let PdrManager { repo, termini, .. } = mgr;
    let term = &mut termini[idx];
    for &remote_handle in entries {
        let Some(local_handle) = term.local_handle(remote_handle) else {
            continue;
        };
        repo.remove_record(local_handle)?;
        term.remove_mapping(remote_handle);
        term.local_record_count = term.local_record_count.saturating_sub(1);
    }
    Ok(())
}

fn apply_adds(mgr: &mut PdrManager, idx: usize, entries: &[u32]) -> PdrResult<()> {
    let PdrManager {
        repo,
        termini,
        transport,
    } = mgr;
    let term = &mut termini[idx];
    for &remote_handle in entries {
        fetch::fetch_pdr_by_handle(transport.as_ref(), term.eid, &mut term.fetch_ctx, remote_handle)?;
        let remapped = term.next_remapped(idx);
        insert_reassembled(repo, &term.fetch_ctx, remapped)?;
        term.add_mapping(remote_handle, remapped)?;
        term.local_record_count += 1;
    }
    Ok(())
}

/// A modify re-fetches the record and re-inserts it under the same local
/// handle, keeping the existing mapping valid. Unknown remote handles are
/// skipped like deletes.
fn apply_modifies(mgr: &mut PdrManager, idx: usize, entries: &[u32]) -> PdrResult<()> {
    let PdrManager {
        repo,
        termini,
        transport,
    } = mgr;
    let term = &mut termini[idx];
    for &remote_handle in entries {
        let Some(local_handle) = term.local_handle(remote_handle) else {
            continue;
        };
        repo.remove_record(local_handle)?;

        if let Err(e) = fetch::fetch_pdr_by_handle(
            transport.as_ref(),
            term.eid,
            &mut term.fetch_ctx,
            remote_handle,
        ) {
            term.remove_mapping(remote_handle);
            term.local_record_count = term.local_record_count.saturating_sub(1);
            return Err(e);
        }
        if let Err(e) = insert_reassembled(repo, &term.fetch_ctx, local_handle) {
            term.remove_mapping(remote_handle);
            term.local_record_count = term.local_record_count.saturating_sub(1);
            return Err(e);
        }
    }
    Ok(())
}
