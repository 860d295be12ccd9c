//! Multi-terminus PDR manager.
//!
//! The manager discovers remote termini, fetches their PDRs over the
//! transport capability, remaps record handles into disjoint per-terminus
//! ranges, and serves the consolidated view through the usual repository
//! commands.
//!
//! ## Public invariants (must not change without a format bump)
//!
//! - **Handle remapping**: terminus slot `i` owns the consolidated range
//!   `((i+1) << 16) ..= ((i+1) << 16) | 0xFFFF`; the slot index is
//!   recoverable as `(handle >> 16) - 1`.
//! - Every live consolidated record belongs to exactly one terminus, and
//!   that terminus's handle map holds exactly one entry for it.
//! - A modify preserves the local handle; an add consumes a fresh
//!   sequence number; a delete removes both record and mapping.
//! - No two termini share an endpoint id.

use crate::error::{PdrError, PdrResult};
use crate::fetch::{self, FetchContext};
use crate::formats::{PDR_MAX_RECORD_COUNT, PDR_MGR_MAX_TERMINI, PdrHeader};
use crate::repo::{PdrMatch, PdrRepo, PdrTransfer, RepoInfo};
use crate::transport::Transport;
use std::ops::RangeInclusive;
use std::sync::Arc;

/// Width of the per-terminus handle range selector.
const HANDLE_RANGE_SHIFT: u32 = 16;
/// Mask selecting the per-terminus sequence number within a handle.
const HANDLE_SUB_MASK: u32 = 0xFFFF;

/// Compute the consolidated handle for terminus slot `terminus_idx` and
/// per-terminus sequence number `seq`.
///
/// The eight ranges are disjoint and unreachable by the repository's auto
/// allocator (which starts at 1).
pub fn remap_handle(terminus_idx: usize, seq: u16) -> u32 {
    ((terminus_idx as u32 + 1) << HANDLE_RANGE_SHIFT) | (u32::from(seq) & HANDLE_SUB_MASK)
}

/// Lifecycle of one terminus slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TerminusState {
    /// Slot is free.
    #[default]
    Unused,
    /// Registered, never synced.
    Discovered,
    /// A sync is in flight.
    Syncing,
    /// Consolidated view matches the remote's last known signature.
    Synced,
    /// The remote's signature changed since the last sync.
    Stale,
    /// The last sync failed; consolidated data may be stale or partial.
    Error,
}

/// Remote-to-local handle mapping for one consolidated record.
#[derive(Debug, Clone, Copy)]
struct HandleMapEntry {
    remote_handle: u32,
    local_handle: u32,
}

/// Per-terminus tracking: identity, sync state, fetch progress, and the
/// remote-to-local handle map used by incremental updates.
#[derive(Debug)]
pub struct Terminus {
    pub(crate) state: TerminusState,
    pub(crate) eid: u8,
    pub(crate) tid: u8,
    pub(crate) terminus_handle: u16,
    pub(crate) remote_record_count: u32,
    pub(crate) remote_repo_size: u32,
    pub(crate) last_signature: u32,
    pub(crate) local_handle_seq: u16,
    pub(crate) local_record_count: u16,
    pub(crate) fetch_ctx: FetchContext,
    handle_map: Vec<HandleMapEntry>,
}

impl Terminus {
    fn unused() -> Self {
        Self {
            state: TerminusState::Unused,
            eid: 0,
            tid: 0,
            terminus_handle: 0,
            remote_record_count: 0,
            remote_repo_size: 0,
            last_signature: 0,
            local_handle_seq: 1,
            local_record_count: 0,
            fetch_ctx: FetchContext::new(),
            handle_map: Vec::new(),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TerminusState {
        self.state
    }

    /// MCTP endpoint id.
    pub fn eid(&self) -> u8 {
        self.eid
    }

    /// PLDM terminus id.
    pub fn tid(&self) -> u8 {
        self.tid
    }

    /// PLDM terminus handle.
    pub fn terminus_handle(&self) -> u16 {
        self.terminus_handle
    }

    /// Record count last reported by the remote.
    pub fn remote_record_count(&self) -> u32 {
        self.remote_record_count
    }

    /// Repository size last reported by the remote.
    pub fn remote_repo_size(&self) -> u32 {
        self.remote_repo_size
    }

    /// Signature (or pseudo-signature) from the last info fetch.
    pub fn last_signature(&self) -> u32 {
        self.last_signature
    }

    /// Number of this terminus's records in the consolidated repository.
    pub fn local_record_count(&self) -> u16 {
        self.local_record_count
    }

    /// Local (remapped) handle for a remote handle, if mapped.
    pub fn local_handle(&self, remote_handle: u32) -> Option<u32> {
        self.handle_map
            .iter()
            .find(|m| m.remote_handle == remote_handle)
            .map(|m| m.local_handle)
    }

    pub(crate) fn add_mapping(&mut self, remote_handle: u32, local_handle: u32) -> PdrResult<()> {
        if self.handle_map.len() >= PDR_MAX_RECORD_COUNT {
            return Err(PdrError::Full("handle map".into()));
        }
        self.handle_map.push(HandleMapEntry {
            remote_handle,
            local_handle,
        });
        Ok(())
    }

    pub(crate) fn remove_mapping(&mut self, remote_handle: u32) {
        self.handle_map.retain(|m| m.remote_handle != remote_handle);
    }

    /// Allocate the next remapped handle in this terminus's range.
    pub(crate) fn next_remapped(&mut self, terminus_idx: usize) -> u32 {
        let handle = remap_handle(terminus_idx, self.local_handle_seq);
        self.local_handle_seq = self.local_handle_seq.wrapping_add(1);
        handle
    }
}

/// Insert the context's reassembled record into the consolidated
/// repository under `local_handle`. Returns the record's parsed header.
pub(crate) fn insert_reassembled(
    repo: &mut PdrRepo<'static>,
    ctx: &FetchContext,
    local_handle: u32,
) -> PdrResult<PdrHeader> {
    let record = ctx.record();
    if record.len() < PdrHeader::SIZE {
        return Err(PdrError::Malformed(
            "reassembled PDR shorter than its common header".into(),
        ));
    }
    let hdr = PdrHeader::parse(record)?;
    if record.len() < hdr.total_size() {
        return Err(PdrError::Malformed(
            "reassembled PDR shorter than its advertised body".into(),
        ));
    }
    let body = &record[PdrHeader::SIZE..hdr.total_size()];
    repo.add_record_with_handle(local_handle, hdr.pdr_type, body)?;
    Ok(hdr)
}

/// Manager-role owner: consolidated repository, terminus slots, and the
/// transport capability.
pub struct PdrManager {
    pub(crate) repo: PdrRepo<'static>,
    pub(crate) termini: [Terminus; PDR_MGR_MAX_TERMINI],
    pub(crate) transport: Arc<dyn Transport>,
}

impl PdrManager {
    /// Create a manager with an empty consolidated repository.
    pub fn new(transport: impl Into<Arc<dyn Transport>>) -> Self {
        Self {
            repo: PdrRepo::new(),
            termini: std::array::from_fn(|_| Terminus::unused()),
            transport: transport.into(),
        }
    }

    pub(crate) fn find_terminus_idx(&self, eid: u8) -> Option<usize> {
        self.termini
            .iter()
            .position(|t| t.state != TerminusState::Unused && t.eid == eid)
    }

    /// Register a remote endpoint. Returns the assigned slot index.
    ///
    /// Fails on a duplicate eid or when all slots are taken.
    pub fn add_terminus(&mut self, eid: u8, terminus_handle: u16, tid: u8) -> PdrResult<usize> {
        if self.find_terminus_idx(eid).is_some() {
            return Err(PdrError::Validation(format!(
                "terminus eid {eid} already registered"
            )));
        }
        let idx = self
            .termini
            .iter()
            .position(|t| t.state == TerminusState::Unused)
            .ok_or_else(|| PdrError::Full("terminus slots".into()))?;

        let term = &mut self.termini[idx];
        *term = Terminus::unused();
        term.state = TerminusState::Discovered;
        term.eid = eid;
        term.tid = tid;
        term.terminus_handle = terminus_handle;
        Ok(idx)
    }

    /// Unregister a terminus, purging its consolidated records.
    pub fn remove_terminus(&mut self, eid: u8) -> PdrResult<()> {
        let idx = self
            .find_terminus_idx(eid)
            .ok_or_else(|| PdrError::NotFound(format!("terminus eid {eid}")))?;
        self.purge_terminus(idx);
        self.termini[idx].state = TerminusState::Unused;
        Ok(())
    }

    /// Read access to a terminus slot by eid.
    pub fn terminus(&self, eid: u8) -> Option<&Terminus> {
        self.find_terminus_idx(eid).map(|i| &self.termini[i])
    }

    /// Current state of a terminus.
    pub fn terminus_state(&self, eid: u8) -> PdrResult<TerminusState> {
        self.terminus(eid)
            .map(|t| t.state)
            .ok_or_else(|| PdrError::NotFound(format!("terminus eid {eid}")))
    }

    /// Local (remapped) handle for a terminus's remote handle, if mapped.
    pub fn lookup_local_handle(&self, eid: u8, remote_handle: u32) -> Option<u32> {
        self.terminus(eid)?.local_handle(remote_handle)
    }

    /// The consolidated handle range owned by terminus slot `idx`.
    fn terminus_range(idx: usize) -> RangeInclusive<u32> {
        let base = (idx as u32 + 1) << HANDLE_RANGE_SHIFT;
        base..=(base | HANDLE_SUB_MASK)
    }

    /// Remove every consolidated record in one terminus's handle range.
    pub(crate) fn purge_terminus(&mut self, idx: usize) {
        self.repo.remove_in_range(Self::terminus_range(idx));
    }

    /// Fully synchronize one terminus.
    ///
    /// Fetches the remote's info and signature, short-circuits when an
    /// already-synced terminus reports an unchanged signature, and
    /// otherwise purges and re-fetches every record, remapping handles
    /// into the terminus's range. Any failure leaves the slot in
    /// [`TerminusState::Error`]; the next `sync_terminus` retries.
    pub fn sync_terminus(&mut self, eid: u8) -> PdrResult<()> {
        let idx = self
            .find_terminus_idx(eid)
            .ok_or_else(|| PdrError::NotFound(format!("terminus eid {eid}")))?;

        let old_sig = self.termini[idx].last_signature;
        let was_synced = matches!(
            self.termini[idx].state,
            TerminusState::Synced | TerminusState::Stale
        );
        self.termini[idx].state = TerminusState::Syncing;

        let info = match fetch::fetch_repo_info(self.transport.as_ref(), eid) {
            Ok(info) => info,
            Err(e) => {
                self.termini[idx].state = TerminusState::Error;
                return Err(e);
            }
        };
        {
            let term = &mut self.termini[idx];
            term.remote_record_count = info.record_count;
            term.remote_repo_size = info.repository_size;
            term.last_signature = info.signature;
        }

        // Fast path: nothing changed since the last sync.
        if was_synced && old_sig != 0 && info.signature == old_sig {
            self.termini[idx].state = TerminusState::Synced;
            return Ok(());
        }

        self.purge_terminus(idx);

        let Self {
            repo,
            termini,
            transport,
        } = self;
        let term = &mut termini[idx];
        term.local_handle_seq = 1;
        term.local_record_count = 0;
        term.handle_map.clear();
        term.fetch_ctx.reset();

        for _ in 0..term.remote_record_count {
            if let Err(e) = Self::sync_one_record(repo, transport.as_ref(), term, idx) {
                term.state = TerminusState::Error;
                return Err(e);
            }
            // Continuation handle 0 means the remote has no more records.
            if term.fetch_ctx.next_record_handle == 0 {
                break;
            }
        }

        term.state = TerminusState::Synced;
        Ok(())
    }

    fn sync_one_record(
        repo: &mut PdrRepo<'static>,
        transport: &dyn Transport,
        term: &mut Terminus,
        idx: usize,
    ) -> PdrResult<()> {
        fetch::fetch_one_pdr(transport, term.eid, &mut term.fetch_ctx)?;
        let remapped = term.next_remapped(idx);
        let hdr = insert_reassembled(repo, &term.fetch_ctx, remapped)?;
        term.local_record_count += 1;
        term.add_mapping(hdr.record_handle, remapped)?;
        Ok(())
    }

    /// Sync every terminus in `Discovered` or `Stale` state.
    ///
    /// Keeps going after a failure and returns the first error, so one
    /// unreachable terminus does not starve the rest.
    pub fn sync_all(&mut self) -> PdrResult<()> {
        let mut first_err = None;
        for idx in 0..PDR_MGR_MAX_TERMINI {
            if matches!(
                self.termini[idx].state,
                TerminusState::Discovered | TerminusState::Stale
            ) {
                let eid = self.termini[idx].eid;
                if let Err(e) = self.sync_terminus(eid) {
                    first_err.get_or_insert(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Lightweight change probe: re-fetch the remote's signature and
    /// compare. A changed signature moves a `Synced` terminus to `Stale`.
    pub fn check_for_changes(&mut self, eid: u8) -> PdrResult<bool> {
        let idx = self
            .find_terminus_idx(eid)
            .ok_or_else(|| PdrError::NotFound(format!("terminus eid {eid}")))?;
        let old_sig = self.termini[idx].last_signature;

        let info = fetch::fetch_repo_info(self.transport.as_ref(), eid)?;
        let term = &mut self.termini[idx];
        term.remote_record_count = info.record_count;
        term.remote_repo_size = info.repository_size;
        term.last_signature = info.signature;

        let changed = old_sig == 0 || info.signature != old_sig;
        if changed && term.state == TerminusState::Synced {
            term.state = TerminusState::Stale;
        }
        Ok(changed)
    }

    /// Which terminus a consolidated record handle came from.
    pub fn lookup_origin(&self, handle: u32) -> PdrResult<u8> {
        let idx = (handle >> HANDLE_RANGE_SHIFT)
            .checked_sub(1)
            .filter(|&i| (i as usize) < PDR_MGR_MAX_TERMINI)
            .ok_or_else(|| {
                PdrError::NotFound(format!("handle {handle:#010x} is outside every terminus range"))
            })? as usize;
        let term = &self.termini[idx];
        if term.state == TerminusState::Unused {
            return Err(PdrError::NotFound(format!(
                "handle {handle:#010x} maps to an unused terminus slot"
            )));
        }
        Ok(term.eid)
    }

    /// Read access to the consolidated repository.
    pub fn repo(&self) -> &PdrRepo<'static> {
        &self.repo
    }

    /// Consolidated repository aggregates.
    pub fn get_repo_info(&self) -> &RepoInfo {
        self.repo.info()
    }

    /// Serve a GetPDR chunk from the consolidated repository.
    pub fn get_pdr(
        &self,
        record_handle: u32,
        data_transfer_handle: u32,
    ) -> PdrResult<PdrTransfer<'_>> {
        self.repo.get_pdr(record_handle, data_transfer_handle)
    }

    /// Find a consolidated record by PDR type.
    pub fn find_pdr(&self, pdr_type: u8, start_handle: u32) -> PdrResult<PdrMatch<'_>> {
        self.repo.find_pdr(pdr_type, start_handle)
    }

    /// Signature of the consolidated repository.
    pub fn repo_signature(&mut self) -> u32 {
        self.repo.signature()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LoopbackTransport;

    fn manager_over(transport: &LoopbackTransport) -> PdrManager {
        let transport: Arc<dyn Transport> = Arc::new(transport.clone());
        PdrManager::new(transport)
    }

    #[test]
    fn remap_partitions_the_handle_space() {
        for i in 0..PDR_MGR_MAX_TERMINI {
            for j in 0..PDR_MGR_MAX_TERMINI {
                if i == j {
                    continue;
                }
                // Ranges are disjoint: extremes of one never land in the other.
                for seq in [0u16, 1, 0xFFFF] {
                    assert!(!PdrManager::terminus_range(j).contains(&remap_handle(i, seq)));
                }
            }
        }
        assert_eq!(remap_handle(0, 1), 0x10001);
        assert_eq!(remap_handle(7, 0xFFFF), 0x8FFFF);
    }

    #[test]
    fn add_terminus_rejects_duplicates_and_fills_slots() {
        let mut mgr = manager_over(&LoopbackTransport::new());
        assert_eq!(mgr.add_terminus(10, 100, 1).unwrap(), 0);
        assert!(matches!(
            mgr.add_terminus(10, 101, 2),
            Err(PdrError::Validation(_))
        ));
        for eid in 11..18 {
            mgr.add_terminus(eid, 0, 0).unwrap();
        }
        assert!(matches!(
            mgr.add_terminus(99, 0, 0),
            Err(PdrError::Full(_))
        ));
    }

    #[test]
    fn slot_is_reusable_after_removal() {
        let mut mgr = manager_over(&LoopbackTransport::new());
        mgr.add_terminus(10, 0, 0).unwrap();
        mgr.remove_terminus(10).unwrap();
        assert!(matches!(
            mgr.terminus_state(10),
            Err(PdrError::NotFound(_))
        ));
        assert_eq!(mgr.add_terminus(11, 0, 0).unwrap(), 0);
    }

    #[test]
    fn sync_consolidates_remote_records() {
        let transport = LoopbackTransport::new();
        transport.add_endpoint(7);
        transport
            .with_endpoint(7, |ep| {
                ep.repo.add_record(1, &[0xA1]).unwrap();
                ep.repo.add_record(2, &[0xB2, 0xB3]).unwrap();
            })
            .unwrap();

        let mut mgr = manager_over(&transport);
        mgr.add_terminus(7, 700, 7).unwrap();
        mgr.sync_terminus(7).unwrap();

        assert_eq!(mgr.terminus_state(7).unwrap(), TerminusState::Synced);
        assert_eq!(mgr.get_repo_info().record_count, 2);
        assert_eq!(mgr.lookup_local_handle(7, 1), Some(0x10001));
        assert_eq!(mgr.lookup_local_handle(7, 2), Some(0x10002));

        let xfer = mgr.get_pdr(0x10002, 0).unwrap();
        assert_eq!(&xfer.data[PdrHeader::SIZE..], [0xB2, 0xB3]);
        assert_eq!(mgr.lookup_origin(0x10002).unwrap(), 7);
    }

    #[test]
    fn unchanged_signature_skips_the_refetch() {
        let transport = LoopbackTransport::new();
        transport.add_endpoint(7);
        transport
            .with_endpoint(7, |ep| {
                ep.repo.add_record(1, &[1]).unwrap();
            })
            .unwrap();

        let mut mgr = manager_over(&transport);
        mgr.add_terminus(7, 0, 0).unwrap();
        mgr.sync_terminus(7).unwrap();
        let seq_before = mgr.terminus(7).unwrap().local_handle_seq;

        // Second sync sees the same signature and does not re-fetch:
        // the local sequence (reset only by a real re-sync) is untouched.
        mgr.sync_terminus(7).unwrap();
        assert_eq!(mgr.terminus(7).unwrap().local_handle_seq, seq_before);
        assert_eq!(mgr.get_repo_info().record_count, 1);
    }

    #[test]
    fn changed_remote_marks_stale_and_resyncs() {
        let transport = LoopbackTransport::new();
        transport.add_endpoint(7);
        transport
            .with_endpoint(7, |ep| {
                ep.repo.add_record(1, &[1]).unwrap();
            })
            .unwrap();

        let mut mgr = manager_over(&transport);
        mgr.add_terminus(7, 0, 0).unwrap();
        mgr.sync_terminus(7).unwrap();

        assert!(!mgr.check_for_changes(7).unwrap());
        assert_eq!(mgr.terminus_state(7).unwrap(), TerminusState::Synced);

        transport
            .with_endpoint(7, |ep| {
                ep.repo.add_record(2, &[2]).unwrap();
            })
            .unwrap();
        assert!(mgr.check_for_changes(7).unwrap());
        assert_eq!(mgr.terminus_state(7).unwrap(), TerminusState::Stale);

        mgr.sync_all().unwrap();
        assert_eq!(mgr.terminus_state(7).unwrap(), TerminusState::Synced);
        assert_eq!(mgr.get_repo_info().record_count, 2);
    }

    #[test]
    fn remove_terminus_purges_consolidated_records() {
        let transport = LoopbackTransport::new();
        transport.add_endpoint(7);
        transport.add_endpoint(8);
        transport
            .with_endpoint(7, |ep| {
                ep.repo.add_record(1, &[1]).unwrap();
            })
            .unwrap();
        transport
            .with_endpoint(8, |ep| {
                ep.repo.add_record(1, &[2]).unwrap();
            })
            .unwrap();

        let mut mgr = manager_over(&transport);
        mgr.add_terminus(7, 0, 0).unwrap();
        mgr.add_terminus(8, 0, 0).unwrap();
        mgr.sync_all().unwrap();
        assert_eq!(mgr.get_repo_info().record_count, 2);

        mgr.remove_terminus(7).unwrap();
        assert_eq!(mgr.get_repo_info().record_count, 1);
        assert!(mgr.get_pdr(0x10001, 0).is_err());
        assert!(mgr.get_pdr(0x20001, 0).is_ok());
        assert!(matches!(
            mgr.lookup_origin(0x10001),
            Err(PdrError::NotFound(_))
        ));
    }

    #[test]
    fn lookup_origin_rejects_out_of_range_handles() {
        let mgr = manager_over(&LoopbackTransport::new());
        assert!(matches!(mgr.lookup_origin(5), Err(PdrError::NotFound(_))));
        assert!(matches!(
            mgr.lookup_origin(0x90001),
            Err(PdrError::NotFound(_))
        ));
    }

    #[test]
    fn sync_unknown_terminus_is_not_found() {
        let mut mgr = manager_over(&LoopbackTransport::new());
        assert!(matches!(
            mgr.sync_terminus(42),
            Err(PdrError::NotFound(_))
        ));
    }

    #[test]
    fn transport_failure_during_sync_marks_error() {
        // Endpoint never registered on the loopback: info fetch fails.
        let transport = LoopbackTransport::new();
        let mut mgr = manager_over(&transport);
        mgr.add_terminus(7, 0, 0).unwrap();
        assert!(mgr.sync_terminus(7).is_err());
        assert_eq!(mgr.terminus_state(7).unwrap(), TerminusState::Error);

        // Registering the endpoint lets an explicit re-sync recover.
        transport.add_endpoint(7);
        mgr.sync_terminus(7).unwrap();
        assert_eq!(mgr.terminus_state(7).unwrap(), TerminusState::Synced);
    }
}
