//! `pldm-pdr`: firmware-side PLDM Platform Descriptor Record repository
//! subsystem (DSP0248, Platform Monitoring & Control).
//!
//! Scope:
//! - handle-indexed blob repository serving the five PDR commands (`repo`)
//! - `pldmPDRRepositoryChgEvent` codec + terminus-side tracker
//!   (`chg_event`, `tracker`)
//! - multi-terminus manager with handle remapping (`manager`, `fetch`)
//! - manager-side incremental event handler (`handler`)
//! - transport capability, wire messages, and command responder
//!   (`transport`, `responder`)
//!
//! Non-goal: interpreting PDR bodies. Beyond the 10-byte common header,
//! records are opaque bytes.
//!
//! ## Contract (what you can rely on)
//!
//! - **Fixed capacity, no steady-state allocation.** Every structure is
//!   sized at construction ([`formats`] holds the capacities); operations
//!   on a full structure fail with `Full`/`NoSpace` and leave no partial
//!   state behind.
//! - **Zero-copy serving.** `get_pdr`/`find_pdr` hand out slices borrowed
//!   from the repository blob; the borrow checker forbids mutating the
//!   repository while one is held.
//! - **Tombstone deletion.** Removal is O(1) and keeps blob bytes in
//!   place until a rebuild; aggregates always reflect live records only.
//! - **Convergent updates.** A change event either applies incrementally
//!   in full, or the handler falls back to a complete re-sync: a partial
//!   delta never survives in the consolidated repository.
//! - **Single-threaded core.** The only blocking points are transport
//!   exchanges; integrators serialize concurrent access externally (one
//!   mutex around manager + repository suffices).

pub mod chg_event;
pub mod error;
pub mod fetch;
pub mod formats;
pub mod handler;
pub mod manager;
pub mod repo;
pub mod responder;
pub mod tracker;
pub mod transport;

pub use chg_event::{ChangeEvent, ChangeEventFormat, ChangeOp, ChangeRecord};
pub use error::{PdrError, PdrResult};
pub use manager::{PdrManager, Terminus, TerminusState};
pub use repo::{PdrRepo, RepoInfo, RepoState};
pub use tracker::ChangeTracker;
pub use transport::{LoopbackTransport, Transport};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::PdrHeader;
    use std::sync::Arc;

    #[test]
    fn terminus_event_roundtrip_reaches_the_manager() {
        // Terminus side: a repository mutates and its tracker composes
        // the delta event a manager would receive.
        let transport = LoopbackTransport::new();
        transport.add_endpoint(9);
        transport
            .with_endpoint(9, |ep| {
                ep.repo.add_record_with_handle(10, 1, &[0x10]).unwrap();
                ep.repo.add_record_with_handle(20, 1, &[0x20]).unwrap();
            })
            .unwrap();

        let arc: Arc<dyn Transport> = Arc::new(transport.clone());
        let mut mgr = PdrManager::new(arc);
        mgr.add_terminus(9, 900, 9).unwrap();
        mgr.sync_terminus(9).unwrap();
        assert_eq!(mgr.get_repo_info().record_count, 2);

        // The terminus adds a record and reports it.
        let mut tracker = ChangeTracker::new();
        transport
            .with_endpoint(9, |ep| {
                ep.repo.add_record_with_handle(30, 2, &[0x30, 0x31]).unwrap();
            })
            .unwrap();
        tracker.record_add(30).unwrap();

        let event = tracker.build_event(ChangeEventFormat::PdrHandles, 0);
        let mut wire = [0u8; 64];
        let n = event.encode(&mut wire).unwrap();
        handler::handle_chg_event(&mut mgr, 9, &wire[..n]).unwrap();
        tracker.clear();

        assert_eq!(mgr.get_repo_info().record_count, 3);
        assert_eq!(mgr.lookup_local_handle(9, 30), Some(0x10003));
        let found = mgr.find_pdr(2, 0).unwrap();
        assert_eq!(found.record_handle, 0x10003);
        assert_eq!(&found.data[PdrHeader::SIZE..], [0x30, 0x31]);
    }

    #[test]
    fn oversized_tracker_delta_forces_a_full_resync() {
        let transport = LoopbackTransport::new();
        transport.add_endpoint(9);
        let arc: Arc<dyn Transport> = Arc::new(transport.clone());
        let mut mgr = PdrManager::new(arc);
        mgr.add_terminus(9, 0, 0).unwrap();
        mgr.sync_terminus(9).unwrap();

        let mut tracker = ChangeTracker::new();
        transport
            .with_endpoint(9, |ep| {
                for i in 0..16u32 {
                    let h = ep.repo.add_record(1, &[i as u8]).unwrap();
                    tracker.record_add(h).unwrap();
                }
            })
            .unwrap();

        // 16 adds encode past the 64-byte MTU, so the tracker emits
        // refreshEntireRepository and the handler re-syncs in full.
        let event = tracker.build_event(
            ChangeEventFormat::PdrHandles,
            formats::CHG_EVENT_DEFAULT_MTU,
        );
        assert_eq!(event, ChangeEvent::refresh_entire_repository());

        let mut wire = [0u8; 8];
        let n = event.encode(&mut wire).unwrap();
        handler::handle_chg_event(&mut mgr, 9, &wire[..n]).unwrap();

        assert_eq!(mgr.get_repo_info().record_count, 16);
        assert_eq!(mgr.terminus_state(9).unwrap(), TerminusState::Synced);
    }
}
