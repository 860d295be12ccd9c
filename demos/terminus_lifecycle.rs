//! Minimal "consumer" example for `pldm-pdr`.
//!
//! This does **not** talk to real hardware. It exercises the manager
//! machinery over the in-memory loopback transport:
//! - terminus registration + full sync with handle remapping
//! - a terminus-side tracker composing a change event
//! - incremental application of that event on the manager
//!
//! Run:
//! `cargo run --example terminus_lifecycle`

use pldm_pdr::formats::PdrHeader;
use pldm_pdr::handler::handle_chg_event;
use pldm_pdr::transport::LoopbackTransport;
use pldm_pdr::{ChangeEventFormat, ChangeTracker, PdrManager, Transport};
use std::sync::Arc;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let loopback = LoopbackTransport::new();
    loopback.add_endpoint(8);
    loopback.with_endpoint(8, |ep| {
        ep.repo.add_record(2, &[0x01, 0x02])?; // e.g. a numeric sensor PDR
        ep.repo.add_record(3, &[0x03])?;
        Ok::<_, pldm_pdr::PdrError>(())
    })??;

    let transport: Arc<dyn Transport> = Arc::new(loopback.clone());
    let mut mgr = PdrManager::new(transport);
    mgr.add_terminus(8, 800, 1)?;
    mgr.sync_terminus(8)?;
    println!(
        "synced terminus 8: {} consolidated records",
        mgr.get_repo_info().record_count
    );

    // The terminus adds a record and reports the delta.
    let mut tracker = ChangeTracker::new();
    let new_handle = loopback.with_endpoint(8, |ep| ep.repo.add_record(4, &[0x04, 0x05]))??;
    tracker.record_add(new_handle)?;

    let event = tracker.build_event(ChangeEventFormat::PdrHandles, 0);
    let mut wire = [0u8; 64];
    let n = event.encode(&mut wire)?;
    handle_chg_event(&mut mgr, 8, &wire[..n])?;
    tracker.clear();

    // Enumerate the consolidated view.
    let mut handle = 0u32;
    loop {
        let xfer = mgr.get_pdr(handle, 0)?;
        let hdr = PdrHeader::parse(xfer.data)?;
        println!(
            "record {:#010x}: type {} body {} bytes (origin eid {})",
            hdr.record_handle,
            hdr.pdr_type,
            hdr.data_length,
            mgr.lookup_origin(hdr.record_handle)?
        );
        if xfer.next_record_handle == 0 {
            break;
        }
        handle = xfer.next_record_handle;
    }

    Ok(())
}
