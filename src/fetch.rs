//! Terminus fetcher: remote repository info and multi-chunk PDR transfers.
//!
//! All functions block inside [`Transport::send_recv`]; control leaves the
//! core for the duration of each exchange. Transport failures and
//! non-success completion codes are propagated unchanged.

use crate::error::{PdrError, PdrResult};
use crate::formats::{
    CC_SUCCESS, CMD_GET_PDR, CMD_GET_PDR_REPOSITORY_INFO, CMD_GET_PDR_REPOSITORY_SIGNATURE,
    PDR_MGR_REASSEMBLY_BUF_SIZE, PDR_TRANSFER_CHUNK_SIZE, PLDM_TYPE_PLATFORM, TRANSFER_FLAG_END,
    TRANSFER_FLAG_START_AND_END, TRANSFER_OP_GET_FIRST_PART, TRANSFER_OP_GET_NEXT_PART,
};
use crate::transport::{
    GetPdrRequest, GetPdrResponseHeader, RepoInfoResponse, SignatureResponse, Transport,
};

/// Per-terminus fetch progress: reassembly scratch plus enumeration state.
#[derive(Debug)]
pub struct FetchContext {
    reassembly_buf: [u8; PDR_MGR_REASSEMBLY_BUF_SIZE],
    reassembly_len: usize,
    /// Next record to fetch (0 = first record on the remote).
    pub(crate) next_record_handle: u32,
    /// Records successfully fetched since the last reset.
    pub(crate) records_fetched: u32,
}

impl Default for FetchContext {
    fn default() -> Self {
        Self {
            reassembly_buf: [0; PDR_MGR_REASSEMBLY_BUF_SIZE],
            reassembly_len: 0,
            next_record_handle: 0,
            records_fetched: 0,
        }
    }
}

impl FetchContext {
    /// Create an idle context positioned at the remote's first record.
    pub fn new() -> Self {
        Self::default()
    }

    /// The reassembled record (common header + body) from the last
    /// successful fetch.
    pub fn record(&self) -> &[u8] {
        &self.reassembly_buf[..self.reassembly_len]
    }

    /// Records fetched since the last reset.
    pub fn records_fetched(&self) -> u32 {
        self.records_fetched
    }

    pub(crate) fn reset(&mut self) {
        self.reassembly_len = 0;
        self.next_record_handle = 0;
        self.records_fetched = 0;
    }
}

/// Aggregates fetched from a remote repository (0x50, then 0x53).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteRepoInfo {
    /// Record count reported by GetPDRRepositoryInfo.
    pub record_count: u32,
    /// Repository size reported by GetPDRRepositoryInfo.
    pub repository_size: u32,
    /// Repository signature, or the pseudo-signature when the remote
    /// does not implement 0x53.
    pub signature: u32,
}

/// Fetch a remote's repository info and signature.
///
/// GetPDRRepositorySignature is optional on remotes; when it fails or is
/// unsupported, a pseudo-signature `record_count XOR (repository_size <<
/// 16)` keeps unchanged-detection working as a heuristic.
pub fn fetch_repo_info(transport: &dyn Transport, eid: u8) -> PdrResult<RemoteRepoInfo> {
    let mut resp = [0u8; 64];
    let n = transport.send_recv(
        eid,
        PLDM_TYPE_PLATFORM,
        CMD_GET_PDR_REPOSITORY_INFO,
        &[],
        &mut resp,
    )?;
    if n < 1 {
        return Err(PdrError::Malformed(
            "empty GetPDRRepositoryInfo response".into(),
        ));
    }
    if resp[0] != CC_SUCCESS {
        return Err(PdrError::Completion {
            command: CMD_GET_PDR_REPOSITORY_INFO,
            code: resp[0],
        });
    }
    if n < RepoInfoResponse::SIZE {
        return Err(PdrError::Malformed(format!(
            "GetPDRRepositoryInfo response of {n} bytes is shorter than {}",
            RepoInfoResponse::SIZE
        )));
    }
    let info = RepoInfoResponse::read(&mut &resp[..n])?;

    let pseudo = info.record_count ^ (info.repository_size << 16);
    let mut sig_resp = [0u8; 64];
    let signature = match transport.send_recv(
        eid,
        PLDM_TYPE_PLATFORM,
        CMD_GET_PDR_REPOSITORY_SIGNATURE,
        &[],
        &mut sig_resp,
    ) {
        Ok(n) if n >= SignatureResponse::SIZE => {
            match SignatureResponse::read(&mut &sig_resp[..n]) {
                Ok(sig) if sig.completion_code == CC_SUCCESS => sig.signature,
                _ => pseudo,
            }
        }
        _ => pseudo,
    };

    Ok(RemoteRepoInfo {
        record_count: info.record_count,
        repository_size: info.repository_size,
        signature,
    })
}

/// Fetch one complete PDR with multi-chunk reassembly.
///
/// Fetches the record addressed by `ctx.next_record_handle` (0 = first),
/// looping over GetPDR chunks until the remote signals the end of the
/// transfer. On success the record is in [`FetchContext::record`] and
/// `ctx.next_record_handle` holds the remote's continuation handle
/// (0 = no more records).
pub fn fetch_one_pdr(transport: &dyn Transport, eid: u8, ctx: &mut FetchContext) -> PdrResult<()> {
    ctx.reassembly_len = 0;

    let mut req = GetPdrRequest {
        record_handle: ctx.next_record_handle,
        data_transfer_handle: 0,
        transfer_op_flag: TRANSFER_OP_GET_FIRST_PART,
        request_count: PDR_TRANSFER_CHUNK_SIZE,
        record_change_num: 0,
    };
    let mut req_buf = [0u8; GetPdrRequest::SIZE];
    let mut resp = [0u8; GetPdrResponseHeader::SIZE + PDR_TRANSFER_CHUNK_SIZE as usize];

    loop {
        req.write(&mut &mut req_buf[..])?;
        let n = transport.send_recv(eid, PLDM_TYPE_PLATFORM, CMD_GET_PDR, &req_buf, &mut resp)?;
        if n < 1 {
            return Err(PdrError::Malformed("empty GetPDR response".into()));
        }
        if resp[0] != CC_SUCCESS {
            return Err(PdrError::Completion {
                command: CMD_GET_PDR,
                code: resp[0],
            });
        }
        if n < GetPdrResponseHeader::SIZE {
            return Err(PdrError::Malformed(format!(
                "GetPDR response of {n} bytes is shorter than its header"
            )));
        }
        let hdr = GetPdrResponseHeader::read(&mut &resp[..n])?;
        let chunk_len = usize::from(hdr.response_count);

        if n < GetPdrResponseHeader::SIZE + chunk_len {
            return Err(PdrError::Malformed(
                "GetPDR response shorter than its advertised data".into(),
            ));
        }
        if ctx.reassembly_len + chunk_len > PDR_MGR_REASSEMBLY_BUF_SIZE {
            return Err(PdrError::Full("reassembly buffer".into()));
        }

        ctx.reassembly_buf[ctx.reassembly_len..ctx.reassembly_len + chunk_len]
            .copy_from_slice(&resp[GetPdrResponseHeader::SIZE..GetPdrResponseHeader::SIZE + chunk_len]);
        ctx.reassembly_len += chunk_len;

        if hdr.transfer_flag == TRANSFER_FLAG_END
            || hdr.transfer_flag == TRANSFER_FLAG_START_AND_END
        {
            ctx.next_record_handle = hdr.next_record_handle;
            ctx.records_fetched += 1;
            return Ok(());
        }

        req.data_transfer_handle = hdr.next_data_transfer_handle;
        req.transfer_op_flag = TRANSFER_OP_GET_NEXT_PART;
    }
}

/// Fetch a specific PDR by its remote handle.
///
/// The reassembled bytes land in [`FetchContext::record`]; the context's
/// continuation handle afterwards points at whatever follows the record
/// on the remote.
pub fn fetch_pdr_by_handle(
    transport: &dyn Transport,
    eid: u8,
    ctx: &mut FetchContext,
    remote_handle: u32,
) -> PdrResult<()> {
    ctx.next_record_handle = remote_handle;
    fetch_one_pdr(transport, eid, ctx)
}
