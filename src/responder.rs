//! Terminus-side command responder.
//!
//! Maps raw Platform M&C requests onto a [`PdrRepo`] and encodes the wire
//! responses, translating [`PdrError`] values into PLDM completion codes.
//! Protocol-level failures never surface as `Err`: they become cc-only
//! replies, exactly what a remote requester expects. The only `Err` cases
//! are local integration faults (a response buffer too small to hold the
//! reply).

use crate::error::{PdrError, PdrResult};
use crate::formats::{
    CC_ERROR, CC_ERROR_INVALID_DATA, CC_ERROR_INVALID_LENGTH, CC_ERROR_INVALID_RECORD_HANDLE,
    CC_ERROR_UNSUPPORTED_PLDM_CMD, CC_SUCCESS, CMD_FIND_PDR, CMD_GET_PDR,
    CMD_GET_PDR_REPOSITORY_INFO, CMD_GET_PDR_REPOSITORY_SIGNATURE, CMD_RUN_INIT_AGENT,
};
use crate::repo::PdrRepo;
use crate::transport::{
    FindPdrRequest, FindPdrResponseHeader, GetPdrRequest, GetPdrResponseHeader, RepoInfoResponse,
    SignatureResponse,
};

/// Completion code for a repository/request error.
fn completion_code_for(err: &PdrError) -> u8 {
    match err {
        PdrError::NotFound(_) => CC_ERROR_INVALID_RECORD_HANDLE,
        PdrError::InvalidOffset { .. } => CC_ERROR_INVALID_DATA,
        PdrError::Malformed(_) => CC_ERROR_INVALID_LENGTH,
        PdrError::Unsupported(_) => CC_ERROR_UNSUPPORTED_PLDM_CMD,
        _ => CC_ERROR,
    }
}

fn reply_cc(response: &mut [u8], cc: u8) -> PdrResult<usize> {
    if response.is_empty() {
        return Err(PdrError::Malformed("response buffer is empty".into()));
    }
    response[0] = cc;
    Ok(1)
}

/// Serve one command against `repo`, writing the wire response into
/// `response` and returning its length.
///
/// `rebuild` is the RunInitAgent populate callback; with `None`, 0x58
/// answers `unsupported`. Unknown commands answer `unsupported` as well.
pub fn handle_request<'b>(
    repo: &mut PdrRepo<'b>,
    command: u8,
    request: &[u8],
    response: &mut [u8],
    rebuild: Option<&mut dyn FnMut(&mut PdrRepo<'b>) -> PdrResult<()>>,
) -> PdrResult<usize> {
    match command {
        CMD_GET_PDR_REPOSITORY_INFO => repository_info(repo, response),
        CMD_GET_PDR => get_pdr(repo, request, response),
        CMD_FIND_PDR => find_pdr(repo, request, response),
        CMD_GET_PDR_REPOSITORY_SIGNATURE => signature(repo, response),
        CMD_RUN_INIT_AGENT => run_init_agent(repo, response, rebuild),
        _ => reply_cc(response, CC_ERROR_UNSUPPORTED_PLDM_CMD),
    }
}

fn repository_info(repo: &PdrRepo<'_>, response: &mut [u8]) -> PdrResult<usize> {
    let info = repo.info();
    let resp = RepoInfoResponse {
        completion_code: CC_SUCCESS,
        repository_state: info.repository_state.as_u8(),
        // timestamp104 encoding is the integrator's concern; all-zero
        // means "unknown" on the wire.
        update_time: [0; 13],
        oem_update_time: [0; 13],
        record_count: info.record_count,
        repository_size: info.repository_size,
        largest_record_size: info.largest_record_size,
        data_transfer_handle_timeout: info.data_transfer_handle_timeout,
    };
    if response.len() < RepoInfoResponse::SIZE {
        return Err(PdrError::Malformed(
            "response buffer too small for GetPDRRepositoryInfo".into(),
        ));
    }
    resp.write(&mut &mut response[..])?;
    Ok(RepoInfoResponse::SIZE)
}

fn get_pdr(repo: &PdrRepo<'_>, request: &[u8], response: &mut [u8]) -> PdrResult<usize> {
    if request.len() < GetPdrRequest::SIZE {
        return reply_cc(response, CC_ERROR_INVALID_LENGTH);
    }
    let req = GetPdrRequest::read(&mut &request[..])?;

    // request_count is advisory; the repository caps chunks at its own
    // transfer size, matching what the requester side always asks for.
    let xfer = match repo.get_pdr(req.record_handle, req.data_transfer_handle) {
        Ok(x) => x,
        Err(e) => return reply_cc(response, completion_code_for(&e)),
    };

    let total = GetPdrResponseHeader::SIZE + xfer.data.len();
    if response.len() < total {
        return Err(PdrError::Malformed(
            "response buffer too small for GetPDR chunk".into(),
        ));
    }
    let hdr = GetPdrResponseHeader {
        completion_code: CC_SUCCESS,
        next_record_handle: xfer.next_record_handle,
        next_data_transfer_handle: xfer.next_data_transfer_handle,
        transfer_flag: xfer.transfer_flag,
        response_count: xfer.data.len() as u16,
    };
    hdr.write(&mut &mut response[..GetPdrResponseHeader::SIZE])?;
    response[GetPdrResponseHeader::SIZE..total].copy_from_slice(xfer.data);
    Ok(total)
}

fn find_pdr(repo: &PdrRepo<'_>, request: &[u8], response: &mut [u8]) -> PdrResult<usize> {
    if request.len() < FindPdrRequest::SIZE {
        return reply_cc(response, CC_ERROR_INVALID_LENGTH);
    }
    let req = FindPdrRequest::read(&mut &request[..])?;

    let found = match repo.find_pdr(req.pdr_type, req.start_handle) {
        Ok(m) => m,
        Err(e) => return reply_cc(response, completion_code_for(&e)),
    };

    let total = FindPdrResponseHeader::SIZE + found.data.len();
    if response.len() < total {
        return Err(PdrError::Malformed(
            "response buffer too small for FindPDR match".into(),
        ));
    }
    let hdr = FindPdrResponseHeader {
        completion_code: CC_SUCCESS,
        record_handle: found.record_handle,
        next_handle: found.next_handle,
        data_length: found.data.len() as u16,
    };
    hdr.write(&mut &mut response[..FindPdrResponseHeader::SIZE])?;
    response[FindPdrResponseHeader::SIZE..total].copy_from_slice(found.data);
    Ok(total)
}

fn signature(repo: &mut PdrRepo<'_>, response: &mut [u8]) -> PdrResult<usize> {
    let resp = SignatureResponse {
        completion_code: CC_SUCCESS,
        signature: repo.signature(),
    };
    if response.len() < SignatureResponse::SIZE {
        return Err(PdrError::Malformed(
            "response buffer too small for GetPDRRepositorySignature".into(),
        ));
    }
    resp.write(&mut &mut response[..])?;
    Ok(SignatureResponse::SIZE)
}

fn run_init_agent<'b>(
    repo: &mut PdrRepo<'b>,
    response: &mut [u8],
    rebuild: Option<&mut dyn FnMut(&mut PdrRepo<'b>) -> PdrResult<()>>,
) -> PdrResult<usize> {
    let Some(populate) = rebuild else {
        return reply_cc(response, CC_ERROR_UNSUPPORTED_PLDM_CMD);
    };
    match repo.run_init_agent(|r| populate(r)) {
        Ok(()) => reply_cc(response, CC_SUCCESS),
        Err(e) => reply_cc(response, completion_code_for(&e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::{PdrHeader, TRANSFER_FLAG_START_AND_END, TRANSFER_OP_GET_FIRST_PART};

    fn seeded_repo() -> PdrRepo<'static> {
        let mut repo = PdrRepo::new();
        repo.add_record(1, &[0xAA, 0xBB]).unwrap();
        repo.add_record(2, &[0xCC]).unwrap();
        repo
    }

    #[test]
    fn serves_repository_info() {
        let mut repo = seeded_repo();
        let mut resp = [0u8; 64];
        let n = handle_request(&mut repo, CMD_GET_PDR_REPOSITORY_INFO, &[], &mut resp, None)
            .unwrap();
        assert_eq!(n, RepoInfoResponse::SIZE);

        let info = RepoInfoResponse::read(&mut &resp[..n]).unwrap();
        assert_eq!(info.completion_code, CC_SUCCESS);
        assert_eq!(info.record_count, 2);
        assert_eq!(info.repository_size, 12 + 11);
        assert_eq!(info.largest_record_size, 12);
    }

    #[test]
    fn serves_get_pdr_chunk() {
        let mut repo = seeded_repo();
        let req = GetPdrRequest {
            record_handle: 1,
            data_transfer_handle: 0,
            transfer_op_flag: TRANSFER_OP_GET_FIRST_PART,
            request_count: 128,
            record_change_num: 0,
        };
        let mut req_buf = [0u8; GetPdrRequest::SIZE];
        req.write(&mut &mut req_buf[..]).unwrap();

        let mut resp = [0u8; 256];
        let n = handle_request(&mut repo, CMD_GET_PDR, &req_buf, &mut resp, None).unwrap();
        let hdr = GetPdrResponseHeader::read(&mut &resp[..n]).unwrap();
        assert_eq!(hdr.completion_code, CC_SUCCESS);
        assert_eq!(hdr.transfer_flag, TRANSFER_FLAG_START_AND_END);
        assert_eq!(hdr.next_record_handle, 2);
        assert_eq!(hdr.response_count, 12);
        let record = &resp[GetPdrResponseHeader::SIZE..n];
        let parsed = PdrHeader::parse(record).unwrap();
        assert_eq!(parsed.record_handle, 1);
        assert_eq!(&record[PdrHeader::SIZE..], [0xAA, 0xBB]);
    }

    #[test]
    fn get_pdr_error_replies_are_cc_only() {
        let mut repo = seeded_repo();
        let req = GetPdrRequest {
            record_handle: 99,
            data_transfer_handle: 0,
            transfer_op_flag: TRANSFER_OP_GET_FIRST_PART,
            request_count: 128,
            record_change_num: 0,
        };
        let mut req_buf = [0u8; GetPdrRequest::SIZE];
        req.write(&mut &mut req_buf[..]).unwrap();

        let mut resp = [0u8; 256];
        let n = handle_request(&mut repo, CMD_GET_PDR, &req_buf, &mut resp, None).unwrap();
        assert_eq!(n, 1);
        assert_eq!(resp[0], CC_ERROR_INVALID_RECORD_HANDLE);

        // Truncated request.
        let n = handle_request(&mut repo, CMD_GET_PDR, &req_buf[..5], &mut resp, None).unwrap();
        assert_eq!(n, 1);
        assert_eq!(resp[0], CC_ERROR_INVALID_LENGTH);
    }

    #[test]
    fn serves_find_pdr() {
        let mut repo = seeded_repo();
        let req = FindPdrRequest {
            pdr_type: 2,
            start_handle: 0,
        };
        let mut req_buf = [0u8; FindPdrRequest::SIZE];
        req.write(&mut &mut req_buf[..]).unwrap();

        let mut resp = [0u8; 256];
        let n = handle_request(&mut repo, CMD_FIND_PDR, &req_buf, &mut resp, None).unwrap();
        let hdr = FindPdrResponseHeader::read(&mut &resp[..n]).unwrap();
        assert_eq!(hdr.completion_code, CC_SUCCESS);
        assert_eq!(hdr.record_handle, 2);
        assert_eq!(hdr.next_handle, 0);
        assert_eq!(hdr.data_length, 11);
    }

    #[test]
    fn serves_signature() {
        let mut repo = seeded_repo();
        let expected = repo.signature();
        let mut resp = [0u8; 64];
        let n = handle_request(
            &mut repo,
            CMD_GET_PDR_REPOSITORY_SIGNATURE,
            &[],
            &mut resp,
            None,
        )
        .unwrap();
        let sig = SignatureResponse::read(&mut &resp[..n]).unwrap();
        assert_eq!(sig.completion_code, CC_SUCCESS);
        assert_eq!(sig.signature, expected);
    }

    #[test]
    fn run_init_agent_requires_a_rebuild_callback() {
        let mut repo = seeded_repo();
        let mut resp = [0u8; 8];
        let n = handle_request(&mut repo, CMD_RUN_INIT_AGENT, &[], &mut resp, None).unwrap();
        assert_eq!((n, resp[0]), (1, CC_ERROR_UNSUPPORTED_PLDM_CMD));

        let mut populate = |r: &mut PdrRepo<'static>| -> crate::error::PdrResult<()> {
            r.add_record(7, &[1, 2, 3])?;
            Ok(())
        };
        let n = handle_request(
            &mut repo,
            CMD_RUN_INIT_AGENT,
            &[],
            &mut resp,
            Some(&mut populate),
        )
        .unwrap();
        assert_eq!((n, resp[0]), (1, CC_SUCCESS));
        assert_eq!(repo.info().record_count, 1);
    }

    #[test]
    fn unknown_command_is_unsupported() {
        let mut repo = seeded_repo();
        let mut resp = [0u8; 8];
        let n = handle_request(&mut repo, 0x7F, &[], &mut resp, None).unwrap();
        assert_eq!((n, resp[0]), (1, CC_ERROR_UNSUPPORTED_PLDM_CMD));
    }
}
