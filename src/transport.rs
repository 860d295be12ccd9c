//! Transport capability and Platform M&C wire messages.
//!
//! The core performs blocking request/response transactions through an
//! integrator-supplied [`Transport`]. The crate ships one implementation,
//! [`LoopbackTransport`], which serves requests from in-memory repositories
//! and backs the test suites and examples.
//!
//! Wire structs are packed little-endian per DSP0248; each carries a `SIZE`
//! const and `read`/`write` methods.

use crate::error::{PdrError, PdrResult};
use crate::formats::{
    CC_ERROR_UNSUPPORTED_PLDM_CMD, CMD_GET_PDR_REPOSITORY_SIGNATURE, PLDM_TYPE_PLATFORM,
};
use crate::repo::PdrRepo;
use crate::responder;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};

/// Blocking send-receive capability toward one PLDM endpoint.
///
/// Implementations route `request` to the endpoint addressed by `eid` and
/// fill `response` with the reply, returning the filled length. The core
/// has no timeouts of its own; implementations surface stalls as
/// [`PdrError::Transport`].
pub trait Transport: Send + Sync {
    /// Execute one request/response exchange.
    fn send_recv(
        &self,
        eid: u8,
        pldm_type: u8,
        command: u8,
        request: &[u8],
        response: &mut [u8],
    ) -> PdrResult<usize>;
}

/// GetPDRRepositoryInfo (0x50) response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepoInfoResponse {
    /// PLDM completion code.
    pub completion_code: u8,
    /// Repository state (0 available, 1 updating, 2 failed).
    pub repository_state: u8,
    /// Update time as PLDM timestamp104 (all-zero = unknown).
    pub update_time: [u8; 13],
    /// OEM update time as PLDM timestamp104 (all-zero = unknown).
    pub oem_update_time: [u8; 13],
    /// Number of live records.
    pub record_count: u32,
    /// Summed size of live records in bytes.
    pub repository_size: u32,
    /// Size of the largest live record in bytes.
    pub largest_record_size: u32,
    /// Data transfer handle timeout, in seconds.
    pub data_transfer_handle_timeout: u8,
}

impl RepoInfoResponse {
    /// Number of bytes in the serialized response.
    pub const SIZE: usize = 1 + 1 + 13 + 13 + 4 + 4 + 4 + 1;

    /// Write the response to a stream.
    pub fn write<W: Write>(&self, w: &mut W) -> PdrResult<()> {
        w.write_u8(self.completion_code)?;
        w.write_u8(self.repository_state)?;
        w.write_all(&self.update_time)?;
        w.write_all(&self.oem_update_time)?;
        w.write_u32::<LittleEndian>(self.record_count)?;
        w.write_u32::<LittleEndian>(self.repository_size)?;
        w.write_u32::<LittleEndian>(self.largest_record_size)?;
        w.write_u8(self.data_transfer_handle_timeout)?;
        Ok(())
    }

    /// Read the response from a stream.
    pub fn read<R: Read>(r: &mut R) -> PdrResult<Self> {
        let completion_code = r.read_u8()?;
        let repository_state = r.read_u8()?;
        let mut update_time = [0u8; 13];
        r.read_exact(&mut update_time)?;
        let mut oem_update_time = [0u8; 13];
        r.read_exact(&mut oem_update_time)?;
        Ok(Self {
            completion_code,
            repository_state,
            update_time,
            oem_update_time,
            record_count: r.read_u32::<LittleEndian>()?,
            repository_size: r.read_u32::<LittleEndian>()?,
            largest_record_size: r.read_u32::<LittleEndian>()?,
            data_transfer_handle_timeout: r.read_u8()?,
        })
    }
}

/// GetPDR (0x51) request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetPdrRequest {
    /// Record to fetch (0 = first live record).
    pub record_handle: u32,
    /// Byte offset within the record (0 on the first chunk).
    pub data_transfer_handle: u32,
    /// `TRANSFER_OP_GET_FIRST_PART` or `TRANSFER_OP_GET_NEXT_PART`.
    pub transfer_op_flag: u8,
    /// Maximum bytes the requester accepts in one chunk.
    pub request_count: u16,
    /// Expected record change number (0 = any).
    pub record_change_num: u16,
}

impl GetPdrRequest {
    /// Number of bytes in the serialized request.
    pub const SIZE: usize = 4 + 4 + 1 + 2 + 2;

    /// Write the request to a stream.
    pub fn write<W: Write>(&self, w: &mut W) -> PdrResult<()> {
        w.write_u32::<LittleEndian>(self.record_handle)?;
        w.write_u32::<LittleEndian>(self.data_transfer_handle)?;
        w.write_u8(self.transfer_op_flag)?;
        w.write_u16::<LittleEndian>(self.request_count)?;
        w.write_u16::<LittleEndian>(self.record_change_num)?;
        Ok(())
    }

    /// Read the request from a stream.
    pub fn read<R: Read>(r: &mut R) -> PdrResult<Self> {
        Ok(Self {
            record_handle: r.read_u32::<LittleEndian>()?,
            data_transfer_handle: r.read_u32::<LittleEndian>()?,
            transfer_op_flag: r.read_u8()?,
            request_count: r.read_u16::<LittleEndian>()?,
            record_change_num: r.read_u16::<LittleEndian>()?,
        })
    }
}

/// GetPDR (0x51) response header; `response_count` record bytes follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetPdrResponseHeader {
    /// PLDM completion code.
    pub completion_code: u8,
    /// Next live record in enumeration order (0 = end of repository).
    pub next_record_handle: u32,
    /// Offset for the next chunk (0 when this chunk is final).
    pub next_data_transfer_handle: u32,
    /// One of the `TRANSFER_FLAG_*` constants.
    pub transfer_flag: u8,
    /// Number of record bytes following this header.
    pub response_count: u16,
}

impl GetPdrResponseHeader {
    /// Number of bytes in the serialized header.
    pub const SIZE: usize = 1 + 4 + 4 + 1 + 2;

    /// Write the header to a stream.
    pub fn write<W: Write>(&self, w: &mut W) -> PdrResult<()> {
        w.write_u8(self.completion_code)?;
        w.write_u32::<LittleEndian>(self.next_record_handle)?;
        w.write_u32::<LittleEndian>(self.next_data_transfer_handle)?;
        w.write_u8(self.transfer_flag)?;
        w.write_u16::<LittleEndian>(self.response_count)?;
        Ok(())
    }

    /// Read the header from a stream.
    pub fn read<R: Read>(r: &mut R) -> PdrResult<Self> {
        Ok(Self {
            completion_code: r.read_u8()?,
            next_record_handle: r.read_u32::<LittleEndian>()?,
            next_data_transfer_handle: r.read_u32::<LittleEndian>()?,
            transfer_flag: r.read_u8()?,
            response_count: r.read_u16::<LittleEndian>()?,
        })
    }
}

/// FindPDR (0x52) request.
///
/// Not standardized by DSP0248; this is the crate's local definition.
/// Extended filters (entity type, container id) are a defined extension
/// point on this struct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FindPdrRequest {
    /// PDR type to search for.
    pub pdr_type: u8,
    /// Continue scanning after this handle (0 = from the beginning).
    pub start_handle: u32,
}

impl FindPdrRequest {
    /// Number of bytes in the serialized request.
    pub const SIZE: usize = 1 + 4;

    /// Write the request to a stream.
    pub fn write<W: Write>(&self, w: &mut W) -> PdrResult<()> {
        w.write_u8(self.pdr_type)?;
        w.write_u32::<LittleEndian>(self.start_handle)?;
        Ok(())
    }

    /// Read the request from a stream.
    pub fn read<R: Read>(r: &mut R) -> PdrResult<Self> {
        Ok(Self {
            pdr_type: r.read_u8()?,
            start_handle: r.read_u32::<LittleEndian>()?,
        })
    }
}

/// FindPDR (0x52) response header; `data_length` record bytes follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FindPdrResponseHeader {
    /// PLDM completion code.
    pub completion_code: u8,
    /// Handle of the matching record.
    pub record_handle: u32,
    /// Handle of the next record of the same type (0 = no more).
    pub next_handle: u32,
    /// Number of record bytes following this header.
    pub data_length: u16,
}

impl FindPdrResponseHeader {
    /// Number of bytes in the serialized header.
    pub const SIZE: usize = 1 + 4 + 4 + 2;

    /// Write the header to a stream.
    pub fn write<W: Write>(&self, w: &mut W) -> PdrResult<()> {
        w.write_u8(self.completion_code)?;
        w.write_u32::<LittleEndian>(self.record_handle)?;
        w.write_u32::<LittleEndian>(self.next_handle)?;
        w.write_u16::<LittleEndian>(self.data_length)?;
        Ok(())
    }

    /// Read the header from a stream.
    pub fn read<R: Read>(r: &mut R) -> PdrResult<Self> {
        Ok(Self {
            completion_code: r.read_u8()?,
            record_handle: r.read_u32::<LittleEndian>()?,
            next_handle: r.read_u32::<LittleEndian>()?,
            data_length: r.read_u16::<LittleEndian>()?,
        })
    }
}

/// GetPDRRepositorySignature (0x53) response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureResponse {
    /// PLDM completion code.
    pub completion_code: u8,
    /// CRC-32 over the repository's used blob bytes.
    pub signature: u32,
}

impl SignatureResponse {
    /// Number of bytes in the serialized response.
    pub const SIZE: usize = 1 + 4;

    /// Write the response to a stream.
    pub fn write<W: Write>(&self, w: &mut W) -> PdrResult<()> {
        w.write_u8(self.completion_code)?;
        w.write_u32::<LittleEndian>(self.signature)?;
        Ok(())
    }

    /// Read the response from a stream.
    pub fn read<R: Read>(r: &mut R) -> PdrResult<Self> {
        Ok(Self {
            completion_code: r.read_u8()?,
            signature: r.read_u32::<LittleEndian>()?,
        })
    }
}

/// One simulated endpoint behind a [`LoopbackTransport`].
pub struct LoopbackEndpoint {
    /// The endpoint's repository, served over the five commands.
    pub repo: PdrRepo<'static>,
    /// When false, GetPDRRepositorySignature answers `unsupported`,
    /// which exercises the manager's pseudo-signature fallback.
    pub supports_signature: bool,
}

/// In-memory [`Transport`] serving requests from local repositories.
///
/// Clones share the same endpoint set, so a test can keep a handle for
/// mutating remote repositories while a manager owns another.
#[derive(Clone, Default)]
pub struct LoopbackTransport {
    endpoints: Arc<Mutex<HashMap<u8, LoopbackEndpoint>>>,
}

impl LoopbackTransport {
    /// Create a transport with no endpoints.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> PdrResult<std::sync::MutexGuard<'_, HashMap<u8, LoopbackEndpoint>>> {
        self.endpoints
            .lock()
            .map_err(|_| PdrError::Transport("endpoint registry lock poisoned".into()))
    }

    /// Register an endpoint with an empty default repository.
    pub fn add_endpoint(&self, eid: u8) {
        if let Ok(mut eps) = self.lock() {
            eps.insert(
                eid,
                LoopbackEndpoint {
                    repo: PdrRepo::new(),
                    supports_signature: true,
                },
            );
        }
    }

    /// Run `f` against one endpoint (e.g. to mutate its repository
    /// between syncs). Fails if the endpoint is unknown.
    pub fn with_endpoint<T>(
        &self,
        eid: u8,
        f: impl FnOnce(&mut LoopbackEndpoint) -> T,
    ) -> PdrResult<T> {
        let mut eps = self.lock()?;
        let ep = eps
            .get_mut(&eid)
            .ok_or_else(|| PdrError::NotFound(format!("endpoint eid {eid}")))?;
        Ok(f(ep))
    }
}

impl Transport for LoopbackTransport {
    fn send_recv(
        &self,
        eid: u8,
        pldm_type: u8,
        command: u8,
        request: &[u8],
        response: &mut [u8],
    ) -> PdrResult<usize> {
        if pldm_type != PLDM_TYPE_PLATFORM {
            return Err(PdrError::Unsupported(format!(
                "pldm type {pldm_type:#04x} is not served by the loopback"
            )));
        }
        let mut eps = self.lock()?;
        let ep = eps
            .get_mut(&eid)
            .ok_or_else(|| PdrError::Transport(format!("no endpoint with eid {eid}")))?;

        if command == CMD_GET_PDR_REPOSITORY_SIGNATURE && !ep.supports_signature {
            if response.is_empty() {
                return Err(PdrError::Malformed("response buffer is empty".into()));
            }
            response[0] = CC_ERROR_UNSUPPORTED_PLDM_CMD;
            return Ok(1);
        }

        responder::handle_request(&mut ep.repo, command, request, response, None)
    }
}
