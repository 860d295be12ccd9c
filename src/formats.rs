//! Wire-format constants and the PDR common header.
//!
//! Numeric values follow DSP0248 (PLDM for Platform Monitoring & Control).
//! Capacities are compile-time: all storage in this crate is fixed-size and
//! allocated once at construction.

use crate::error::{PdrError, PdrResult};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Blob capacity of an owned-storage repository, in bytes.
pub const PDR_REPO_BLOB_CAPACITY: usize = 8 * 1024;
/// Maximum number of index entries (live + tombstoned) per repository.
pub const PDR_MAX_RECORD_COUNT: usize = 64;
/// Maximum bytes served per `GetPDR` chunk.
pub const PDR_TRANSFER_CHUNK_SIZE: u16 = 128;
/// Maximum number of remote termini tracked by one manager.
pub const PDR_MGR_MAX_TERMINI: usize = 8;
/// Per-terminus reassembly buffer size, in bytes.
pub const PDR_MGR_REASSEMBLY_BUF_SIZE: usize = 256;
/// Maximum change entries per change record.
pub const CHG_EVENT_MAX_ENTRIES: usize = 16;
/// Maximum change records per change event.
pub const CHG_EVENT_MAX_RECORDS: usize = 4;
/// Baseline MCTP payload size, used as the default change-event MTU.
pub const CHG_EVENT_DEFAULT_MTU: u16 = 64;

/// PDR common header format version.
pub const PDR_HEADER_VERSION: u8 = 0x01;

/// PLDM type for Platform Monitoring & Control.
pub const PLDM_TYPE_PLATFORM: u8 = 0x02;

/// GetPDRRepositoryInfo command code.
pub const CMD_GET_PDR_REPOSITORY_INFO: u8 = 0x50;
/// GetPDR command code.
pub const CMD_GET_PDR: u8 = 0x51;
/// FindPDR command code.
pub const CMD_FIND_PDR: u8 = 0x52;
/// GetPDRRepositorySignature command code.
pub const CMD_GET_PDR_REPOSITORY_SIGNATURE: u8 = 0x53;
/// RunInitAgent command code.
pub const CMD_RUN_INIT_AGENT: u8 = 0x58;

/// Completion code: success.
pub const CC_SUCCESS: u8 = 0x00;
/// Completion code: generic error.
pub const CC_ERROR: u8 = 0x01;
/// Completion code: invalid data in the request.
pub const CC_ERROR_INVALID_DATA: u8 = 0x02;
/// Completion code: request payload has the wrong length.
pub const CC_ERROR_INVALID_LENGTH: u8 = 0x03;
/// Completion code: command not supported by this endpoint.
pub const CC_ERROR_UNSUPPORTED_PLDM_CMD: u8 = 0x04;
/// Completion code: record handle does not name a live record.
pub const CC_ERROR_INVALID_RECORD_HANDLE: u8 = 0x05;

/// Transfer operation flag: continue a multi-part transfer.
pub const TRANSFER_OP_GET_NEXT_PART: u8 = 0x00;
/// Transfer operation flag: begin a transfer at offset 0.
pub const TRANSFER_OP_GET_FIRST_PART: u8 = 0x01;

/// Transfer flag: first chunk, more follow.
pub const TRANSFER_FLAG_START: u8 = 0x00;
/// Transfer flag: interior chunk.
pub const TRANSFER_FLAG_MIDDLE: u8 = 0x01;
/// Transfer flag: final chunk of a multi-part transfer.
pub const TRANSFER_FLAG_END: u8 = 0x04;
/// Transfer flag: the whole record fit in one chunk.
pub const TRANSFER_FLAG_START_AND_END: u8 = 0x05;

/// PDR common header — starts every record, packed little-endian.
///
/// The crate treats everything after this header as opaque bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdrHeader {
    /// Unique handle of this record inside its owning repository.
    pub record_handle: u32,
    /// Header format version (should equal [`PDR_HEADER_VERSION`]).
    pub header_version: u8,
    /// PDR type code.
    pub pdr_type: u8,
    /// Incremented each time the record is modified.
    pub record_change_num: u16,
    /// Length of the record body following this header.
    pub data_length: u16,
}

impl PdrHeader {
    /// Number of bytes in the serialized header.
    pub const SIZE: usize = 4 + 1 + 1 + 2 + 2;

    /// Write the header to a stream.
    pub fn write<W: Write>(&self, w: &mut W) -> PdrResult<()> {
        w.write_u32::<LittleEndian>(self.record_handle)?;
        w.write_u8(self.header_version)?;
        w.write_u8(self.pdr_type)?;
        w.write_u16::<LittleEndian>(self.record_change_num)?;
        w.write_u16::<LittleEndian>(self.data_length)?;
        Ok(())
    }

    /// Read the header from a stream.
    pub fn read<R: Read>(r: &mut R) -> PdrResult<Self> {
        Ok(Self {
            record_handle: r.read_u32::<LittleEndian>()?,
            header_version: r.read_u8()?,
            pdr_type: r.read_u8()?,
            record_change_num: r.read_u16::<LittleEndian>()?,
            data_length: r.read_u16::<LittleEndian>()?,
        })
    }

    /// Parse a header from the start of `buf`.
    pub fn parse(buf: &[u8]) -> PdrResult<Self> {
        if buf.len() < Self::SIZE {
            return Err(PdrError::Malformed(format!(
                "PDR header needs {} bytes, got {}",
                Self::SIZE,
                buf.len()
            )));
        }
        Self::read(&mut &buf[..Self::SIZE])
    }

    /// Total record size (header + body).
    pub fn total_size(&self) -> usize {
        Self::SIZE + self.data_length as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdr_header_roundtrip() {
        let hdr = PdrHeader {
            record_handle: 0x10002,
            header_version: PDR_HEADER_VERSION,
            pdr_type: 9,
            record_change_num: 3,
            data_length: 200,
        };
        let mut buf = Vec::new();
        hdr.write(&mut buf).unwrap();
        assert_eq!(buf.len(), PdrHeader::SIZE);
        assert_eq!(PdrHeader::parse(&buf).unwrap(), hdr);
        assert_eq!(hdr.total_size(), 210);
    }

    #[test]
    fn pdr_header_layout_is_little_endian() {
        let hdr = PdrHeader {
            record_handle: 1,
            header_version: 0x01,
            pdr_type: 1,
            record_change_num: 0,
            data_length: 2,
        };
        let mut buf = Vec::new();
        hdr.write(&mut buf).unwrap();
        assert_eq!(
            buf,
            [0x01, 0x00, 0x00, 0x00, 0x01, 0x01, 0x00, 0x00, 0x02, 0x00]
        );
    }

    #[test]
    fn pdr_header_parse_rejects_short_buffer() {
        assert!(PdrHeader::parse(&[0u8; 9]).is_err());
    }
}
