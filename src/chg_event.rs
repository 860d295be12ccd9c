//! `pldmPDRRepositoryChgEvent` wire codec (DSP0248 §16.14).
//!
//! ## Public invariants (must not change without a format bump)
//!
//! - **Wire layout** (little-endian):
//!   `format:u8 | numRecords:u8 | (operation:u8 | numEntries:u8 | entry:u32 × numEntries) × numRecords`
//! - **Validation rules**:
//!   - V1: `refreshEntireRepository` carries no change records.
//!   - V2: a handle-format event may not use `refreshAllRecords`.
//!   - V3: one format per event (types and handles cannot mix — enforced
//!     by construction, the format is a single field).
//!   - V4: records appear in non-decreasing operation order
//!     (deleted < added < modified).
//!   - V5: at most [`CHG_EVENT_MAX_ENTRIES`] entries per record and
//!     [`CHG_EVENT_MAX_RECORDS`] records per event.
//!
//! The encoder validates before serializing; the decoder bounds-checks
//! every read and validates the result.

use crate::error::{PdrError, PdrResult};
use crate::formats::{CHG_EVENT_MAX_ENTRIES, CHG_EVENT_MAX_RECORDS};

/// eventDataFormat (DSP0248 Table 23).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeEventFormat {
    /// The whole remote repository changed; re-sync from scratch.
    RefreshEntireRepository,
    /// Change entries are PDR type codes.
    PdrTypes,
    /// Change entries are record handles.
    PdrHandles,
}

impl ChangeEventFormat {
    /// Wire encoding of the format.
    pub fn as_u8(self) -> u8 {
        match self {
            ChangeEventFormat::RefreshEntireRepository => 0,
            ChangeEventFormat::PdrTypes => 1,
            ChangeEventFormat::PdrHandles => 2,
        }
    }
}

impl TryFrom<u8> for ChangeEventFormat {
    type Error = PdrError;

    fn try_from(value: u8) -> PdrResult<Self> {
        match value {
            0 => Ok(ChangeEventFormat::RefreshEntireRepository),
            1 => Ok(ChangeEventFormat::PdrTypes),
            2 => Ok(ChangeEventFormat::PdrHandles),
            v => Err(PdrError::Validation(format!(
                "unknown eventDataFormat {v:#04x}"
            ))),
        }
    }
}

/// eventDataOperation (DSP0248 Table 24).
///
/// The derived ordering is the wire-mandated record order (V4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChangeOp {
    /// Every record of the named types changed (type format only).
    RefreshAllRecords,
    /// Records were deleted.
    RecordsDeleted,
    /// Records were added.
    RecordsAdded,
    /// Records were modified in place.
    RecordsModified,
}

impl ChangeOp {
    /// Wire encoding of the operation.
    pub fn as_u8(self) -> u8 {
        match self {
            ChangeOp::RefreshAllRecords => 0,
            ChangeOp::RecordsDeleted => 1,
            ChangeOp::RecordsAdded => 2,
            ChangeOp::RecordsModified => 3,
        }
    }
}

impl TryFrom<u8> for ChangeOp {
    type Error = PdrError;

    fn try_from(value: u8) -> PdrResult<Self> {
        match value {
            0 => Ok(ChangeOp::RefreshAllRecords),
            1 => Ok(ChangeOp::RecordsDeleted),
            2 => Ok(ChangeOp::RecordsAdded),
            3 => Ok(ChangeOp::RecordsModified),
            v => Err(PdrError::Validation(format!(
                "unknown eventDataOperation {v:#04x}"
            ))),
        }
    }
}

/// One changeRecord: an operation plus its change entries
/// (record handles or PDR type codes, depending on the event format).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    /// What happened to the listed entries.
    pub op: ChangeOp,
    /// Affected handles or type codes (at most [`CHG_EVENT_MAX_ENTRIES`]).
    pub entries: Vec<u32>,
}

/// A decoded `pldmPDRRepositoryChgEvent`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// How the change entries are to be interpreted.
    pub format: ChangeEventFormat,
    /// Change records in wire order (at most [`CHG_EVENT_MAX_RECORDS`]).
    pub records: Vec<ChangeRecord>,
}

impl ChangeEvent {
    /// The "start over" event: no delta, re-sync everything.
    pub fn refresh_entire_repository() -> Self {
        Self {
            format: ChangeEventFormat::RefreshEntireRepository,
            records: Vec::new(),
        }
    }

    /// Check the event against rules V1–V5.
    pub fn validate(&self) -> PdrResult<()> {
        if self.format == ChangeEventFormat::RefreshEntireRepository {
            if !self.records.is_empty() {
                return Err(PdrError::Validation(
                    "refreshEntireRepository carries change records".into(),
                ));
            }
            return Ok(());
        }

        if self.records.len() > CHG_EVENT_MAX_RECORDS {
            return Err(PdrError::Validation(format!(
                "{} change records exceed the limit of {CHG_EVENT_MAX_RECORDS}",
                self.records.len()
            )));
        }

        let mut last_op = ChangeOp::RefreshAllRecords;
        for rec in &self.records {
            if self.format == ChangeEventFormat::PdrHandles
                && rec.op == ChangeOp::RefreshAllRecords
            {
                return Err(PdrError::Validation(
                    "refreshAllRecords is not valid in a handle-format event".into(),
                ));
            }
            if rec.op < last_op {
                return Err(PdrError::Validation(
                    "change records out of operation order".into(),
                ));
            }
            last_op = rec.op;
            if rec.entries.len() > CHG_EVENT_MAX_ENTRIES {
                return Err(PdrError::Validation(format!(
                    "{} change entries exceed the limit of {CHG_EVENT_MAX_ENTRIES}",
                    rec.entries.len()
                )));
            }
        }
        Ok(())
    }

    /// Wire-encoded size of the event in bytes.
    pub fn encoded_size(&self) -> usize {
        2 + self
            .records
            .iter()
            .map(|r| 2 + 4 * r.entries.len())
            .sum::<usize>()
    }

    /// Validate and serialize into `buf`. Returns the encoded length.
    pub fn encode(&self, buf: &mut [u8]) -> PdrResult<usize> {
        self.validate()?;
        let need = self.encoded_size();
        if buf.len() < need {
            return Err(PdrError::Malformed(format!(
                "encode buffer of {} bytes cannot hold a {need}-byte event",
                buf.len()
            )));
        }

        buf[0] = self.format.as_u8();
        buf[1] = self.records.len() as u8;
        let mut offset = 2;
        for rec in &self.records {
            buf[offset] = rec.op.as_u8();
            buf[offset + 1] = rec.entries.len() as u8;
            offset += 2;
            for &entry in &rec.entries {
                buf[offset..offset + 4].copy_from_slice(&entry.to_le_bytes());
                offset += 4;
            }
        }
        Ok(offset)
    }

    /// Parse an event from received bytes, then validate it.
    ///
    /// Every read is bounds-checked; trailing bytes beyond the declared
    /// records are ignored.
    pub fn decode(buf: &[u8]) -> PdrResult<Self> {
        if buf.len() < 2 {
            return Err(PdrError::Malformed(format!(
                "change event of {} bytes is shorter than its header",
                buf.len()
            )));
        }
        let format = ChangeEventFormat::try_from(buf[0])?;
        let num_records = buf[1] as usize;

        if format == ChangeEventFormat::RefreshEntireRepository {
            if num_records != 0 {
                return Err(PdrError::Validation(
                    "refreshEntireRepository carries change records".into(),
                ));
            }
            return Ok(Self::refresh_entire_repository());
        }

        if num_records > CHG_EVENT_MAX_RECORDS {
            return Err(PdrError::Validation(format!(
                "{num_records} change records exceed the limit of {CHG_EVENT_MAX_RECORDS}"
            )));
        }

        let mut offset = 2;
        let mut records = Vec::with_capacity(num_records);
        for _ in 0..num_records {
            if offset + 2 > buf.len() {
                return Err(PdrError::Malformed(
                    "change record truncated before its header".into(),
                ));
            }
            let op = ChangeOp::try_from(buf[offset])?;
            let num_entries = buf[offset + 1] as usize;
            offset += 2;

            if num_entries > CHG_EVENT_MAX_ENTRIES {
                return Err(PdrError::Validation(format!(
                    "{num_entries} change entries exceed the limit of {CHG_EVENT_MAX_ENTRIES}"
                )));
            }
            if offset + 4 * num_entries > buf.len() {
                return Err(PdrError::Malformed(
                    "change record truncated inside its entries".into(),
                ));
            }

            let mut entries = Vec::with_capacity(num_entries);
            for _ in 0..num_entries {
                entries.push(u32::from_le_bytes([
                    buf[offset],
                    buf[offset + 1],
                    buf[offset + 2],
                    buf[offset + 3],
                ]));
                offset += 4;
            }
            records.push(ChangeRecord { op, entries });
        }

        let event = Self { format, records };
        event.validate()?;
        Ok(event)
    }
}
