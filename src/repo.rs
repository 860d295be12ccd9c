//! PDR repository: blob + index + cached info + signature.
//!
//! A repository is a single contiguous blob holding every record's bytes
//! (common header + body), plus a per-record index kept outside the blob.
//! Reads are zero-copy: [`PdrRepo::get_pdr`] and [`PdrRepo::find_pdr`]
//! return slices borrowed straight out of the blob, and the borrow checker
//! enforces that no mutation happens while a caller holds one.
//!
//! ## Public invariants (must not change without a format bump)
//!
//! - Every live index entry points at blob bytes that begin with a valid
//!   common header whose `record_handle` and `data_length` agree with the
//!   entry.
//! - Live record handles are unique; handle `0` is reserved ("first live
//!   record" on reads, "no more records" on continuation outputs).
//! - Removal tombstones the index entry in O(1); blob bytes stay in place
//!   until [`PdrRepo::run_init_agent`] rebuilds the repository.
//! - **Signature**: `crc32fast` over `blob[0..blob_used)`, lazily
//!   recomputed after any mutation.

use crate::error::{PdrError, PdrResult};
use crate::formats::{
    PDR_HEADER_VERSION, PDR_MAX_RECORD_COUNT, PDR_REPO_BLOB_CAPACITY, PDR_TRANSFER_CHUNK_SIZE,
    PdrHeader, TRANSFER_FLAG_END, TRANSFER_FLAG_MIDDLE, TRANSFER_FLAG_START,
    TRANSFER_FLAG_START_AND_END,
};
use std::ops::RangeInclusive;

/// Repository state reported by GetPDRRepositoryInfo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepoState {
    /// Repository is serving requests normally.
    #[default]
    Available,
    /// A rebuild (RunInitAgent) is in progress.
    UpdateInProgress,
    /// The last rebuild failed; contents may be partial.
    Failed,
}

impl RepoState {
    /// Wire encoding of the state.
    pub fn as_u8(self) -> u8 {
        match self {
            RepoState::Available => 0,
            RepoState::UpdateInProgress => 1,
            RepoState::Failed => 2,
        }
    }
}

/// Cached repository aggregates served by GetPDRRepositoryInfo.
///
/// Recomputed on every mutation so the command handler is a plain read.
#[derive(Debug, Clone, Copy, Default)]
pub struct RepoInfo {
    /// Current repository state.
    pub repository_state: RepoState,
    /// Number of live (non-tombstoned) records.
    pub record_count: u32,
    /// Summed size of all live records, headers included.
    pub repository_size: u32,
    /// Size of the largest live record (0 if empty).
    pub largest_record_size: u32,
    /// Integrator-stamped update time; the core has no time source.
    pub update_timestamp: u32,
    /// Integrator-stamped OEM update time.
    pub oem_update_timestamp: u32,
    /// Data transfer handle timeout, in seconds.
    pub data_transfer_handle_timeout: u8,
}

/// Per-record metadata kept outside the blob.
#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    record_handle: u32,
    offset: u32,
    /// Total size including the common header.
    size: u16,
    pdr_type: u8,
    tombstone: bool,
}

/// One zero-copy GetPDR chunk.
#[derive(Debug, Clone, Copy)]
pub struct PdrTransfer<'a> {
    /// Chunk bytes, borrowed from the repository blob.
    pub data: &'a [u8],
    /// One of the `TRANSFER_FLAG_*` constants.
    pub transfer_flag: u8,
    /// Handle of the next live record in index order (0 if none).
    pub next_record_handle: u32,
    /// Offset for the next chunk (0 when this chunk is final).
    pub next_data_transfer_handle: u32,
}

/// One zero-copy FindPDR match.
#[derive(Debug, Clone, Copy)]
pub struct PdrMatch<'a> {
    /// Handle of the matching record.
    pub record_handle: u32,
    /// Handle of the next record of the same type (0 if none).
    pub next_handle: u32,
    /// The full record bytes, common header included.
    pub data: &'a [u8],
}

enum BlobStorage<'b> {
    Owned(Box<[u8]>),
    External(&'b mut [u8]),
}

impl BlobStorage<'_> {
    fn as_slice(&self) -> &[u8] {
        match self {
            BlobStorage::Owned(b) => b,
            BlobStorage::External(b) => b,
        }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            BlobStorage::Owned(b) => b,
            BlobStorage::External(b) => b,
        }
    }
}

/// A fixed-capacity PDR repository.
///
/// The default form owns its blob; [`PdrRepo::with_external_blob`] binds an
/// integrator-owned buffer instead (for pre-packed images replayed through
/// [`PdrRepo::index_record`]). No allocation happens after construction.
pub struct PdrRepo<'b> {
    blob: BlobStorage<'b>,
    /// High-water mark: bytes of the blob that hold record data.
    blob_used: usize,
    index: Vec<IndexEntry>,
    info: RepoInfo,
    signature: u32,
    signature_valid: bool,
    /// Monotonic handle allocator; 0 is reserved.
    next_record_handle: u32,
}

impl PdrRepo<'static> {
    /// Create an empty repository with the default blob capacity.
    pub fn new() -> Self {
        Self::with_capacity(PDR_REPO_BLOB_CAPACITY)
    }

    /// Create an empty repository with an owned blob of `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::from_storage(BlobStorage::Owned(vec![0u8; capacity].into_boxed_slice()))
    }
}

impl Default for PdrRepo<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'b> PdrRepo<'b> {
    /// Create a repository over an externally-owned blob buffer.
    ///
    /// The buffer may already hold a pre-packed record image; register its
    /// records with [`PdrRepo::index_record`].
    pub fn with_external_blob(blob: &'b mut [u8]) -> Self {
        Self::from_storage(BlobStorage::External(blob))
    }

    fn from_storage(blob: BlobStorage<'b>) -> Self {
        Self {
            blob,
            blob_used: 0,
            index: Vec::with_capacity(PDR_MAX_RECORD_COUNT),
            info: RepoInfo::default(),
            signature: 0,
            signature_valid: false,
            next_record_handle: 1,
        }
    }

    /// Blob capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.blob.as_slice().len()
    }

    /// The used prefix of the blob (every stored record's bytes,
    /// tombstoned records included until the next rebuild).
    pub fn image(&self) -> &[u8] {
        &self.blob.as_slice()[..self.blob_used]
    }

    /// Cached repository aggregates.
    pub fn info(&self) -> &RepoInfo {
        &self.info
    }

    /// Stamp the repository's update timestamp (integrator time source).
    pub fn set_update_timestamp(&mut self, timestamp: u32) {
        self.info.update_timestamp = timestamp;
    }

    /// Find the index position for a record handle.
    ///
    /// Handle 0 selects the first live record in index order.
    fn find_index(&self, record_handle: u32) -> Option<usize> {
        if record_handle == 0 {
            return self.index.iter().position(|e| !e.tombstone);
        }
        self.index
            .iter()
            .position(|e| !e.tombstone && e.record_handle == record_handle)
    }

    /// Recompute the cached aggregates after a mutation.
    ///
    /// Any call also invalidates the cached signature.
    fn update_info(&mut self) {
        let mut live_count = 0u32;
        let mut live_size = 0u32;
        let mut largest = 0u32;
        for e in self.index.iter().filter(|e| !e.tombstone) {
            live_count += 1;
            live_size += u32::from(e.size);
            largest = largest.max(u32::from(e.size));
        }
        self.info.record_count = live_count;
        self.info.repository_size = live_size;
        self.info.largest_record_size = largest;
        self.signature_valid = false;
    }

    /// Append a record (header + body) at the high-water mark.
    fn push_record(&mut self, record_handle: u32, pdr_type: u8, body: &[u8]) -> PdrResult<()> {
        if self.index.len() >= PDR_MAX_RECORD_COUNT {
            return Err(PdrError::Full("record index".into()));
        }
        if body.len() > usize::from(u16::MAX) - PdrHeader::SIZE {
            return Err(PdrError::Malformed(format!(
                "record body of {} bytes does not fit a 16-bit length",
                body.len()
            )));
        }
        let total = PdrHeader::SIZE + body.len();
        let available = self.capacity() - self.blob_used;
        if total > available {
            return Err(PdrError::NoSpace {
                needed: total,
                available,
            });
        }

        let hdr = PdrHeader {
            record_handle,
            header_version: PDR_HEADER_VERSION,
            pdr_type,
            record_change_num: 0,
            data_length: body.len() as u16,
        };
        let offset = self.blob_used;
        let blob = self.blob.as_mut_slice();
        hdr.write(&mut &mut blob[offset..offset + PdrHeader::SIZE])?;
        blob[offset + PdrHeader::SIZE..offset + total].copy_from_slice(body);

        self.index.push(IndexEntry {
            record_handle,
            offset: offset as u32,
            size: total as u16,
            pdr_type,
            tombstone: false,
        });
        self.blob_used += total;
        self.update_info();
        Ok(())
    }

    /// Add a record with an auto-allocated handle. Returns the handle.
    pub fn add_record(&mut self, pdr_type: u8, body: &[u8]) -> PdrResult<u32> {
        let handle = self.next_record_handle;
        self.push_record(handle, pdr_type, body)?;
        self.next_record_handle += 1;
        Ok(handle)
    }

    /// Add a record with a caller-chosen handle.
    ///
    /// Fails if the handle is 0 (reserved) or already names a live record.
    /// Does not disturb the auto allocator: the manager inserts remapped
    /// handles from disjoint high ranges the allocator never reaches.
    pub fn add_record_with_handle(
        &mut self,
        record_handle: u32,
        pdr_type: u8,
        body: &[u8],
    ) -> PdrResult<()> {
        if record_handle == 0 {
            return Err(PdrError::Validation("record handle 0 is reserved".into()));
        }
        if self
            .index
            .iter()
            .any(|e| !e.tombstone && e.record_handle == record_handle)
        {
            return Err(PdrError::DuplicateHandle(record_handle));
        }
        self.push_record(record_handle, pdr_type, body)
    }

    /// Register a record already present in the blob (zero-copy).
    ///
    /// Used when the blob was bound pre-populated: parses the common header
    /// at `offset`, appends an index entry, advances the allocator past the
    /// handle seen, and raises the high-water mark to cover the record.
    /// Returns the record's handle.
    pub fn index_record(&mut self, offset: u32) -> PdrResult<u32> {
        if self.index.len() >= PDR_MAX_RECORD_COUNT {
            return Err(PdrError::Full("record index".into()));
        }
        let offset = offset as usize;
        let blob = self.blob.as_slice();
        if offset + PdrHeader::SIZE > blob.len() {
            return Err(PdrError::Malformed(format!(
                "record header at offset {offset} exceeds blob capacity"
            )));
        }
        let hdr = PdrHeader::parse(&blob[offset..])?;
        let total = hdr.total_size();
        if total > usize::from(u16::MAX) {
            return Err(PdrError::Malformed(format!(
                "record of {total} bytes does not fit a 16-bit size"
            )));
        }
        if offset + total > blob.len() {
            return Err(PdrError::Malformed(format!(
                "record of {total} bytes at offset {offset} exceeds blob capacity"
            )));
        }
        if self
            .index
            .iter()
            .any(|e| !e.tombstone && e.record_handle == hdr.record_handle)
        {
            return Err(PdrError::DuplicateHandle(hdr.record_handle));
        }

        self.index.push(IndexEntry {
            record_handle: hdr.record_handle,
            offset: offset as u32,
            size: total as u16,
            pdr_type: hdr.pdr_type,
            tombstone: false,
        });
        if hdr.record_handle >= self.next_record_handle {
            self.next_record_handle = hdr.record_handle + 1;
        }
        self.blob_used = self.blob_used.max(offset + total);
        self.update_info();
        Ok(hdr.record_handle)
    }

    /// Remove a record by handle: O(1) tombstone, no compaction.
    ///
    /// Handle 0 is a read-side wildcard and is NotFound here.
    pub fn remove_record(&mut self, record_handle: u32) -> PdrResult<()> {
        let idx = self
            .index
            .iter()
            .position(|e| !e.tombstone && e.record_handle == record_handle)
            .ok_or_else(|| PdrError::NotFound(format!("record handle {record_handle:#010x}")))?;
        self.index[idx].tombstone = true;
        self.update_info();
        Ok(())
    }

    /// Tombstone every live record whose handle falls in `range`.
    ///
    /// Returns the number of records removed. The manager uses this to
    /// purge one terminus's remapped handle range in a single pass.
    pub fn remove_in_range(&mut self, range: RangeInclusive<u32>) -> usize {
        let mut removed = 0;
        for e in self
            .index
            .iter_mut()
            .filter(|e| !e.tombstone && range.contains(&e.record_handle))
        {
            e.tombstone = true;
            removed += 1;
        }
        if removed > 0 {
            self.update_info();
        }
        removed
    }

    /// Lazily recompute and return the repository signature
    /// (CRC-32 over the used blob prefix).
    pub fn signature(&mut self) -> u32 {
        if !self.signature_valid {
            self.signature = crc32fast::hash(&self.blob.as_slice()[..self.blob_used]);
            self.signature_valid = true;
        }
        self.signature
    }

    /// Serve one GetPDR chunk.
    ///
    /// `record_handle` 0 selects the first live record;
    /// `data_transfer_handle` is the byte offset within the record
    /// (0 on the first chunk). Chunks are at most
    /// [`PDR_TRANSFER_CHUNK_SIZE`] bytes.
    pub fn get_pdr(
        &self,
        record_handle: u32,
        data_transfer_handle: u32,
    ) -> PdrResult<PdrTransfer<'_>> {
        let idx = self
            .find_index(record_handle)
            .ok_or_else(|| PdrError::NotFound(format!("record handle {record_handle:#010x}")))?;
        let entry = self.index[idx];

        if data_transfer_handle >= u32::from(entry.size) {
            return Err(PdrError::InvalidOffset {
                offset: data_transfer_handle,
                size: entry.size,
            });
        }

        let remaining = u32::from(entry.size) - data_transfer_handle;
        let chunk = remaining.min(u32::from(PDR_TRANSFER_CHUNK_SIZE));
        let start = entry.offset as usize + data_transfer_handle as usize;
        let data = &self.blob.as_slice()[start..start + chunk as usize];

        let is_first = data_transfer_handle == 0;
        let is_last = data_transfer_handle + chunk >= u32::from(entry.size);

        let transfer_flag = match (is_first, is_last) {
            (true, true) => TRANSFER_FLAG_START_AND_END,
            (true, false) => TRANSFER_FLAG_START,
            (false, true) => TRANSFER_FLAG_END,
            (false, false) => TRANSFER_FLAG_MIDDLE,
        };

        let next_record_handle = self.index[idx + 1..]
            .iter()
            .find(|e| !e.tombstone)
            .map_or(0, |e| e.record_handle);

        Ok(PdrTransfer {
            data,
            transfer_flag,
            next_record_handle,
            next_data_transfer_handle: if is_last {
                0
            } else {
                data_transfer_handle + chunk
            },
        })
    }

    /// Find the first record of `pdr_type` at or after `start_handle`.
    ///
    /// `start_handle` 0 scans from the beginning; a non-zero handle must
    /// still be live (a tombstoned continuation handle is NotFound — the
    /// caller restarts from 0) and scanning begins at the entry after it.
    pub fn find_pdr(&self, pdr_type: u8, start_handle: u32) -> PdrResult<PdrMatch<'_>> {
        let start_idx = if start_handle == 0 {
            0
        } else {
            self.index
                .iter()
                .position(|e| !e.tombstone && e.record_handle == start_handle)
                .ok_or_else(|| {
                    PdrError::NotFound(format!("start handle {start_handle:#010x}"))
                })?
                + 1
        };

        for (i, e) in self.index.iter().enumerate().skip(start_idx) {
            if e.tombstone || e.pdr_type != pdr_type {
                continue;
            }
            let next_handle = self.index[i + 1..]
                .iter()
                .find(|n| !n.tombstone && n.pdr_type == pdr_type)
                .map_or(0, |n| n.record_handle);
            let data =
                &self.blob.as_slice()[e.offset as usize..e.offset as usize + e.size as usize];
            return Ok(PdrMatch {
                record_handle: e.record_handle,
                next_handle,
                data,
            });
        }

        Err(PdrError::NotFound(format!("no PDR of type {pdr_type}")))
    }

    /// Rebuild the repository: wipe everything and let `populate`
    /// re-add records via [`PdrRepo::add_record`] / [`PdrRepo::index_record`].
    ///
    /// While the callback runs the state is `UpdateInProgress`; a callback
    /// error leaves the repository in the `Failed` state with whatever the
    /// callback managed to add.
    pub fn run_init_agent<F>(&mut self, populate: F) -> PdrResult<()>
    where
        F: FnOnce(&mut Self) -> PdrResult<()>,
    {
        self.info.repository_state = RepoState::UpdateInProgress;
        self.blob_used = 0;
        self.index.clear();
        self.next_record_handle = 1;
        self.signature_valid = false;
        self.blob.as_mut_slice().fill(0);

        let result = populate(self);
        self.info.repository_state = match result {
            Ok(()) => RepoState::Available,
            Err(_) => RepoState::Failed,
        };
        self.update_info();
        result
    }
}
