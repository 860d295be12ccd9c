//! Error types for `pldm-pdr`.

/// Result type for PDR repository and manager operations.
pub type PdrResult<T> = Result<T, PdrError>;

/// Errors returned by the `pldm-pdr` crate.
#[derive(thiserror::Error, Debug)]
pub enum PdrError {
    /// I/O error from a framing read/write.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Unknown record handle, terminus, or handle mapping.
    #[error("not found: {0}")]
    NotFound(String),

    /// A fixed-capacity structure is out of slots.
    #[error("capacity exhausted: {0}")]
    Full(String),

    /// The blob cannot hold another record of this size.
    #[error("no space in blob (need {needed} bytes, {available} available)")]
    NoSpace {
        /// Bytes the record (header + body) would occupy.
        needed: usize,
        /// Bytes left between the high-water mark and capacity.
        available: usize,
    },

    /// The requested handle is already bound to a live record.
    #[error("record handle {0:#010x} is already live")]
    DuplicateHandle(u32),

    /// Data transfer handle beyond the end of the record.
    #[error("transfer offset {offset} out of range for a {size}-byte record")]
    InvalidOffset {
        /// The rejected data transfer handle.
        offset: u32,
        /// Total size of the addressed record.
        size: u16,
    },

    /// Wire payload failed a bounds or format check.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// Input failed a validation rule (DSP0248 event constraints,
    /// duplicate terminus registration, reserved handle values).
    #[error("validation failed: {0}")]
    Validation(String),

    /// Transport capability failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// Remote endpoint answered with a non-success completion code.
    #[error("command {command:#04x} failed with completion code {code:#04x}")]
    Completion {
        /// PLDM command that was issued.
        command: u8,
        /// Completion code returned by the remote.
        code: u8,
    },

    /// Operation not valid for the current state or format.
    #[error("unsupported: {0}")]
    Unsupported(String),
}
