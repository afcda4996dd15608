//! Error taxonomy for the fat32 filesystem engine (spec §7).
//!
//! `Error::Io` carries the underlying I/O failure reported by a block
//! device adapter; every other variant is raised by the engine itself once
//! it has classified what went wrong. `NONE` (success) is not a variant
//! here — it is represented by `Ok(..)`; [`code_name`] reintroduces it for
//! callers of the public API's `fat_get_error` query (spec §6, §8 scenario
//! 1).

use std::fmt;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The block device adapter's `read`/`write` callback returned false.
    /// Nothing higher-level can be inferred from this.
    #[error("IO: {0}")]
    Io(IoError),
    /// `probe`/mount-time BPB or FSInfo validation failed; no state change.
    #[error("NOFAT")]
    NoFat,
    /// An on-disk invariant was violated mid-operation (BAD/FREE where
    /// USED was expected, an inconsistent LFN group, a checksum mismatch,
    /// more than 20 LFN slots, a name longer than 255 code units, ...).
    /// The volume should be treated as corrupted.
    #[error("BROKEN: {0}")]
    Broken(BrokenReason),
    /// A caller-supplied argument violated a precondition.
    #[error("PARAM: {0}")]
    Param(ParamReason),
    /// The call was well-formed, but the path is syntactically invalid or
    /// a component does not exist along a descend step.
    #[error("PATH")]
    Path,
    /// The cursor reached end-of-directory or end-of-file. An expected
    /// sentinel in read/iteration loops, not a failure.
    #[error("EOF")]
    Eof,
    /// Create-without-CREATE, unlink of a non-empty directory, write on a
    /// read-only handle, or unlink of the root / an RO|SYS|LABEL entry.
    #[error("DENIED: {0}")]
    Denied(DeniedReason),
    /// The allocator scanned the entire FAT without finding a FREE
    /// cluster.
    #[error("FULL")]
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoError {
    Read,
    Write,
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoError::Read => write!(f, "read failed"),
            IoError::Write => write!(f, "write failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokenReason {
    /// `get_fat` classified an entry as neither FREE, USED, LAST nor BAD.
    FatEntry,
    /// A FREE or BAD cluster was encountered where a live chain was
    /// expected to continue.
    ChainLink,
    /// A directory traversal found more than 20 LFN slots in one group,
    /// a non-constant `crc`, or an LFN group not immediately followed by
    /// a matching SFN.
    LfnGroup,
    /// The decoded filename exceeds 255 UCS-2 code units.
    NameTooLong,
    /// FSInfo head/struct/tail signatures did not match.
    FsInfoSignature,
}

impl fmt::Display for BrokenReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BrokenReason::FatEntry => "unclassifiable FAT entry",
            BrokenReason::ChainLink => "FREE/BAD cluster in a live chain",
            BrokenReason::LfnGroup => "inconsistent LFN group",
            BrokenReason::NameTooLong => "filename exceeds 255 code units",
            BrokenReason::FsInfoSignature => "FSInfo signature mismatch",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamReason {
    NullVolume,
    NameTooLong,
    UnknownMount,
    SeekOutOfRange,
}

impl fmt::Display for ParamReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ParamReason::NullVolume => "no such volume",
            ParamReason::NameTooLong => "name too long",
            ParamReason::UnknownMount => "unknown mount name",
            ParamReason::SeekOutOfRange => "seek offset out of range",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeniedReason {
    NotFoundNoCreate,
    DirectoryNotEmpty,
    ReadOnlyHandle,
    ProtectedEntry,
}

impl fmt::Display for DeniedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeniedReason::NotFoundNoCreate => "not found and CREATE not set",
            DeniedReason::DirectoryNotEmpty => "directory not empty",
            DeniedReason::ReadOnlyHandle => "handle is not writable",
            DeniedReason::ProtectedEntry => "entry is root or RO/SYS/LABEL",
        };
        write!(f, "{s}")
    }
}

pub type Result<T> = core::result::Result<T, Error>;

impl Error {
    /// Negative error code, per spec §6.
    pub fn code(&self) -> i32 {
        match self {
            Error::NoFat => -1,
            Error::Broken(_) => -2,
            Error::Io(_) => -3,
            Error::Param(_) => -4,
            Error::Path => -5,
            Error::Eof => -6,
            Error::Denied(_) => -7,
            Error::Full => -8,
        }
    }

    pub fn name(&self) -> &'static str {
        code_name(self.code())
    }
}

/// `fat_get_error` codes, including the success sentinel `NONE`.
pub fn code_name(code: i32) -> &'static str {
    match code {
        0 => "NONE",
        -1 => "NOFAT",
        -2 => "BROKEN",
        -3 => "IO",
        -4 => "PARAM",
        -5 => "PATH",
        -6 => "EOF",
        -7 => "DENIED",
        -8 => "FULL",
        _ => "UNKNOWN",
    }
}
