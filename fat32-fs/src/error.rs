//! Error type of the storage layer

use core::fmt;

/// Errors surfaced to callers of the filesystem.
///
/// Resource exhaustion and on-disk consistency violations are ordinary
/// values; the caller decides what to do with the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// every buffer of the cache is referenced
    NoBuffer,
    /// every slot of the inode cache is referenced
    NoInode,
    /// no free cluster left on the volume
    NoSpace,
    /// a long-name record does not belong to the short entry after it
    ChecksumMismatch,
    /// on-disk structure is inconsistent
    Corrupted(&'static str),
    /// boot sector or FSInfo signature mismatch
    BadSignature,
    /// an inode handle outlived its cache slot
    StaleHandle,
    NotFound,
    NotDir,
    IsDir,
    AlreadyExists,
    NotEmpty,
    ReadOnly,
    InvalidName,
    NameTooLong,
    /// user address range is not mapped or not accessible
    BadAddress,
    /// no block device registered under the given id
    NoDevice,
    Unsupported,
    InvalidArgument,
}

impl FsError {
    /// Whether the error reports an exhausted fixed-size resource.
    pub fn is_exhaustion(&self) -> bool {
        matches!(self, Self::NoBuffer | Self::NoInode | Self::NoSpace)
    }

    /// Whether the error reports a damaged on-disk structure.
    pub fn is_consistency(&self) -> bool {
        matches!(
            self,
            Self::ChecksumMismatch | Self::Corrupted(_) | Self::BadSignature | Self::StaleHandle
        )
    }
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoBuffer => write!(f, "no free buffer in block cache"),
            Self::NoInode => write!(f, "no free inode slot"),
            Self::NoSpace => write!(f, "no free cluster on volume"),
            Self::ChecksumMismatch => write!(f, "long name checksum mismatch"),
            Self::Corrupted(what) => write!(f, "corrupted filesystem: {}", what),
            Self::BadSignature => write!(f, "bad on-disk signature"),
            Self::StaleHandle => write!(f, "stale inode handle"),
            Self::NotFound => write!(f, "no such file or directory"),
            Self::NotDir => write!(f, "not a directory"),
            Self::IsDir => write!(f, "is a directory"),
            Self::AlreadyExists => write!(f, "file exists"),
            Self::NotEmpty => write!(f, "directory not empty"),
            Self::ReadOnly => write!(f, "file is read-only"),
            Self::InvalidName => write!(f, "invalid file name"),
            Self::NameTooLong => write!(f, "file name too long"),
            Self::BadAddress => write!(f, "bad address"),
            Self::NoDevice => write!(f, "no such device"),
            Self::Unsupported => write!(f, "operation not supported"),
            Self::InvalidArgument => write!(f, "invalid argument"),
        }
    }
}

/// Result alias used throughout the crate
pub type FsResult<T> = Result<T, FsError>;
