//! error type shared by every [Volume](crate::Volume) operation
//!
//! Every variant maps to exactly one errno through [FsError::to_errno],
//! so a host wiring the volume to VFS callbacks can reply directly.
use thiserror::Error;

use crate::fs::Region;

#[derive(Debug, Error)]
pub enum FsError {
    /// name or inode absent
    #[error("no such entry")]
    NotFound,
    /// insert collided with a live entry of the same name
    #[error("entry already exists")]
    AlreadyExists,
    /// every bitmap block of the region is full
    #[error("no space left in the {0} region")]
    NoSpace(Region),
    /// a pointer chain changed while it was being walked,
    /// the whole operation has to be retried
    #[error("block map changed during lookup, retry")]
    Stale,
    /// on-disk metadata violates its format at a known block
    #[error("corrupt metadata at block {block}: {detail}")]
    Corrupt { block: u64, detail: String },
    /// the block store failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// not a volume of this filesystem, or an unusable geometry
    #[error("invalid on-disk format: {0}")]
    Format(String),
    #[error("file name too long")]
    NameTooLong,
    #[error("invalid file name")]
    InvalidName,
    #[error("not a directory")]
    NotDirectory,
    #[error("is a directory")]
    IsDirectory,
    #[error("directory not empty")]
    NotEmpty,
    /// logical block index beyond the triple indirect range
    #[error("file too large")]
    FileTooLarge,
    /// the volume was latched read-only after corruption was detected
    #[error("volume is read-only")]
    ReadOnly,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T, E = FsError> = std::result::Result<T, E>;

impl FsError {
    pub(crate) fn corrupt(block: impl Into<u64>, detail: impl Into<String>) -> Self {
        FsError::Corrupt {
            block: block.into(),
            detail: detail.into(),
        }
    }

    /// errno for this error, no wildcard arm so a new variant
    /// does not compile until it has one
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            FsError::NotFound => libc::ENOENT,
            FsError::AlreadyExists => libc::EEXIST,
            FsError::NoSpace(_) => libc::ENOSPC,
            FsError::Stale => libc::EAGAIN,
            FsError::Corrupt { .. } => libc::EIO,
            FsError::Io(_) => libc::EIO,
            FsError::Format(_) => libc::EINVAL,
            FsError::NameTooLong => libc::ENAMETOOLONG,
            FsError::InvalidName => libc::EINVAL,
            FsError::NotDirectory => libc::ENOTDIR,
            FsError::IsDirectory => libc::EISDIR,
            FsError::NotEmpty => libc::ENOTEMPTY,
            FsError::FileTooLarge => libc::EFBIG,
            FsError::ReadOnly => libc::EROFS,
            FsError::InvalidArgument(_) => libc::EINVAL,
        }
    }

    /// only a raced pointer chain is worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(self, FsError::Stale)
    }

    /// corruption must never be retried
    pub fn is_fatal(&self) -> bool {
        matches!(self, FsError::Corrupt { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(FsError::NotFound.to_errno(), libc::ENOENT);
        assert_eq!(FsError::AlreadyExists.to_errno(), libc::EEXIST);
        assert_eq!(FsError::NoSpace(Region::Data).to_errno(), libc::ENOSPC);
        assert_eq!(FsError::Stale.to_errno(), libc::EAGAIN);
        assert_eq!(FsError::corrupt(7u32, "zero rec_len").to_errno(), libc::EIO);
        assert_eq!(FsError::ReadOnly.to_errno(), libc::EROFS);
    }

    #[test]
    fn test_retry_and_fatal_classes() {
        assert!(FsError::Stale.is_retryable());
        assert!(!FsError::Stale.is_fatal());
        assert!(FsError::corrupt(1u32, "x").is_fatal());
        assert!(!FsError::corrupt(1u32, "x").is_retryable());
        assert!(!FsError::NoSpace(Region::Inode).is_retryable());
    }

    #[test]
    fn test_display_names_block() {
        let message = FsError::corrupt(42u32, "zero-length directory record").to_string();
        assert!(message.contains("42"));
        assert!(message.contains("zero-length"));
    }
}
