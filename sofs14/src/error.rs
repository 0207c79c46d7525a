use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SofsError>;

/// Closed set of error kinds produced by the storage engine.
///
/// The first failing step of an operation short-circuits it; no rollback is
/// attempted. The kinds below `Io` are structural-consistency kinds: they are
/// never produced on a well-formed volume and surface unchanged when the
/// on-disk metadata is found damaged.
#[derive(Debug, Error)]
pub enum SofsError {
    #[error("invalid argument")]
    Invalid,
    #[error("name or path too long")]
    NameTooLong,
    #[error("path is relative")]
    RelativePath,
    #[error("no free inodes or data clusters left")]
    NoSpace,
    #[error("hard-link ceiling reached")]
    TooManyLinks,
    #[error("file has grown to its maximum size")]
    FileTooBig,
    #[error("no such directory entry")]
    NotFound,
    #[error("directory entry already exists")]
    Exists,
    #[error("directory is not empty")]
    NotEmpty,
    #[error("not a directory")]
    NotDirectory,
    #[error("access denied")]
    AccessDenied,
    #[error("operation not permitted")]
    NotPermitted,
    #[error("too many symbolic links in path resolution")]
    SymlinkLoop,

    #[error("inode in use is inconsistent")]
    InodeInUseInvalid,
    #[error("free inode is inconsistent")]
    FreeInodeInvalid,
    #[error("free inode in the dirty state is inconsistent")]
    FreeDirtyInodeInvalid,
    #[error("cluster reference list of an inode is inconsistent")]
    RefListInvalid,
    #[error("data cluster header is inconsistent")]
    ClusterHeaderInvalid,
    #[error("data cluster already present in the list of references")]
    ClusterAlreadyInList,
    #[error("data cluster not present in the list of references")]
    ClusterNotInList,
    #[error("data cluster has not been allocated")]
    ClusterNotAllocated,
    #[error("data cluster status holds the wrong inode number")]
    WrongInodeNumber,
    #[error("directory content is inconsistent")]
    DirectoryInvalid,
    #[error("directory entry is inconsistent")]
    DirEntryInvalid,
    #[error("cluster mapping association is invalid")]
    ClusterMapInvalid,
    #[error("inconsistency detected at a lower storage level")]
    Internal,

    #[error("device I/O failed: {0}")]
    Io(#[from] io::Error),
}

// Local kinds outside the range of the system error numbers, matching the
// traditional SOFS error table.
const EFININVAL: i32 = 515;
const EDCINVAL: i32 = 519;
const EFDININVAL: i32 = 521;
const EIUININVAL: i32 = 522;
const ELDCININVAL: i32 = 523;
const EDIRINVAL: i32 = 524;
const EDEINVAL: i32 = 525;
const EDCARDYIL: i32 = 526;
const EDCNOTIL: i32 = 527;
const EWGINODENB: i32 = 528;
const ERELPATH: i32 = 529;
const EDCNALINVAL: i32 = 530;
const EDCMINVAL: i32 = 531;

impl SofsError {
    /// Stable numeric kind; the traditional C surface returns its negation.
    pub fn code(&self) -> i32 {
        match self {
            Self::Invalid => libc::EINVAL,
            Self::NameTooLong => libc::ENAMETOOLONG,
            Self::RelativePath => ERELPATH,
            Self::NoSpace => libc::ENOSPC,
            Self::TooManyLinks => libc::EMLINK,
            Self::FileTooBig => libc::EFBIG,
            Self::NotFound => libc::ENOENT,
            Self::Exists => libc::EEXIST,
            Self::NotEmpty => libc::ENOTEMPTY,
            Self::NotDirectory => libc::ENOTDIR,
            Self::AccessDenied => libc::EACCES,
            Self::NotPermitted => libc::EPERM,
            Self::SymlinkLoop => libc::ELOOP,
            Self::InodeInUseInvalid => EIUININVAL,
            Self::FreeInodeInvalid => EFININVAL,
            Self::FreeDirtyInodeInvalid => EFDININVAL,
            Self::RefListInvalid => ELDCININVAL,
            Self::ClusterHeaderInvalid => EDCINVAL,
            Self::ClusterAlreadyInList => EDCARDYIL,
            Self::ClusterNotInList => EDCNOTIL,
            Self::ClusterNotAllocated => EDCNALINVAL,
            Self::WrongInodeNumber => EWGINODENB,
            Self::DirectoryInvalid => EDIRINVAL,
            Self::DirEntryInvalid => EDEINVAL,
            Self::ClusterMapInvalid => EDCMINVAL,
            Self::Internal => libc::ELIBBAD,
            Self::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}
