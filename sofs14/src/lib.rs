//! # SOFS14 storage engine
//!
//! A Unix-style block-oriented file system kept on a regular host file that
//! is treated as a raw block device. The volume is an array of fixed-size
//! blocks grouped into clusters:
//!
//! superblock | table of inodes | data zone
//!
//! The data zone holds the information content of files, directories and
//! symbolic links; free data clusters form a double-linked list threaded
//! through the clusters themselves, buffered by two reference caches kept
//! inside the superblock. Free inodes form a second double-linked list
//! threaded through the inode records.

// 索引节点与目录操作层：目录项的查找、插入、移除与路径解析
mod dir;

// 文件簇层：inode 引用表（直接 / 一级间接 / 二级间接）的统一操作入口
mod index;

// 文件簇读写层
mod fileio;

// 空闲 inode 与空闲簇管理层
mod clusters;
mod inodes;

// 卷管理层：超级块镜像、挂载与格式化
mod fs;

// 磁盘数据结构层
mod layout;

// 结构一致性快速检查
mod consist;

// 错误分类
mod error;

// 块缓存层：内存上的磁盘块数据缓存
mod block_cache;

// 磁盘块设备接口层
mod block_dev;

#[cfg(test)]
pub(crate) mod test_support;

pub use block_dev::BlockDevice;
pub use dir::{Access, AddOp, RemoveOp};
pub use error::{Result, SofsError};
pub use fs::{Credentials, SofsFileSystem};
pub use index::{ClusterOp, ReleaseOp};
pub use inodes::InodeStatus;
pub use layout::{
    DataCluster, DirEntry, DiskInode, InodeKind, ModeFlag, SuperBlock, NPRU, PRU,
};

/// File system identification number.
pub const MAGIC: u32 = 0x65FE;
/// On-disk format version.
pub const VERSION: u32 = 0x2014;

/// Size of a block, the smallest unit of device I/O.
pub const BLOCK_SIZE: usize = 512;
/// Number of consecutive blocks that form a cluster, the allocation unit.
pub const BLOCKS_PER_CLUSTER: usize = 4;
/// Size of a cluster in bytes.
pub const CLUSTER_SIZE: usize = BLOCK_SIZE * BLOCKS_PER_CLUSTER;

/// Maximum length of the volume name, NUL excluded.
pub const PARTITION_NAME_SIZE: usize = 23;

/// Reference to no inode.
pub const NULL_INODE: u32 = u32::MAX;
/// Reference to no data cluster.
pub const NULL_CLUSTER: u32 = u32::MAX;

/// Number of inodes stored in one block of the inode table.
pub const IPB: usize = BLOCK_SIZE / DiskInode::SIZE;

/// Number of direct cluster references kept inline in an inode.
pub const N_DIRECT: usize = 8;
/// Number of cluster references held by one reference cluster.
pub const RPC: usize = CLUSTER_SIZE / 4 - 3;
/// Bytes of byte-stream payload per cluster (cluster size minus the header).
pub const BSLPC: usize = CLUSTER_SIZE - 12;
/// Number of directory entries held by one cluster.
pub const DPC: usize = BSLPC / DirEntry::SIZE;

/// Highest logical cluster index of a file, exclusive.
pub const MAX_FILE_CLUSTERS: usize = N_DIRECT + RPC + RPC * RPC;

/// Maximum length of a single name inside a directory.
pub const MAX_NAME: usize = 59;
/// Maximum length of a path handed to the resolver.
pub const MAX_PATH: usize = 511;

/// Capacity of each of the two free-cluster reference caches in the superblock.
pub const DZONE_CACHE_SIZE: usize = 50;
