//! Cluster-granular file content I/O on top of the reference index.

use crate::error::{Result, SofsError};
use crate::inodes::InodeStatus;
use crate::layout::DataCluster;
use crate::{ClusterOp, SofsFileSystem, MAX_FILE_CLUSTERS, NULL_CLUSTER};

impl SofsFileSystem {
    /// Read the data cluster at logical index `clust_ind` of a file.
    ///
    /// A sparse region reads back as a zero-filled payload with a clean
    /// header.
    pub fn read_file_cluster(&mut self, n_inode: u32, clust_ind: u32) -> Result<DataCluster> {
        if clust_ind as usize >= MAX_FILE_CLUSTERS
            || !self.super_block().inode_in_range(n_inode)
        {
            return Err(SofsError::Invalid);
        }
        self.checked_in_use_inode(n_inode)?;

        let lc = self
            .handle_file_cluster(n_inode, clust_ind, ClusterOp::Get)?
            .unwrap_or(NULL_CLUSTER);

        let dc = if lc != NULL_CLUSTER {
            self.read_cluster(lc)?
        } else {
            DataCluster::default()
        };
        self.store_super_block()?;
        Ok(dc)
    }

    /// Write the payload of the data cluster at logical index `clust_ind`
    /// of a file, allocating the cluster lazily.
    ///
    /// Only the byte-stream payload of `buf` is stored; the on-disk header
    /// (ownership and chain links) stays untouched. The file's modification
    /// time is refreshed.
    pub fn write_file_cluster(
        &mut self,
        n_inode: u32,
        clust_ind: u32,
        buf: &DataCluster,
    ) -> Result<()> {
        if clust_ind as usize >= MAX_FILE_CLUSTERS
            || !self.super_block().inode_in_range(n_inode)
        {
            return Err(SofsError::Invalid);
        }
        self.checked_in_use_inode(n_inode)?;

        let mut lc = self
            .handle_file_cluster(n_inode, clust_ind, ClusterOp::Get)?
            .unwrap_or(NULL_CLUSTER);
        if lc == NULL_CLUSTER {
            lc = self
                .handle_file_cluster(n_inode, clust_ind, ClusterOp::Alloc)?
                .ok_or(SofsError::Internal)?;
        }

        let mut dc = self.read_cluster(lc)?;
        *dc.data_mut() = *buf.data();
        self.write_cluster(lc, &dc)?;

        // mtime bump
        let inode = self.read_inode(n_inode, InodeStatus::InUse)?;
        self.write_inode(&inode, n_inode, InodeStatus::InUse)?;
        self.store_super_block()
    }
}
