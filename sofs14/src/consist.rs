//! Fast structural checks on the file system metadata, callable at every
//! operation entry point. A failing check short-circuits the caller with the
//! matching structural error kind; on a well-formed volume none of these
//! fire.

use crate::error::{Result, SofsError};
use crate::layout::{DataCluster, DirEntry, DiskInode, SuperBlock};
use crate::SofsFileSystem;
use crate::{DPC, MAX_FILE_CLUSTERS, NULL_CLUSTER, NULL_INODE};

#[inline]
fn cluster_ref_ok(sb: &SuperBlock, r: u32) -> bool {
    r == NULL_CLUSTER || sb.cluster_in_range(r)
}

/// Quick check of an inode in use: the free bit must be clear, the type
/// triad one-hot and every cluster reference either NULL or inside the data
/// zone.
pub(crate) fn qcheck_inode_in_use(inode: &DiskInode, sb: &SuperBlock) -> Result<()> {
    if inode.is_free() || inode.kind().is_none() {
        return Err(SofsError::InodeInUseInvalid);
    }
    if inode.clu_count as usize > MAX_FILE_CLUSTERS {
        return Err(SofsError::InodeInUseInvalid);
    }
    if !inode.d.iter().all(|&r| cluster_ref_ok(sb, r))
        || !cluster_ref_ok(sb, inode.i1)
        || !cluster_ref_ok(sb, inode.i2)
    {
        return Err(SofsError::RefListInvalid);
    }
    Ok(())
}

/// Quick check of a free inode in the dirty state: the free bit must be set
/// and the list links must be NULL or inside the inode table.
pub(crate) fn qcheck_free_dirty(inode: &DiskInode, sb: &SuperBlock) -> Result<()> {
    if inode.is_in_use() || inode.ref_count != 0 {
        return Err(SofsError::FreeDirtyInodeInvalid);
    }
    let link_ok = |l: u32| l == NULL_INODE || sb.inode_in_range(l);
    if !link_ok(inode.next_free()) || !link_ok(inode.prev_free()) {
        return Err(SofsError::FreeDirtyInodeInvalid);
    }
    if !inode.d.iter().all(|&r| cluster_ref_ok(sb, r))
        || !cluster_ref_ok(sb, inode.i1)
        || !cluster_ref_ok(sb, inode.i2)
    {
        return Err(SofsError::RefListInvalid);
    }
    Ok(())
}

/// A free inode is clean once its whole reference index has been released.
pub(crate) fn is_free_clean(inode: &DiskInode) -> bool {
    inode.is_free() && inode.has_no_references()
}

/// Quick check of a data cluster header.
pub(crate) fn qcheck_cluster_header(dc: &DataCluster, sb: &SuperBlock) -> Result<()> {
    if !cluster_ref_ok(sb, dc.prev) || !cluster_ref_ok(sb, dc.next) {
        return Err(SofsError::ClusterHeaderInvalid);
    }
    if dc.stat != NULL_INODE && !sb.inode_in_range(dc.stat) {
        return Err(SofsError::ClusterHeaderInvalid);
    }
    Ok(())
}

impl SofsFileSystem {
    /// Allocation status of a data cluster.
    ///
    /// A cluster is free when it is clean (`stat == NULL_INODE`) or when its
    /// reference currently lives in one of the superblock caches or in the
    /// general repository list; a dirty header alone does not make it
    /// allocated.
    pub(crate) fn cluster_is_free(&mut self, n_clust: u32) -> Result<bool> {
        let dc = self.read_cluster(n_clust)?;
        qcheck_cluster_header(&dc, self.super_block())?;
        if dc.stat == NULL_INODE {
            return Ok(true);
        }
        let sb = self.super_block();
        if sb.retrieval_entries().contains(&n_clust)
            || sb.insertion_entries().contains(&n_clust)
        {
            return Ok(true);
        }

        let mut cur = sb.d_head;
        let mut steps = 0;
        while cur != NULL_CLUSTER {
            if cur == n_clust {
                return Ok(true);
            }
            steps += 1;
            if steps > self.super_block().d_zone_total {
                return Err(SofsError::Internal);
            }
            cur = self.read_cluster(cur)?.next;
        }
        Ok(false)
    }

    /// Quick check of the contents of a directory.
    ///
    /// The size must be a whole number of cluster entry blocks covered by
    /// the cluster count, the first two entries must be `.` (the directory
    /// itself) and `..`, and every entry must be in a legal state.
    pub(crate) fn qcheck_dir_content(&mut self, n_inode: u32, inode: &DiskInode) -> Result<()> {
        use crate::InodeKind;

        if inode.kind() != Some(InodeKind::Directory) {
            return Err(SofsError::NotDirectory);
        }
        let cluster_content = (DPC * DirEntry::SIZE) as u32;
        if inode.size == 0
            || inode.size % cluster_content != 0
            || inode.size / cluster_content > inode.clu_count
        {
            return Err(SofsError::DirectoryInvalid);
        }

        let n_clusters = inode.size / cluster_content;
        for ci in 0..n_clusters {
            let dc = self.read_file_cluster(n_inode, ci)?;
            for (ei, entry) in dc.dir_entries().iter().enumerate() {
                if ci == 0 && ei == 0 {
                    if entry.name_bytes() != b"." || entry.n_inode() != n_inode {
                        return Err(SofsError::DirectoryInvalid);
                    }
                    continue;
                }
                if ci == 0 && ei == 1 {
                    if entry.name_bytes() != b".."
                        || !self.super_block().inode_in_range(entry.n_inode())
                    {
                        return Err(SofsError::DirectoryInvalid);
                    }
                    continue;
                }
                if entry.is_in_use() {
                    if !self.super_block().inode_in_range(entry.n_inode()) {
                        return Err(SofsError::DirEntryInvalid);
                    }
                } else if entry.is_clean() && entry.n_inode() != NULL_INODE {
                    return Err(SofsError::DirEntryInvalid);
                }
            }
        }
        Ok(())
    }
}
