//! The file-cluster reference index.
//!
//! A file addresses its clusters through three levels: `N_DIRECT` direct
//! references inline in the inode, one single-indirect reference cluster
//! (`i1`) and a two-level tree under the double-indirect reference cluster
//! (`i2`). [`SofsFileSystem::handle_file_cluster`] is the unified entry
//! point over all three, and the allocated clusters of a file are kept in a
//! double-linked list in logical-index order through their headers.

use crate::error::{Result, SofsError};
use crate::inodes::InodeStatus;
use crate::layout::DiskInode;
use crate::{SofsFileSystem, MAX_FILE_CLUSTERS, NULL_CLUSTER, N_DIRECT, RPC};

/// Operation applied to one logical cluster of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterOp {
    /// Get the logical number of the referenced data cluster.
    Get,
    /// Allocate a new data cluster and hook it into the reference index.
    Alloc,
    /// Free the referenced data cluster, keeping the reference.
    Free,
    /// Free the referenced data cluster and dissociate it from the inode.
    FreeClean,
    /// Dissociate the referenced data cluster from the inode.
    Clean,
}

/// Bulk variant of [`ClusterOp`]: only the releasing operations make sense
/// over a whole range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOp {
    Free,
    FreeClean,
    Clean,
}

impl From<ReleaseOp> for ClusterOp {
    #[inline]
    fn from(op: ReleaseOp) -> Self {
        match op {
            ReleaseOp::Free => ClusterOp::Free,
            ReleaseOp::FreeClean => ClusterOp::FreeClean,
            ReleaseOp::Clean => ClusterOp::Clean,
        }
    }
}

impl SofsFileSystem {
    /// Handle one logical data cluster of the file described by `n_inode`.
    ///
    /// `GET` and `ALLOC` return the logical cluster number; the releasing
    /// operations return `None`. The inode must be in use for everything
    /// but `CLEAN`, which instead requires it free in the dirty state; the
    /// updated inode image is written back once the level handler is
    /// through.
    pub fn handle_file_cluster(
        &mut self,
        n_inode: u32,
        clust_ind: u32,
        op: ClusterOp,
    ) -> Result<Option<u32>> {
        if clust_ind as usize >= MAX_FILE_CLUSTERS
            || !self.super_block().inode_in_range(n_inode)
        {
            return Err(SofsError::Invalid);
        }

        let status = if op == ClusterOp::Clean {
            InodeStatus::FreeDirty
        } else {
            InodeStatus::InUse
        };
        let mut inode = self.read_inode(n_inode, status)?;

        let ind = clust_ind as usize;
        let out = if ind < N_DIRECT {
            self.handle_direct(n_inode, &mut inode, clust_ind, op)?
        } else if ind < N_DIRECT + RPC {
            self.handle_single_indirect(n_inode, &mut inode, clust_ind, op)?
        } else {
            self.handle_double_indirect(n_inode, &mut inode, clust_ind, op)?
        };

        if op != ClusterOp::Get {
            self.write_inode(&inode, n_inode, status)?;
        }
        Ok(out)
    }

    /// Apply a releasing operation to every populated cluster reference at
    /// or after `clust_ind_in`, in reverse layout order: the
    /// double-indirect region first, then the single-indirect one, then the
    /// direct references.
    pub fn handle_file_clusters(
        &mut self,
        n_inode: u32,
        clust_ind_in: u32,
        op: ReleaseOp,
    ) -> Result<()> {
        if clust_ind_in as usize >= MAX_FILE_CLUSTERS
            || !self.super_block().inode_in_range(n_inode)
        {
            return Err(SofsError::Invalid);
        }

        let status = if op == ReleaseOp::Clean {
            InodeStatus::FreeDirty
        } else {
            InodeStatus::InUse
        };
        let inode = self.read_inode(n_inode, status)?;
        let start = clust_ind_in as usize;
        let op = ClusterOp::from(op);

        if inode.i2 != NULL_CLUSTER {
            let (j0, i0) = if start < N_DIRECT + RPC {
                (0, 0)
            } else {
                let rel = start - N_DIRECT - RPC;
                (rel / RPC, rel % RPC)
            };
            let outer = self.read_cluster(inode.i2)?;
            for j in j0..RPC {
                let rj = outer.refs()[j];
                if rj == NULL_CLUSTER {
                    continue;
                }
                let inner = self.read_cluster(rj)?;
                let from = if j == j0 { i0 } else { 0 };
                for i in from..RPC {
                    if inner.refs()[i] != NULL_CLUSTER {
                        let ind = (N_DIRECT + RPC + j * RPC + i) as u32;
                        self.handle_file_cluster(n_inode, ind, op)?;
                    }
                }
            }
        }

        if start < N_DIRECT + RPC && inode.i1 != NULL_CLUSTER {
            let table = self.read_cluster(inode.i1)?;
            let from = start.saturating_sub(N_DIRECT);
            for i in from..RPC {
                if table.refs()[i] != NULL_CLUSTER {
                    self.handle_file_cluster(n_inode, (N_DIRECT + i) as u32, op)?;
                }
            }
        }

        if start < N_DIRECT {
            for i in start..N_DIRECT {
                if inode.d[i] != NULL_CLUSTER {
                    self.handle_file_cluster(n_inode, i as u32, op)?;
                }
            }
        }

        Ok(())
    }
}

// Level handlers. Each one works on the caller's in-memory inode image;
// reference clusters are read and written through the cache as whole
// clusters.
impl SofsFileSystem {
    fn handle_direct(
        &mut self,
        n_inode: u32,
        inode: &mut DiskInode,
        clust_ind: u32,
        op: ClusterOp,
    ) -> Result<Option<u32>> {
        let k = clust_ind as usize;
        match op {
            ClusterOp::Get => Ok(Some(inode.d[k])),
            ClusterOp::Alloc => {
                if inode.d[k] != NULL_CLUSTER {
                    return Err(SofsError::ClusterAlreadyInList);
                }
                let c = self.alloc_and_link(n_inode, clust_ind)?;
                inode.d[k] = c;
                inode.clu_count += 1;
                Ok(Some(c))
            }
            ClusterOp::Free | ClusterOp::FreeClean | ClusterOp::Clean => {
                let c = inode.d[k];
                if c == NULL_CLUSTER {
                    return Err(SofsError::ClusterNotInList);
                }
                if self.release_slot(n_inode, c, op)? {
                    inode.d[k] = NULL_CLUSTER;
                    inode.clu_count -= 1;
                }
                Ok(None)
            }
        }
    }

    fn handle_single_indirect(
        &mut self,
        n_inode: u32,
        inode: &mut DiskInode,
        clust_ind: u32,
        op: ClusterOp,
    ) -> Result<Option<u32>> {
        let slot = clust_ind as usize - N_DIRECT;

        if inode.i1 == NULL_CLUSTER {
            return match op {
                ClusterOp::Get => Ok(Some(NULL_CLUSTER)),
                ClusterOp::Alloc => {
                    inode.i1 = self.alloc_ref_cluster(n_inode)?;
                    inode.clu_count += 1;
                    let c = self.alloc_and_link(n_inode, clust_ind)?;
                    let mut table = self.read_cluster(inode.i1)?;
                    table.refs_mut()[slot] = c;
                    self.write_cluster(inode.i1, &table)?;
                    inode.clu_count += 1;
                    Ok(Some(c))
                }
                _ => Err(SofsError::ClusterNotInList),
            };
        }

        let mut table = self.read_cluster(inode.i1)?;
        match op {
            ClusterOp::Get => Ok(Some(table.refs()[slot])),
            ClusterOp::Alloc => {
                if table.refs()[slot] != NULL_CLUSTER {
                    return Err(SofsError::ClusterAlreadyInList);
                }
                let c = self.alloc_and_link(n_inode, clust_ind)?;
                table = self.read_cluster(inode.i1)?;
                table.refs_mut()[slot] = c;
                self.write_cluster(inode.i1, &table)?;
                inode.clu_count += 1;
                Ok(Some(c))
            }
            ClusterOp::Free | ClusterOp::FreeClean | ClusterOp::Clean => {
                let c = table.refs()[slot];
                if c == NULL_CLUSTER {
                    return Err(SofsError::ClusterNotInList);
                }
                if self.release_slot(n_inode, c, op)? {
                    table.refs_mut()[slot] = NULL_CLUSTER;
                    inode.clu_count -= 1;
                    self.write_cluster(inode.i1, &table)?;
                    if table.refs().iter().all(|&r| r == NULL_CLUSTER) {
                        self.collapse_ref_cluster(n_inode, inode.i1)?;
                        inode.i1 = NULL_CLUSTER;
                        inode.clu_count -= 1;
                    }
                }
                Ok(None)
            }
        }
    }

    fn handle_double_indirect(
        &mut self,
        n_inode: u32,
        inode: &mut DiskInode,
        clust_ind: u32,
        op: ClusterOp,
    ) -> Result<Option<u32>> {
        let rel = clust_ind as usize - N_DIRECT - RPC;
        let outer = rel / RPC;
        let inner = rel % RPC;

        match op {
            ClusterOp::Get => {
                if inode.i2 == NULL_CLUSTER {
                    return Ok(Some(NULL_CLUSTER));
                }
                let outer_table = self.read_cluster(inode.i2)?;
                let rj = outer_table.refs()[outer];
                if rj == NULL_CLUSTER {
                    return Ok(Some(NULL_CLUSTER));
                }
                let inner_table = self.read_cluster(rj)?;
                Ok(Some(inner_table.refs()[inner]))
            }
            ClusterOp::Alloc => {
                if inode.i2 == NULL_CLUSTER {
                    inode.i2 = self.alloc_ref_cluster(n_inode)?;
                    inode.clu_count += 1;
                }
                let outer_table = self.read_cluster(inode.i2)?;
                let mut rj = outer_table.refs()[outer];
                let fresh_inner = rj == NULL_CLUSTER;
                if fresh_inner {
                    rj = self.alloc_ref_cluster(n_inode)?;
                    inode.clu_count += 1;
                } else if self.read_cluster(rj)?.refs()[inner] != NULL_CLUSTER {
                    return Err(SofsError::ClusterAlreadyInList);
                }

                let c = self.alloc_and_link(n_inode, clust_ind)?;
                let mut inner_table = self.read_cluster(rj)?;
                inner_table.refs_mut()[inner] = c;
                self.write_cluster(rj, &inner_table)?;
                inode.clu_count += 1;

                if fresh_inner {
                    let mut outer_table = self.read_cluster(inode.i2)?;
                    outer_table.refs_mut()[outer] = rj;
                    self.write_cluster(inode.i2, &outer_table)?;
                }
                Ok(Some(c))
            }
            ClusterOp::Free | ClusterOp::FreeClean | ClusterOp::Clean => {
                if inode.i2 == NULL_CLUSTER {
                    return Err(SofsError::ClusterNotInList);
                }
                let outer_table = self.read_cluster(inode.i2)?;
                let rj = outer_table.refs()[outer];
                if rj == NULL_CLUSTER {
                    return Err(SofsError::ClusterNotInList);
                }
                let inner_table = self.read_cluster(rj)?;
                let c = inner_table.refs()[inner];
                if c == NULL_CLUSTER {
                    return Err(SofsError::ClusterNotInList);
                }

                if self.release_slot(n_inode, c, op)? {
                    let mut inner_table = self.read_cluster(rj)?;
                    inner_table.refs_mut()[inner] = NULL_CLUSTER;
                    self.write_cluster(rj, &inner_table)?;
                    inode.clu_count -= 1;

                    if inner_table.refs().iter().all(|&r| r == NULL_CLUSTER) {
                        self.collapse_ref_cluster(n_inode, rj)?;
                        let mut outer_table = self.read_cluster(inode.i2)?;
                        outer_table.refs_mut()[outer] = NULL_CLUSTER;
                        self.write_cluster(inode.i2, &outer_table)?;
                        inode.clu_count -= 1;

                        if outer_table.refs().iter().all(|&r| r == NULL_CLUSTER) {
                            self.collapse_ref_cluster(n_inode, inode.i2)?;
                            inode.i2 = NULL_CLUSTER;
                            inode.clu_count -= 1;
                        }
                    }
                }
                Ok(None)
            }
        }
    }

    /// Allocate a data cluster for the file and thread it into the file's
    /// cluster chain at its logical position.
    fn alloc_and_link(&mut self, n_inode: u32, clust_ind: u32) -> Result<u32> {
        let c = self.alloc_data_cluster(n_inode)?;
        self.attach_logical_cluster(n_inode, clust_ind, c)?;
        Ok(c)
    }

    /// Release one populated slot. Returns whether the reference itself
    /// must be cleared (CLEAN semantics); a plain FREE keeps it so a later
    /// CLEAN can still repair the bookkeeping.
    fn release_slot(&mut self, n_inode: u32, n_clust: u32, op: ClusterOp) -> Result<bool> {
        if matches!(op, ClusterOp::Free | ClusterOp::FreeClean) {
            self.free_data_cluster(n_clust)?;
        }
        if op == ClusterOp::Free {
            return Ok(false);
        }
        self.clean_logical_cluster(n_inode, n_clust)?;
        Ok(true)
    }

    /// Allocate a reference cluster with every slot NULL-filled.
    fn alloc_ref_cluster(&mut self, n_inode: u32) -> Result<u32> {
        let rc = self.alloc_data_cluster(n_inode)?;
        let mut dc = self.read_cluster(rc)?;
        dc.fill_null_refs();
        self.write_cluster(rc, &dc)?;
        Ok(rc)
    }

    /// Free and clean a reference cluster whose slots have all emptied.
    fn collapse_ref_cluster(&mut self, n_inode: u32, rc: u32) -> Result<()> {
        self.free_data_cluster(rc)?;
        self.clean_logical_cluster(n_inode, rc)
    }

    /// Hook a freshly allocated data cluster into the double-linked list of
    /// the file's clusters.
    ///
    /// The neighbours are located through explicit GET calls, never through
    /// cached indices: a cluster has a predecessor iff `clust_ind > 0` and
    /// a successor iff `clust_ind < MAX_FILE_CLUSTERS - 1`, either of which
    /// may turn out NULL in a sparse file.
    pub(crate) fn attach_logical_cluster(
        &mut self,
        n_inode: u32,
        clust_ind: u32,
        n_l_clust: u32,
    ) -> Result<()> {
        let mut dc = self.read_cluster(n_l_clust)?;
        if dc.stat != n_inode {
            return Err(SofsError::WrongInodeNumber);
        }

        let mut prev = NULL_CLUSTER;
        let mut next = NULL_CLUSTER;
        if clust_ind > 0 {
            prev = self
                .handle_file_cluster(n_inode, clust_ind - 1, ClusterOp::Get)?
                .unwrap_or(NULL_CLUSTER);
        }
        if (clust_ind as usize) < MAX_FILE_CLUSTERS - 1 {
            next = self
                .handle_file_cluster(n_inode, clust_ind + 1, ClusterOp::Get)?
                .unwrap_or(NULL_CLUSTER);
        }

        dc.prev = prev;
        dc.next = next;
        self.write_cluster(n_l_clust, &dc)?;

        if prev != NULL_CLUSTER {
            let mut p = self.read_cluster(prev)?;
            p.next = n_l_clust;
            self.write_cluster(prev, &p)?;
        }
        if next != NULL_CLUSTER {
            let mut s = self.read_cluster(next)?;
            s.prev = n_l_clust;
            self.write_cluster(next, &s)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::InodeKind;
    use crate::test_support::small_volume;
    use crate::SofsFileSystem;

    fn file_inode(fs: &mut SofsFileSystem) -> u32 {
        fs.alloc_inode(InodeKind::File).unwrap()
    }

    fn get(fs: &mut SofsFileSystem, n: u32, ind: usize) -> u32 {
        fs.handle_file_cluster(n, ind as u32, ClusterOp::Get)
            .unwrap()
            .unwrap()
    }

    fn alloc(fs: &mut SofsFileSystem, n: u32, ind: usize) -> u32 {
        fs.handle_file_cluster(n, ind as u32, ClusterOp::Alloc)
            .unwrap()
            .unwrap()
    }

    #[test]
    fn get_is_pure_and_null_for_sparse_slots() {
        let mut fs = small_volume();
        let n = file_inode(&mut fs);
        for ind in [0, N_DIRECT, N_DIRECT + RPC, MAX_FILE_CLUSTERS - 1] {
            assert_eq!(get(&mut fs, n, ind), NULL_CLUSTER);
            assert_eq!(get(&mut fs, n, ind), NULL_CLUSTER);
        }
        assert_eq!(fs.read_inode(n, InodeStatus::InUse).unwrap().clu_count, 0);
    }

    #[test]
    fn direct_alloc_touches_only_its_slot() {
        let mut fs = small_volume();
        let n = file_inode(&mut fs);
        let c = alloc(&mut fs, n, 0);

        let inode = fs.read_inode(n, InodeStatus::InUse).unwrap();
        assert_eq!(inode.d[0], c);
        assert_eq!(inode.clu_count, 1);
        assert_eq!(inode.i1, NULL_CLUSTER);
        assert_eq!(inode.i2, NULL_CLUSTER);

        // double allocation of the same index is refused
        assert!(matches!(
            fs.handle_file_cluster(n, 0, ClusterOp::Alloc),
            Err(SofsError::ClusterAlreadyInList)
        ));
    }

    #[test]
    fn single_indirect_materializes_and_collapses() {
        let mut fs = small_volume();
        let n = file_inode(&mut fs);
        let ind = N_DIRECT as u32;

        let c = alloc(&mut fs, n, N_DIRECT);
        let inode = fs.read_inode(n, InodeStatus::InUse).unwrap();
        assert_ne!(inode.i1, NULL_CLUSTER);
        // the reference cluster counts toward cluCount
        assert_eq!(inode.clu_count, 2);
        assert_eq!(get(&mut fs, n, N_DIRECT), c);

        fs.handle_file_cluster(n, ind, ClusterOp::FreeClean).unwrap();
        let inode = fs.read_inode(n, InodeStatus::InUse).unwrap();
        assert_eq!(inode.i1, NULL_CLUSTER);
        assert_eq!(inode.clu_count, 0);
    }

    #[test]
    fn double_indirect_materializes_and_collapses() {
        let mut fs = small_volume();
        let n = file_inode(&mut fs);
        let ind = (MAX_FILE_CLUSTERS - 1) as u32;
        let free_before = fs.super_block().d_zone_free;

        let c = alloc(&mut fs, n, MAX_FILE_CLUSTERS - 1);
        let inode = fs.read_inode(n, InodeStatus::InUse).unwrap();
        assert_ne!(inode.i2, NULL_CLUSTER);
        // data cluster + inner reference cluster + i2
        assert_eq!(inode.clu_count, 3);
        assert_eq!(fs.super_block().d_zone_free, free_before - 3);
        assert_eq!(get(&mut fs, n, MAX_FILE_CLUSTERS - 1), c);

        // the last possible cluster has no successor; its predecessor is
        // sparse, so it links with nothing
        let dc = fs.read_cluster(c).unwrap();
        assert_eq!(dc.prev, NULL_CLUSTER);
        assert_eq!(dc.next, NULL_CLUSTER);
        assert_eq!(dc.stat, n);

        fs.handle_file_cluster(n, ind, ClusterOp::FreeClean).unwrap();
        let inode = fs.read_inode(n, InodeStatus::InUse).unwrap();
        assert_eq!(inode.i2, NULL_CLUSTER);
        assert_eq!(inode.clu_count, 0);
        assert_eq!(fs.super_block().d_zone_free, free_before);
    }

    #[test]
    fn neighbouring_clusters_are_chained() {
        let mut fs = small_volume();
        let n = file_inode(&mut fs);
        let c0 = alloc(&mut fs, n, 0);
        let c2 = alloc(&mut fs, n, 2);
        let c1 = alloc(&mut fs, n, 1);

        let dc0 = fs.read_cluster(c0).unwrap();
        let dc1 = fs.read_cluster(c1).unwrap();
        let dc2 = fs.read_cluster(c2).unwrap();
        assert_eq!(dc0.next, c1);
        assert_eq!(dc1.prev, c0);
        assert_eq!(dc1.next, c2);
        assert_eq!(dc2.prev, c1);
        assert_eq!(dc2.next, NULL_CLUSTER);
    }

    #[test]
    fn free_keeps_the_reference_clean_repairs_it() {
        let mut fs = small_volume();
        let n = file_inode(&mut fs);
        let c = alloc(&mut fs, n, 0);

        fs.handle_file_cluster(n, 0, ClusterOp::Free).unwrap();
        // the reference survives a bare FREE
        assert_eq!(get(&mut fs, n, 0), c);
        assert_eq!(fs.read_cluster(c).unwrap().stat, n);

        // CLEAN needs the inode free-dirty; do it through the real path
        fs.handle_file_cluster(n, 0, ClusterOp::Clean).unwrap_err();
        fs.free_inode(n).unwrap();
        fs.clean_inode(n).unwrap();
        assert_eq!(fs.read_cluster(c).unwrap().stat, crate::NULL_INODE);
    }

    #[test]
    fn bulk_release_walks_every_region() {
        let mut fs = small_volume();
        let n = file_inode(&mut fs);
        alloc(&mut fs, n, 0);
        alloc(&mut fs, n, 3);
        alloc(&mut fs, n, N_DIRECT);
        alloc(&mut fs, n, N_DIRECT + RPC);
        let free_before_release = fs.super_block().d_zone_free;

        fs.handle_file_clusters(n, 0, ReleaseOp::FreeClean).unwrap();
        let inode = fs.read_inode(n, InodeStatus::InUse).unwrap();
        assert_eq!(inode.clu_count, 0);
        assert!(inode.has_no_references());
        // 4 data clusters + i1 + inner + i2
        assert_eq!(fs.super_block().d_zone_free, free_before_release + 7);
    }

    #[test]
    fn bulk_release_honours_the_start_index() {
        let mut fs = small_volume();
        let n = file_inode(&mut fs);
        let c0 = alloc(&mut fs, n, 0);
        alloc(&mut fs, n, 4);

        fs.handle_file_clusters(n, 1, ReleaseOp::FreeClean).unwrap();
        let inode = fs.read_inode(n, InodeStatus::InUse).unwrap();
        assert_eq!(inode.d[0], c0);
        assert_eq!(inode.d[4], NULL_CLUSTER);
        assert_eq!(inode.clu_count, 1);
    }
}
