//! The free data cluster repository.
//!
//! Free clusters form a double-linked list on disk, threaded through the
//! cluster headers and anchored at `dHead`/`dTail`. Two caches inside the
//! superblock buffer the list activity: allocations are served from the
//! retrieval cache (replenished from the list head), releases gather in the
//! insertion cache (depleted onto the list tail).

use crate::consist;
use crate::error::{Result, SofsError};
use crate::inodes::InodeStatus;
use crate::{
    ClusterOp, SofsFileSystem, DZONE_CACHE_SIZE, NULL_CLUSTER, NULL_INODE, N_DIRECT, RPC,
};

impl SofsFileSystem {
    /// Allocate a free data cluster and associate it to `n_inode`.
    ///
    /// The cluster comes out of the retrieval cache; an empty cache is
    /// replenished first. A cluster still dirty from a deferred free is
    /// cleaned before it is handed out: its old owner gets the reference
    /// dissociated through [`clean_data_cluster`](Self::clean_data_cluster).
    pub fn alloc_data_cluster(&mut self, n_inode: u32) -> Result<u32> {
        self.super_block().quick_check()?;
        if !self.super_block().inode_in_range(n_inode) {
            return Err(SofsError::Invalid);
        }
        if self.super_block().d_zone_free == 0 {
            return Err(SofsError::NoSpace);
        }
        self.checked_in_use_inode(n_inode)?;

        if self.super_block().d_zone_retriev.cache_idx as usize == DZONE_CACHE_SIZE {
            self.replenish()?;
        }

        let idx = self.super_block().d_zone_retriev.cache_idx as usize;
        let n_clust = self.super_block().d_zone_retriev.cache[idx];
        if n_clust == NULL_CLUSTER {
            return Err(SofsError::Internal);
        }

        let mut dc = self.read_cluster(n_clust)?;
        if dc.stat != NULL_INODE {
            self.clean_data_cluster(dc.stat, n_clust)?;
            dc = self.read_cluster(n_clust)?;
        }

        dc.prev = NULL_CLUSTER;
        dc.next = NULL_CLUSTER;
        dc.stat = n_inode;
        self.write_cluster(n_clust, &dc)?;

        let sb = self.sb_mut();
        sb.d_zone_retriev.cache[idx] = NULL_CLUSTER;
        sb.d_zone_retriev.cache_idx += 1;
        sb.d_zone_free -= 1;
        self.store_super_block()?;
        Ok(n_clust)
    }

    /// Free an allocated data cluster.
    ///
    /// The reference is pushed into the insertion cache (depleting it first
    /// when full). The header keeps its `stat` field: the cluster enters
    /// the dirty state and stays associated to its old inode until cleaned.
    ///
    /// Cluster 0 belongs to the root directory and can never be freed.
    pub fn free_data_cluster(&mut self, n_clust: u32) -> Result<()> {
        if n_clust == 0 || !self.super_block().cluster_in_range(n_clust) {
            return Err(SofsError::Invalid);
        }
        if self.cluster_is_free(n_clust)? {
            return Err(SofsError::ClusterNotAllocated);
        }

        let mut dc = self.read_cluster(n_clust)?;
        dc.prev = NULL_CLUSTER;
        dc.next = NULL_CLUSTER;
        self.write_cluster(n_clust, &dc)?;

        if self.super_block().d_zone_insert.cache_idx as usize == DZONE_CACHE_SIZE {
            self.deplete()?;
        }

        let sb = self.sb_mut();
        let idx = sb.d_zone_insert.cache_idx as usize;
        sb.d_zone_insert.cache[idx] = n_clust;
        sb.d_zone_insert.cache_idx += 1;
        sb.d_zone_free += 1;
        self.store_super_block()
    }

    /// Refill the retrieval cache from the head of the on-disk free list.
    ///
    /// Walks the list forward, pulling at most `min(dZoneFree,
    /// DZONE_CACHE_SIZE)` references into the upper end of the cache and
    /// clearing the list links of each pulled cluster. When the list runs
    /// dry before the target is met, the insertion cache is depleted onto
    /// the list and the walk resumes.
    pub(crate) fn replenish(&mut self) -> Result<()> {
        let nctt = (self.super_block().d_zone_free as usize).min(DZONE_CACHE_SIZE);
        let mut slot = DZONE_CACHE_SIZE - nctt;
        let mut cur = self.super_block().d_head;

        while slot < DZONE_CACHE_SIZE && cur != NULL_CLUSTER {
            cur = self.pull_into_retrieval(slot, cur)?;
            slot += 1;
        }

        if slot < DZONE_CACHE_SIZE {
            let sb = self.sb_mut();
            sb.d_head = NULL_CLUSTER;
            sb.d_tail = NULL_CLUSTER;
            self.deplete()?;

            cur = self.super_block().d_head;
            while slot < DZONE_CACHE_SIZE && cur != NULL_CLUSTER {
                cur = self.pull_into_retrieval(slot, cur)?;
                slot += 1;
            }
            if slot < DZONE_CACHE_SIZE {
                // dZoneFree promised more clusters than the repository holds
                return Err(SofsError::Internal);
            }
        }

        if cur != NULL_CLUSTER {
            let mut dc = self.read_cluster(cur)?;
            dc.prev = NULL_CLUSTER;
            self.write_cluster(cur, &dc)?;
        }

        let sb = self.sb_mut();
        sb.d_zone_retriev.cache_idx = (DZONE_CACHE_SIZE - nctt) as u32;
        sb.d_head = cur;
        if cur == NULL_CLUSTER {
            sb.d_tail = NULL_CLUSTER;
        }
        self.store_super_block()
    }

    /// Detach the list head into a retrieval-cache slot, returning the new
    /// head candidate.
    fn pull_into_retrieval(&mut self, slot: usize, n_clust: u32) -> Result<u32> {
        let mut dc = self.read_cluster(n_clust)?;
        let next = dc.next;
        dc.prev = NULL_CLUSTER;
        dc.next = NULL_CLUSTER;
        self.write_cluster(n_clust, &dc)?;
        self.sb_mut().d_zone_retriev.cache[slot] = n_clust;
        Ok(next)
    }

    /// Append the whole insertion cache, in order, to the tail of the
    /// on-disk free list and reset the cache.
    pub(crate) fn deplete(&mut self) -> Result<()> {
        let count = self.super_block().d_zone_insert.cache_idx as usize;
        if count == 0 {
            return Ok(());
        }
        let pending = self.super_block().d_zone_insert.cache;
        let old_tail = self.super_block().d_tail;

        if old_tail != NULL_CLUSTER {
            let mut dc = self.read_cluster(old_tail)?;
            dc.next = pending[0];
            self.write_cluster(old_tail, &dc)?;
        }

        for i in 0..count {
            let mut dc = self.read_cluster(pending[i])?;
            dc.prev = if i == 0 { old_tail } else { pending[i - 1] };
            dc.next = if i + 1 < count { pending[i + 1] } else { NULL_CLUSTER };
            self.write_cluster(pending[i], &dc)?;
        }

        let sb = self.sb_mut();
        sb.d_tail = pending[count - 1];
        if sb.d_head == NULL_CLUSTER {
            sb.d_head = pending[0];
        }
        sb.d_zone_insert.cache.fill(NULL_CLUSTER);
        sb.d_zone_insert.cache_idx = 0;
        self.store_super_block()
    }

    /// Cut the association between a data cluster and its inode, turning a
    /// free-dirty cluster into a free-clean one.
    pub(crate) fn clean_logical_cluster(&mut self, n_inode: u32, n_clust: u32) -> Result<()> {
        let mut dc = self.read_cluster(n_clust)?;
        consist::qcheck_cluster_header(&dc, self.super_block())?;
        if dc.stat != n_inode {
            return Err(SofsError::WrongInodeNumber);
        }
        dc.stat = NULL_INODE;
        self.write_cluster(n_clust, &dc)
    }

    /// Clean a data cluster still referenced by a deleted file.
    ///
    /// The inode is supposed to be free in the dirty state. Its reference
    /// index is parsed until `n_clust` is found; the cluster is then
    /// dissociated together with everything in its dependency — finding a
    /// reference cluster cleans every data cluster reached through it, and
    /// the reference-index bookkeeping of the dirty inode collapses
    /// accordingly.
    pub fn clean_data_cluster(&mut self, n_inode: u32, n_clust: u32) -> Result<()> {
        if !self.super_block().inode_in_range(n_inode)
            || !self.super_block().cluster_in_range(n_clust)
        {
            return Err(SofsError::Invalid);
        }
        let inode = self.read_inode(n_inode, InodeStatus::FreeDirty)?;

        for (k, &r) in inode.d.iter().enumerate() {
            if r == n_clust {
                return self
                    .handle_file_cluster(n_inode, k as u32, ClusterOp::Clean)
                    .map(drop);
            }
        }

        if inode.i1 != NULL_CLUSTER {
            let table = self.read_cluster(inode.i1)?;
            if inode.i1 == n_clust {
                return self.clean_ref_table(n_inode, &table, N_DIRECT);
            }
            for (s, &r) in table.refs().iter().enumerate() {
                if r == n_clust {
                    return self
                        .handle_file_cluster(n_inode, (N_DIRECT + s) as u32, ClusterOp::Clean)
                        .map(drop);
                }
            }
        }

        if inode.i2 != NULL_CLUSTER {
            let outer = self.read_cluster(inode.i2)?;
            if inode.i2 == n_clust {
                for (j, &rj) in outer.refs().iter().enumerate() {
                    if rj != NULL_CLUSTER {
                        let inner = self.read_cluster(rj)?;
                        self.clean_ref_table(n_inode, &inner, N_DIRECT + RPC + j * RPC)?;
                    }
                }
                return Ok(());
            }
            for (j, &rj) in outer.refs().iter().enumerate() {
                if rj == NULL_CLUSTER {
                    continue;
                }
                let inner = self.read_cluster(rj)?;
                if rj == n_clust {
                    return self.clean_ref_table(n_inode, &inner, N_DIRECT + RPC + j * RPC);
                }
                for (i, &ri) in inner.refs().iter().enumerate() {
                    if ri == n_clust {
                        return self
                            .handle_file_cluster(
                                n_inode,
                                (N_DIRECT + RPC + j * RPC + i) as u32,
                                ClusterOp::Clean,
                            )
                            .map(drop);
                    }
                }
            }
        }

        // The cluster claims to belong to this inode but the inode does not
        // reference it.
        Err(SofsError::WrongInodeNumber)
    }

    /// Clean every data cluster referenced by one reference table; the
    /// table cluster itself collapses with its last entry.
    fn clean_ref_table(
        &mut self,
        n_inode: u32,
        table: &crate::DataCluster,
        base_index: usize,
    ) -> Result<()> {
        for (i, &r) in table.refs().iter().enumerate() {
            if r != NULL_CLUSTER {
                self.handle_file_cluster(n_inode, (base_index + i) as u32, ClusterOp::Clean)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::InodeKind;
    use crate::test_support::small_volume;

    #[test]
    fn alloc_serves_from_the_list_head() {
        let mut fs = small_volume();
        let free = fs.super_block().d_zone_free;

        let n = fs.alloc_inode(InodeKind::File).unwrap();
        let c = fs.alloc_data_cluster(n).unwrap();
        assert_eq!(c, 1); // first cluster after the root directory's

        let dc = fs.read_cluster(c).unwrap();
        assert_eq!(dc.stat, n);
        assert_eq!(dc.prev, NULL_CLUSTER);
        assert_eq!(dc.next, NULL_CLUSTER);
        assert_eq!(fs.super_block().d_zone_free, free - 1);
    }

    #[test]
    fn replenish_moves_list_references_into_the_cache() {
        let mut fs = small_volume();
        let n = fs.alloc_inode(InodeKind::File).unwrap();
        fs.alloc_data_cluster(n).unwrap();

        // 45 free clusters fit the 50-slot cache: the walk empties the list.
        let sb = fs.super_block();
        assert_eq!(sb.d_head, NULL_CLUSTER);
        assert_eq!(sb.d_tail, NULL_CLUSTER);
        assert_eq!(sb.retrieval_entries().len() as u32, sb.d_zone_free);
    }

    #[test]
    fn freed_cluster_is_dirty_until_realloc() {
        let mut fs = small_volume();
        let n = fs.alloc_inode(InodeKind::File).unwrap();
        let c = fs.alloc_data_cluster(n).unwrap();
        let free = fs.super_block().d_zone_free;

        fs.free_data_cluster(c).unwrap();
        assert_eq!(fs.super_block().d_zone_free, free + 1);
        assert_eq!(fs.super_block().insertion_entries(), &[c]);
        // stat survives the free: the cluster is recoverable
        assert_eq!(fs.read_cluster(c).unwrap().stat, n);

        // double free is refused
        assert!(matches!(
            fs.free_data_cluster(c),
            Err(SofsError::ClusterNotAllocated)
        ));
    }

    #[test]
    fn exhausting_the_zone_reports_nospc() {
        let mut fs = small_volume();
        let n = fs.alloc_inode(InodeKind::File).unwrap();
        let total = fs.super_block().d_zone_free;
        for _ in 0..total {
            fs.alloc_data_cluster(n).unwrap();
        }
        assert!(matches!(
            fs.alloc_data_cluster(n),
            Err(SofsError::NoSpace)
        ));
    }

    #[test]
    fn deplete_rebuilds_the_on_disk_list() {
        let mut fs = small_volume();
        let n = fs.alloc_inode(InodeKind::File).unwrap();
        let a = fs.alloc_data_cluster(n).unwrap();
        let b = fs.alloc_data_cluster(n).unwrap();
        let c = fs.alloc_data_cluster(n).unwrap();

        fs.free_data_cluster(a).unwrap();
        fs.free_data_cluster(b).unwrap();
        fs.free_data_cluster(c).unwrap();
        fs.deplete().unwrap();

        let sb = fs.super_block();
        assert_eq!(sb.insertion_entries().len(), 0);
        assert_eq!(sb.d_head, a);
        assert_eq!(sb.d_tail, c);

        let first = fs.read_cluster(a).unwrap();
        assert_eq!(first.prev, NULL_CLUSTER);
        assert_eq!(first.next, b);
        let mid = fs.read_cluster(b).unwrap();
        assert_eq!(mid.prev, a);
        assert_eq!(mid.next, c);
        let last = fs.read_cluster(c).unwrap();
        assert_eq!(last.prev, b);
        assert_eq!(last.next, NULL_CLUSTER);
    }

    #[test]
    fn cluster_zero_can_never_be_freed() {
        let mut fs = small_volume();
        assert!(matches!(
            fs.free_data_cluster(0),
            Err(SofsError::Invalid)
        ));
    }
}
