//! Volume management: the mounted-volume value, the single in-memory
//! superblock image and the formatter.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::block_cache::BlockCacheManager;
use crate::consist;
use crate::error::{Result, SofsError};
use crate::layout::{DataCluster, DirEntry, DiskInode, SuperBlock, NPRU, PRU};
use crate::BlockDevice;
use crate::{
    BLOCKS_PER_CLUSTER, BLOCK_SIZE, DPC, IPB, MAGIC, NULL_CLUSTER, NULL_INODE,
};

/// Seconds since the Unix epoch, as stored in inode timestamps.
pub(crate) fn now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

/// Identity of the process owning the mounted volume, checked by
/// `access_granted`. Uid 0 is root.
#[derive(Debug, Clone, Copy)]
pub struct Credentials {
    pub uid: u32,
    pub gid: u32,
}

impl Credentials {
    pub fn from_process() -> Self {
        Self {
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
        }
    }
}

/// A mounted SOFS14 volume.
///
/// Owns everything that the operations need: the device handle, the block
/// cache and the single mutable superblock image. All ambient state lives
/// here; dropping the value (or calling [`unmount`](Self::unmount)) releases
/// it.
pub struct SofsFileSystem {
    device: Arc<dyn BlockDevice>,
    cache: BlockCacheManager,
    sb: SuperBlock,
    creds: Credentials,
    clean_mount: bool,
}

impl SofsFileSystem {
    /// The root directory inode; permanently in use, never freed.
    pub const ROOT_INODE: u32 = 0;

    /// Mount the volume kept on `device`.
    ///
    /// Verifies the superblock, remembers whether the previous session
    /// unmounted properly and marks the volume as mounted (`mStat = NPRU`).
    pub fn mount(device: Arc<dyn BlockDevice>, creds: Credentials) -> Result<Self> {
        let mut cache = BlockCacheManager::new();
        let sb = cache
            .get(0, &device)?
            .lock()
            .map(0, |sb: &SuperBlock| sb.clone());

        if !sb.is_valid() {
            log::error!(
                "not a sofs14 volume (magic {:#06x}, version {:#06x})",
                sb.magic(),
                sb.version
            );
            return Err(SofsError::Internal);
        }
        sb.quick_check()?;

        let clean_mount = sb.m_stat == PRU;
        if !clean_mount {
            log::warn!("volume '{}' was not properly unmounted", sb.name());
        }

        let mut fs = Self {
            device,
            cache,
            sb,
            creds,
            clean_mount,
        };
        fs.sb.m_stat = NPRU;
        fs.store_super_block()?;
        Ok(fs)
    }

    /// Cleanly unmount: flush every cached block and restore `mStat = PRU`.
    pub fn unmount(mut self) -> Result<()> {
        self.sb.m_stat = PRU;
        self.store_super_block()?;
        self.cache.sync_all()
    }

    /// Whether the previous session ended with a clean unmount.
    #[inline]
    pub fn was_properly_unmounted(&self) -> bool {
        self.clean_mount
    }

    #[inline]
    pub fn super_block(&self) -> &SuperBlock {
        &self.sb
    }

    #[inline]
    pub fn credentials(&self) -> Credentials {
        self.creds
    }

    /// Flush every cached block to the device.
    pub fn sync(&mut self) -> Result<()> {
        self.cache.sync_all()
    }
}

// Superblock manager and low-level addressing.
impl SofsFileSystem {
    pub(crate) fn sb_mut(&mut self) -> &mut SuperBlock {
        &mut self.sb
    }

    /// Write the in-memory superblock image back to block 0.
    pub(crate) fn store_super_block(&mut self) -> Result<()> {
        let cache = self.cache.get(0, &self.device)?;
        let sb = &self.sb;
        cache.lock().map_mut(0, |dst: &mut SuperBlock| *dst = sb.clone());
        Ok(())
    }

    /// Translate an inode number into its (block, byte offset) position
    /// inside the inode table.
    pub fn convert_inode_ref(&self, n_inode: u32) -> Result<(usize, usize)> {
        if !self.sb.inode_in_range(n_inode) {
            return Err(SofsError::Invalid);
        }
        Ok(self.inode_pos(n_inode))
    }

    #[inline]
    pub(crate) fn inode_pos(&self, n_inode: u32) -> (usize, usize) {
        let block = self.sb.i_table_start as usize + n_inode as usize / IPB;
        let offset = (n_inode as usize % IPB) * DiskInode::SIZE;
        (block, offset)
    }

    /// Run `f` over the on-disk record of an inode.
    pub(crate) fn with_inode<V>(
        &mut self,
        n_inode: u32,
        f: impl FnOnce(&DiskInode) -> V,
    ) -> Result<V> {
        let (block, offset) = self.inode_pos(n_inode);
        let cache = self.cache.get(block, &self.device)?;
        let out = cache.lock().map(offset, f);
        Ok(out)
    }

    /// Run `f` over the on-disk record of an inode, marking the block dirty.
    pub(crate) fn with_inode_mut<V>(
        &mut self,
        n_inode: u32,
        f: impl FnOnce(&mut DiskInode) -> V,
    ) -> Result<V> {
        let (block, offset) = self.inode_pos(n_inode);
        let cache = self.cache.get(block, &self.device)?;
        let out = cache.lock().map_mut(offset, f);
        Ok(out)
    }

    /// Raw copy of an inode record, no state validation, no timestamp
    /// update.
    pub(crate) fn inode_image(&mut self, n_inode: u32) -> Result<DiskInode> {
        self.with_inode(n_inode, DiskInode::clone)
    }

    /// Copy of an inode record that must be in use, checked but with no
    /// timestamp side effects.
    pub(crate) fn checked_in_use_inode(&mut self, n_inode: u32) -> Result<DiskInode> {
        let inode = self.inode_image(n_inode)?;
        consist::qcheck_inode_in_use(&inode, &self.sb)?;
        Ok(inode)
    }

    #[inline]
    pub(crate) fn cluster_first_block(&self, n_clust: u32) -> usize {
        self.sb.d_zone_start as usize + n_clust as usize * BLOCKS_PER_CLUSTER
    }

    /// Read a raw data cluster, header included, by logical number.
    pub fn read_cluster(&mut self, n_clust: u32) -> Result<DataCluster> {
        if !self.sb.cluster_in_range(n_clust) {
            return Err(SofsError::Invalid);
        }
        let first_block = self.cluster_first_block(n_clust);
        let mut dc = DataCluster::default();
        self.cache.read_cluster(first_block, &self.device, &mut dc)?;
        Ok(dc)
    }

    /// Write the data cluster with the given logical number.
    pub(crate) fn write_cluster(&mut self, n_clust: u32, dc: &DataCluster) -> Result<()> {
        if !self.sb.cluster_in_range(n_clust) {
            return Err(SofsError::Invalid);
        }
        let first_block = self.cluster_first_block(n_clust);
        self.cache.write_cluster(first_block, &self.device, dc)
    }
}

// The formatter.
impl SofsFileSystem {
    /// Install a SOFS14 layout on `device`.
    ///
    /// `n_total` is the device size in blocks, `i_total` the requested
    /// number of inodes (0 picks the default of one inode per eight
    /// blocks), `zero` additionally zero-fills the payload of every free
    /// cluster. Full occupation of the device is achieved by a final
    /// adjustment of the inode-table size, so the realized inode count may
    /// differ from the request.
    pub fn format(
        device: &Arc<dyn BlockDevice>,
        n_total: u32,
        mut i_total: u32,
        name: &str,
        zero: bool,
    ) -> Result<()> {
        if n_total < 8 {
            return Err(SofsError::Invalid);
        }
        if i_total == 0 {
            i_total = n_total >> 3;
        }

        // ntotal = 1 + iblktotal + nclusttotal * BLOCKS_PER_CLUSTER must
        // hold exactly; the inode table absorbs the remainder.
        let mut iblktotal = i_total.div_ceil(IPB as u32).max(1);
        if n_total <= 1 + iblktotal + BLOCKS_PER_CLUSTER as u32 {
            return Err(SofsError::Invalid);
        }
        let nclusttotal = (n_total - 1 - iblktotal) / BLOCKS_PER_CLUSTER as u32;
        iblktotal = n_total - 1 - nclusttotal * BLOCKS_PER_CLUSTER as u32;
        let i_total = iblktotal * IPB as u32;
        if i_total < 2 || nclusttotal < 2 {
            return Err(SofsError::Invalid);
        }

        let creds = Credentials::from_process();
        let mut fs = Self {
            device: device.clone(),
            cache: BlockCacheManager::new(),
            sb: SuperBlock::format_image(name, n_total, iblktotal, i_total, nclusttotal),
            creds,
            clean_mount: true,
        };

        fs.store_super_block()?;
        fs.fill_inode_table()?;
        fs.fill_root_dir()?;
        fs.fill_free_cluster_chain(zero)?;

        // The layout is complete; make the volume mountable.
        fs.sb.set_magic(MAGIC);
        fs.store_super_block()?;
        fs.check_format()?;
        fs.cache.sync_all()
    }

    /// Only inode 0 is in use; it describes the root directory. Every other
    /// inode is free in the clean state and chained into the free list.
    fn fill_inode_table(&mut self) -> Result<()> {
        let i_total = self.sb.i_total;
        let table_start = self.sb.i_table_start as usize;
        let uid = self.creds.uid;
        let gid = self.creds.gid;
        let t = now();

        for blk in 0..self.sb.i_table_size as usize {
            let cache = self.cache.get(table_start + blk, &self.device)?;
            cache.lock().map_mut(0, |records: &mut [DiskInode; IPB]| {
                for (i, record) in records.iter_mut().enumerate() {
                    let n_inode = (blk * IPB + i) as u32;
                    if n_inode == 0 {
                        let mut root = DiskInode::zeroed();
                        root.init_in_use(crate::InodeKind::Directory, uid, gid, t);
                        root.set_permissions(0o777);
                        root.ref_count = 2;
                        root.size = (DPC * DirEntry::SIZE) as u32;
                        root.clu_count = 1;
                        root.d[0] = 0;
                        *record = root;
                    } else {
                        let next = if n_inode + 1 < i_total { n_inode + 1 } else { NULL_INODE };
                        let prev = if n_inode > 1 { n_inode - 1 } else { NULL_INODE };
                        *record = DiskInode::free_chained(next, prev);
                    }
                }
            });
        }
        Ok(())
    }

    /// Cluster 0 of the data zone holds the root directory: `.` and `..`
    /// both reference inode 0, every other entry is clean.
    fn fill_root_dir(&mut self) -> Result<()> {
        let mut dc = DataCluster::default();
        dc.stat = Self::ROOT_INODE;
        let entries = dc.dir_entries_mut();
        entries[0] = DirEntry::new(".", Self::ROOT_INODE);
        entries[1] = DirEntry::new("..", Self::ROOT_INODE);
        for entry in &mut entries[2..] {
            *entry = DirEntry::clean();
        }
        self.write_cluster(0, &dc)
    }

    /// Chain clusters 1‥dZoneTotal into the general repository of free
    /// clusters, all of them free in the clean state.
    fn fill_free_cluster_chain(&mut self, zero: bool) -> Result<()> {
        let total = self.sb.d_zone_total;
        for n in 1..total {
            let mut dc = if zero {
                DataCluster::default()
            } else {
                let mut existing = self.read_cluster(n)?;
                existing.stat = NULL_INODE;
                existing
            };
            dc.prev = if n == 1 { NULL_CLUSTER } else { n - 1 };
            dc.next = if n + 1 < total { n + 1 } else { NULL_CLUSTER };
            self.write_cluster(n, &dc)?;
        }
        Ok(())
    }

    /// Post-format metadata check: the superblock, the root inode and the
    /// root directory content must all pass their structural audits.
    fn check_format(&mut self) -> Result<()> {
        self.sb.quick_check()?;
        let root = self.checked_in_use_inode(Self::ROOT_INODE)?;
        self.qcheck_dir_content(Self::ROOT_INODE, &root)
    }
}

const _: () = assert!(BLOCK_SIZE % DiskInode::SIZE == 0);
