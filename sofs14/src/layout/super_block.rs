use core::mem;

use crate::{
    BLOCK_SIZE, DZONE_CACHE_SIZE, MAGIC, NULL_CLUSTER, NULL_INODE, PARTITION_NAME_SIZE, VERSION,
};

/// Mount status: the volume was properly unmounted the last time around.
pub const PRU: u32 = 0;
/// Mount status: the volume was not properly unmounted.
pub const NPRU: u32 = 1;

const RESERVED_SIZE: usize =
    BLOCK_SIZE - 15 * 4 - (PARTITION_NAME_SIZE + 1) - 2 * mem::size_of::<RefCache>();

/// Easy-access temporary storage inside the superblock for references to
/// free data clusters.
///
/// The retrieval cache keeps its live entries at indices
/// `[cache_idx, DZONE_CACHE_SIZE)`; the insertion cache keeps them at
/// `[0, cache_idx)`.
#[derive(Debug, Clone)]
#[repr(C)]
pub struct RefCache {
    /// Index of the first filled/free array element.
    pub cache_idx: u32,
    /// Logical numbers of free data clusters.
    pub cache: [u32; DZONE_CACHE_SIZE],
}

impl RefCache {
    fn empty(cache_idx: u32) -> Self {
        Self {
            cache_idx,
            cache: [NULL_CLUSTER; DZONE_CACHE_SIZE],
        }
    }
}

/// 超级块：
/// - 提供文件系统合法性校验；
/// - 定位其它连续区域；
/// - 管理空闲 inode 链表与空闲簇仓库的锚点和两个引用缓存。
#[derive(Debug, Clone)]
#[repr(C)]
pub struct SuperBlock {
    /// 魔数：用于校验文件系统合法性
    magic: u32,
    pub version: u32,
    /// Volume name, NUL terminated.
    name: [u8; PARTITION_NAME_SIZE + 1],
    /// 文件系统占据块数
    pub n_total: u32,
    /// PRU / NPRU unmount status flag.
    pub m_stat: u32,

    /// Physical number of the first block of the inode table.
    pub i_table_start: u32,
    /// Number of blocks of the inode table.
    pub i_table_size: u32,
    /// Total number of inodes.
    pub i_total: u32,
    /// Number of free inodes.
    pub i_free: u32,
    /// Head of the double-linked list of free inodes (point of retrieval).
    pub i_head: u32,
    /// Tail of the double-linked list of free inodes (point of insertion).
    pub i_tail: u32,

    /// Physical number of the first block of the data zone.
    pub d_zone_start: u32,
    /// Total number of data clusters.
    pub d_zone_total: u32,
    /// Number of free data clusters, wherever their references live.
    pub d_zone_free: u32,
    /// Retrieval cache of references to free data clusters.
    pub d_zone_retriev: RefCache,
    /// Insertion cache of references to free data clusters.
    pub d_zone_insert: RefCache,
    /// Head of the double-linked list of free data clusters.
    pub d_head: u32,
    /// Tail of the double-linked list of free data clusters.
    pub d_tail: u32,

    reserved: [u8; RESERVED_SIZE],
}

const _: () = assert!(mem::size_of::<SuperBlock>() == BLOCK_SIZE);

impl SuperBlock {
    /// Fresh formatting image. The magic number is deliberately left at an
    /// illegal value; the formatter sets the real one only once the whole
    /// layout is on disk, so a half-formatted volume can never be mounted.
    pub fn format_image(
        name: &str,
        n_total: u32,
        i_table_size: u32,
        i_total: u32,
        d_zone_total: u32,
    ) -> Self {
        let mut sb = Self {
            magic: 0xFFFF,
            version: VERSION,
            name: [0; PARTITION_NAME_SIZE + 1],
            n_total,
            m_stat: PRU,
            i_table_start: 1,
            i_table_size,
            i_total,
            i_free: i_total - 1,
            i_head: 1,
            i_tail: i_total - 1,
            d_zone_start: 1 + i_table_size,
            d_zone_total,
            d_zone_free: d_zone_total - 1,
            d_zone_retriev: RefCache::empty(DZONE_CACHE_SIZE as u32),
            d_zone_insert: RefCache::empty(0),
            d_head: 1,
            d_tail: d_zone_total - 1,
            reserved: [0; RESERVED_SIZE],
        };
        sb.set_name(name);
        sb
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.magic == MAGIC && self.version == VERSION
    }

    #[inline]
    pub(crate) fn magic(&self) -> u32 {
        self.magic
    }

    #[inline]
    pub(crate) fn set_magic(&mut self, magic: u32) {
        self.magic = magic;
    }

    pub fn set_name(&mut self, name: &str) {
        let bytes = name.as_bytes();
        let len = bytes.len().min(PARTITION_NAME_SIZE);
        self.name = [0; PARTITION_NAME_SIZE + 1];
        self.name[..len].copy_from_slice(&bytes[..len]);
    }

    pub fn name(&self) -> &str {
        let len = self
            .name
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(PARTITION_NAME_SIZE);
        core::str::from_utf8(&self.name[..len]).unwrap_or("")
    }

    /// Live entries of the retrieval cache.
    #[inline]
    pub fn retrieval_entries(&self) -> &[u32] {
        &self.d_zone_retriev.cache[self.d_zone_retriev.cache_idx as usize..]
    }

    /// Live entries of the insertion cache.
    #[inline]
    pub fn insertion_entries(&self) -> &[u32] {
        &self.d_zone_insert.cache[..self.d_zone_insert.cache_idx as usize]
    }

    /// Whether an inode number addresses a record of the inode table.
    #[inline]
    pub fn inode_in_range(&self, n_inode: u32) -> bool {
        n_inode < self.i_total
    }

    /// Whether a logical cluster number addresses a cluster of the data zone.
    #[inline]
    pub fn cluster_in_range(&self, n_clust: u32) -> bool {
        n_clust < self.d_zone_total
    }

    #[inline]
    fn inode_link_ok(&self, link: u32) -> bool {
        link == NULL_INODE || self.inode_in_range(link)
    }

    #[inline]
    fn cluster_link_ok(&self, link: u32) -> bool {
        link == NULL_CLUSTER || self.cluster_in_range(link)
    }

    /// Quick structural check of the superblock image.
    ///
    /// Rejects inconsistent counts, out-of-range list anchors and cache
    /// indices outside `[0, DZONE_CACHE_SIZE]`. Deep checks (walking the
    /// lists themselves) are left to the metadata audits.
    pub fn quick_check(&self) -> crate::Result<()> {
        use crate::error::SofsError::Internal;
        use crate::{BLOCKS_PER_CLUSTER, IPB};

        if !self.is_valid() || self.name[PARTITION_NAME_SIZE] != 0 {
            return Err(Internal);
        }
        if self.m_stat != PRU && self.m_stat != NPRU {
            return Err(Internal);
        }

        if self.i_table_start != 1
            || self.i_table_size * IPB as u32 != self.i_total
            || self.i_free > self.i_total
            || !self.inode_link_ok(self.i_head)
            || !self.inode_link_ok(self.i_tail)
            || (self.i_free == 0) != (self.i_head == NULL_INODE && self.i_tail == NULL_INODE)
        {
            return Err(Internal);
        }

        if self.d_zone_start != 1 + self.i_table_size
            || self.d_zone_free > self.d_zone_total
            || self.d_zone_start + self.d_zone_total * BLOCKS_PER_CLUSTER as u32 > self.n_total
            || !self.cluster_link_ok(self.d_head)
            || !self.cluster_link_ok(self.d_tail)
            || (self.d_head == NULL_CLUSTER) != (self.d_tail == NULL_CLUSTER)
        {
            return Err(Internal);
        }

        if self.d_zone_retriev.cache_idx as usize > DZONE_CACHE_SIZE
            || self.d_zone_insert.cache_idx as usize > DZONE_CACHE_SIZE
        {
            return Err(Internal);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> SuperBlock {
        // 200-block volume, 60 inodes in 15 blocks, 46 clusters.
        SuperBlock::format_image("SOFS14", 200, 15, 60, 46)
    }

    #[test]
    fn format_image_geometry() {
        let sb = image();
        assert_eq!(sb.d_zone_start, 16);
        assert_eq!(sb.i_free, 59);
        assert_eq!(sb.d_zone_free, 45);
        assert_eq!(sb.retrieval_entries(), &[] as &[u32]);
        assert_eq!(sb.insertion_entries(), &[] as &[u32]);
        assert_eq!(sb.name(), "SOFS14");
    }

    #[test]
    fn quick_check_rejects_bad_magic_and_counts() {
        let mut sb = image();
        assert!(sb.quick_check().is_err()); // magic still 0xFFFF

        sb.set_magic(MAGIC);
        sb.quick_check().unwrap();

        sb.i_free = sb.i_total + 1;
        assert!(sb.quick_check().is_err());

        let mut sb = image();
        sb.set_magic(MAGIC);
        sb.d_zone_retriev.cache_idx = DZONE_CACHE_SIZE as u32 + 1;
        assert!(sb.quick_check().is_err());
    }

    #[test]
    fn name_is_bounded() {
        let mut sb = image();
        sb.set_name("a-very-long-volume-name-that-cannot-fit");
        assert_eq!(sb.name().len(), PARTITION_NAME_SIZE);
    }
}
