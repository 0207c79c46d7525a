use core::mem;

use enumflags2::{bitflags, BitFlags};

use crate::{NULL_CLUSTER, NULL_INODE, N_DIRECT};

const INODE_SIZE: usize = 128;
const INODE_RESERVED: usize = INODE_SIZE - 28 - 4 * N_DIRECT - 8;

/// Bit layout of the inode `mode` field: the free flag, a one-hot file-type
/// triad and the nine Unix permission bits.
#[bitflags]
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeFlag {
    ExOth = 0o0001,
    WrOth = 0o0002,
    RdOth = 0o0004,
    ExGrp = 0o0010,
    WrGrp = 0o0020,
    RdGrp = 0o0040,
    ExUsr = 0o0100,
    WrUsr = 0o0200,
    RdUsr = 0o0400,
    Symlink = 0x1000,
    File = 0x2000,
    Dir = 0x4000,
    Free = 0x8000,
}

/// Legal file types an inode in use may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeKind {
    Directory,
    File,
    Symlink,
}

impl From<InodeKind> for ModeFlag {
    #[inline]
    fn from(kind: InodeKind) -> Self {
        match kind {
            InodeKind::Directory => ModeFlag::Dir,
            InodeKind::File => ModeFlag::File,
            InodeKind::Symlink => ModeFlag::Symlink,
        }
    }
}

/// One record of the inode table.
///
/// The `vd1`/`vd2` pair changes meaning with the inode state: for an inode
/// in use they hold the times of last access and last modification; for a
/// free inode they hold the `next`/`prev` links of the double-linked free
/// list. The typed accessors below are the only way in.
#[derive(Debug, Clone)]
#[repr(C)]
pub struct DiskInode {
    pub mode: u16,
    /// Hard-link count.
    pub ref_count: u16,
    pub owner: u32,
    pub group: u32,
    /// Bytes for files and symlinks; rounded-up content bytes for directories.
    pub size: u32,
    /// Clusters attached to the file, reference clusters included.
    pub clu_count: u32,
    vd1: u32,
    vd2: u32,
    /// Direct data cluster references.
    pub d: [u32; N_DIRECT],
    /// Single-indirect reference cluster.
    pub i1: u32,
    /// Double-indirect reference cluster.
    pub i2: u32,
    reserved: [u8; INODE_RESERVED],
}

const _: () = assert!(mem::size_of::<DiskInode>() == DiskInode::SIZE);

impl DiskInode {
    /// Record size; `IPB` records fill one block exactly.
    pub const SIZE: usize = INODE_SIZE;

    /// Record of a never-used inode, chained between `next` and `prev` in
    /// the free list (formatter use).
    pub fn free_chained(next: u32, prev: u32) -> Self {
        let mut inode = Self::zeroed();
        inode.mode = ModeFlag::Free as u16;
        inode.vd1 = next;
        inode.vd2 = prev;
        inode
    }

    pub fn zeroed() -> Self {
        Self {
            mode: 0,
            ref_count: 0,
            owner: 0,
            group: 0,
            size: 0,
            clu_count: 0,
            vd1: NULL_INODE,
            vd2: NULL_INODE,
            d: [NULL_CLUSTER; N_DIRECT],
            i1: NULL_CLUSTER,
            i2: NULL_CLUSTER,
            reserved: [0; INODE_RESERVED],
        }
    }

    /// General initialization of a just-allocated inode: the given type with
    /// all permission bits reset, empty content, both timestamps at `now`.
    pub fn init_in_use(&mut self, kind: InodeKind, owner: u32, group: u32, now: u32) {
        self.mode = ModeFlag::from(kind) as u16;
        self.ref_count = 0;
        self.owner = owner;
        self.group = group;
        self.size = 0;
        self.clu_count = 0;
        self.vd1 = now;
        self.vd2 = now;
        self.d = [NULL_CLUSTER; N_DIRECT];
        self.i1 = NULL_CLUSTER;
        self.i2 = NULL_CLUSTER;
    }

    #[inline]
    pub fn mode_flags(&self) -> BitFlags<ModeFlag> {
        BitFlags::from_bits_truncate(self.mode)
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        self.mode_flags().contains(ModeFlag::Free)
    }

    #[inline]
    pub fn is_in_use(&self) -> bool {
        !self.is_free()
    }

    /// File type of the record, `None` when the type triad is not one-hot.
    pub fn kind(&self) -> Option<InodeKind> {
        let flags = self.mode_flags();
        match (
            flags.contains(ModeFlag::Dir),
            flags.contains(ModeFlag::File),
            flags.contains(ModeFlag::Symlink),
        ) {
            (true, false, false) => Some(InodeKind::Directory),
            (false, true, false) => Some(InodeKind::File),
            (false, false, true) => Some(InodeKind::Symlink),
            _ => None,
        }
    }

    #[inline]
    pub fn set_permissions(&mut self, bits: u16) {
        self.mode = (self.mode & !0o777) | (bits & 0o777);
    }

    // Time accessors: only meaningful while the inode is in use.

    #[inline]
    pub fn atime(&self) -> u32 {
        self.vd1
    }

    #[inline]
    pub fn set_atime(&mut self, t: u32) {
        self.vd1 = t;
    }

    #[inline]
    pub fn mtime(&self) -> u32 {
        self.vd2
    }

    #[inline]
    pub fn set_mtime(&mut self, t: u32) {
        self.vd2 = t;
    }

    // Link accessors: only meaningful while the inode is free.

    #[inline]
    pub fn next_free(&self) -> u32 {
        self.vd1
    }

    #[inline]
    pub fn set_next_free(&mut self, n: u32) {
        self.vd1 = n;
    }

    #[inline]
    pub fn prev_free(&self) -> u32 {
        self.vd2
    }

    #[inline]
    pub fn set_prev_free(&mut self, n: u32) {
        self.vd2 = n;
    }

    /// All cluster reference fields of the record, `i1`/`i2` included.
    pub fn has_no_references(&self) -> bool {
        self.clu_count == 0
            && self.i1 == NULL_CLUSTER
            && self.i2 == NULL_CLUSTER
            && self.d.iter().all(|&r| r == NULL_CLUSTER)
    }
}
