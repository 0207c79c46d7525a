use core::mem;

use crate::layout::DirEntry;
use crate::{BSLPC, CLUSTER_SIZE, DPC, NULL_CLUSTER, NULL_INODE, RPC};

/// One data cluster: a three-word header followed by the information
/// content.
///
/// The body is a plain byte stream on disk; depending on the role the
/// cluster plays for its owning inode it is read as raw bytes, as an array
/// of directory entries or as an array of cluster references. The typed
/// views below reinterpret the same storage, so the layout stays
/// byte-identical in all three cases.
#[derive(Clone)]
#[repr(C)]
pub struct DataCluster {
    /// Previous cluster: free-list link while the cluster sits in the
    /// general repository, logical-order file link while it is in use,
    /// `NULL_CLUSTER` while its reference rests in one of the caches.
    pub prev: u32,
    /// Next cluster, same convention as `prev`.
    pub next: u32,
    /// `NULL_INODE` when clean; otherwise the number of the inode the
    /// cluster belongs (or last belonged) to.
    pub stat: u32,
    body: [u8; BSLPC],
}

const _: () = assert!(mem::size_of::<DataCluster>() == CLUSTER_SIZE);
const _: () = assert!(RPC * 4 == BSLPC);
const _: () = assert!(DPC * DirEntry::SIZE <= BSLPC);

impl Default for DataCluster {
    fn default() -> Self {
        Self {
            prev: NULL_CLUSTER,
            next: NULL_CLUSTER,
            stat: NULL_INODE,
            body: [0; BSLPC],
        }
    }
}

impl DataCluster {
    /// Byte-stream view of the body.
    #[inline]
    pub fn data(&self) -> &[u8; BSLPC] {
        &self.body
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8; BSLPC] {
        &mut self.body
    }

    /// Reference-array view of the body.
    #[inline]
    pub fn refs(&self) -> &[u32; RPC] {
        unsafe { &*(self.body.as_ptr().cast()) }
    }

    #[inline]
    pub fn refs_mut(&mut self) -> &mut [u32; RPC] {
        unsafe { &mut *(self.body.as_mut_ptr().cast()) }
    }

    /// Directory-entry view of the body.
    #[inline]
    pub fn dir_entries(&self) -> &[DirEntry; DPC] {
        unsafe { &*(self.body.as_ptr().cast()) }
    }

    #[inline]
    pub fn dir_entries_mut(&mut self) -> &mut [DirEntry; DPC] {
        unsafe { &mut *(self.body.as_mut_ptr().cast()) }
    }

    /// The whole cluster as raw bytes, header included.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; CLUSTER_SIZE] {
        unsafe { &*(core::ptr::from_ref(self).cast()) }
    }

    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8; CLUSTER_SIZE] {
        unsafe { &mut *(core::ptr::from_mut(self).cast()) }
    }

    /// Body formatted as an empty reference table.
    pub fn fill_null_refs(&mut self) {
        self.refs_mut().fill(NULL_CLUSTER);
    }
}
