//! Inode table access and the double-linked list of free inodes.
//!
//! Free inodes are threaded through the `next`/`prev` union fields of the
//! records themselves, anchored at `iHead` (retrieval) and `iTail`
//! (insertion). A freed inode enters the list in the dirty state: its
//! cluster references are still attached and are only released by
//! [`SofsFileSystem::clean_inode`].

use crate::consist;
use crate::error::{Result, SofsError};
use crate::fs::now;
use crate::layout::{DiskInode, InodeKind, ModeFlag};
use crate::{ReleaseOp, SofsFileSystem, NULL_INODE};

/// Expected state of an inode record when reading or writing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeStatus {
    /// In use, belonging to one of the legal file types.
    InUse,
    /// Free in the dirty state.
    FreeDirty,
}

impl SofsFileSystem {
    /// Read an inode record, validating that it is in the expected state.
    ///
    /// Reading an inode in use refreshes its time of last access in the
    /// table.
    pub fn read_inode(&mut self, n_inode: u32, status: InodeStatus) -> Result<DiskInode> {
        if !self.super_block().inode_in_range(n_inode) {
            return Err(SofsError::Invalid);
        }
        let inode = self.inode_image(n_inode)?;
        match status {
            InodeStatus::InUse => {
                consist::qcheck_inode_in_use(&inode, self.super_block())?;
                let t = now();
                self.with_inode_mut(n_inode, |record| record.set_atime(t))?;
            }
            InodeStatus::FreeDirty => {
                consist::qcheck_free_dirty(&inode, self.super_block())?;
            }
        }
        let inode = self.inode_image(n_inode)?;
        self.store_super_block()?;
        Ok(inode)
    }

    /// Write an inode record, validating the image against the expected
    /// state. Writing an inode in use refreshes both its times.
    pub fn write_inode(&mut self, src: &DiskInode, n_inode: u32, status: InodeStatus) -> Result<()> {
        if !self.super_block().inode_in_range(n_inode) {
            return Err(SofsError::Invalid);
        }
        let mut image = src.clone();
        match status {
            InodeStatus::InUse => {
                let t = now();
                image.set_atime(t);
                image.set_mtime(t);
                consist::qcheck_inode_in_use(&image, self.super_block())?;
            }
            InodeStatus::FreeDirty => {
                consist::qcheck_free_dirty(&image, self.super_block())?;
            }
        }
        self.with_inode_mut(n_inode, |record| *record = image)?;
        self.store_super_block()
    }

    /// Turn a free inode in the dirty state into a clean one by
    /// dissociating every data cluster still attached to it.
    ///
    /// Inode 0 belongs to the root directory and can never be cleaned.
    pub fn clean_inode(&mut self, n_inode: u32) -> Result<()> {
        if n_inode == 0 || !self.super_block().inode_in_range(n_inode) {
            return Err(SofsError::Invalid);
        }
        // State precondition: must be free in the dirty state.
        self.read_inode(n_inode, InodeStatus::FreeDirty)?;
        self.handle_file_clusters(n_inode, 0, ReleaseOp::Clean)?;
        self.store_super_block()
    }

    /// Allocate a free inode of the given type.
    ///
    /// The inode is taken from the head of the free list; if it is dirty it
    /// is cleaned first. The record comes back fully initialized: type set
    /// with all permissions reset, owner and group from the mount
    /// credentials, empty content, both timestamps at now.
    pub fn alloc_inode(&mut self, kind: InodeKind) -> Result<u32> {
        self.super_block().quick_check()?;
        if self.super_block().i_free == 0 {
            return Err(SofsError::NoSpace);
        }

        let n_inode = self.super_block().i_head;
        let head = self.inode_image(n_inode)?;
        if !head.is_free() {
            return Err(SofsError::FreeInodeInvalid);
        }
        if !consist::is_free_clean(&head) {
            self.clean_inode(n_inode)?;
        }

        let next = self.inode_image(n_inode)?.next_free();
        let creds = self.credentials();
        let t = now();
        self.with_inode_mut(n_inode, |record| {
            record.init_in_use(kind, creds.uid, creds.gid, t)
        })?;

        if self.super_block().i_free == 1 {
            let sb = self.sb_mut();
            sb.i_head = NULL_INODE;
            sb.i_tail = NULL_INODE;
        } else {
            self.sb_mut().i_head = next;
            self.with_inode_mut(next, |record| record.set_prev_free(NULL_INODE))?;
        }
        self.sb_mut().i_free -= 1;
        self.store_super_block()?;
        Ok(n_inode)
    }

    /// Free an inode in use whose last directory entry is gone
    /// (`refCount == 0`), appending it to the tail of the free list in the
    /// dirty state.
    ///
    /// The cluster references are deliberately left attached; releasing
    /// them is the job of a later [`clean_inode`](Self::clean_inode).
    pub fn free_inode(&mut self, n_inode: u32) -> Result<()> {
        if n_inode == 0 || !self.super_block().inode_in_range(n_inode) {
            return Err(SofsError::Invalid);
        }
        let inode = self.checked_in_use_inode(n_inode)?;
        if inode.kind().is_none() {
            return Err(SofsError::InodeInUseInvalid);
        }
        if inode.ref_count != 0 {
            return Err(SofsError::Invalid);
        }

        let tail = self.super_block().i_tail;
        let empty = self.super_block().i_free == 0;
        self.with_inode_mut(n_inode, |record| {
            record.mode |= ModeFlag::Free as u16;
            record.set_next_free(NULL_INODE);
            record.set_prev_free(if empty { NULL_INODE } else { tail });
        })?;

        if empty {
            let sb = self.sb_mut();
            sb.i_head = n_inode;
            sb.i_tail = n_inode;
        } else {
            self.with_inode_mut(tail, |record| record.set_next_free(n_inode))?;
            self.sb_mut().i_tail = n_inode;
        }
        self.sb_mut().i_free += 1;
        self.store_super_block()
    }
}
