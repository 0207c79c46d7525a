//! Directory-entry operations and path resolution.
//!
//! A directory's content is an array of fixed-size entries packed into its
//! data clusters, the first two of which are permanently `.` and `..`.
//! Lookup scans linearly; insertion reuses the first clean slot or grows
//! the directory by one cluster; removal parks the entry in the deleted
//! state so the original name stays recoverable, while detachment wipes it
//! back to clean.

use enumflags2::{bitflags, BitFlags};

use crate::error::{Result, SofsError};
use crate::inodes::InodeStatus;
use crate::layout::{DataCluster, DirEntry, InodeKind, ModeFlag};
use crate::{ReleaseOp, SofsFileSystem, BSLPC, DPC, MAX_FILE_CLUSTERS, MAX_NAME, MAX_PATH};

/// Operation classes of [`SofsFileSystem::add_dir_entry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOp {
    /// Add a generic entry; a directory target is initialized as empty.
    Add,
    /// Attach an already organized subsidiary directory (or re-link any
    /// existing entry target).
    Attach,
}

/// Operation classes of [`SofsFileSystem::remove_dir_entry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOp {
    /// Remove: park the entry in the deleted state and delete the file
    /// once its last hard link is gone.
    Remove,
    /// Detach: wipe the entry back to clean, never deleting the file.
    Detach,
}

/// Access kinds checked by [`SofsFileSystem::access_granted`].
#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Exec = 0b001,
    Write = 0b010,
    Read = 0b100,
}

/// Outcome of a directory scan for one name.
pub(crate) enum DirLookup {
    Found { n_inode: u32, idx: u32 },
    /// Not present; `free_idx` is the first clean slot, or one past the
    /// current end when every slot is taken (deleted slots are not
    /// reclaimed).
    Missing { free_idx: u32 },
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name.contains('\0') {
        return Err(SofsError::Invalid);
    }
    if name.len() > MAX_NAME {
        return Err(SofsError::NameTooLong);
    }
    Ok(())
}

/// Per-call resolver state; at most one symbolic link may be followed per
/// resolution.
struct ResolverState {
    symlinks_followed: u32,
}

const SYMLINK_FOLLOW_MAX: u32 = 1;

impl SofsFileSystem {
    /// Check the access rights of the mount credentials on an inode.
    ///
    /// Root obtains read and write unconditionally, and execute iff at
    /// least one of the three execute bits is set.
    pub fn access_granted(&mut self, n_inode: u32, ops: BitFlags<Access>) -> Result<()> {
        if ops.is_empty() {
            return Err(SofsError::Invalid);
        }
        if !self.super_block().inode_in_range(n_inode) {
            return Err(SofsError::Invalid);
        }
        let inode = self.read_inode(n_inode, InodeStatus::InUse)?;
        let mode = inode.mode_flags();
        let creds = self.credentials();

        if creds.uid == 0 {
            if ops.contains(Access::Exec)
                && !mode.intersects(ModeFlag::ExUsr | ModeFlag::ExGrp | ModeFlag::ExOth)
            {
                return Err(SofsError::AccessDenied);
            }
            return Ok(());
        }

        let (rd, wr, ex) = if creds.uid == inode.owner {
            (ModeFlag::RdUsr, ModeFlag::WrUsr, ModeFlag::ExUsr)
        } else if creds.gid == inode.group {
            (ModeFlag::RdGrp, ModeFlag::WrGrp, ModeFlag::ExGrp)
        } else {
            (ModeFlag::RdOth, ModeFlag::WrOth, ModeFlag::ExOth)
        };

        if ops.contains(Access::Read) && !mode.contains(rd) {
            return Err(SofsError::AccessDenied);
        }
        if ops.contains(Access::Write) && !mode.contains(wr) {
            return Err(SofsError::AccessDenied);
        }
        if ops.contains(Access::Exec) && !mode.contains(ex) {
            return Err(SofsError::AccessDenied);
        }
        Ok(())
    }

    /// Write permission reported the POSIX way: `EPERM` rather than
    /// `EACCES`.
    fn require_write(&mut self, n_inode: u32) -> Result<()> {
        self.access_granted(n_inode, Access::Write.into())
            .map_err(|e| match e {
                SofsError::AccessDenied => SofsError::NotPermitted,
                other => other,
            })
    }

    /// Scan a directory for `name`, tracking the first clean slot on the
    /// way. The caller must hold execute permission on the directory.
    pub(crate) fn lookup_dir_entry(&mut self, n_dir: u32, name: &str) -> Result<DirLookup> {
        validate_name(name)?;
        if !self.super_block().inode_in_range(n_dir) {
            return Err(SofsError::Invalid);
        }
        let inode = self.read_inode(n_dir, InodeStatus::InUse)?;
        if inode.kind() != Some(InodeKind::Directory) {
            return Err(SofsError::NotDirectory);
        }
        self.qcheck_dir_content(n_dir, &inode)?;
        self.access_granted(n_dir, Access::Exec.into())?;

        let n_clusters = inode.size / (DPC * DirEntry::SIZE) as u32;
        let mut free_idx = None;
        for ci in 0..n_clusters {
            let dc = self.read_file_cluster(n_dir, ci)?;
            for (ei, entry) in dc.dir_entries().iter().enumerate() {
                let idx = ci * DPC as u32 + ei as u32;
                if entry.is_in_use() && entry.name_bytes() == name.as_bytes() {
                    return Ok(DirLookup::Found {
                        n_inode: entry.n_inode(),
                        idx,
                    });
                }
                if free_idx.is_none() && entry.is_clean() {
                    free_idx = Some(idx);
                }
            }
        }
        Ok(DirLookup::Missing {
            free_idx: free_idx.unwrap_or(inode.clu_count * DPC as u32),
        })
    }

    /// Get a directory entry by name: the inode it references and its index
    /// inside the directory.
    pub fn get_dir_entry_by_name(&mut self, n_dir: u32, name: &str) -> Result<(u32, u32)> {
        match self.lookup_dir_entry(n_dir, name)? {
            DirLookup::Found { n_inode, idx } => Ok((n_inode, idx)),
            DirLookup::Missing { .. } => Err(SofsError::NotFound),
        }
    }

    /// Add a generic entry to a directory (`Add`), or attach a subsidiary
    /// directory to a base directory (`Attach`).
    ///
    /// Adding a directory target initializes its content as an empty
    /// directory (`.`, `..`, the rest clean); attaching re-asserts `.` and
    /// `..` of the existing child. Hard-link counts of both inodes are
    /// updated, and the parent grows by one cluster when the chosen slot
    /// lies past its current end.
    pub fn add_dir_entry(&mut self, n_dir: u32, name: &str, n_ent: u32, op: AddOp) -> Result<()> {
        let sb = self.super_block();
        if !sb.inode_in_range(n_dir) || !sb.inode_in_range(n_ent) {
            return Err(SofsError::Invalid);
        }
        validate_name(name)?;

        let mut dir_inode = self.read_inode(n_dir, InodeStatus::InUse)?;
        if dir_inode.kind() != Some(InodeKind::Directory) {
            return Err(SofsError::NotDirectory);
        }
        if dir_inode.ref_count > u16::MAX - 2 {
            return Err(SofsError::TooManyLinks);
        }
        self.access_granted(n_dir, Access::Exec.into())?;
        self.require_write(n_dir)?;

        let free_idx = match self.lookup_dir_entry(n_dir, name)? {
            DirLookup::Found { .. } => return Err(SofsError::Exists),
            DirLookup::Missing { free_idx } => free_idx,
        };
        if free_idx as usize >= MAX_FILE_CLUSTERS * DPC {
            return Err(SofsError::FileTooBig);
        }

        let mut ent_inode = self.read_inode(n_ent, InodeStatus::InUse)?;
        match ent_inode.kind() {
            Some(InodeKind::Directory) => {
                if ent_inode.ref_count > u16::MAX - 2 {
                    return Err(SofsError::TooManyLinks);
                }
                let mut dc = if op == AddOp::Add {
                    DataCluster::default()
                } else {
                    self.read_file_cluster(n_ent, 0)?
                };
                let entries = dc.dir_entries_mut();
                entries[0] = DirEntry::new(".", n_ent);
                entries[1] = DirEntry::new("..", n_dir);
                if op == AddOp::Add {
                    for entry in &mut entries[2..] {
                        *entry = DirEntry::clean();
                    }
                }
                self.write_file_cluster(n_ent, 0, &dc)?;

                // re-read: the write may just have attached the child's
                // first cluster
                ent_inode = self.read_inode(n_ent, InodeStatus::InUse)?;
                ent_inode.ref_count += 2;
                if op == AddOp::Add {
                    ent_inode.size = (DPC * DirEntry::SIZE) as u32;
                }
                dir_inode.ref_count += 1;
            }
            Some(InodeKind::File) | Some(InodeKind::Symlink) => {
                if ent_inode.ref_count == u16::MAX {
                    return Err(SofsError::TooManyLinks);
                }
                ent_inode.ref_count += 1;
            }
            None => return Err(SofsError::InodeInUseInvalid),
        }

        let ci = free_idx / DPC as u32;
        let ei = (free_idx % DPC as u32) as usize;
        // a slot past the current end materializes a fresh cluster
        let grows = free_idx >= dir_inode.size / DirEntry::SIZE as u32;
        let mut dc = self.read_file_cluster(n_dir, ci)?;
        dc.dir_entries_mut()[ei] = DirEntry::new(name, n_ent);
        if grows {
            for entry in &mut dc.dir_entries_mut()[ei + 1..] {
                *entry = DirEntry::clean();
            }
            dir_inode.size += (DPC * DirEntry::SIZE) as u32;
        }

        self.write_inode(&dir_inode, n_dir, InodeStatus::InUse)?;
        self.write_file_cluster(n_dir, ci, &dc)?;
        self.write_inode(&ent_inode, n_ent, InodeStatus::InUse)
    }

    /// Remove (`Remove`) or detach (`Detach`) the entry called `name`.
    ///
    /// Removal parks the entry in the deleted state; when it takes the last
    /// hard link of the target, the target's cluster tree is freed and the
    /// inode goes to the free list in the dirty state. Removal of a
    /// directory requires it empty. Detachment wipes the entry clean and
    /// never deletes the target.
    pub fn remove_dir_entry(&mut self, n_dir: u32, name: &str, op: RemoveOp) -> Result<()> {
        if !self.super_block().inode_in_range(n_dir) {
            return Err(SofsError::Invalid);
        }
        let mut dir_inode = self.read_inode(n_dir, InodeStatus::InUse)?;
        if dir_inode.kind() != Some(InodeKind::Directory) {
            return Err(SofsError::NotDirectory);
        }
        self.qcheck_dir_content(n_dir, &dir_inode)?;
        self.access_granted(n_dir, Access::Exec.into())?;
        self.require_write(n_dir)?;

        let (n_ent, idx) = self.get_dir_entry_by_name(n_dir, name)?;
        let mut ent_inode = self.read_inode(n_ent, InodeStatus::InUse)?;
        let is_dir = ent_inode.kind() == Some(InodeKind::Directory);

        if op == RemoveOp::Remove && is_dir {
            self.check_directory_emptiness(n_ent)?;
        }

        let ci = idx / DPC as u32;
        let ei = (idx % DPC as u32) as usize;
        let mut dc = self.read_file_cluster(n_dir, ci)?;
        match op {
            RemoveOp::Remove => dc.dir_entries_mut()[ei].mark_deleted(),
            RemoveOp::Detach => dc.dir_entries_mut()[ei].wipe(),
        }
        self.write_file_cluster(n_dir, ci, &dc)?;

        if is_dir {
            ent_inode.ref_count -= 2;
            dir_inode.ref_count -= 1;
        } else {
            ent_inode.ref_count -= 1;
        }
        self.write_inode(&ent_inode, n_ent, InodeStatus::InUse)?;

        if op == RemoveOp::Remove && ent_inode.ref_count == 0 {
            self.handle_file_clusters(n_ent, 0, ReleaseOp::Free)?;
            self.free_inode(n_ent)?;
        }

        self.write_inode(&dir_inode, n_dir, InodeStatus::InUse)
    }

    /// Rename the entry `old_name` to `new_name` in place.
    pub fn rename_dir_entry(&mut self, n_dir: u32, old_name: &str, new_name: &str) -> Result<()> {
        if !self.super_block().inode_in_range(n_dir) {
            return Err(SofsError::Invalid);
        }
        validate_name(old_name)?;
        validate_name(new_name)?;

        let dir_inode = self.read_inode(n_dir, InodeStatus::InUse)?;
        if dir_inode.kind() != Some(InodeKind::Directory) {
            return Err(SofsError::NotDirectory);
        }
        self.access_granted(n_dir, Access::Exec.into())?;
        self.require_write(n_dir)?;

        let (_, idx) = self.get_dir_entry_by_name(n_dir, old_name)?;
        if let DirLookup::Found { .. } = self.lookup_dir_entry(n_dir, new_name)? {
            return Err(SofsError::Exists);
        }

        let ci = idx / DPC as u32;
        let ei = (idx % DPC as u32) as usize;
        let mut dc = self.read_file_cluster(n_dir, ci)?;
        dc.dir_entries_mut()[ei].set_name(new_name);
        self.write_file_cluster(n_dir, ci, &dc)
    }

    /// A directory is empty when nothing beyond `.` and `..` is in use;
    /// clean and deleted slots do not count.
    pub fn check_directory_emptiness(&mut self, n_dir: u32) -> Result<()> {
        if !self.super_block().inode_in_range(n_dir) {
            return Err(SofsError::Invalid);
        }
        let inode = self.read_inode(n_dir, InodeStatus::InUse)?;
        if inode.kind() != Some(InodeKind::Directory) {
            return Err(SofsError::NotDirectory);
        }

        let n_clusters = inode.size / (DPC * DirEntry::SIZE) as u32;
        for ci in 0..n_clusters {
            let dc = self.read_file_cluster(n_dir, ci)?;
            for (ei, entry) in dc.dir_entries().iter().enumerate() {
                if ci == 0 && ei < 2 {
                    continue;
                }
                if entry.is_in_use() {
                    return Err(SofsError::NotEmpty);
                }
            }
        }
        Ok(())
    }

    /// Resolve an absolute path to `(directory inode, entry inode)`.
    ///
    /// Every component but the last must resolve through directories the
    /// caller may search. A symbolic link met anywhere along the way is
    /// followed — an absolute target restarts at the root, a relative one
    /// continues from the link's directory — and at most one link may be
    /// followed per call; the next one fails with `ELOOP`.
    pub fn get_dir_entry_by_path(&mut self, e_path: &str) -> Result<(u32, u32)> {
        if e_path.is_empty() {
            return Err(SofsError::Invalid);
        }
        if !e_path.starts_with('/') {
            return Err(SofsError::RelativePath);
        }
        if e_path.len() > MAX_PATH {
            return Err(SofsError::NameTooLong);
        }
        let mut state = ResolverState {
            symlinks_followed: 0,
        };
        self.resolve_in_dir(Self::ROOT_INODE, e_path, &mut state)
    }

    fn resolve_in_dir(
        &mut self,
        start_dir: u32,
        path: &str,
        state: &mut ResolverState,
    ) -> Result<(u32, u32)> {
        let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
        if components.is_empty() {
            // the root shortcut: "/" names inode 0 under itself
            let (n_ent, _) = self.get_dir_entry_by_name(Self::ROOT_INODE, ".")?;
            return Ok((Self::ROOT_INODE, n_ent));
        }

        let mut dir = start_dir;
        let last = components.len() - 1;
        for (i, comp) in components.iter().enumerate() {
            let (n_ent, _) = self.get_dir_entry_by_name(dir, comp)?;
            let inode = self.read_inode(n_ent, InodeStatus::InUse)?;

            let (parent, node) = if inode.kind() == Some(InodeKind::Symlink) {
                if state.symlinks_followed >= SYMLINK_FOLLOW_MAX {
                    return Err(SofsError::SymlinkLoop);
                }
                state.symlinks_followed += 1;
                let target = self.read_symlink(n_ent)?;
                if let Some(absolute) = target.strip_prefix('/') {
                    self.resolve_in_dir(Self::ROOT_INODE, absolute, state)?
                } else {
                    self.resolve_in_dir(dir, &target, state)?
                }
            } else {
                (dir, n_ent)
            };

            if i == last {
                return Ok((parent, node));
            }
            dir = node;
        }
        Err(SofsError::Internal)
    }

    /// Target path stored in a symbolic link's first data cluster.
    pub fn read_symlink(&mut self, n_inode: u32) -> Result<String> {
        if !self.super_block().inode_in_range(n_inode) {
            return Err(SofsError::Invalid);
        }
        let inode = self.read_inode(n_inode, InodeStatus::InUse)?;
        if inode.kind() != Some(InodeKind::Symlink) {
            return Err(SofsError::Invalid);
        }
        let len = inode.size as usize;
        if len == 0 || len > MAX_PATH || len > BSLPC {
            return Err(SofsError::DirEntryInvalid);
        }
        let dc = self.read_file_cluster(n_inode, 0)?;
        String::from_utf8(dc.data()[..len].to_vec()).map_err(|_| SofsError::DirEntryInvalid)
    }

    /// Store the target path of a symbolic link, sizing the inode to it.
    pub fn write_symlink(&mut self, n_inode: u32, target: &str) -> Result<()> {
        if !self.super_block().inode_in_range(n_inode) {
            return Err(SofsError::Invalid);
        }
        if target.is_empty() || target.len() > MAX_PATH || target.len() > BSLPC {
            return Err(SofsError::NameTooLong);
        }
        let inode = self.read_inode(n_inode, InodeStatus::InUse)?;
        if inode.kind() != Some(InodeKind::Symlink) {
            return Err(SofsError::Invalid);
        }

        let mut dc = DataCluster::default();
        dc.data_mut()[..target.len()].copy_from_slice(target.as_bytes());
        self.write_file_cluster(n_inode, 0, &dc)?;

        let mut inode = self.read_inode(n_inode, InodeStatus::InUse)?;
        inode.size = target.len() as u32;
        self.write_inode(&inode, n_inode, InodeStatus::InUse)
    }
}

const _: () = assert!(DPC >= 12);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::small_volume;
    use crate::{InodeStatus, NULL_CLUSTER, NULL_INODE};

    const ROOT: u32 = SofsFileSystem::ROOT_INODE;

    fn set_perm(fs: &mut SofsFileSystem, n: u32, bits: u16) {
        let mut inode = fs.read_inode(n, InodeStatus::InUse).unwrap();
        inode.set_permissions(bits);
        fs.write_inode(&inode, n, InodeStatus::InUse).unwrap();
    }

    fn mknod(fs: &mut SofsFileSystem, parent: u32, name: &str, kind: InodeKind) -> u32 {
        let n = fs.alloc_inode(kind).unwrap();
        set_perm(fs, n, 0o755);
        fs.add_dir_entry(parent, name, n, AddOp::Add).unwrap();
        n
    }

    #[test]
    fn lookup_finds_dot_entries() {
        let mut fs = small_volume();
        let (n, idx) = fs.get_dir_entry_by_name(ROOT, ".").unwrap();
        assert_eq!((n, idx), (ROOT, 0));
        let (n, idx) = fs.get_dir_entry_by_name(ROOT, "..").unwrap();
        assert_eq!((n, idx), (ROOT, 1));
    }

    #[test]
    fn add_places_entries_in_the_first_clean_slot() {
        let mut fs = small_volume();
        let a = mknod(&mut fs, ROOT, "a", InodeKind::File);
        let (found, idx) = fs.get_dir_entry_by_name(ROOT, "a").unwrap();
        assert_eq!(found, a);
        assert_eq!(idx, 2);

        assert_eq!(fs.read_inode(a, InodeStatus::InUse).unwrap().ref_count, 1);
        assert!(matches!(
            fs.add_dir_entry(ROOT, "a", a, AddOp::Add),
            Err(SofsError::Exists)
        ));
    }

    #[test]
    fn child_directories_are_born_empty() {
        let mut fs = small_volume();
        let d = mknod(&mut fs, ROOT, "sub", InodeKind::Directory);

        let inode = fs.read_inode(d, InodeStatus::InUse).unwrap();
        assert_eq!(inode.ref_count, 2);
        assert_eq!(inode.size, (DPC * DirEntry::SIZE) as u32);
        assert_eq!(inode.clu_count, 1);
        // `.` and `..` wired up
        assert_eq!(fs.get_dir_entry_by_name(d, ".").unwrap().0, d);
        assert_eq!(fs.get_dir_entry_by_name(d, "..").unwrap().0, ROOT);
        // the parent gained a link from the child's `..`
        assert_eq!(
            fs.read_inode(ROOT, InodeStatus::InUse).unwrap().ref_count,
            3
        );
        fs.check_directory_emptiness(d).unwrap();
    }

    #[test]
    fn remove_marks_the_entry_deleted_and_keeps_hard_links() {
        let mut fs = small_volume();
        let d = mknod(&mut fs, ROOT, "sub", InodeKind::Directory);
        let f = mknod(&mut fs, d, "ex10.sh", InodeKind::File);
        fs.add_dir_entry(ROOT, "same", f, AddOp::Add).unwrap();
        assert_eq!(fs.read_inode(f, InodeStatus::InUse).unwrap().ref_count, 2);

        let (_, idx) = fs.get_dir_entry_by_name(d, "ex10.sh").unwrap();
        fs.remove_dir_entry(d, "ex10.sh", RemoveOp::Remove).unwrap();

        // entry state: deleted with the original first byte parked
        let dc = fs.read_file_cluster(d, idx / DPC as u32).unwrap();
        let entry = &dc.dir_entries()[(idx % DPC as u32) as usize];
        assert!(entry.is_deleted());
        assert_eq!(entry.deleted_marker(), b'e');
        assert_eq!(entry.n_inode(), f);

        // the other hard link keeps the file alive
        let inode = fs.read_inode(f, InodeStatus::InUse).unwrap();
        assert_eq!(inode.ref_count, 1);
        assert!(matches!(
            fs.get_dir_entry_by_name(d, "ex10.sh"),
            Err(SofsError::NotFound)
        ));
        assert_eq!(fs.get_dir_entry_by_name(ROOT, "same").unwrap().0, f);
    }

    #[test]
    fn removing_the_last_link_frees_the_file() {
        let mut fs = small_volume();
        let f = mknod(&mut fs, ROOT, "f", InodeKind::File);
        fs.write_file_cluster(f, 0, &DataCluster::default()).unwrap();
        let i_free = fs.super_block().i_free;

        fs.remove_dir_entry(ROOT, "f", RemoveOp::Remove).unwrap();
        assert_eq!(fs.super_block().i_free, i_free + 1);
        // dirty state: the cluster tree survives until the inode is cleaned
        let freed = fs.read_inode(f, InodeStatus::FreeDirty).unwrap();
        assert_ne!(freed.d[0], NULL_CLUSTER);
    }

    #[test]
    fn detach_wipes_the_slot_clean() {
        let mut fs = small_volume();
        let f = mknod(&mut fs, ROOT, "f", InodeKind::File);
        let (_, idx) = fs.get_dir_entry_by_name(ROOT, "f").unwrap();

        fs.remove_dir_entry(ROOT, "f", RemoveOp::Detach).unwrap();
        let dc = fs.read_file_cluster(ROOT, 0).unwrap();
        let entry = &dc.dir_entries()[idx as usize];
        assert!(entry.is_clean());
        assert_eq!(entry.n_inode(), NULL_INODE);
        // detach never deletes the target, even at refCount 0
        assert_eq!(fs.read_inode(f, InodeStatus::InUse).unwrap().ref_count, 0);
    }

    #[test]
    fn remove_requires_directory_emptiness() {
        let mut fs = small_volume();
        let d = mknod(&mut fs, ROOT, "sub", InodeKind::Directory);
        mknod(&mut fs, d, "inner", InodeKind::File);
        assert!(matches!(
            fs.remove_dir_entry(ROOT, "sub", RemoveOp::Remove),
            Err(SofsError::NotEmpty)
        ));
        fs.remove_dir_entry(d, "inner", RemoveOp::Remove).unwrap();
        fs.remove_dir_entry(ROOT, "sub", RemoveOp::Remove).unwrap();
    }

    #[test]
    fn rename_changes_only_the_name() {
        let mut fs = small_volume();
        let f = mknod(&mut fs, ROOT, "old", InodeKind::File);
        fs.rename_dir_entry(ROOT, "old", "new").unwrap();
        assert!(matches!(
            fs.get_dir_entry_by_name(ROOT, "old"),
            Err(SofsError::NotFound)
        ));
        assert_eq!(fs.get_dir_entry_by_name(ROOT, "new").unwrap().0, f);

        mknod(&mut fs, ROOT, "taken", InodeKind::File);
        assert!(matches!(
            fs.rename_dir_entry(ROOT, "new", "taken"),
            Err(SofsError::Exists)
        ));
    }

    #[test]
    fn paths_resolve_through_the_hierarchy() {
        let mut fs = small_volume();
        let new = mknod(&mut fs, ROOT, "new", InodeKind::Directory);
        let again = mknod(&mut fs, new, "newAgain", InodeKind::Directory);

        assert_eq!(fs.get_dir_entry_by_path("/").unwrap(), (ROOT, ROOT));
        assert_eq!(fs.get_dir_entry_by_path("/new").unwrap(), (ROOT, new));
        assert_eq!(
            fs.get_dir_entry_by_path("/new/newAgain").unwrap(),
            (new, again)
        );
        assert!(matches!(
            fs.get_dir_entry_by_path("new/newAgain"),
            Err(SofsError::RelativePath)
        ));
        assert!(matches!(
            fs.get_dir_entry_by_path("/missing"),
            Err(SofsError::NotFound)
        ));
    }

    #[test]
    fn symlinks_resolve_once_then_loop() {
        let mut fs = small_volume();
        let ex = mknod(&mut fs, ROOT, "ex", InodeKind::Directory);
        let target = mknod(&mut fs, ex, "ex5.sh", InodeKind::File);

        let link = mknod(&mut fs, ROOT, "lnk", InodeKind::Symlink);
        fs.write_symlink(link, "/ex/ex5.sh").unwrap();
        assert_eq!(fs.get_dir_entry_by_path("/lnk").unwrap().1, target);
        assert_eq!(fs.read_symlink(link).unwrap(), "/ex/ex5.sh");

        // relative target resolved from the link's directory
        let rel = mknod(&mut fs, ex, "rel", InodeKind::Symlink);
        fs.write_symlink(rel, "../ex/ex5.sh").unwrap();
        assert_eq!(fs.get_dir_entry_by_path("/ex/rel").unwrap().1, target);

        // a chain of two symbolic links exceeds the per-call budget
        let hop = mknod(&mut fs, ROOT, "hop", InodeKind::Symlink);
        fs.write_symlink(hop, "/lnk").unwrap();
        assert!(matches!(
            fs.get_dir_entry_by_path("/hop"),
            Err(SofsError::SymlinkLoop)
        ));
    }

    #[test]
    fn access_respects_the_permission_triples() {
        let mut fs = small_volume();
        let f = mknod(&mut fs, ROOT, "f", InodeKind::File);
        set_perm(&mut fs, f, 0o400);

        // credentials are uid 1000 and the inode owner matches
        fs.access_granted(f, Access::Read.into()).unwrap();
        assert!(matches!(
            fs.access_granted(f, Access::Write.into()),
            Err(SofsError::AccessDenied)
        ));
        assert!(matches!(
            fs.access_granted(f, Access::Exec | Access::Read),
            Err(SofsError::AccessDenied)
        ));
    }

    #[test]
    fn unwritable_directories_refuse_changes() {
        let mut fs = small_volume();
        let d = mknod(&mut fs, ROOT, "ro", InodeKind::Directory);
        mknod(&mut fs, d, "f", InodeKind::File);
        set_perm(&mut fs, d, 0o555);

        let spare = fs.alloc_inode(InodeKind::File).unwrap();
        assert!(matches!(
            fs.add_dir_entry(d, "g", spare, AddOp::Add),
            Err(SofsError::NotPermitted)
        ));
        assert!(matches!(
            fs.remove_dir_entry(d, "f", RemoveOp::Remove),
            Err(SofsError::NotPermitted)
        ));
    }

    #[test]
    fn detach_then_attach_moves_a_subsidiary_directory() {
        let mut fs = small_volume();
        let a = mknod(&mut fs, ROOT, "a", InodeKind::Directory);
        let b = mknod(&mut fs, ROOT, "b", InodeKind::Directory);
        let sub = mknod(&mut fs, a, "sub", InodeKind::Directory);
        assert_eq!(fs.read_inode(a, InodeStatus::InUse).unwrap().ref_count, 3);

        fs.remove_dir_entry(a, "sub", RemoveOp::Detach).unwrap();
        assert_eq!(fs.read_inode(a, InodeStatus::InUse).unwrap().ref_count, 2);
        assert_eq!(fs.read_inode(sub, InodeStatus::InUse).unwrap().ref_count, 0);

        fs.add_dir_entry(b, "sub", sub, AddOp::Attach).unwrap();
        assert_eq!(fs.read_inode(b, InodeStatus::InUse).unwrap().ref_count, 3);
        let sub_inode = fs.read_inode(sub, InodeStatus::InUse).unwrap();
        assert_eq!(sub_inode.ref_count, 2);
        // `..` re-pointed at the new base directory
        assert_eq!(fs.get_dir_entry_by_name(sub, "..").unwrap().0, b);
        assert_eq!(fs.get_dir_entry_by_path("/b/sub").unwrap(), (b, sub));
    }

    #[test]
    fn link_ceiling_is_enforced() {
        let mut fs = small_volume();
        let f = mknod(&mut fs, ROOT, "maxed", InodeKind::File);
        let mut inode = fs.read_inode(f, InodeStatus::InUse).unwrap();
        inode.ref_count = u16::MAX;
        fs.write_inode(&inode, f, InodeStatus::InUse).unwrap();

        assert!(matches!(
            fs.add_dir_entry(ROOT, "one-more", f, AddOp::Add),
            Err(SofsError::TooManyLinks)
        ));
    }

    #[test]
    fn names_are_validated_up_front() {
        let mut fs = small_volume();
        assert!(matches!(
            fs.get_dir_entry_by_name(ROOT, ""),
            Err(SofsError::Invalid)
        ));
        assert!(matches!(
            fs.get_dir_entry_by_name(ROOT, "a/b"),
            Err(SofsError::Invalid)
        ));
        let long = "x".repeat(crate::MAX_NAME + 1);
        assert!(matches!(
            fs.get_dir_entry_by_name(ROOT, &long),
            Err(SofsError::NameTooLong)
        ));
        let n = fs.alloc_inode(InodeKind::File).unwrap();
        assert!(matches!(
            fs.add_dir_entry(ROOT, &long, n, AddOp::Add),
            Err(SofsError::NameTooLong)
        ));
    }

    #[test]
    fn directory_grows_cluster_by_cluster() {
        let mut fs = small_volume();
        let d = mknod(&mut fs, ROOT, "big", InodeKind::Directory);

        // fill the remaining DPC - 2 slots of the first cluster
        for i in 0..DPC - 2 {
            mknod(&mut fs, d, &format!("f{i}"), InodeKind::File);
        }
        let inode = fs.read_inode(d, InodeStatus::InUse).unwrap();
        assert_eq!(inode.clu_count, 1);

        // one more entry spills into a fresh cluster
        mknod(&mut fs, d, "spill", InodeKind::File);
        let inode = fs.read_inode(d, InodeStatus::InUse).unwrap();
        assert_eq!(inode.clu_count, 2);
        assert_eq!(inode.size, 2 * (DPC * DirEntry::SIZE) as u32);
        let (_, idx) = fs.get_dir_entry_by_name(d, "spill").unwrap();
        assert_eq!(idx, DPC as u32);
    }
}
