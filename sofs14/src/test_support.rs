//! In-memory block device and formatting helpers shared by the unit tests.

use std::io;
use std::sync::Arc;

use spin::Mutex;

use crate::{BlockDevice, Credentials, SofsFileSystem, BLOCK_SIZE};

/// Vec-backed block device.
pub struct MemDisk {
    blocks: Mutex<Vec<u8>>,
}

impl MemDisk {
    pub fn new(n_blocks: usize) -> Self {
        Self {
            blocks: Mutex::new(vec![0; n_blocks * BLOCK_SIZE]),
        }
    }
}

impl BlockDevice for MemDisk {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> io::Result<()> {
        let blocks = self.blocks.lock();
        let start = block_id * BLOCK_SIZE;
        if start + BLOCK_SIZE > blocks.len() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "past device end"));
        }
        buf.copy_from_slice(&blocks[start..start + BLOCK_SIZE]);
        Ok(())
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) -> io::Result<()> {
        let mut blocks = self.blocks.lock();
        let start = block_id * BLOCK_SIZE;
        if start + BLOCK_SIZE > blocks.len() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "past device end"));
        }
        blocks[start..start + BLOCK_SIZE].copy_from_slice(buf);
        Ok(())
    }
}

/// Format a fresh in-memory volume and mount it.
///
/// The default geometry matches the reference test setup: a 200-block device
/// asked to carry 56 inodes.
pub fn mounted_volume(n_blocks: u32, n_inodes: u32) -> SofsFileSystem {
    let device: Arc<dyn BlockDevice> = Arc::new(MemDisk::new(n_blocks as usize));
    SofsFileSystem::format(&device, n_blocks, n_inodes, "SOFS14", true).unwrap();
    SofsFileSystem::mount(device, Credentials { uid: 1000, gid: 1000 }).unwrap()
}

pub fn small_volume() -> SofsFileSystem {
    mounted_volume(200, 56)
}
