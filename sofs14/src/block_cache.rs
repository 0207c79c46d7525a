//! # 块缓存层
//!
//! 块设备读写速度一般慢于内存读写速度，因此我们在内存中开辟缓冲区，
//! 把即将操作的块复制到内存中，提高对块设备的操作效率。
//! 同时，块缓存层也会尝试返回已缓存的块。
//!
//! 缓存管理器不再是全局静态量，而是由挂载的卷持有，随卸载一同释放。

use std::mem;
use std::sync::Arc;

use spin::Mutex;

use crate::error::{Result, SofsError};
use crate::layout::DataCluster;
use crate::BlockDevice;
use crate::{BLOCKS_PER_CLUSTER, BLOCK_SIZE};

/// Backing storage of one cached block, aligned so that typed views of the
/// on-disk records stay well-formed.
#[repr(align(8))]
struct BlockData([u8; BLOCK_SIZE]);

/// 内存中的块缓存
pub struct BlockCache {
    /// 缓存的数据
    data: BlockData,
    /// 对应的块ID
    block_id: usize,
    /// 底层块设备的引用
    block_device: Arc<dyn BlockDevice>,
    /// 是否为脏块
    modified: bool,
}

impl BlockCache {
    pub fn new(block_id: usize, block_device: Arc<dyn BlockDevice>) -> Result<Self> {
        let mut data = BlockData([0; BLOCK_SIZE]);
        block_device.read_block(block_id, &mut data.0)?;

        Ok(Self {
            data,
            block_id,
            block_device,
            modified: false,
        })
    }

    pub fn sync(&mut self) -> Result<()> {
        if self.modified {
            self.modified = false;
            self.block_device.write_block(self.block_id, &self.data.0)?;
        }
        Ok(())
    }

    pub fn get<T: Sized>(&self, offset: usize) -> &T {
        let type_size = mem::size_of::<T>();
        assert!(type_size + offset <= BLOCK_SIZE);
        let addr = self.offset(offset).cast();
        unsafe { &*addr }
    }

    pub fn get_mut<T: Sized>(&mut self, offset: usize) -> &mut T {
        let type_size = mem::size_of::<T>();
        assert!(type_size + offset <= BLOCK_SIZE);
        self.modified = true;
        let addr = self.offset(offset).cast_mut().cast();
        unsafe { &mut *addr }
    }

    #[inline]
    pub fn map<T: Sized, V>(&self, offset: usize, f: impl FnOnce(&T) -> V) -> V {
        f(self.get(offset))
    }

    #[inline]
    pub fn map_mut<T: Sized, V>(&mut self, offset: usize, f: impl FnOnce(&mut T) -> V) -> V {
        f(self.get_mut(offset))
    }

    #[inline]
    pub fn bytes(&self) -> &[u8; BLOCK_SIZE] {
        &self.data.0
    }

    #[inline]
    pub fn bytes_mut(&mut self) -> &mut [u8; BLOCK_SIZE] {
        self.modified = true;
        &mut self.data.0
    }
}

impl BlockCache {
    #[inline]
    fn offset(&self, count: usize) -> *const u8 {
        &self.data.0[count]
    }
}

impl Drop for BlockCache {
    fn drop(&mut self) {
        if let Err(e) = self.sync() {
            log::error!("write-back of block {} failed: {e}", self.block_id);
        }
    }
}

/// 块缓存管理，缓存、调度块缓存
pub struct BlockCacheManager {
    queue: Vec<(usize, Arc<Mutex<BlockCache>>)>,
}

impl BlockCacheManager {
    /// 块缓存个数的上限
    const CAPACITY: usize = 16;

    pub const fn new() -> Self {
        Self { queue: Vec::new() }
    }

    // 块缓存调度策略：踢走闲置块
    pub fn get(
        &mut self,
        block_id: usize,
        block_device: &Arc<dyn BlockDevice>,
    ) -> Result<Arc<Mutex<BlockCache>>> {
        // 尝试从缓冲区中读取块
        if let Some(cache) = self
            .queue
            .iter()
            .find_map(|(id, cache)| (block_id == *id).then_some(cache))
        {
            return Ok(Arc::clone(cache));
        };

        // 触及上限，写回一个块
        if self.queue.len() == Self::CAPACITY {
            let index = self
                .queue
                .iter()
                .position(|(_, cache)| Arc::strong_count(cache) == 1) // 没有其它引用的才能写回
                .ok_or(SofsError::Internal)?;
            let (_, cache) = self.queue.remove(index);
            cache.lock().sync()?;
        }

        // 缓存新块
        let block_cache = Arc::new(Mutex::new(BlockCache::new(block_id, block_device.clone())?));
        self.queue.push((block_id, block_cache.clone()));

        Ok(block_cache)
    }

    pub fn sync_all(&mut self) -> Result<()> {
        for (_, cache) in &self.queue {
            cache.lock().sync()?;
        }
        Ok(())
    }

    /// Read the consecutive blocks of one cluster into a buffer.
    pub fn read_cluster(
        &mut self,
        first_block: usize,
        block_device: &Arc<dyn BlockDevice>,
        dc: &mut DataCluster,
    ) -> Result<()> {
        let bytes = dc.as_bytes_mut();
        for i in 0..BLOCKS_PER_CLUSTER {
            let cache = self.get(first_block + i, block_device)?;
            let guard = cache.lock();
            bytes[i * BLOCK_SIZE..(i + 1) * BLOCK_SIZE].copy_from_slice(guard.bytes());
        }
        Ok(())
    }

    /// Write a buffer over the consecutive blocks of one cluster.
    pub fn write_cluster(
        &mut self,
        first_block: usize,
        block_device: &Arc<dyn BlockDevice>,
        dc: &DataCluster,
    ) -> Result<()> {
        let bytes = dc.as_bytes();
        for i in 0..BLOCKS_PER_CLUSTER {
            let cache = self.get(first_block + i, block_device)?;
            let mut guard = cache.lock();
            guard
                .bytes_mut()
                .copy_from_slice(&bytes[i * BLOCK_SIZE..(i + 1) * BLOCK_SIZE]);
        }
        Ok(())
    }
}
