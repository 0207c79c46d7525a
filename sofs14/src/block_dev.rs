//! # 块设备接口层
//!
//! [`BlockDevice`] 是对读写块设备的抽象；实现了此特质的类型称为**块设备驱动**。
//! `sofs14` 只通过该特质访问底层存储。

use std::io;

/// 块设备驱动特质
///
/// Blocks are addressed by their physical number counted from the start of
/// the device; buffers always cover one whole block.
pub trait BlockDevice: Send + Sync {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> io::Result<()>;
    fn write_block(&self, block_id: usize, buf: &[u8]) -> io::Result<()>;
}
