use core::any::Any;

/// Trait for block devices which reads and writes data in the unit of blocks.
///
/// Transfers are synchronous and assumed to succeed.
pub trait BlockDevice: Send + Sync + Any {
    /// Read data from block device to buffer
    fn read_block(&self, block_id: usize, buf: &mut [u8]);
    /// Write data from buffer to block
    fn write_block(&self, block_id: usize, buf: &[u8]);
}
