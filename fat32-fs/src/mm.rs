//! Copying between kernel buffers and caller address spaces

use crate::error::FsResult;

/// Byte copies between a kernel buffer and an address of the calling
/// task, provided by the virtual-memory subsystem.
///
/// Both fail with [`FsError::BadAddress`](crate::FsError::BadAddress) when
/// any byte of the target range is unmapped or inaccessible.
pub trait UserSpace {
    /// copy `src` to address `dst`
    fn copy_out(&self, dst: usize, src: &[u8]) -> FsResult<()>;
    /// fill `dst` from address `src`
    fn copy_in(&self, dst: &mut [u8], src: usize) -> FsResult<()>;
}

/// Addresses that are plain kernel pointers, for in-kernel callers.
pub struct KernelSpace;

impl UserSpace for KernelSpace {
    fn copy_out(&self, dst: usize, src: &[u8]) -> FsResult<()> {
        if dst == 0 {
            return Err(crate::FsError::BadAddress);
        }
        unsafe { core::ptr::copy_nonoverlapping(src.as_ptr(), dst as *mut u8, src.len()) };
        Ok(())
    }

    fn copy_in(&self, dst: &mut [u8], src: usize) -> FsResult<()> {
        if src == 0 {
            return Err(crate::FsError::BadAddress);
        }
        unsafe { core::ptr::copy_nonoverlapping(src as *const u8, dst.as_mut_ptr(), dst.len()) };
        Ok(())
    }
}
