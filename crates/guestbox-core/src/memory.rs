//! Bounds-checked access to guest linear memory.
//!
//! Guest pointers cross the boundary as `(address, length)` pairs of 32-bit
//! integers. [`read_memory`] and [`write_memory`] validate such a pair
//! against the memory size observed at the moment of the access; the size is
//! never cached because guests may grow their memory between calls.

use std::ops::Range;

use guestbox_common::{HostFunctionError, RuntimeError};

/// A transient `(address, length)` view into guest memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    /// First byte of the region.
    pub address: u32,
    /// Number of bytes in the region.
    pub length: u32,
}

impl MemoryRegion {
    /// Create a region.
    pub fn new(address: u32, length: u32) -> Self {
        Self { address, length }
    }

    /// Decode a region from guest wire values.
    ///
    /// Guest pointers are unsigned; an `i32` pointer is reinterpreted bit for
    /// bit. A negative length is rejected.
    #[allow(clippy::cast_sign_loss)]
    pub fn from_wire(ptr: i32, len: i32) -> Result<Self, HostFunctionError> {
        if len < 0 {
            return Err(HostFunctionError::InvalidArgument {
                reason: format!("negative length {len}"),
            });
        }
        Ok(Self::new(ptr as u32, len as u32))
    }

    /// One past the last byte, computed without overflow.
    pub fn end(&self) -> u64 {
        u64::from(self.address) + u64::from(self.length)
    }

    /// Resolve the region against a memory of `memory_size` bytes.
    fn range(&self, memory_size: usize) -> Result<Range<usize>, RuntimeError> {
        let out_of_bounds = || RuntimeError::MemoryOutOfBounds {
            address: u64::from(self.address),
            length: u64::from(self.length),
            memory_size,
        };

        let end = usize::try_from(self.end()).map_err(|_| out_of_bounds())?;
        if end > memory_size {
            return Err(out_of_bounds());
        }
        Ok(self.address as usize..end)
    }
}

/// Copy `region` out of `data` into a fresh buffer.
///
/// # Errors
///
/// Returns [`RuntimeError::MemoryOutOfBounds`] if the region does not lie
/// entirely inside `data`.
pub fn read_memory(data: &[u8], region: MemoryRegion) -> Result<Vec<u8>, RuntimeError> {
    let range = region.range(data.len())?;
    let mut buffer = vec![0u8; range.len()];

    let copied = copy_bytes(&mut buffer, &data[range]);
    if copied != buffer.len() {
        return Err(RuntimeError::ShortCopy {
            expected: buffer.len(),
            actual: copied,
        });
    }

    Ok(buffer)
}

/// Copy `bytes` into `data` starting at `address`.
///
/// Returns the number of bytes written. Nothing is written unless the whole
/// destination range lies inside `data`.
///
/// # Errors
///
/// Returns [`RuntimeError::MemoryOutOfBounds`] if the destination range
/// exceeds `data`.
pub fn write_memory(data: &mut [u8], address: u32, bytes: &[u8]) -> Result<usize, RuntimeError> {
    let length = u32::try_from(bytes.len()).map_err(|_| RuntimeError::MemoryOutOfBounds {
        address: u64::from(address),
        length: bytes.len() as u64,
        memory_size: data.len(),
    })?;
    let range = MemoryRegion::new(address, length).range(data.len())?;

    let copied = copy_bytes(&mut data[range], bytes);
    if copied != bytes.len() {
        return Err(RuntimeError::ShortCopy {
            expected: bytes.len(),
            actual: copied,
        });
    }

    Ok(copied)
}

fn copy_bytes(dst: &mut [u8], src: &[u8]) -> usize {
    let n = dst.len().min(src.len());
    dst[..n].copy_from_slice(&src[..n]);
    n
}
