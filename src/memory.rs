use log::{debug};

use super::buffer::{MutableBuffer, ExecutableBuffer, Protection};
use super::cache;
use super::error::{Error, Result};

/**
 * Maps memory for code, and flips it between writeable and executable.
 * Memory is never writeable and executable at the same time.
 */
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MemoryManager {
    page_size: usize,
}

impl MemoryManager {
    /** Fails with [`Error::InvalidPageSize`] unless `page_size` is a power of two. */
    pub fn new(page_size: usize) -> Result<Self> {
        if !page_size.is_power_of_two() {
            return Err(Error::InvalidPageSize(page_size));
        }
        Ok(MemoryManager {page_size})
    }

    pub fn page_size(&self) -> usize { self.page_size }

    /** Rounds `size` up to a whole number of pages. */
    pub fn round_up(&self, size: usize) -> usize {
        (size + self.page_size - 1) & !(self.page_size - 1)
    }

    /**
     * Maps a zeroed, readable and writeable region of at least `size` bytes.
     * Its length is set to `size`.
     */
    pub fn allocate_writable(&self, size: usize) -> Result<MutableBuffer> {
        let mapped = self.round_up(size);
        let mut buffer = MutableBuffer::new(mapped).map_err(|source| Error::MemoryProtection {
            size: mapped,
            protection: Protection::ReadWrite,
            source,
        })?;
        buffer.set_len(size);
        debug!("mapped {:#x} bytes at {:#x}", mapped, buffer.base_address());
        Ok(buffer)
    }

    /**
     * Makes `buffer` readable and executable, and no longer writeable, and
     * synchronizes the instruction cache with it.
     */
    pub fn make_executable(&self, buffer: MutableBuffer) -> Result<ExecutableBuffer> {
        cache::synchronize_icache(&buffer);
        let size = buffer.size();
        let buffer = buffer.make_exec().map_err(|source| Error::MemoryProtection {
            size,
            protection: Protection::ReadExecute,
            source,
        })?;
        debug!("protected {:#x} bytes at {:#x} as {}", size, buffer.base_address(), Protection::ReadExecute);
        Ok(buffer)
    }

    /**
     * Makes `buffer` readable and writeable, and no longer executable. Code
     * must not be running in `buffer`.
     */
    pub fn make_writable(&self, buffer: ExecutableBuffer) -> Result<MutableBuffer> {
        let size = buffer.size();
        let buffer = buffer.make_mut().map_err(|source| Error::MemoryProtection {
            size,
            protection: Protection::ReadWrite,
            source,
        })?;
        debug!("protected {:#x} bytes at {:#x} as {}", size, buffer.base_address(), Protection::ReadWrite);
        Ok(buffer)
    }

    /** The address at which the code in `buffer` is loaded. */
    pub fn base_address(&self, buffer: &ExecutableBuffer) -> usize {
        buffer.base_address()
    }
}

impl Default for MemoryManager {
    fn default() -> Self { MemoryManager {page_size: 4096} }
}

//-----------------------------------------------------------------------------
