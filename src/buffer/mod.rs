use std::ops::{DerefMut};

use super::error::{Error, Result};

mod vec;
pub use vec::{AssemblyBuffer};

mod mmap;
pub use mmap::{Protection, MutableBuffer, ExecutableBuffer};

/**
 * A byte position within an assembly buffer. The wrapped `usize` is the
 * number of bytes from the start of the buffer.
 *
 * Offsets only grow while code is emitted, so two `Offset`s taken from the
 * same [`Assembler`] can be compared.
 *
 * [`Assembler`]: crate::Assembler
 */
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Offset(pub usize);

impl Offset {
    /** The number of bytes from the start of the buffer. */
    pub fn get(self) -> usize { self.0 }
}

impl std::fmt::Display for Offset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

//-----------------------------------------------------------------------------

/**
 * Memory that already holds emitted code, and that can be patched in place.
 *
 * Both the [`AssemblyBuffer`] that code is emitted into and the
 * [`MutableBuffer`] that a snapshot of it is copied into during a commit
 * implement this, so relocations can be resolved into either.
 */
pub trait Buffer: DerefMut<Target=[u8]> {
    /** Returns the `len` bytes starting at `offset`. */
    fn read_at(&self, offset: Offset, len: usize) -> Result<&[u8]> {
        let buffer_len = self.len();
        match offset.0.checked_add(len) {
            Some(end) if end <= buffer_len => Ok(&self[offset.0..end]),
            _ => Err(Error::PatchOutOfBounds {offset, len, buffer_len}),
        }
    }

    /**
     * Overwrites previously emitted bytes starting at `offset` with `bytes`.
     * Fails if any of them lies beyond the end of the buffer. Nothing is
     * written in that case.
     */
    fn patch_at(&mut self, offset: Offset, bytes: &[u8]) -> Result<()> {
        let len = bytes.len();
        let buffer_len = self.len();
        match offset.0.checked_add(len) {
            Some(end) if end <= buffer_len => {
                self[offset.0..end].copy_from_slice(bytes);
                Ok(())
            },
            _ => Err(Error::PatchOutOfBounds {offset, len, buffer_len}),
        }
    }
}

//-----------------------------------------------------------------------------
