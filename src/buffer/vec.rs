use std::ops::{Deref, DerefMut};

use log::{trace};

use super::{Buffer, Offset};

/**
 * A growable, append-only buffer of emitted code and data.
 *
 * Bytes are only ever appended, so the write cursor is simply the length.
 * Multi-byte values are written little-endian, which is the byte order of
 * every supported target.
 */
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssemblyBuffer {
    bytes: Vec<u8>,
}

impl AssemblyBuffer {
    pub fn new() -> Self {
        AssemblyBuffer {bytes: Vec::new()}
    }

    pub fn with_capacity(capacity: usize) -> Self {
        AssemblyBuffer {bytes: Vec::with_capacity(capacity)}
    }

    /** Returns the write cursor. */
    pub fn current_offset(&self) -> Offset {
        Offset(self.bytes.len())
    }

    /** Appends a single byte. */
    pub fn push(&mut self, byte: u8) {
        self.bytes.push(byte);
    }

    pub fn push_i8(&mut self, value: i8) { self.push(value as u8); }
    pub fn push_i16(&mut self, value: i16) { self.bytes.extend_from_slice(&value.to_le_bytes()); }
    pub fn push_i32(&mut self, value: i32) { self.bytes.extend_from_slice(&value.to_le_bytes()); }
    pub fn push_i64(&mut self, value: i64) { self.bytes.extend_from_slice(&value.to_le_bytes()); }
    pub fn push_u16(&mut self, value: u16) { self.bytes.extend_from_slice(&value.to_le_bytes()); }
    pub fn push_u32(&mut self, value: u32) { self.bytes.extend_from_slice(&value.to_le_bytes()); }
    pub fn push_u64(&mut self, value: u64) { self.bytes.extend_from_slice(&value.to_le_bytes()); }

    /** Appends `len` copies of `byte`. */
    pub fn fill(&mut self, len: usize, byte: u8) {
        self.bytes.resize(self.bytes.len() + len, byte);
    }

    /**
     * Appends `fill` until the write cursor is a multiple of `alignment`.
     * `alignment` must be non-zero; it need not be a power of two.
     */
    pub fn align(&mut self, alignment: usize, fill: u8) {
        assert!(alignment > 0, "alignment must be non-zero");
        let misalign = self.bytes.len() % alignment;
        if misalign != 0 {
            trace!("align {} to {} with {:#04x}", self.current_offset(), alignment, fill);
            self.fill(alignment - misalign, fill);
        }
    }

    /** Returns the emitted bytes. */
    pub fn as_bytes(&self) -> &[u8] { &self.bytes }

    /** Returns and forgets the emitted bytes. */
    pub fn into_bytes(self) -> Vec<u8> { self.bytes }
}

impl Deref for AssemblyBuffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &*self.bytes
    }
}

impl DerefMut for AssemblyBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.bytes
    }
}

impl Extend<u8> for AssemblyBuffer {
    fn extend<T: IntoIterator<Item=u8>>(&mut self, iter: T) {
        self.bytes.extend(iter)
    }
}

impl<'a> Extend<&'a u8> for AssemblyBuffer {
    fn extend<T: IntoIterator<Item=&'a u8>>(&mut self, iter: T) {
        self.bytes.extend(iter)
    }
}

impl Buffer for AssemblyBuffer {}

//-----------------------------------------------------------------------------
