use std::ops::{Deref, DerefMut};
use memmap::{Mmap, MmapMut};

use super::{Buffer, Offset};

/** The two protection states of a mapping. */
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Protection {
    ReadWrite,
    ReadExecute,
}

impl std::fmt::Display for Protection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protection::ReadWrite => write!(f, "read/write"),
            Protection::ReadExecute => write!(f, "read/execute"),
        }
    }
}

//-----------------------------------------------------------------------------

/**
 * An anonymous mapping that is readable and writeable but not executable.
 * Derefs to the first `len()` bytes of the mapping.
 *
 * A zero-sized `MutableBuffer` does not map anything.
 */
#[derive(Debug, Default)]
pub struct MutableBuffer {
    /// The number of bytes in use.
    length: usize,
    memory: Option<MmapMut>,
}

impl MutableBuffer {
    /** Maps `size` bytes of zeroed memory. The length starts at 0. */
    pub fn new(size: usize) -> std::io::Result<Self> {
        let memory = if size == 0 { None } else { Some(MmapMut::map_anon(size)?) };
        Ok(MutableBuffer {length: 0, memory})
    }

    /** The size of the mapping. */
    pub fn size(&self) -> usize {
        self.memory.as_ref().map_or(0, |m| m.len())
    }

    /** Sets the number of bytes in use, which must not exceed `size()`. */
    pub fn set_len(&mut self, length: usize) {
        assert!(length <= self.size(), "length exceeds the mapping");
        self.length = length;
    }

    /** The address of the first byte of the mapping, or 0 if nothing is mapped. */
    pub fn base_address(&self) -> usize {
        self.memory.as_ref().map_or(0, |m| m.as_ptr() as usize)
    }

    /**
     * Makes the mapping readable and executable, and no longer writeable.
     * This consumes `self`; if the operating system refuses, the mapping is
     * gone.
     */
    pub fn make_exec(self) -> std::io::Result<ExecutableBuffer> {
        let memory = match self.memory {
            Some(memory) => Some(memory.make_exec()?),
            None => None,
        };
        Ok(ExecutableBuffer {length: self.length, memory})
    }
}

impl Deref for MutableBuffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        match &self.memory {
            Some(memory) => &memory[..self.length],
            None => &[],
        }
    }
}

impl DerefMut for MutableBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.memory {
            Some(memory) => &mut memory[..self.length],
            None => &mut [],
        }
    }
}

impl Buffer for MutableBuffer {}

//-----------------------------------------------------------------------------

/**
 * An anonymous mapping that is readable and executable but not writeable.
 * Derefs to the first `len()` bytes of the mapping.
 */
#[derive(Debug, Default)]
pub struct ExecutableBuffer {
    /// The number of bytes in use.
    length: usize,
    memory: Option<Mmap>,
}

impl ExecutableBuffer {
    /** The size of the mapping. */
    pub fn size(&self) -> usize {
        self.memory.as_ref().map_or(0, |m| m.len())
    }

    /** The address of the first byte of the mapping, or 0 if nothing is mapped. */
    pub fn base_address(&self) -> usize {
        self.memory.as_ref().map_or(0, |m| m.as_ptr() as usize)
    }

    /**
     * Returns a pointer to the code at `offset`, or `None` if `offset` is
     * beyond the end of the code. `len()` itself is allowed, giving a
     * pointer one past the end. The pointer is valid as long as `self` is
     * alive and not made writeable again.
     */
    pub fn ptr(&self, offset: Offset) -> Option<*const u8> {
        self.get(offset.0..).map(|code| code.as_ptr())
    }

    /**
     * Makes the mapping readable and writeable, and no longer executable.
     * This consumes `self`; if the operating system refuses, the mapping is
     * gone.
     */
    pub fn make_mut(self) -> std::io::Result<MutableBuffer> {
        let memory = match self.memory {
            Some(memory) => Some(memory.make_mut()?),
            None => None,
        };
        Ok(MutableBuffer {length: self.length, memory})
    }
}

impl Deref for ExecutableBuffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        match &self.memory {
            Some(memory) => &memory[..self.length],
            None => &[],
        }
    }
}

//-----------------------------------------------------------------------------

#[cfg(test)]
pub mod tests {
    use super::*;

    #[test]
    fn api() {
        let mut buffer = MutableBuffer::new(0x1000).expect("Couldn't allocate");
        buffer.set_len(0x100);
        super::super::tests::api(buffer)
    }

    #[test]
    fn protection_round_trip() {
        let mut buffer = MutableBuffer::new(0x1000).expect("Couldn't allocate");
        assert_eq!(buffer.size(), 0x1000);
        assert_eq!(buffer.len(), 0);
        buffer.set_len(3);
        buffer.copy_from_slice(&[0x90, 0x90, 0xC3]);
        let base = buffer.base_address();
        let executable = buffer.make_exec().expect("Couldn't change permissions");
        assert_eq!(executable.base_address(), base);
        assert_eq!(&*executable, &[0x90, 0x90, 0xC3]);
        assert_eq!(executable.ptr(Offset(2)).map(|p| p as usize), Some(base + 2));
        assert_eq!(executable.ptr(Offset(3)).map(|p| p as usize), Some(base + 3));
        assert_eq!(executable.ptr(Offset(4)), None);
        let mut buffer = executable.make_mut().expect("Couldn't change permissions");
        buffer[0] = 0xCC;
        assert_eq!(&*buffer, &[0xCC, 0x90, 0xC3]);
    }

    #[test]
    fn empty() {
        let buffer = MutableBuffer::new(0).expect("Nothing to allocate");
        assert_eq!(buffer.size(), 0);
        assert_eq!(buffer.base_address(), 0);
        let executable = buffer.make_exec().expect("Nothing to protect");
        assert!(executable.is_empty());
        assert_eq!(executable.size(), 0);
        assert!(executable.ptr(Offset(0)).is_some());
        assert_eq!(executable.ptr(Offset(1)), None);
    }

    #[test]
    #[should_panic]
    fn set_len_beyond_size() {
        let mut buffer = MutableBuffer::new(0x1000).expect("Couldn't allocate");
        buffer.set_len(0x1001);
    }
}
