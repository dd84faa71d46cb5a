use log::{trace};

use super::{Assembler};
use super::error::{Result};
use super::label::{DynamicLabel, Target};
use super::reloc::{Relocation, RelocationSize};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Entry {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    /** A relocation of the given size, made with [`Relocation::from_size()`]. */
    Target(Target, RelocationSize),
    /** Padding to a multiple of the given alignment. */
    Align(usize),
}

/**
 * Constants that are too large for an instruction's immediate field, to be
 * emitted out of line and loaded by PC-relative (or base-relative)
 * instructions.
 *
 * Each `push_*()` method returns the offset of the new entry from the start
 * of the pool. Refer to the entry using the pool's label, with the offset as
 * the addend. Every entry is aligned to its size, provided the pool is
 * emitted using [`emit()`].
 *
 * [`emit()`]: LitPool::emit
 */
#[derive(Debug, Clone)]
pub struct LitPool {
    label: DynamicLabel,
    /** The size of the pool so far. */
    size: usize,
    /** The largest alignment of any entry. */
    alignment: usize,
    entries: Vec<Entry>,
}

impl LitPool {
    /** Constructs an empty pool, which will be emitted at `label`. */
    pub fn new(label: DynamicLabel) -> Self {
        LitPool {label, size: 0, alignment: 1, entries: Vec::new()}
    }

    pub fn label(&self) -> DynamicLabel { self.label }

    /** The number of bytes the pool will occupy. */
    pub fn len(&self) -> usize { self.size }

    pub fn is_empty(&self) -> bool { self.size == 0 }

    /** The alignment required of the start of the pool. */
    pub fn alignment(&self) -> usize { self.alignment }

    /** Pads the pool to a multiple of `alignment`, which must be a power of two. */
    pub fn align(&mut self, alignment: usize) {
        assert!(alignment.is_power_of_two(), "alignment must be a power of two");
        self.alignment = std::cmp::max(self.alignment, alignment);
        let misalign = self.size & (alignment - 1);
        if misalign != 0 {
            self.entries.push(Entry::Align(alignment));
            self.size += alignment - misalign;
        }
    }

    /** Appends `entry`, which occupies `size` bytes, aligned to `size`. */
    fn push(&mut self, entry: Entry, size: RelocationSize) -> usize {
        self.align(size as usize);
        let offset = self.size;
        self.entries.push(entry);
        self.size += size as usize;
        offset
    }

    pub fn push_u8(&mut self, value: u8) -> usize {
        self.push(Entry::U8(value), RelocationSize::Byte)
    }

    pub fn push_u16(&mut self, value: u16) -> usize {
        self.push(Entry::U16(value), RelocationSize::Word)
    }

    pub fn push_u32(&mut self, value: u32) -> usize {
        self.push(Entry::U32(value), RelocationSize::DWord)
    }

    pub fn push_u64(&mut self, value: u64) -> usize {
        self.push(Entry::U64(value), RelocationSize::QWord)
    }

    /**
     * Appends a reference to `target`, encoded with the plain relocation of
     * size `size` of the assembler's architecture. For a relative relocation
     * the value is measured from the end of the entry.
     */
    pub fn push_target(&mut self, target: Target, size: RelocationSize) -> usize {
        self.push(Entry::Target(target, size), size)
    }

    /**
     * Emits the pool into `a`: aligns `a`, declares the pool's label, and
     * appends the entries. If the label is unknown to `a` or already
     * declared, fails without emitting anything.
     */
    pub fn emit<R: Relocation>(self, a: &mut Assembler<R>) -> Result<()> {
        a.labels().check_undeclared(self.label)?;
        a.align(self.alignment, 0);
        a.declare_dynamic(self.label)?;
        trace!("{}: literal pool {} of {:#x} bytes", a.offset(), self.label, self.size);
        for entry in self.entries {
            match entry {
                Entry::U8(value) => a.push(value),
                Entry::U16(value) => a.push_u16(value),
                Entry::U32(value) => a.push_u32(value),
                Entry::U64(value) => a.push_u64(value),
                Entry::Target(target, size) => a.reference(target, R::from_size(size))?,
                Entry::Align(alignment) => a.align(alignment, 0),
            }
        }
        Ok(())
    }
}

//-----------------------------------------------------------------------------
