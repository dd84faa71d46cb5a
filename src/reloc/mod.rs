//! Relocations: deferred patches of code whose value depends on the address
//! of a label.
//!
//! A [`Relocation`] describes *how* a value is encoded into the bytes of an
//! instruction or data directive. Each target architecture supplies its own
//! type (see [`crate::target`]). A [`PatchLoc`] describes *where* the value
//! goes, and how it is computed from the target address. The [`engine`]
//! module resolves all the [`PatchLoc`]s of an assembler at once.

use std::fmt::{Debug};

use byteorder::{ByteOrder, LittleEndian};

use super::buffer::{Offset};
use super::error::{Error};

pub mod engine;
pub use engine::{ExternalSymbols, resolve_all};

//-----------------------------------------------------------------------------

/** What the value written into a relocation's field means. */
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RelocationKind {
    /**
     * The displacement from the relocation's reference point to the target.
     * For internal targets this does not depend on the load address.
     */
    Relative,
    /**
     * The distance in bytes from the 4KB page containing the reference point
     * to the page containing the target. Used by aarch64 `adrp`.
     */
    PageRelative,
    /** The absolute address of the target. */
    Absolute,
    /**
     * The offset of the target from the start of the buffer. Used for
     * references into literal pools addressed via a base register; it never
     * depends on the load address.
     */
    LiteralPoolRef,
}

/** Whether a field is interpreted as a two's complement number. */
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Signedness {
    Signed,
    Unsigned,
}

/**
 * The width of a plain relocation field. Used directly as a [`Relocation`]
 * for data directives, and converted into an architecture's relocation type
 * with [`Relocation::from_size()`], e.g. for literal pool entries.
 */
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RelocationSize {
    Byte = 1,
    Word = 2,
    DWord = 4,
    QWord = 8,
}

/**
 * The reason a value could not be written into a relocation's field. The
 * relocation engine adds the location and target to make an [`Error`].
 *
 * [`Error`]: crate::Error
 */
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ImpossibleRelocation {
    pub value: isize,
    /** The number of bits needed to represent `value` in this field. */
    pub required_bits: u32,
    /** The number of bits the field holds. */
    pub available_bits: u32,
    /** `value` is not a multiple of the field's scale. */
    pub misaligned: bool,
}

impl ImpossibleRelocation {
    /** `value` is too large (or too negative) for an `available_bits` field. */
    pub fn out_of_range(value: isize, signedness: Signedness, available_bits: u32) -> Self {
        let required_bits = match signedness {
            Signedness::Signed => signed_bits(value as i64),
            Signedness::Unsigned if value < 0 => 64,
            Signedness::Unsigned => unsigned_bits(value as u64),
        };
        ImpossibleRelocation {value, required_bits, available_bits, misaligned: false}
    }

    /** `value` has low bits set that the field cannot hold. */
    pub fn misaligned(value: isize, available_bits: u32) -> Self {
        ImpossibleRelocation {value, required_bits: available_bits, available_bits, misaligned: true}
    }
}

/** The number of bits needed to hold `value` as a two's complement number. */
pub fn signed_bits(value: i64) -> u32 {
    let magnitude = if value < 0 { !value } else { value };
    65 - magnitude.leading_zeros()
}

/** The number of bits needed to hold `value` as an unsigned number. */
pub fn unsigned_bits(value: u64) -> u32 {
    64 - value.leading_zeros()
}

/** Tests whether `value` fits in a signed bitfield of width `bits`. */
pub fn fits_signed_bitfield(value: i64, bits: u32) -> bool {
    bits >= 64 || {
        let half = 1i64 << (bits - 1);
        -half <= value && value < half
    }
}

//-----------------------------------------------------------------------------

/**
 * Describes how a relocation value is encoded into the bytes of a field.
 * Each target architecture implements this for its relocation type.
 *
 * Implementations must be pure: the result of [`write_value()`] depends only
 * on `self`, the value, and the bits of the field not owned by the
 * relocation.
 *
 * [`write_value()`]: Relocation::write_value
 */
pub trait Relocation: Clone + Debug {
    /** Constructs a plain relocation of the given size, for data directives and literal pools. */
    fn from_size(size: RelocationSize) -> Self;

    /** The number of bytes of the field that this relocation modifies. At most 8. */
    fn size(&self) -> usize;

    /**
     * Writes `value` into `buf`, which is `self.size()` bytes long. Bits of
     * `buf` that are not part of the relocation are preserved. Fails, leaving
     * `buf` unmodified, if `value` cannot be represented.
     */
    fn write_value(&self, buf: &mut [u8], value: isize) -> Result<(), ImpossibleRelocation>;

    /** Reads back a value written by `write_value()`. */
    fn read_value(&self, buf: &[u8]) -> isize;

    fn kind(&self) -> RelocationKind;

    /**
     * The number of bytes from the reference point of a relative value to
     * the end of the field, for a relocation whose field ends its
     * instruction. 0 if values are measured from the end of the instruction.
     */
    fn ref_offset(&self) -> u8 { 0 }

    /** The default page size for code on this architecture. */
    fn page_size() -> usize;
}

impl RelocationSize {
    pub fn bits(self) -> u32 {
        (self as u32) * 8
    }

    /** Writes `value` little-endian into `buf`, checking it fits. */
    pub fn write(self, buf: &mut [u8], value: isize, signedness: Signedness) -> Result<(), ImpossibleRelocation> {
        let impossible = |_| ImpossibleRelocation::out_of_range(value, signedness, self.bits());
        match (self, signedness) {
            (RelocationSize::Byte, Signedness::Signed) => buf[0] = i8::try_from(value).map_err(impossible)? as u8,
            (RelocationSize::Byte, Signedness::Unsigned) => buf[0] = u8::try_from(value).map_err(impossible)?,
            (RelocationSize::Word, Signedness::Signed) => LittleEndian::write_i16(buf, i16::try_from(value).map_err(impossible)?),
            (RelocationSize::Word, Signedness::Unsigned) => LittleEndian::write_u16(buf, u16::try_from(value).map_err(impossible)?),
            (RelocationSize::DWord, Signedness::Signed) => LittleEndian::write_i32(buf, i32::try_from(value).map_err(impossible)?),
            (RelocationSize::DWord, Signedness::Unsigned) => LittleEndian::write_u32(buf, u32::try_from(value).map_err(impossible)?),
            // Every value fits in 64 bits.
            (RelocationSize::QWord, _) => LittleEndian::write_u64(buf, value as i64 as u64),
        }
        Ok(())
    }

    /** Reads a little-endian value from `buf`. */
    pub fn read(self, buf: &[u8], signedness: Signedness) -> isize {
        match (self, signedness) {
            (RelocationSize::Byte, Signedness::Signed) => buf[0] as i8 as isize,
            (RelocationSize::Byte, Signedness::Unsigned) => buf[0] as isize,
            (RelocationSize::Word, Signedness::Signed) => LittleEndian::read_i16(buf) as isize,
            (RelocationSize::Word, Signedness::Unsigned) => LittleEndian::read_u16(buf) as isize,
            (RelocationSize::DWord, Signedness::Signed) => LittleEndian::read_i32(buf) as isize,
            (RelocationSize::DWord, Signedness::Unsigned) => LittleEndian::read_u32(buf) as isize,
            (RelocationSize::QWord, _) => LittleEndian::read_i64(buf) as isize,
        }
    }
}

/** A plain, signed, relative field. */
impl Relocation for RelocationSize {
    fn from_size(size: RelocationSize) -> Self { size }

    fn size(&self) -> usize { *self as usize }

    fn write_value(&self, buf: &mut [u8], value: isize) -> Result<(), ImpossibleRelocation> {
        self.write(buf, value, Signedness::Signed)
    }

    fn read_value(&self, buf: &[u8]) -> isize {
        self.read(buf, Signedness::Signed)
    }

    fn kind(&self) -> RelocationKind { RelocationKind::Relative }

    fn page_size() -> usize { 4096 }
}

//-----------------------------------------------------------------------------

/** The low bits of an address that [`RelocationKind::PageRelative`] ignores. */
const PAGE_MASK: usize = 0xFFF;

/**
 * The location of a relocation within a buffer, and how to compute its value.
 *
 * A relocation is registered just after the instruction (or directive) that
 * contains its field has been emitted. Its position is therefore described
 * relative to the offset at that moment:
 *  - `field_offset` - the number of bytes back to the start of the field.
 *  - `ref_offset` - the number of bytes back to the point from which a
 *    [`Relative`] value is measured. This is the instruction-length
 *    adjustment, e.g. 0 for x86_64, where displacements are measured from
 *    the end of the instruction.
 *
 * [`Relative`]: RelocationKind::Relative
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchLoc<R: Relocation> {
    /** The offset at which the relocation was registered. */
    pub offset: Offset,
    /** Added to the target address before encoding. */
    pub addend: isize,
    pub field_offset: u8,
    pub ref_offset: u8,
    pub relocation: R,
}

impl<R: Relocation> PatchLoc<R> {
    /**
     * Fails with [`Error::RelocationBeforeStart`] if the field or the
     * reference point would be before offset 0.
     */
    pub fn new(offset: Offset, addend: isize, field_offset: u8, ref_offset: u8, relocation: R) -> Result<Self, Error> {
        if usize::from(field_offset) > offset.0 || usize::from(ref_offset) > offset.0 {
            return Err(Error::RelocationBeforeStart {offset, field_offset, ref_offset});
        }
        Ok(PatchLoc {offset, addend, field_offset, ref_offset, relocation})
    }

    /** The offset of the first byte of the field. */
    pub fn field(&self) -> Offset {
        Offset(self.offset.0 - usize::from(self.field_offset))
    }

    /** The offset from which a relative value is measured. */
    pub fn source(&self) -> Offset {
        Offset(self.offset.0 - usize::from(self.ref_offset))
    }

    /**
     * Computes the value to encode, given the absolute address of the target
     * and the address at which the buffer is (or will be) loaded.
     */
    pub fn value(&self, target: usize, base: usize) -> isize {
        let target = target.wrapping_add(self.addend as usize);
        (match self.relocation.kind() {
            RelocationKind::Relative => target.wrapping_sub(base.wrapping_add(self.source().0)),
            RelocationKind::PageRelative => {
                let source = base.wrapping_add(self.source().0);
                (target & !PAGE_MASK).wrapping_sub(source & !PAGE_MASK)
            },
            RelocationKind::Absolute => target,
            RelocationKind::LiteralPoolRef => target.wrapping_sub(base),
        }) as isize
    }
}

//-----------------------------------------------------------------------------
