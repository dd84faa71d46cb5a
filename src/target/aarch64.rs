use byteorder::{ByteOrder, LittleEndian};

use super::super::reloc::{
    Relocation, RelocationKind, RelocationSize, Signedness, ImpossibleRelocation,
    fits_signed_bitfield,
};

/**
 * An aarch64 relocation. Except for `Plain`, the field is a whole 32-bit
 * instruction, of which only the immediate bits are modified. Relative
 * values are measured from the start of the instruction.
 */
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[allow(clippy::upper_case_acronyms)]
pub enum Aarch64Relocation {
    /** `b`, `bl`: 26-bit word offset. */
    B,
    /** `b.cond`, `cbz`, `cbnz`, `ldr` (literal), `prfm`: 19-bit word offset. */
    BCOND,
    /** `adr`: 21-bit byte offset, split. */
    ADR,
    /** `adrp`: 21-bit page offset, split. */
    ADRP,
    /** `tbz`, `tbnz`: 14-bit word offset. */
    TBZ,
    /** A little-endian data word. */
    Plain(RelocationSize),
}

impl Aarch64Relocation {
    /** The bits of the instruction that are not part of the immediate. */
    pub fn op_mask(self) -> u32 {
        match self {
            Self::B => 0xFC00_0000,
            Self::BCOND => 0xFF00_001F,
            Self::ADR | Self::ADRP => 0x9F00_001F,
            Self::TBZ => 0xFFF8_001F,
            Self::Plain(_) => 0,
        }
    }

    /**
     * The number of bits in the byte offsets that can be encoded, including
     * the low bits that must be zero.
     */
    pub fn bits(self) -> u32 {
        match self {
            Self::B => 28,
            Self::BCOND | Self::ADR => 21,
            Self::ADRP => 33,
            Self::TBZ => 16,
            Self::Plain(size) => size.bits(),
        }
    }

    /** The number of low bits of the byte offset that must be zero. */
    fn scale(self) -> u32 {
        match self {
            Self::B | Self::BCOND | Self::TBZ => 2,
            Self::ADRP => 12,
            Self::ADR | Self::Plain(_) => 0,
        }
    }

    /** Computes the immediate bits of an instruction. */
    fn encode(self, value: isize) -> Result<u32, ImpossibleRelocation> {
        let bits = self.bits();
        let scale = self.scale();
        let v = value as i64;
        if v & ((1 << scale) - 1) != 0 {
            return Err(ImpossibleRelocation::misaligned(value, bits));
        }
        if !fits_signed_bitfield(v, bits) {
            return Err(ImpossibleRelocation::out_of_range(value, Signedness::Signed, bits));
        }
        let imm = (v >> scale) as u32;
        Ok(match self {
            Self::B => imm & 0x3FF_FFFF,
            Self::BCOND => (imm & 0x7FFFF) << 5,
            Self::ADR | Self::ADRP => ((imm >> 2) & 0x7FFFF) << 5 | (imm & 3) << 29,
            Self::TBZ => (imm & 0x3FFF) << 5,
            Self::Plain(_) => unreachable!(),
        })
    }

    /** Extracts the immediate from an instruction and sign-extends it. */
    fn decode(self, instruction: u32) -> isize {
        let imm = match self {
            Self::B => instruction & 0x3FF_FFFF,
            Self::BCOND => (instruction >> 5) & 0x7FFFF,
            Self::ADR | Self::ADRP => ((instruction >> 5) & 0x7FFFF) << 2 | (instruction >> 29) & 3,
            Self::TBZ => (instruction >> 5) & 0x3FFF,
            Self::Plain(_) => unreachable!(),
        };
        let unscaled = u64::from(imm) << self.scale();
        let sign = 1u64 << (self.bits() - 1);
        ((unscaled ^ sign).wrapping_sub(sign)) as i64 as isize
    }
}

impl Relocation for Aarch64Relocation {
    fn from_size(size: RelocationSize) -> Self {
        Self::Plain(size)
    }

    fn size(&self) -> usize {
        match self {
            Self::Plain(size) => *size as usize,
            _ => 4,
        }
    }

    fn write_value(&self, buf: &mut [u8], value: isize) -> Result<(), ImpossibleRelocation> {
        if let Self::Plain(size) = self {
            return size.write(buf, value, Signedness::Signed);
        }
        let template = LittleEndian::read_u32(buf) & self.op_mask();
        let packed = self.encode(value)?;
        LittleEndian::write_u32(buf, template | packed);
        Ok(())
    }

    fn read_value(&self, buf: &[u8]) -> isize {
        match self {
            Self::Plain(size) => size.read(buf, Signedness::Signed),
            _ => self.decode(LittleEndian::read_u32(buf)),
        }
    }

    fn kind(&self) -> RelocationKind {
        match self {
            Self::ADRP => RelocationKind::PageRelative,
            _ => RelocationKind::Relative,
        }
    }

    fn ref_offset(&self) -> u8 {
        match self {
            Self::Plain(_) => 0,
            _ => 4,
        }
    }

    fn page_size() -> usize { 4096 }
}

/** An assembler for aarch64 code. */
pub type Assembler = crate::Assembler<Aarch64Relocation>;

//-----------------------------------------------------------------------------
