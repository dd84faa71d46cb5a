use super::super::reloc::{Relocation, RelocationKind, RelocationSize, Signedness, ImpossibleRelocation};

/**
 * An x86_64 relocation: a little-endian field of 1, 2, 4 or 8 bytes at the
 * end of an instruction. Relative values are measured from the end of the
 * instruction, so the field and the reference point are both given relative
 * to the offset just after it.
 */
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct X64Relocation {
    pub size: RelocationSize,
    pub kind: RelocationKind,
    pub signedness: Signedness,
}

impl X64Relocation {
    pub fn new(size: RelocationSize, kind: RelocationKind, signedness: Signedness) -> Self {
        X64Relocation {size, kind, signedness}
    }

    /** The displacement of a short jump or `jcc`. */
    pub fn rel8() -> Self {
        Self::new(RelocationSize::Byte, RelocationKind::Relative, Signedness::Signed)
    }

    /** The displacement of a near jump, call, `jcc`, or RIP-relative operand. */
    pub fn rel32() -> Self {
        Self::new(RelocationSize::DWord, RelocationKind::Relative, Signedness::Signed)
    }

    /**
     * A 32-bit absolute address, as used in `disp32` and sign-extended
     * `imm32` operands. The target must lie within 2GB of address 0.
     */
    pub fn abs32() -> Self {
        Self::new(RelocationSize::DWord, RelocationKind::Absolute, Signedness::Signed)
    }

    /**
     * A 32-bit offset from the start of the code, for operands addressed
     * relative to a register that holds the base address, e.g. entries of a
     * [`LitPool`](crate::LitPool).
     */
    pub fn pool32() -> Self {
        Self::new(RelocationSize::DWord, RelocationKind::LiteralPoolRef, Signedness::Signed)
    }

    /** The 64-bit absolute address of `mov r64, imm64`, or of a data word. */
    pub fn abs64() -> Self {
        Self::new(RelocationSize::QWord, RelocationKind::Absolute, Signedness::Signed)
    }
}

impl Relocation for X64Relocation {
    fn from_size(size: RelocationSize) -> Self {
        Self::new(size, RelocationKind::Relative, Signedness::Signed)
    }

    fn size(&self) -> usize { self.size as usize }

    fn write_value(&self, buf: &mut [u8], value: isize) -> Result<(), ImpossibleRelocation> {
        self.size.write(buf, value, self.signedness)
    }

    fn read_value(&self, buf: &[u8]) -> isize {
        self.size.read(buf, self.signedness)
    }

    fn kind(&self) -> RelocationKind { self.kind }

    fn page_size() -> usize { 4096 }
}

/** An assembler for x86_64 code. */
pub type Assembler = crate::Assembler<X64Relocation>;

//-----------------------------------------------------------------------------
