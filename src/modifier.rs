use log::{trace};

use super::buffer::{Buffer, MutableBuffer, Offset};
use super::error::{Error, Result};
use super::label::{LabelRegistry, Reference, Target};
use super::reloc::{Relocation, PatchLoc, ExternalSymbols};
use super::reloc::engine::{target_address, patch};

/**
 * Overwrites committed code in place, while it is temporarily writeable.
 * Obtained from [`Assembler::alter()`].
 *
 * A `Modifier` has a current position, which starts at offset 0 and
 * advances as bytes are written. Writes never extend the code.
 *
 * When the alteration finishes, every relocation registered with the
 * assembler whose field was overwritten is applied again, so rewriting an
 * instruction does not lose its displacement. Fields patched using
 * [`relocation()`] are left as they are.
 *
 * [`Assembler::alter()`]: crate::Assembler::alter
 * [`relocation()`]: Modifier::relocation
 */
pub struct Modifier<'a, R: Relocation> {
    code: &'a mut MutableBuffer,
    base: usize,
    labels: &'a LabelRegistry<R>,
    externals: &'a ExternalSymbols,
    position: usize,
    /** The smallest range containing every byte overwritten so far. */
    written: Option<(usize, usize)>,
    /** The fields patched by `relocation()`. */
    relocated: Vec<(usize, usize)>,
}

impl<'a, R: Relocation> Modifier<'a, R> {
    pub(crate) fn new(
        code: &'a mut MutableBuffer,
        base: usize,
        labels: &'a LabelRegistry<R>,
        externals: &'a ExternalSymbols,
    ) -> Self {
        Modifier {code, base, labels, externals, position: 0, written: None, relocated: Vec::new()}
    }

    /** The current position. */
    pub fn offset(&self) -> Offset { Offset(self.position) }

    /** The address at which the code is loaded. */
    pub fn base_address(&self) -> usize { self.base }

    /** The code, including any alterations so far. */
    pub fn code(&self) -> &[u8] { &self.code[..] }

    /** Moves the current position to `offset`. */
    pub fn goto(&mut self, offset: Offset) { self.position = offset.0; }

    /**
     * Fails with [`Error::AlterationOverrun`] if the current position is
     * beyond `limit`. Use this after overwriting an instruction to check that
     * the new one is no longer than the old.
     */
    pub fn check(&self, limit: Offset) -> Result<()> {
        if self.position > limit.0 {
            return Err(Error::AlterationOverrun {position: self.offset(), limit});
        }
        Ok(())
    }

    /** Overwrites `bytes` at the current position, and advances past them. */
    pub fn extend_from_slice(&mut self, bytes: &[u8]) -> Result<()> {
        let start = self.position;
        self.code.patch_at(Offset(start), bytes)?;
        self.position += bytes.len();
        if !bytes.is_empty() {
            let end = self.position;
            self.written = Some(match self.written {
                None => (start, end),
                Some((s, e)) => (std::cmp::min(s, start), std::cmp::max(e, end)),
            });
        }
        Ok(())
    }

    pub fn push(&mut self, byte: u8) -> Result<()> { self.extend_from_slice(&[byte]) }
    pub fn push_i8(&mut self, value: i8) -> Result<()> { self.extend_from_slice(&value.to_le_bytes()) }
    pub fn push_i16(&mut self, value: i16) -> Result<()> { self.extend_from_slice(&value.to_le_bytes()) }
    pub fn push_i32(&mut self, value: i32) -> Result<()> { self.extend_from_slice(&value.to_le_bytes()) }
    pub fn push_i64(&mut self, value: i64) -> Result<()> { self.extend_from_slice(&value.to_le_bytes()) }
    pub fn push_u16(&mut self, value: u16) -> Result<()> { self.extend_from_slice(&value.to_le_bytes()) }
    pub fn push_u32(&mut self, value: u32) -> Result<()> { self.extend_from_slice(&value.to_le_bytes()) }
    pub fn push_u64(&mut self, value: u64) -> Result<()> { self.extend_from_slice(&value.to_le_bytes()) }

    /**
     * Patches a field that ends before the current position, with a value
     * computed immediately from the labels declared so far. The arguments
     * mean the same as for [`Assembler::relocation()`]. Nothing is recorded
     * in the assembler, so later commits are unaffected.
     *
     * [`Assembler::relocation()`]: crate::Assembler::relocation
     */
    pub fn relocation(&mut self, target: Target, field_offset: u8, ref_offset: u8, addend: isize, relocation: R) -> Result<()> {
        let loc = PatchLoc::new(self.offset(), addend, field_offset, ref_offset, relocation)?;
        let reference = self.labels.bind(target, loc);
        self.apply(&reference)?;
        let field = reference.loc.field().0;
        self.relocated.push((field, field + reference.loc.relocation.size()));
        Ok(())
    }

    /** Patches the `relocation.size()` bytes before the current position. */
    pub fn reference_field(&mut self, target: Target, relocation: R) -> Result<()> {
        let field_offset = relocation.size() as u8;
        let ref_offset = relocation.ref_offset();
        self.relocation(target, field_offset, ref_offset, 0, relocation)
    }

    fn apply(&mut self, reference: &Reference<R>) -> Result<()> {
        let address = target_address(reference, self.base, self.labels, self.externals)
            .ok_or_else(|| Error::UnresolvedLabel {
                target: reference.target.clone(),
                references: vec![reference.loc.offset],
            })?;
        patch(&mut *self.code, self.base, reference, address)
    }

    /**
     * Applies again every registered relocation whose field overlaps the
     * overwritten bytes, skipping those registered after the code was
     * committed. Returns the number applied.
     */
    pub(crate) fn finish(mut self) -> Result<usize> {
        let (start, end) = match self.written {
            Some(range) => range,
            None => return Ok(0),
        };
        let labels = self.labels;
        let mut count = 0;
        for reference in labels.references() {
            if reference.loc.offset.0 > self.code.len() { continue; }
            let field = reference.loc.field().0;
            let field_end = field + reference.loc.relocation.size();
            if field_end <= start || end <= field { continue; }
            if self.relocated.iter().any(|&(s, e)| field < e && s < field_end) { continue; }
            trace!("reapplying relocation at {}", reference.loc.offset);
            self.apply(reference)?;
            count += 1;
        }
        Ok(count)
    }
}

//-----------------------------------------------------------------------------
