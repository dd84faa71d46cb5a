use indexmap::{IndexMap};
use log::{debug, trace};

use super::{Relocation};
use super::super::buffer::{Buffer, Offset};
use super::super::label::{LabelRegistry, Reference, Target};
use super::super::error::{Error, Result};

/**
 * Addresses of symbols outside the code being assembled, such as native
 * functions or code committed by another assembler. Consulted for
 * [`Target::External`] references.
 */
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExternalSymbols {
    symbols: IndexMap<String, usize>,
}

impl ExternalSymbols {
    pub fn new() -> Self {
        ExternalSymbols {symbols: IndexMap::new()}
    }

    /** Sets the address of `name`, returning its previous address if any. */
    pub fn define(&mut self, name: impl Into<String>, address: usize) -> Option<usize> {
        self.symbols.insert(name.into(), address)
    }

    /** Forgets `name`, returning its address if any. */
    pub fn remove(&mut self, name: &str) -> Option<usize> {
        self.symbols.shift_remove(name)
    }

    pub fn lookup(&self, name: &str) -> Option<usize> {
        self.symbols.get(name).copied()
    }

    pub fn len(&self) -> usize { self.symbols.len() }

    pub fn is_empty(&self) -> bool { self.symbols.is_empty() }

    /** All symbols, in the order they were first defined. */
    pub fn iter(&self) -> impl Iterator<Item=(&str, usize)> + '_ {
        self.symbols.iter().map(|(name, &address)| (name.as_str(), address))
    }
}

impl<S: Into<String>> std::iter::FromIterator<(S, usize)> for ExternalSymbols {
    fn from_iter<I: IntoIterator<Item=(S, usize)>>(iter: I) -> Self {
        ExternalSymbols {symbols: iter.into_iter().map(|(name, address)| (name.into(), address)).collect()}
    }
}

//-----------------------------------------------------------------------------

/**
 * Returns the absolute address targeted by `reference`, if known, assuming
 * the buffer is loaded at `base`.
 */
pub fn target_address<R: Relocation>(
    reference: &Reference<R>,
    base: usize,
    labels: &LabelRegistry<R>,
    externals: &ExternalSymbols,
) -> Option<usize> {
    if let Some(offset) = reference.resolved() {
        return Some(base.wrapping_add(offset.0));
    }
    match &reference.target {
        Target::Static(name) => labels.place_of_static(name).map(|offset| base.wrapping_add(offset.0)),
        Target::Dynamic(id) => labels.place_of_dynamic(*id).map(|offset| base.wrapping_add(offset.0)),
        Target::External(name) => externals.lookup(name),
        Target::Address(address) => Some(*address),
        // Resolved when registered or when the label is declared, if ever.
        Target::Forward(_) | Target::Backward(_) => None,
    }
}

/**
 * Writes the value of `reference` into `buffer`, given the absolute address
 * of its target. `buffer` is loaded at `base`.
 */
pub fn patch<R: Relocation, B: Buffer>(
    buffer: &mut B,
    base: usize,
    reference: &Reference<R>,
    target: usize,
) -> Result<()> {
    let loc = &reference.loc;
    let size = loc.relocation.size();
    assert!(size <= 8, "relocation fields are at most 8 bytes");
    let field = loc.field();
    let mut bytes = [0u8; 8];
    bytes[..size].copy_from_slice(buffer.read_at(field, size)?);
    let value = loc.value(target, base);
    loc.relocation.write_value(&mut bytes[..size], value).map_err(|e| Error::ImpossibleRelocation {
        offset: loc.offset,
        target: reference.target.clone(),
        value: e.value,
        required_bits: e.required_bits,
        available_bits: e.available_bits,
        misaligned: e.misaligned,
    })?;
    trace!("patch {} -> {} = {:#x}", field, reference.target, value);
    buffer.patch_at(field, &bytes[..size])
}

/**
 * Resolves every relocation registered with `labels`, patching `buffer`,
 * which holds everything emitted so far and is loaded at `base`. Returns the
 * number of relocations patched.
 *
 * All targets are looked up before anything is patched, so an unresolved
 * label leaves `buffer` untouched. An [`Error::ImpossibleRelocation`] can
 * leave earlier relocations patched, so callers resolve into a copy.
 *
 * Resolving one relocation never moves a label, so a single pass suffices.
 */
pub fn resolve_all<R: Relocation, B: Buffer>(
    buffer: &mut B,
    base: usize,
    labels: &LabelRegistry<R>,
    externals: &ExternalSymbols,
) -> Result<usize> {
    let references = labels.references();
    let mut targets = Vec::with_capacity(references.len());
    for reference in references {
        match target_address(reference, base, labels, externals) {
            Some(target) => targets.push(target),
            None => return Err(unresolved(&reference.target, labels)),
        }
    }
    for (reference, &target) in references.iter().zip(&targets) {
        patch(buffer, base, reference, target)?;
    }
    debug!("resolved {} relocations at base {:#x}", references.len(), base);
    Ok(references.len())
}

/** Constructs an [`Error::UnresolvedLabel`] listing every reference to `target`. */
fn unresolved<R: Relocation>(target: &Target, labels: &LabelRegistry<R>) -> Error {
    let references = labels.references().iter()
        .filter(|r| r.target == *target && r.resolved().is_none())
        .map(|r| r.loc.offset)
        .collect::<Vec<Offset>>();
    Error::UnresolvedLabel {target: target.clone(), references}
}

//-----------------------------------------------------------------------------
