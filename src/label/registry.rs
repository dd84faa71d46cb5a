use std::collections::{HashMap};

use indexmap::{IndexMap};
use indexmap::map::{Entry};
use log::{trace};

use super::{DynamicLabel, Label, Target};
use super::super::buffer::{Offset};
use super::super::error::{Error, Result};
use super::super::reloc::{Relocation, PatchLoc};

/** A relocation together with the label it refers to. */
#[derive(Debug, Clone)]
pub struct Reference<R: Relocation> {
    pub loc: PatchLoc<R>,
    pub target: Target,
    /**
     * For references to local labels, the declaration that was chosen, if
     * any. Other targets are looked up when resolved.
     */
    resolved: Option<Offset>,
}

impl<R: Relocation> Reference<R> {
    pub fn resolved(&self) -> Option<Offset> { self.resolved }
}

//-----------------------------------------------------------------------------

/**
 * Records where labels are declared, and every relocation that refers to
 * one. Declaring a label does not patch anything; see [`resolve_all()`].
 *
 * [`resolve_all()`]: crate::reloc::resolve_all
 */
#[derive(Debug, Clone)]
pub struct LabelRegistry<R: Relocation> {
    /** Declared static labels, in order of declaration. */
    statics: IndexMap<String, Offset>,
    /** The most recent declaration of each local label. */
    locals: HashMap<String, Offset>,
    /** Indices into `references` of forward references awaiting each local label. */
    forwards: HashMap<String, Vec<usize>>,
    /** Indexed by `DynamicLabel`. */
    dynamics: Vec<Option<Offset>>,
    references: Vec<Reference<R>>,
}

impl<R: Relocation> LabelRegistry<R> {
    pub fn new() -> Self {
        LabelRegistry {
            statics: IndexMap::new(),
            locals: HashMap::new(),
            forwards: HashMap::new(),
            dynamics: Vec::new(),
            references: Vec::new(),
        }
    }

    /** Allocates a fresh, undeclared dynamic label. */
    pub fn new_dynamic_label(&mut self) -> DynamicLabel {
        let id = DynamicLabel::new(self.dynamics.len());
        self.dynamics.push(None);
        id
    }

    /** The number of dynamic labels allocated so far. */
    pub fn num_dynamic_labels(&self) -> usize { self.dynamics.len() }

    /**
     * Declares that static label `name` is at `offset`. Fails, changing
     * nothing, if it has already been declared.
     */
    pub fn declare_static(&mut self, name: impl Into<String>, offset: Offset) -> Result<()> {
        match self.statics.entry(name.into()) {
            Entry::Occupied(entry) => Err(Error::DuplicateLabel(Label::Static(entry.key().clone()))),
            Entry::Vacant(entry) => {
                trace!("{}: ->{}", offset, entry.key());
                entry.insert(offset);
                Ok(())
            },
        }
    }

    /** Fails unless `id` was allocated by `self` and has not been declared. */
    pub fn check_undeclared(&self, id: DynamicLabel) -> Result<()> {
        match self.dynamics.get(id.get_id()) {
            None => Err(Error::UnknownLabel(Label::Dynamic(id))),
            Some(Some(_)) => Err(Error::DuplicateLabel(Label::Dynamic(id))),
            Some(None) => Ok(()),
        }
    }

    /**
     * Declares that `id` is at `offset`. Fails, changing nothing, if it has
     * already been declared, or if `id` was not allocated by `self`.
     */
    pub fn declare_dynamic(&mut self, id: DynamicLabel, offset: Offset) -> Result<()> {
        self.check_undeclared(id)?;
        trace!("{}: {}", offset, id);
        self.dynamics[id.get_id()] = Some(offset);
        Ok(())
    }

    /**
     * Declares that local label `name` is at `offset`. This resolves all
     * pending [`Target::Forward`] references to `name`, and becomes the
     * target of later [`Target::Backward`] references.
     */
    pub fn declare_local(&mut self, name: impl Into<String>, offset: Offset) {
        let name = name.into();
        trace!("{}: {}", offset, name);
        if let Some(pending) = self.forwards.remove(&name) {
            for index in pending {
                self.references[index].resolved = Some(offset);
            }
        }
        self.locals.insert(name, offset);
    }

    pub fn place_of_static(&self, name: &str) -> Option<Offset> {
        self.statics.get(name).copied()
    }

    pub fn place_of_dynamic(&self, id: DynamicLabel) -> Option<Offset> {
        self.dynamics.get(id.get_id()).copied().flatten()
    }

    /**
     * Returns the offset of `label`, if declared. For a local label, this is
     * its most recent declaration. External labels have no offset.
     */
    pub fn place_of(&self, label: &Label) -> Option<Offset> {
        match label {
            Label::Static(name) => self.place_of_static(name),
            Label::Local(name) => self.locals.get(name).copied(),
            Label::Dynamic(id) => self.place_of_dynamic(*id),
            Label::External(_) => None,
        }
    }

    /**
     * Pairs `loc` with `target` without recording it. A [`Target::Backward`]
     * reference is bound to the most recent declaration. A
     * [`Target::Forward`] reference is left unbound.
     */
    pub fn bind(&self, target: Target, loc: PatchLoc<R>) -> Reference<R> {
        let resolved = match &target {
            Target::Backward(name) => self.locals.get(name).copied(),
            _ => None,
        };
        Reference {loc, target, resolved}
    }

    /**
     * Records a relocation that refers to `target`. The target need not be
     * declared yet. A [`Target::Backward`] reference is bound immediately.
     */
    pub fn register_relocation(&mut self, target: Target, loc: PatchLoc<R>) {
        trace!("{}: reference to {}", loc.offset, target);
        if let Target::Forward(name) = &target {
            self.forwards.entry(name.clone()).or_default().push(self.references.len());
        }
        let reference = self.bind(target, loc);
        self.references.push(reference);
    }

    /** All relocations registered so far, in order of registration. */
    pub fn references(&self) -> &[Reference<R>] { &self.references }

    /** The declared static labels, in order of declaration. */
    pub fn statics(&self) -> impl Iterator<Item=(&str, Offset)> + '_ {
        self.statics.iter().map(|(name, &offset)| (name.as_str(), offset))
    }

    /** The declared dynamic labels, in order of allocation. */
    pub fn dynamics(&self) -> impl Iterator<Item=(DynamicLabel, Offset)> + '_ {
        self.dynamics.iter().enumerate().filter_map(|(id, &place)| {
            place.map(|offset| (DynamicLabel::new(id), offset))
        })
    }
}

impl<R: Relocation> Default for LabelRegistry<R> {
    fn default() -> Self { LabelRegistry::new() }
}

//-----------------------------------------------------------------------------
