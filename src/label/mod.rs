use std::fmt;

mod registry;
pub use registry::{Reference, LabelRegistry};

/**
 * An opaque handle to a label whose identity is chosen at runtime, e.g. one
 * per basic block of generated code. Allocated by
 * [`LabelRegistry::new_dynamic_label()`].
 */
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DynamicLabel(usize);

impl DynamicLabel {
    pub(crate) fn new(id: usize) -> Self { DynamicLabel(id) }

    /** The index of this label within its registry. */
    pub fn get_id(self) -> usize { self.0 }
}

impl fmt::Display for DynamicLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "=>{}", self.0)
    }
}

//-----------------------------------------------------------------------------

/** Identifies a label, e.g. in an error message. */
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Label {
    /** Named, and declared at most once. */
    Static(String),
    /** Named, and declared any number of times. */
    Local(String),
    Dynamic(DynamicLabel),
    /** Defined outside the assembler, by an external symbol table. */
    External(String),
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Static(name) => write!(f, "->{}", name),
            Label::Local(name) => write!(f, "{}", name),
            Label::Dynamic(id) => write!(f, "{}", id),
            Label::External(name) => write!(f, "extern {}", name),
        }
    }
}

/** What a relocation refers to. */
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    Static(String),
    /** The next declaration of a local label. */
    Forward(String),
    /** The most recent declaration of a local label. */
    Backward(String),
    Dynamic(DynamicLabel),
    External(String),
    /** A fixed absolute address. */
    Address(usize),
}

impl Target {
    /** The label that `self` refers to, if any. */
    pub fn label(&self) -> Option<Label> {
        match self {
            Target::Static(name) => Some(Label::Static(name.clone())),
            Target::Forward(name) | Target::Backward(name) => Some(Label::Local(name.clone())),
            Target::Dynamic(id) => Some(Label::Dynamic(*id)),
            Target::External(name) => Some(Label::External(name.clone())),
            Target::Address(_) => None,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Static(name) => write!(f, "target ->{}", name),
            Target::Forward(name) => write!(f, "target >{}", name),
            Target::Backward(name) => write!(f, "target <{}", name),
            Target::Dynamic(id) => write!(f, "target {}", id),
            Target::External(name) => write!(f, "target extern {}", name),
            Target::Address(address) => write!(f, "target {:#x}", address),
        }
    }
}

//-----------------------------------------------------------------------------

#[cfg(test)]
pub mod tests {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(Label::Static("start".into()).to_string(), "->start");
        assert_eq!(Label::Local("loop".into()).to_string(), "loop");
        assert_eq!(Label::External("puts".into()).to_string(), "extern puts");
        assert_eq!(Target::Backward("loop".into()).to_string(), "target <loop");
        assert_eq!(Target::Dynamic(DynamicLabel::new(7)).to_string(), "target =>7");
        assert_eq!(Target::Address(0x1000).to_string(), "target 0x1000");
    }

    #[test]
    fn label() {
        assert_eq!(Target::Forward("l".into()).label(), Some(Label::Local("l".into())));
        assert_eq!(Target::Backward("l".into()).label(), Some(Label::Local("l".into())));
        assert_eq!(Target::Address(0).label(), None);
    }
}
