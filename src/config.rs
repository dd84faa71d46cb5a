use super::reloc::{Relocation};

/** Tunable parameters of an [`Assembler`](crate::Assembler). */
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Config {
    /** Committed code is mapped in multiples of this. A power of two. */
    pub page_size: usize,
    /** The number of bytes to reserve for emitted code up front. */
    pub initial_capacity: usize,
}

impl Config {
    /** The default `Config` for code using relocation policy `R`. */
    pub fn for_relocation<R: Relocation>() -> Self {
        Config {page_size: R::page_size(), ..Config::default()}
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {page_size: 4096, initial_capacity: 0}
    }
}

//-----------------------------------------------------------------------------
