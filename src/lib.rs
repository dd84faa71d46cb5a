//! A runtime for dynamic assemblers.
//!
//! An [`Assembler`] accumulates machine code emitted by some front end,
//! together with labels and the relocations that refer to them. Committing
//! it resolves the relocations and publishes the code as executable memory,
//! wrapped in an [`Executor`].

pub mod buffer;
pub use buffer::{Offset};

pub mod error;
pub use error::{Error, Result};

pub mod label;
pub use label::{DynamicLabel, Label, Target};

pub mod reloc;
pub use reloc::{Relocation, RelocationKind, RelocationSize, Signedness, ExternalSymbols};

pub mod target;

pub mod cache;

pub mod memory;

pub mod config;
pub use config::{Config};

pub mod litpool;
pub use litpool::{LitPool};

pub mod modifier;
pub use modifier::{Modifier};

mod assembler;
pub use assembler::{Assembler, Executor};
