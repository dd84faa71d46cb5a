use std::fmt;

use super::buffer::{Offset, Protection};
use super::label::{Label, Target};

/** Everything that can go wrong while assembling, linking or committing. */
#[derive(Debug)]
pub enum Error {
    /** A static or dynamic label was declared more than once. */
    DuplicateLabel(Label),
    /** A dynamic label that was not allocated by this assembler. */
    UnknownLabel(Label),
    /**
     * A relocation targets a label that was never declared and is not an
     * external symbol. `references` lists the offsets of all relocations
     * that target it.
     */
    UnresolvedLabel {
        target: Target,
        references: Vec<Offset>,
    },
    /**
     * The value computed for the relocation registered at `offset` does not
     * fit the field reserved for it.
     */
    ImpossibleRelocation {
        offset: Offset,
        target: Target,
        value: isize,
        required_bits: u32,
        available_bits: u32,
        misaligned: bool,
    },
    /** The operating system refused to map or reprotect memory. */
    MemoryProtection {
        size: usize,
        protection: Protection,
        source: std::io::Error,
    },
    /** A patch was attempted beyond the end of a buffer. */
    PatchOutOfBounds {
        offset: Offset,
        len: usize,
        buffer_len: usize,
    },
    /**
     * A relocation registered at `offset` claims that its field starts
     * `field_offset` bytes back, or that its value is measured from
     * `ref_offset` bytes back, and one of those is before the start of the
     * buffer.
     */
    RelocationBeforeStart {
        offset: Offset,
        field_offset: u8,
        ref_offset: u8,
    },
    /** A page size that is not a non-zero power of two. */
    InvalidPageSize(usize),
    /** Committed code cannot be altered while clones of its `Executor` exist. */
    CodeInUse,
    /** An alteration wrote past `limit`. */
    AlterationOverrun {
        position: Offset,
        limit: Offset,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::DuplicateLabel(label) => write!(f, "Duplicate label defined: '{}'", label),
            Error::UnknownLabel(label) => write!(f, "Unknown label: '{}'", label),
            Error::UnresolvedLabel {target, references} => {
                write!(f, "Unresolved {}, referenced at", target)?;
                for (i, offset) in references.iter().enumerate() {
                    write!(f, "{} {}", if i == 0 { "" } else { "," }, offset)?;
                }
                Ok(())
            },
            Error::ImpossibleRelocation {offset, target, value, required_bits, available_bits, misaligned} => {
                write!(f, "Impossible relocation at {} to {}: value {:#x} ", offset, target, value)?;
                if *misaligned {
                    write!(f, "is misaligned for a {}-bit field", available_bits)
                } else {
                    write!(f, "needs {} bits but only {} are available", required_bits, available_bits)
                }
            },
            Error::MemoryProtection {size, protection, source} => {
                write!(f, "Could not map {:#x} bytes as {}: {}", size, protection, source)
            },
            Error::PatchOutOfBounds {offset, len, buffer_len} => {
                write!(f, "Patch of {} bytes at {} exceeds buffer length {:#x}", len, offset, buffer_len)
            },
            Error::RelocationBeforeStart {offset, field_offset, ref_offset} => {
                write!(f, "Relocation at {} reaches back {} bytes to its field and {} bytes to its reference point, before the start of the buffer", offset, field_offset, ref_offset)
            },
            Error::InvalidPageSize(page_size) => {
                write!(f, "Page size {:#x} is not a power of two", page_size)
            },
            Error::CodeInUse => write!(f, "Committed code is shared, and cannot be altered"),
            Error::AlterationOverrun {position, limit} => {
                write!(f, "Alteration reached {}, beyond its limit {}", position, limit)
            },
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::MemoryProtection {source, ..} => Some(source),
            _ => None,
        }
    }
}

//-----------------------------------------------------------------------------

#[cfg(test)]
pub mod tests {
    use super::*;
    use super::super::label::{DynamicLabel};

    #[test]
    fn display() {
        assert_eq!(
            Error::DuplicateLabel(Label::Static("start".into())).to_string(),
            "Duplicate label defined: '->start'",
        );
        assert_eq!(
            Error::UnknownLabel(Label::Dynamic(DynamicLabel::new(3))).to_string(),
            "Unknown label: '=>3'",
        );
        assert_eq!(
            Error::UnresolvedLabel {
                target: Target::Forward("loop".into()),
                references: vec![Offset(5), Offset(0x10)],
            }.to_string(),
            "Unresolved target >loop, referenced at 0x5, 0x10",
        );
        assert_eq!(
            Error::ImpossibleRelocation {
                offset: Offset(2),
                target: Target::Static("far".into()),
                value: 1000,
                required_bits: 11,
                available_bits: 8,
                misaligned: false,
            }.to_string(),
            "Impossible relocation at 0x2 to target ->far: value 0x3e8 needs 11 bits but only 8 are available",
        );
        assert_eq!(
            Error::RelocationBeforeStart {offset: Offset(0), field_offset: 4, ref_offset: 4}.to_string(),
            "Relocation at 0x0 reaches back 4 bytes to its field and 4 bytes to its reference point, before the start of the buffer",
        );
        assert_eq!(Error::InvalidPageSize(3000).to_string(), "Page size 0xbb8 is not a power of two");
        assert_eq!(
            Error::AlterationOverrun {position: Offset(6), limit: Offset(5)}.to_string(),
            "Alteration reached 0x6, beyond its limit 0x5",
        );
    }

    #[test]
    fn source() {
        use std::error::Error as _;
        let e = Error::MemoryProtection {
            size: 0x1000,
            protection: Protection::ReadExecute,
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope"),
        };
        assert!(e.source().is_some());
        assert!(e.to_string().starts_with("Could not map 0x1000 bytes as read/execute"));
    }
}
