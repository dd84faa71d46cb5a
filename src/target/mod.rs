//! Relocation policies for the supported architectures.

pub mod x64;
pub mod aarch64;

/** The relocation policy of the machine we are running on. */
#[cfg(target_arch="x86_64")]
pub type Native = x64::X64Relocation;
#[cfg(target_arch="aarch64")]
pub type Native = aarch64::Aarch64Relocation;
