//! Instruction cache maintenance.
//!
//! x86_64 keeps its instruction cache coherent with its data cache, so these
//! functions do nothing there. On aarch64, code written through the data
//! cache must be cleaned to the point of unification, and the corresponding
//! instruction cache lines invalidated, before it can be executed.

/**
 * Makes sure that `code`, which has just been written, will be fetched
 * afresh by any core that executes it.
 */
#[inline]
#[allow(unused_variables)]
pub fn synchronize_icache(code: &[u8]) {
    #[cfg(target_arch="aarch64")]
    aarch64::synchronize_icache(code);
}

/**
 * Discards any instructions already fetched by the current core. Call this
 * on every thread that will run freshly committed code, before running it.
 */
#[inline]
pub fn prepare_for_execution() {
    #[cfg(target_arch="aarch64")]
    aarch64::isb();
}

#[cfg(target_arch="aarch64")]
mod aarch64 {
    use std::arch::asm;

    /** Returns the smallest data and instruction cache line sizes in bytes. */
    fn line_sizes() -> (usize, usize) {
        let ctr: usize;
        // SAFETY: `ctr_el0` is readable at EL0 on every Linux and macOS system.
        unsafe {
            asm!("mrs {}, ctr_el0", lateout(reg) ctr, options(nomem, nostack, preserves_flags));
        }
        (4 << ((ctr >> 16) & 0xF), 4 << (ctr & 0xF))
    }

    pub fn isb() {
        // SAFETY: A barrier.
        unsafe { asm!("isb", options(nostack, preserves_flags)); }
    }

    fn dsb_ish() {
        // SAFETY: A barrier.
        unsafe { asm!("dsb ish", options(nostack, preserves_flags)); }
    }

    pub fn synchronize_icache(code: &[u8]) {
        if code.is_empty() { return; }
        let start = code.as_ptr() as usize;
        let end = start + code.len();
        let (dline, iline) = line_sizes();
        let mut address = start & !(dline - 1);
        while address < end {
            // SAFETY: Cleaning a cache line does not change memory.
            unsafe { asm!("dc cvau, {}", in(reg) address, options(nostack, preserves_flags)); }
            address += dline;
        }
        dsb_ish();
        let mut address = start & !(iline - 1);
        while address < end {
            // SAFETY: Invalidating an instruction cache line does not change memory.
            unsafe { asm!("ic ivau, {}", in(reg) address, options(nostack, preserves_flags)); }
            address += iline;
        }
        dsb_ish();
    }
}

//-----------------------------------------------------------------------------
