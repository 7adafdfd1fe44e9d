//! Utilities to debug simulation.
//!
//! The key type here is [`BreakpointTable`], a per-address countdown table.
//! The simulator keeps two of these (one consulted on reads, one on writes);
//! a fired entry halts the machine at the end of the current instruction and
//! leaves a [`HaltReport`] describing where it stopped.

use crate::ast::Instr;

use super::mem::{ADDR_MASK, CORE_SIZE};

/// A per-address breakpoint counter table.
///
/// Counter semantics:
/// - `0`: inactive.
/// - `1`: fires on the next access, then disarms back to `0` (one-shot).
/// - `-1`: fires on every access, never decremented (persistent).
/// - `n > 1`: decrements silently on each access until it reaches `1`,
///   then fires as a one-shot.
///
/// [`BreakpointTable::set`] never stores a value below `-1`; anything it
/// did would be inert anyway.
#[derive(Clone)]
pub struct BreakpointTable {
    counts: Box<[i16; CORE_SIZE]>,
}

impl BreakpointTable {
    /// Creates a table with every counter inactive.
    pub fn new() -> Self {
        Self {
            counts: vec![0; CORE_SIZE]
                .into_boxed_slice()
                .try_into()
                .unwrap_or_else(|_| unreachable!("vec should have had {CORE_SIZE} elements")),
        }
    }

    /// Reads the counter for an address.
    pub fn get(&self, addr: u16) -> i16 {
        self.counts[usize::from(addr & ADDR_MASK)]
    }

    /// Sets the counter for an address. Values below `-1` are clamped
    /// to `-1`.
    pub fn set(&mut self, addr: u16, count: i16) {
        self.counts[usize::from(addr & ADDR_MASK)] = count.max(-1);
    }

    /// Applies one access to an address's counter, returning whether the
    /// breakpoint fired.
    pub(super) fn check(&mut self, addr: u16) -> bool {
        let n = &mut self.counts[usize::from(addr & ADDR_MASK)];
        let fired = *n == 1 || *n == -1;
        if *n > 0 {
            *n -= 1;
        }
        fired
    }
}

impl Default for BreakpointTable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BreakpointTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Listing only the armed entries keeps this printable.
        let armed = self.counts.iter().enumerate().filter(|(_, &n)| n != 0);
        f.debug_map()
            .entries(armed.map(|(a, &n)| (a, n)))
            .finish()
    }
}

/// The kind of access that fired a breakpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// A core read.
    Read,
    /// A core write.
    Write,
}

/// Why the machine halted on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltCause {
    /// A software HLT instruction was executed.
    Hlt,
    /// A breakpoint counter fired on an access to `addr`.
    Breakpoint {
        /// Which table fired.
        access: Access,
        /// The address whose counter fired.
        addr: u16,
    },
}

/// Machine context recorded when the simulator halts itself.
///
/// The [`std::fmt::Display`] form matches the front-panel style report:
/// `[PC:00100 IR:010005 LAA 5]` (PC and IR in octal).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HaltReport {
    /// What halted the machine.
    pub cause: HaltCause,
    /// Program counter at the halt.
    pub pc: i16,
    /// Instruction register at the halt.
    pub ir: i16,
}

impl std::fmt::Display for HaltReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[PC:{} IR:{} {}]",
            octal(self.pc, 5),
            octal(self.ir, 6),
            Instr::disasm(self.ir)
        )
    }
}

/// Formats a word in zero-padded octal, front-panel style.
pub fn octal(value: i16, width: usize) -> String {
    format!("{:0width$o}", value as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_shot_fires_once() {
        let mut bp = BreakpointTable::new();
        bp.set(100, 1);
        assert!(bp.check(100));
        assert_eq!(bp.get(100), 0);
        assert!(!bp.check(100));
    }

    #[test]
    fn persistent_fires_forever() {
        let mut bp = BreakpointTable::new();
        bp.set(100, -1);
        for _ in 0..10 {
            assert!(bp.check(100));
        }
        assert_eq!(bp.get(100), -1);
    }

    #[test]
    fn countdown_fires_on_third_access() {
        let mut bp = BreakpointTable::new();
        bp.set(7, 3);
        assert!(!bp.check(7));
        assert!(!bp.check(7));
        assert!(bp.check(7));
        assert_eq!(bp.get(7), 0);
    }

    #[test]
    fn set_clamps_below_negative_one() {
        let mut bp = BreakpointTable::new();
        bp.set(5, -20);
        assert_eq!(bp.get(5), -1);
    }

    #[test]
    fn report_formats_octal_context() {
        let report = HaltReport { cause: HaltCause::Hlt, pc: 0o100, ir: 0x1005 };
        assert_eq!(report.to_string(), "[PC:00100 IR:010005 LAA 5]");
    }
}
