//! Simulation of the SEL 810A processor.
//!
//! This module consists of:
//! - [`Simulator`]: the machine itself. [`Simulator::step`] executes one
//!   instruction: decode the instruction register, perform the operation,
//!   advance the program counter, and evaluate the interrupt controller.
//! - [`sched::Machine`]: a threaded wrapper that runs a [`Simulator`] on a
//!   worker thread and exposes a front-panel control surface.
//!
//! The submodules hold the machine's parts: core storage ([`mem`]),
//! breakpoints and halt reporting ([`debug`]), the priority interrupt
//! controller ([`irq`]), and external units ([`device`]).
//!
//! # Usage
//!
//! For single-threaded use, construct a [`Simulator`], load a program, and
//! run it:
//!
//! ```
//! use sel810_emu::sim::{SimFlags, Simulator};
//!
//! let mut sim = Simulator::new(SimFlags::default());
//! // LAA 5 / HLT, with the operand at address 5
//! sim.load_image(0, &[0x10, 0x05, 0x00, 0x00]);
//! sim.core.set(5, 0x002A);
//! sim.run_with_limit(100);
//!
//! assert!(sim.halted());
//! assert_eq!(sim.a, 0x002A);
//! ```

pub mod debug;
pub mod device;
pub mod irq;
pub mod mem;
pub mod sched;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::ast::{AugOp, ExtOp, Instr, MemOp, XferOp};

use debug::{octal, Access, BreakpointTable, HaltCause, HaltReport};
use device::{Unit, UnitTable};
use irq::IntController;
use mem::{Core, CoreInitStrategy, ADDR_MASK};

/// Page bits of an address: everything above the 9-bit word field.
const PAGE_MASK: u16 = 0x7E00;

/// How long a wait-mode transfer polls before raising the I/O hold
/// indicator.
const INDICATOR_LAG: Duration = Duration::from_millis(200);

/// Poll interval while waiting for unit readiness.
const READY_POLL: Duration = Duration::from_millis(10);

/// Poll interval while the I/O hold indicator is raised.
const HOLD_POLL: Duration = Duration::from_millis(20);

/// Construction parameters for the simulator.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SimFlags {
    /// How core is filled before a program is loaded.
    pub core_init: CoreInitStrategy,
}

/// Executes a program like a SEL 810A would.
///
/// Registers and core words are `i16`, matching the machine's signed 16-bit
/// arithmetic. The program counter and variable base register are kept
/// behind masked setters since the hardware only implements some of their
/// bits; everything else is a plain field.
///
/// Three pieces of state are shared atomics so a controlling thread can
/// reach them while an execution thread owns the `Simulator` (see
/// [`sched::Machine`]): the halt flag, the I/O hold indicator, and the
/// shutdown flag.
#[derive(Debug)]
pub struct Simulator {
    /// Core memory.
    ///
    /// Accessing core through this field bypasses the breakpoint tables;
    /// instruction execution goes through [`Simulator::read`] and
    /// [`Simulator::write`] instead.
    pub core: Core,

    /// The A accumulator.
    pub a: i16,
    /// The B accumulator.
    pub b: i16,
    /// The transfer register. Holds the last word moved over the internal
    /// bus (operand fetches, indirect-chain links, interrupt vectors).
    pub t: i16,
    /// The instruction register. Holds the already-fetched instruction that
    /// the next [`Simulator::step`] call will execute.
    pub ir: i16,
    /// The console switch register.
    pub sr: i16,
    /// The index register.
    pub x: i16,
    /// The program protect register.
    pub ppr: i16,

    pc: i16,
    vbr: i16,

    /// Overflow flag.
    pub ovf: bool,
    /// Carry flag. Set by CSB; consumed (and cleared) by the next
    /// instruction unless that instruction is itself a plain CSB word.
    pub cf: bool,
    /// Index pointer: `true` selects the X register for indexed addressing,
    /// `false` selects B.
    pub xp: bool,

    halt: Arc<AtomicBool>,
    ioh: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,

    /// The priority interrupt controller.
    pub irq: IntController,
    /// Attached external units.
    pub units: UnitTable,
    /// Breakpoint counters consulted on every core read.
    pub bp_read: BreakpointTable,
    /// Breakpoint counters consulted on every core write.
    pub bp_write: BreakpointTable,

    halt_report: Option<HaltReport>,

    /// Number of instructions retired since construction.
    pub instructions_run: u64,
}

impl Simulator {
    /// Creates a halted simulator with cleared registers.
    pub fn new(flags: SimFlags) -> Self {
        Self {
            core: Core::new(&mut flags.core_init.generator()),
            a: 0,
            b: 0,
            t: 0,
            ir: 0,
            sr: 0,
            x: 0,
            ppr: 0,
            pc: 0,
            vbr: 0,
            ovf: false,
            cf: false,
            xp: false,
            halt: Arc::new(AtomicBool::new(true)),
            ioh: Arc::new(AtomicBool::new(false)),
            cancel: Arc::new(AtomicBool::new(false)),
            irq: IntController::new(),
            units: UnitTable::new(),
            bp_read: BreakpointTable::new(),
            bp_write: BreakpointTable::new(),
            halt_report: None,
            instructions_run: 0,
        }
    }

    /// The program counter.
    pub fn pc(&self) -> i16 {
        self.pc
    }

    /// Sets the program counter, masked to the 15 implemented bits.
    pub fn set_pc(&mut self, addr: i16) {
        self.pc = addr & ADDR_MASK as i16;
    }

    /// The variable base register.
    pub fn vbr(&self) -> i16 {
        self.vbr
    }

    /// Sets the variable base register; only the page bits are retained.
    pub fn set_vbr(&mut self, value: i16) {
        self.vbr = value & PAGE_MASK as i16;
    }

    /// The shared halt flag. True whenever the machine is stopped.
    pub fn halt_cell(&self) -> &Arc<AtomicBool> {
        &self.halt
    }

    /// The shared I/O hold indicator. Raised when a wait-mode transfer is
    /// overdue; storing `false` releases the hold and lets the transfer
    /// conclude.
    pub fn ioh_cell(&self) -> &Arc<AtomicBool> {
        &self.ioh
    }

    /// The shared shutdown flag. Once set, wait loops and indirect chains
    /// bail out so the owning thread can exit promptly.
    pub fn cancel_cell(&self) -> &Arc<AtomicBool> {
        &self.cancel
    }

    /// Whether the machine is halted.
    pub fn halted(&self) -> bool {
        self.halt.load(Ordering::Relaxed)
    }

    /// Why and where the machine last halted itself, if it did.
    ///
    /// Cleared when another instruction executes.
    pub fn halt_report(&self) -> Option<HaltReport> {
        self.halt_report
    }

    /// Clears the registers, flags, and interrupt controller, leaving core,
    /// breakpoints, and attached units in place.
    pub fn master_clear(&mut self) {
        self.a = 0;
        self.b = 0;
        self.t = 0;
        self.ir = 0;
        self.x = 0;
        self.ppr = 0;
        self.pc = 0;
        self.vbr = 0;
        self.ovf = false;
        self.cf = false;
        self.xp = false;
        self.irq = IntController::new();
        self.halt.store(true, Ordering::Relaxed);
        self.ioh.store(false, Ordering::Relaxed);
        self.halt_report = None;
    }

    /// Loads a big-endian program image into core starting at `addr`.
    pub fn load_image(&mut self, addr: u16, bytes: &[u8]) {
        self.core.load_image(addr, bytes);
    }

    /// Reloads the instruction register from core at the program counter.
    ///
    /// This is the front-panel fetch performed when execution (re)starts
    /// after the console has adjusted the program counter or core. It does
    /// not consult the breakpoint tables.
    pub fn prime(&mut self) {
        self.ir = self.core.get(self.pc as u16);
    }

    /// Reads a core word, applying the read breakpoint table.
    ///
    /// A fired breakpoint halts the machine at the end of the current
    /// instruction; the access itself still completes.
    pub fn read(&mut self, addr: u16) -> i16 {
        if self.bp_read.check(addr) {
            self.halt_with(HaltCause::Breakpoint { access: Access::Read, addr: addr & ADDR_MASK });
        }
        self.core.get(addr)
    }

    /// Writes a core word, applying the write breakpoint table.
    ///
    /// A fired breakpoint halts the machine at the end of the current
    /// instruction; the write itself still completes.
    pub fn write(&mut self, addr: u16, value: i16) {
        if self.bp_write.check(addr) {
            self.halt_with(HaltCause::Breakpoint { access: Access::Write, addr: addr & ADDR_MASK });
        }
        self.core.set(addr, value);
    }

    /// Runs until the machine halts.
    pub fn run(&mut self) {
        self.prime();
        self.halt.store(false, Ordering::Relaxed);
        while !self.halted() {
            self.step();
        }
    }

    /// Runs until the machine halts or `max_steps` instructions retire,
    /// whichever comes first. The machine is left halted either way.
    pub fn run_with_limit(&mut self, max_steps: u64) {
        self.prime();
        self.halt.store(false, Ordering::Relaxed);
        let fuel = self.instructions_run.saturating_add(max_steps);
        while !self.halted() && self.instructions_run < fuel {
            self.step();
        }
        self.halt.store(true, Ordering::Relaxed);
    }

    /// Executes the instruction currently in the instruction register.
    ///
    /// Besides the operation itself this performs the end-of-instruction
    /// sequencing: the carry flag is cleared (unless the executed word was
    /// a bare CSB), the program counter advances and the next instruction
    /// is fetched, device interrupt lines are sampled, and the interrupt
    /// controller may dispatch through a vector.
    pub fn step(&mut self) {
        self.halt_report = None;
        let ir = self.ir;
        match Instr::decode(ir) {
            Some(Instr::Aug { op, sc, i, m }) => {
                if self.exec_aug(op, sc, i, m) {
                    // halted mid-instruction; no end-of-instruction sequencing
                    return;
                }
            }
            Some(Instr::Ext { op, unit, i, m }) => self.exec_ext(op, unit, i, m),
            Some(Instr::Xfer { op, unit, r, i, m }) => self.exec_xfer(op, unit, r, i, m),
            Some(Instr::Mem { op, base, x, i, m }) => self.exec_mem(op, base, x, i, m),
            None => {
                log::debug!(
                    "undefined instruction word {} at {}, executing as no-op",
                    octal(ir, 6),
                    octal(self.pc, 5),
                );
            }
        }

        // carry survives exactly one instruction; a bare CSB word extends it
        if self.ir != 7 {
            self.cf = false;
        }
        self.bump_pc();
        self.ir = self.read(self.pc as u16);

        self.poll_and_dispatch();
        self.instructions_run += 1;
    }

    /// Samples device interrupt lines, then lets the controller decide
    /// whether this instruction boundary dispatches.
    ///
    /// A dispatch is an implicit indirect subroutine call through the
    /// vector slot: the resume address is stored at the word the vector
    /// points to, and execution continues just past it.
    fn poll_and_dispatch(&mut self) {
        let irq = &mut self.irq;
        self.units.poll_interrupts(&mut |lines| irq.fold_requests(lines));

        if let Some(vector) = self.irq.evaluate() {
            let link = (self.fetch(vector) as u16) & ADDR_MASK;
            self.write(link, self.pc);
            self.set_pc(link as i16);
            self.bump_pc();
            self.ir = self.read(self.pc as u16);
        }
    }

    fn exec_aug(&mut self, op: AugOp, sc: u32, i: bool, m: bool) -> bool {
        match op {
            AugOp::HLT => {
                self.ir = self.read(self.pc as u16);
                self.halt_with(HaltCause::Hlt);
                return true;
            }
            AugOp::RNA => {
                let mut r = self.a;
                if self.b & 0x4000 != 0 {
                    r = r.wrapping_add(1);
                }
                if r == 0 && self.a != 0 {
                    self.set_ovf();
                }
                self.a = r;
            }
            AugOp::NEG => {
                if self.a == i16::MIN {
                    self.set_ovf();
                }
                self.a = self.a.wrapping_neg().wrapping_sub(self.cf as i16);
            }
            AugOp::CLA => self.a = 0,
            AugOp::TBA => self.a = self.b,
            AugOp::TAB => self.b = self.a,
            AugOp::IAB => std::mem::swap(&mut self.a, &mut self.b),
            AugOp::CSB => {
                if self.b < 0 {
                    self.cf = true;
                    self.b &= 0x7FFF;
                }
                self.irq.block();
            }
            AugOp::RSA => {
                // sign propagates
                self.a >>= sc;
            }
            AugOp::LSA => {
                let r = ((self.a & 0x7FFF) as u16) << sc;
                self.a = (self.a & i16::MIN) | ((r & 0x7FFF) as i16);
            }
            AugOp::FRA => {
                let mut r = ((self.a as i32) << 16) | (((self.b & 0x7FFF) as i32) << 1);
                r >>= sc;
                self.a = (r >> 16) as i16;
                self.b = (self.b & i16::MIN) | (((r >> 1) & 0x7FFF) as i16);
            }
            AugOp::FLL => {
                let r = (((self.a as i32) << 16) | (self.b as u16 as i32)) << sc;
                self.a = (r >> 16) as i16;
                self.b = r as i16;
            }
            AugOp::FRL => {
                // 32-bit rotate: bits shifted off the top of A re-enter at
                // the bottom of B
                let mut r = ((((self.a as i32) << 16) | (self.b as u16 as i32)) as i64) << sc;
                self.a = (r >> 16) as i16;
                self.b = ((self.b as u16) << sc) as i16;
                r >>= 32;
                self.b |= (r & ((1 << sc) - 1)) as i16;
            }
            AugOp::RSL => {
                self.a = ((self.a as u16) >> sc) as i16;
            }
            AugOp::LSL => {
                self.a = ((self.a as u16) << sc) as i16;
            }
            AugOp::FLA => {
                let r = (((self.a as i32) << 16) | (((self.b & 0x7FFF) as i32) << 1)) << sc;
                self.a = (self.a & i16::MIN) | (((r >> 16) & 0x7FFF) as i16);
                self.b = (self.b & i16::MIN) | (((r >> 1) & 0x7FFF) as i16);
            }
            AugOp::ASC => self.a ^= i16::MIN,
            AugOp::SAS => {
                if self.a > 0 {
                    self.bump_pc();
                }
                if self.a >= 0 {
                    self.bump_pc();
                }
            }
            AugOp::SAZ => {
                if self.a == 0 {
                    self.bump_pc();
                }
            }
            AugOp::SAN => {
                if self.a < 0 {
                    self.bump_pc();
                }
            }
            AugOp::SAP => {
                if self.a >= 0 {
                    self.bump_pc();
                }
            }
            AugOp::SOF => {
                if self.ovf {
                    self.ovf = false;
                } else {
                    self.bump_pc();
                }
            }
            AugOp::IBS => {
                self.b = self.b.wrapping_add(1);
                if self.b >= 0 {
                    self.bump_pc();
                }
            }
            AugOp::ABA => self.a &= self.b,
            AugOp::OBA => self.a |= self.b,
            AugOp::LCS => self.a = self.sr,
            AugOp::SNO => {
                let a = self.a as u16;
                if (a & 0x8000) != ((a << 1) & 0x8000) {
                    self.bump_pc();
                }
            }
            AugOp::NOP => {}
            AugOp::CNS => {
                if self.a == i16::MIN {
                    self.set_ovf();
                }
                if self.a < 0 {
                    self.a = self.a.wrapping_neg() | i16::MIN;
                }
            }
            AugOp::TOI => {
                self.irq.block();
                self.irq.arm_disable();
            }
            AugOp::LOB => {
                self.bump_pc();
                let t = self.fetch(self.pc as u16);
                self.set_pc((t & 0x7FFF).wrapping_sub(1));
                if self.irq.disable_pending() {
                    self.irq.commit_disable();
                }
            }
            AugOp::OVS => self.set_ovf(),
            AugOp::TBP => self.ppr = self.b,
            AugOp::TPB => self.b = self.ppr,
            AugOp::TBV => self.vbr = self.b & PAGE_MASK as i16,
            AugOp::TVB => self.b = self.vbr,
            AugOp::STX => {
                let ea = self.operand_addr(i, m);
                self.write(ea, self.x);
            }
            AugOp::LIX => {
                let ea = self.operand_addr(i, m);
                self.x = self.fetch(ea);
            }
            AugOp::XPX => self.xp = true,
            AugOp::XPB => self.xp = false,
            AugOp::SXB => {
                if !self.xp {
                    self.bump_pc();
                }
            }
            AugOp::IXS => {
                self.x = self.x.wrapping_add(sc as i16);
                if self.x >= 0 {
                    self.bump_pc();
                }
            }
            AugOp::TAX => self.x = self.a,
            AugOp::TXA => self.a = self.x,
        }
        false
    }

    fn exec_ext(&mut self, op: ExtOp, unit: u8, i: bool, m: bool) {
        match op {
            ExtOp::CEU { wait } => {
                let ea = self.operand_addr(i, m);
                let t = self.fetch(ea);
                if self.io_command(unit, t, wait) && !wait {
                    self.bump_pc();
                }
            }
            ExtOp::TEU => {
                let ea = self.operand_addr(i, m);
                let t = self.fetch(ea);
                if self.io_test(unit, t) {
                    self.bump_pc();
                }
            }
            ExtOp::SNS => {
                let n = u32::from(unit & 15);
                if (i32::from(self.sr) << n) & 0x8000 == 0 {
                    self.bump_pc();
                }
            }
            ExtOp::PIE => {
                self.bump_pc();
                let t = self.fetch(self.pc as u16) as u16;
                self.irq.enable(usize::from((t >> 12) & 7), t & 0x0FFF);
                self.irq.block();
            }
            ExtOp::PID => {
                self.bump_pc();
                let t = self.fetch(self.pc as u16) as u16;
                self.irq.disable(usize::from((t >> 12) & 7), t & 0x0FFF);
                self.irq.block();
            }
        }
    }

    fn exec_xfer(&mut self, op: XferOp, unit: u8, r: bool, i: bool, m: bool) {
        match op {
            XferOp::AOP { wait } => {
                if self.io_write(unit, self.a, wait) && !wait {
                    self.bump_pc();
                }
            }
            XferOp::AIP { wait } => {
                if let Some(word) = self.io_read(unit, wait) {
                    if !r {
                        self.a = 0;
                    }
                    self.a = self.a.wrapping_add(word);
                    if !wait {
                        self.bump_pc();
                    }
                }
            }
            XferOp::MOP { wait } => {
                let ea = self.operand_addr(i, m);
                let t = self.fetch(ea);
                if self.io_write(unit, t, wait) && !wait {
                    self.bump_pc();
                }
            }
            XferOp::MIP { wait } => {
                let ea = self.operand_addr(i, m);
                if let Some(word) = self.io_read(unit, wait) {
                    self.write(ea, word);
                    if !wait {
                        self.bump_pc();
                    }
                }
            }
        }
    }

    fn exec_mem(&mut self, op: MemOp, base: u16, x: bool, i: bool, m: bool) {
        let ea = self.resolve(base, x, i, m);
        match op {
            MemOp::LAA => self.a = self.fetch(ea),
            MemOp::LBA => self.b = self.fetch(ea),
            MemOp::STA => self.write(ea, self.a),
            MemOp::STB => self.write(ea, self.b),
            MemOp::AMA => {
                let t = self.fetch(ea);
                let r = self.a.wrapping_add(t).wrapping_add(self.cf as i16);
                if (self.a ^ t) >= 0 && (self.a ^ r) < 0 {
                    self.set_ovf();
                }
                self.a = r;
            }
            MemOp::SMA => {
                let t = self.fetch(ea);
                let r = self.a.wrapping_sub(t).wrapping_sub(self.cf as i16);
                if (self.a ^ t) < 0 && (self.a ^ r) < 0 {
                    self.set_ovf();
                }
                self.a = r;
            }
            MemOp::MPY => {
                let t = self.fetch(ea);
                let r = i32::from(t) * i32::from(self.b);
                if t == i16::MIN && self.b == i16::MIN {
                    self.set_ovf();
                }
                self.b = (r & 0x7FFF) as i16;
                self.a = (r >> 15) as i16;
            }
            MemOp::DIV => {
                let t = self.fetch(ea);
                let dividend = (i32::from(self.a) << 15) | i32::from(self.b & 0x7FFF);
                if self.a >= t || t == 0 {
                    self.set_ovf();
                }
                if t != 0 {
                    self.b = (dividend % i32::from(t)) as i16;
                    self.a = (dividend / i32::from(t)) as i16;
                }
            }
            MemOp::BRU => {
                self.set_pc((ea as i16).wrapping_sub(1));
                if self.irq.disable_pending() && i {
                    self.irq.commit_disable();
                }
            }
            MemOp::SPB => {
                self.bump_pc();
                self.write(ea, self.pc);
                self.set_pc(ea as i16);
                self.irq.block();
            }
            MemOp::IMS => {
                let t = self.fetch(ea).wrapping_add(1);
                self.t = t;
                self.write(ea, t);
                if t == 0 {
                    self.bump_pc();
                }
            }
            MemOp::CMA => {
                let t = self.fetch(ea);
                if self.a > t {
                    self.bump_pc();
                }
                if self.a >= t {
                    self.bump_pc();
                }
            }
            MemOp::AMB => {
                let t = self.fetch(ea);
                let r = self.b.wrapping_add(t);
                if (self.b ^ t) >= 0 && (self.b ^ r) < 0 {
                    self.set_ovf();
                }
                self.b = r;
            }
        }
    }

    /// Resolves the effective address of a memory-reference instruction.
    ///
    /// The base field is completed to a full address by the map flag
    /// (current page), the index flag, or the variable base register, then
    /// any indirect chain is chased: each link supplies a 14-bit address,
    /// its own index flag, and whether the chain continues. A link keeps
    /// bit 14 of the program counter, so chains stay in the current half
    /// of core.
    fn resolve(&mut self, base: u16, x: bool, i: bool, m: bool) -> u16 {
        let pc = self.pc as u16;
        let mut ea = base;
        if m {
            ea |= pc & PAGE_MASK;
        }
        if x {
            ea = ea.wrapping_add(self.index() as u16);
        }
        if !m && !x {
            ea |= (self.vbr as u16) & PAGE_MASK;
        }

        let mut i = i;
        while i {
            if self.cancelled() {
                // shutting down; a self-referential chain must not pin the
                // execution thread
                break;
            }
            let t = self.fetch(ea) as u16;
            i = t & 0x4000 != 0;
            ea = (pc & 0x4000) | (t & 0x3FFF);
            if t & 0x8000 != 0 {
                ea = ea.wrapping_add(self.index() as u16);
            }
        }
        ea & ADDR_MASK
    }

    /// Chases an indirect chain starting from an operand word address, for
    /// the two-word instructions (STX/LIX, CEU/TEU, MOP/MIP).
    fn indirect(&mut self, start: u16, m: bool) -> u16 {
        let pc = self.pc as u16;
        let mut addr = start;
        loop {
            let t = self.fetch(addr) as u16;
            addr = (t & 0x3FFF) | if m { pc & 0x4000 } else { 0 };
            if t & 0x8000 != 0 {
                addr = addr.wrapping_add(self.index() as u16);
            }
            if t & 0x4000 == 0 || self.cancelled() {
                break;
            }
        }
        addr & ADDR_MASK
    }

    /// Advances to the operand word of a two-word instruction and resolves
    /// where its operand lives.
    fn operand_addr(&mut self, i: bool, m: bool) -> u16 {
        self.bump_pc();
        let addr = self.pc as u16;
        match i {
            false => addr,
            true => self.indirect(addr, m),
        }
    }

    /// Reads a core word over the internal bus, updating the T register.
    fn fetch(&mut self, addr: u16) -> i16 {
        let t = self.read(addr);
        self.t = t;
        t
    }

    /// The register selected for indexed addressing.
    fn index(&self) -> i16 {
        match self.xp {
            true => self.x,
            false => self.b,
        }
    }

    fn bump_pc(&mut self) {
        self.pc = self.pc.wrapping_add(1) & ADDR_MASK as i16;
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    fn set_ovf(&mut self) {
        if !self.ovf {
            log::trace!("overflow set at {}", octal(self.pc, 5));
        }
        self.ovf = true;
    }

    fn halt_with(&mut self, cause: HaltCause) {
        let report = HaltReport { cause, pc: self.pc, ir: self.ir };
        log::info!("{report}");
        self.halt.store(true, Ordering::Relaxed);
        if self.halt_report.is_none() {
            self.halt_report = Some(report);
        }
    }

    /// Sends a command word to a unit (CEU).
    ///
    /// In skip mode an unready or absent unit fails immediately. In wait
    /// mode the transfer polls for readiness, raising the I/O hold
    /// indicator once overdue; an absent unit still fails immediately
    /// rather than hanging the machine on a slot nothing occupies.
    pub fn io_command(&mut self, unit: u8, word: i16, wait: bool) -> bool {
        let ioh = Arc::clone(&self.ioh);
        let cancel = Arc::clone(&self.cancel);
        let Some(dev) = self.units.get_mut(unit) else {
            return false;
        };
        await_ready(&mut *dev, |d| d.command_ready(), wait, &ioh, &cancel) && dev.command(word)
    }

    /// Sends an output word to a unit (AOP/MOP). Same readiness handling
    /// as [`Simulator::io_command`].
    pub fn io_write(&mut self, unit: u8, word: i16, wait: bool) -> bool {
        let ioh = Arc::clone(&self.ioh);
        let cancel = Arc::clone(&self.cancel);
        let Some(dev) = self.units.get_mut(unit) else {
            return false;
        };
        await_ready(&mut *dev, |d| d.write_ready(), wait, &ioh, &cancel) && dev.write(word)
    }

    /// Takes an input word from a unit (AIP/MIP). Same readiness handling
    /// as [`Simulator::io_command`].
    pub fn io_read(&mut self, unit: u8, wait: bool) -> Option<i16> {
        let ioh = Arc::clone(&self.ioh);
        let cancel = Arc::clone(&self.cancel);
        let dev = self.units.get_mut(unit)?;
        match await_ready(&mut *dev, |d| d.read_ready(), wait, &ioh, &cancel) {
            true => dev.read(),
            false => None,
        }
    }

    /// Presents a test word to a unit (TEU). Absent units test false.
    pub fn io_test(&mut self, unit: u8, word: i16) -> bool {
        self.units.get_mut(unit).is_some_and(|dev| dev.test(word))
    }
}

impl Default for Simulator {
    fn default() -> Self {
        Simulator::new(SimFlags::default())
    }
}

/// Waits for a unit to become ready, returning whether the transaction
/// should proceed.
///
/// Skip mode probes once. Wait mode polls for [`INDICATOR_LAG`] first;
/// once the transfer is overdue the I/O hold indicator is raised and
/// polling continues until the unit comes ready or the hold is released
/// from outside. A released hold proceeds to the transaction, whose own
/// result then decides success. The shutdown flag aborts either phase.
fn await_ready(
    dev: &mut dyn Unit,
    mut ready: impl FnMut(&mut dyn Unit) -> bool,
    wait: bool,
    ioh: &AtomicBool,
    cancel: &AtomicBool,
) -> bool {
    if ready(&mut *dev) {
        return true;
    }
    if !wait {
        return false;
    }

    let start = Instant::now();
    loop {
        if cancel.load(Ordering::Relaxed) {
            return false;
        }
        std::thread::sleep(READY_POLL);
        if ready(&mut *dev) {
            return true;
        }
        if start.elapsed() >= INDICATOR_LAG {
            break;
        }
    }

    ioh.store(true, Ordering::Relaxed);
    log::debug!("I/O hold raised");
    while ioh.load(Ordering::Relaxed) && !ready(&mut *dev) {
        if cancel.load(Ordering::Relaxed) {
            ioh.store(false, Ordering::Relaxed);
            return false;
        }
        std::thread::sleep(HOLD_POLL);
    }
    ioh.store(false, Ordering::Relaxed);
    log::debug!("I/O hold cleared");
    true
}

#[cfg(test)]
mod tests {
    use super::device::{InterruptLine, NullUnit};
    use super::irq::vector_addr;
    use super::*;

    fn sim_with(words: &[(u16, i16)]) -> Simulator {
        let mut sim = Simulator::default();
        for &(addr, word) in words {
            sim.core.set(addr, word);
        }
        sim
    }

    const HLT: i16 = 0;
    const NOP: i16 = 27;
    const CSB: i16 = 7;

    fn mem(op: u16, base: u16) -> i16 {
        ((op << 12) | base) as i16
    }

    #[test]
    fn load_run_halt() {
        let mut sim = Simulator::default();
        sim.load_image(0, &[0x10, 0x05, 0x00, 0x00]);
        sim.core.set(5, 0x002A);
        sim.run_with_limit(10);

        assert!(sim.halted());
        assert_eq!(sim.a, 0x002A);
        assert_eq!(sim.pc(), 1);
        assert_eq!(sim.halt_report().map(|r| r.cause), Some(HaltCause::Hlt));
        assert_eq!(sim.instructions_run, 1);
    }

    #[test]
    fn add_overflow_and_wraparound() {
        // LAA 5 / AMA 6 / HLT
        let mut sim = sim_with(&[
            (0, mem(1, 5)),
            (1, mem(5, 6)),
            (2, HLT),
            (5, 0x7FFF),
            (6, 1),
        ]);
        sim.run_with_limit(10);
        assert_eq!(sim.a, i16::MIN);
        assert!(sim.ovf);
    }

    #[test]
    fn subtract_without_overflow() {
        let mut sim = sim_with(&[
            (0, mem(1, 5)),
            (1, mem(6, 6)),
            (2, HLT),
            (5, 10),
            (6, 25),
        ]);
        sim.run_with_limit(10);
        assert_eq!(sim.a, -15);
        assert!(!sim.ovf);
    }

    #[test]
    fn negate_min_sets_overflow() {
        let mut sim = sim_with(&[(0, 2), (1, HLT)]); // NEG
        sim.a = i16::MIN;
        sim.run_with_limit(10);
        assert_eq!(sim.a, i16::MIN);
        assert!(sim.ovf);
    }

    #[test]
    fn carry_spans_one_instruction_and_csb_extends_it() {
        // LBA 5 / CSB / CSB / NOP, with B negative
        let mut sim = sim_with(&[
            (0, mem(2, 5)),
            (1, CSB),
            (2, CSB),
            (3, NOP),
            (4, HLT),
            (5, -1),
        ]);
        sim.prime();
        sim.step(); // LBA
        assert!(!sim.cf);
        sim.step(); // CSB sets carry, clears B's sign
        assert!(sim.cf);
        assert_eq!(sim.b, 0x7FFF);
        sim.step(); // next word is CSB again: carry survives
        assert!(sim.cf);
        sim.step(); // NOP: carry consumed
        assert!(!sim.cf);
    }

    #[test]
    fn carry_applies_to_add() {
        // LBA 10 / CSB / LAA 11 / HLT
        let mut sim = sim_with(&[
            (0, mem(2, 10)),
            (1, CSB),
            (2, mem(1, 11)),
            (3, HLT),
            (10, -1),
            (11, 5),
        ]);
        sim.prime();
        sim.step();
        sim.step();
        assert!(sim.cf);
        // carry is consumed by the LAA boundary, not the CSB one
        sim.step();
        assert!(!sim.cf);
    }

    #[test]
    fn indirect_chain_resolves() {
        // LAA* 10 -> 20 -> 30 -> 5
        let mut sim = sim_with(&[
            (0, mem(1, 10) | 0x400),
            (1, HLT),
            (10, 0x4014), // link: indirect continues at 20
            (20, 0x401E), // link: indirect continues at 30
            (30, 0x0005), // final: operand at 5
            (5, 0x0123),
        ]);
        sim.run_with_limit(10);
        assert_eq!(sim.a, 0x0123);
        // T holds the last bus word, which is the operand itself
        assert_eq!(sim.t, 0x0123);

        // direct resolution of the same final target agrees
        let mut direct = sim_with(&[(0, mem(1, 5)), (1, HLT), (5, 0x0123)]);
        direct.run_with_limit(10);
        assert_eq!(direct.a, sim.a);
    }

    #[test]
    fn indexed_addressing_uses_selected_register() {
        // LAA 6 / TAX / XPX / LAA 10,X / HLT
        let mut sim = sim_with(&[
            (0, mem(1, 6)),
            (1, 42), // TAX
            (2, 38), // XPX
            (3, mem(1, 10) | 0x800),
            (4, HLT),
            (6, 3),
            (13, 0x0055),
        ]);
        sim.run_with_limit(10);
        assert_eq!(sim.x, 3);
        assert!(sim.xp);
        assert_eq!(sim.a, 0x0055);
    }

    #[test]
    fn variable_base_completes_unmapped_addresses() {
        let mut sim = sim_with(&[(0x0400, mem(1, 5)), (0x0401, HLT), (0x0605, 0x0077)]);
        sim.set_vbr(0x0600);
        sim.set_pc(0x0400);
        sim.run_with_limit(10);
        assert_eq!(sim.a, 0x0077);
    }

    #[test]
    fn map_flag_keeps_current_page() {
        let mut sim = sim_with(&[(0x0400, mem(1, 5) | 0x200), (0x0401, HLT), (0x0405, 0x0066)]);
        sim.set_pc(0x0400);
        sim.run_with_limit(10);
        assert_eq!(sim.a, 0x0066);
    }

    #[test]
    fn skip_chain_sas() {
        // LAA 5 / SAS skips two words when A is positive
        let mut sim = sim_with(&[(0, mem(1, 5)), (1, 17), (5, 1)]);
        sim.run_with_limit(10);
        // lands on the zeroed word at 4, which halts
        assert_eq!(sim.pc(), 4);
    }

    #[test]
    fn spb_links_and_branches() {
        // SPB 100: link written at 100, execution resumes at 101
        let mut sim = sim_with(&[(0, mem(10, 100)), (101, HLT)]);
        sim.run_with_limit(10);
        assert_eq!(sim.core.get(100), 1);
        assert_eq!(sim.pc(), 101);
    }

    #[test]
    fn ims_skips_on_wrap_to_zero() {
        let mut sim = sim_with(&[(0, mem(12, 5)), (5, -1)]);
        sim.run_with_limit(10);
        assert_eq!(sim.core.get(5), 0);
        assert_eq!(sim.t, 0);
        assert_eq!(sim.pc(), 2); // skipped the word at 1
    }

    #[test]
    fn multiply_splits_product() {
        let mut sim = sim_with(&[(0, mem(7, 5)), (1, HLT), (5, 5)]);
        sim.b = 3;
        sim.run_with_limit(10);
        assert_eq!(sim.b, 15);
        assert_eq!(sim.a, 0);
        assert!(!sim.ovf);
    }

    #[test]
    fn divide_produces_quotient_and_remainder() {
        let mut sim = sim_with(&[(0, mem(8, 5)), (1, HLT), (5, 7)]);
        sim.a = 0;
        sim.b = 100;
        sim.run_with_limit(10);
        assert_eq!(sim.a, 14);
        assert_eq!(sim.b, 2);
        assert!(!sim.ovf);
    }

    #[test]
    fn divide_by_zero_flags_and_leaves_accumulators() {
        let mut sim = sim_with(&[(0, mem(8, 5)), (1, HLT)]);
        sim.a = 1;
        sim.b = 17;
        sim.run_with_limit(10);
        assert!(sim.ovf);
        assert_eq!(sim.a, 1);
        assert_eq!(sim.b, 17);
    }

    #[test]
    fn full_rotate_carries_sign_into_b() {
        let mut sim = sim_with(&[(0, 12 | (1 << 6)), (1, HLT)]); // FRL 1
        sim.a = i16::MIN;
        sim.b = 0;
        sim.run_with_limit(10);
        assert_eq!(sim.a, 0);
        assert_eq!(sim.b, 1);
    }

    #[test]
    fn arithmetic_shifts_keep_the_sign_bit() {
        let mut sim = sim_with(&[(0, 8 | (1 << 6)), (1, HLT)]); // RSA 1
        sim.a = -4;
        sim.run_with_limit(10);
        assert_eq!(sim.a, -2); // sign propagates into vacated bits

        let mut sim = sim_with(&[(0, 9 | (1 << 6)), (1, HLT)]); // LSA 1
        sim.a = 0x8001u16 as i16;
        sim.run_with_limit(10);
        // magnitude shifts under an untouched sign bit
        assert_eq!(sim.a, 0x8002u16 as i16);
    }

    #[test]
    fn logical_shifts_treat_the_sign_bit_as_data() {
        let mut sim = sim_with(&[(0, 13 | (1 << 6)), (1, HLT)]); // RSL 1
        sim.a = -4;
        sim.run_with_limit(10);
        assert_eq!(sim.a, 0x7FFE); // zero-filled from the top

        let mut sim = sim_with(&[(0, 14 | (1 << 6)), (1, HLT)]); // LSL 1
        sim.a = 0x4001;
        sim.run_with_limit(10);
        assert_eq!(sim.a, 0x8002u16 as i16);
    }

    #[test]
    fn full_arithmetic_shifts_cross_between_magnitudes() {
        // FRA 1: A's low bit lands in B's bit 14
        let mut sim = sim_with(&[(0, 10 | (1 << 6)), (1, HLT)]);
        sim.a = 1;
        sim.b = 0;
        sim.run_with_limit(10);
        assert_eq!(sim.a, 0);
        assert_eq!(sim.b, 0x4000);

        // FLA 1: B's bit 14 lands in A's low bit, both sign bits stay put
        let mut sim = sim_with(&[(0, 15 | (1 << 6)), (1, HLT)]);
        sim.a = i16::MIN;
        sim.b = i16::MIN | 0x4000;
        sim.run_with_limit(10);
        assert_eq!(sim.a, 0x8001u16 as i16);
        assert_eq!(sim.b, i16::MIN);
    }

    #[test]
    fn full_logical_shift_moves_b_sign_into_a() {
        let mut sim = sim_with(&[(0, 11 | (1 << 6)), (1, HLT)]); // FLL 1
        sim.a = 0;
        sim.b = i16::MIN;
        sim.run_with_limit(10);
        assert_eq!(sim.a, 1);
        assert_eq!(sim.b, 0);
    }

    #[test]
    fn long_branch_takes_target_from_next_word() {
        let mut sim = sim_with(&[(0, 30), (1, 0x0200), (0x0200, HLT)]); // LOB
        sim.run_with_limit(10);
        assert_eq!(sim.pc(), 0x0200);
    }

    #[test]
    fn pie_decodes_group_from_word() {
        // PIE / mask word for group 2 / HLT
        let mut sim = sim_with(&[(0, (11 << 12) | (6 << 6)), (1, 0x2FFF), (2, HLT)]);
        sim.run_with_limit(10);
        assert_eq!(sim.irq.enabled_mask(2), 0x0FFF);
        assert_eq!(sim.irq.enabled_mask(0), 0);
    }

    #[test]
    fn device_interrupt_dispatches_through_vector() {
        let mut sim = sim_with(&[(0, NOP), (1, NOP), (2, NOP)]);
        sim.irq.enable(0, 0x800);
        sim.units.attach(4, InterruptLine::once(0, 0x800));
        sim.core.set(vector_addr(0, 0x800), 600);
        sim.prime();

        sim.step();
        // boundary after the first NOP: request sampled and accepted
        assert_eq!(sim.irq.group(), 0);
        assert_eq!(sim.core.get(600), 1); // resume address
        assert_eq!(sim.pc(), 601);
    }

    #[test]
    fn dispatch_blocks_the_following_boundary() {
        let mut sim = sim_with(&[(0, NOP)]);
        sim.irq.enable(3, 0x010);
        sim.irq.raise(3, 0x010);
        sim.core.set(vector_addr(3, 0x010), 700);
        sim.core.set(701, NOP);
        sim.prime();

        sim.step();
        assert_eq!(sim.pc(), 701);
        // another request in a lower group cannot land on the very next
        // boundary, the handler's first instruction always runs
        sim.irq.enable(0, 0x800);
        sim.irq.raise(0, 0x800);
        sim.core.set(702, NOP);
        sim.core.set(vector_addr(0, 0x800), 800);
        sim.step();
        assert_eq!(sim.pc(), 702);
        sim.step();
        assert_eq!(sim.pc(), 801);
    }

    #[test]
    fn read_breakpoint_halts_after_completed_access() {
        let mut sim = sim_with(&[(0, mem(1, 5)), (1, HLT), (5, 0x002A)]);
        sim.bp_read.set(5, 1);
        sim.run_with_limit(10);

        assert!(sim.halted());
        assert_eq!(sim.a, 0x002A); // the access completed
        let report = sim.halt_report().unwrap();
        assert_eq!(report.cause, HaltCause::Breakpoint { access: Access::Read, addr: 5 });
        assert_eq!(report.pc, 0);
        // execution stopped at the end of the instruction, not inside it
        assert_eq!(sim.pc(), 1);
    }

    #[test]
    fn write_breakpoint_counts_down() {
        // STA 5 / STA 5 / HLT
        let mut sim = sim_with(&[(0, mem(3, 5)), (1, mem(3, 5)), (2, HLT)]);
        sim.bp_write.set(5, 2);
        sim.a = 9;
        sim.prime();
        sim.step();
        assert!(sim.halt_report().is_none());
        sim.step();
        assert!(sim.halted());
        assert_eq!(
            sim.halt_report().unwrap().cause,
            HaltCause::Breakpoint { access: Access::Write, addr: 5 }
        );
        assert_eq!(sim.core.get(5), 9);
    }

    #[test]
    fn mip_skip_failure_leaves_memory_and_pc_sequence() {
        // MIP unit 3 (skip mode) with nothing readable attached
        let mut sim = sim_with(&[(0, 0xF183u16 as i16), (1, 0x1234), (2, HLT)]);
        sim.units.attach(3, NullUnit);
        sim.run_with_limit(10);
        assert_eq!(sim.core.get(1), 0x1234); // untouched on failure
        assert_eq!(sim.pc(), 2);
    }

    #[test]
    fn aop_skip_against_absent_unit_falls_through() {
        let mut sim = sim_with(&[(0, 0xF009u16 as i16), (1, HLT)]);
        sim.a = 0x41;
        sim.run_with_limit(10);
        // no skip: the failure word at 1 executes
        assert_eq!(sim.pc(), 1);
    }

    #[test]
    fn wait_mode_against_absent_unit_fails_without_hanging() {
        // AIP unit 9, wait mode: slot is empty, so the transfer fails
        // immediately instead of polling an unoccupied slot forever
        let mut sim = sim_with(&[(0, 0xF0C9u16 as i16), (1, HLT)]);
        sim.a = 0x0031;
        sim.run_with_limit(10);
        assert!(sim.halted());
        assert_eq!(sim.a, 0x0031);
        assert_eq!(sim.pc(), 1);
    }

    #[test]
    fn undefined_words_execute_as_nop() {
        let mut sim = sim_with(&[(0, 44), (1, 63), (2, HLT)]);
        sim.run_with_limit(10);
        assert!(sim.halted());
        assert_eq!(sim.pc(), 2);
        assert_eq!(sim.instructions_run, 2);
    }

    #[test]
    fn master_clear_preserves_core() {
        let mut sim = sim_with(&[(100, 0x0777)]);
        sim.a = 5;
        sim.set_pc(50);
        sim.ovf = true;
        sim.master_clear();
        assert_eq!(sim.a, 0);
        assert_eq!(sim.pc(), 0);
        assert!(!sim.ovf);
        assert!(sim.halted());
        assert_eq!(sim.core.get(100), 0x0777);
    }
}
