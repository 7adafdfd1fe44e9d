//! Run/halt scheduling for the simulator.
//!
//! [`Machine`] owns a [`Simulator`] behind a mutex and drives it from a
//! worker thread, exposing the front-panel control surface: start, stop,
//! single-step, master clear, register and core access, breakpoints, and
//! unit attachment.
//!
//! The halt flag, the I/O hold indicator, and the shutdown flag live
//! outside the mutex (they are shared atomics, see [`Simulator`]), so
//! [`Machine::stop`] and [`Machine::release_hold`] take effect even while
//! the worker holds the simulator lock inside a wait-mode transfer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use super::debug::HaltReport;
use super::device::Unit;
use super::{SimFlags, Simulator};

/// Instructions executed per lock acquisition while running.
///
/// The lock is dropped between batches so control calls interleave with
/// execution instead of waiting for a halt.
const STEP_BATCH: u32 = 256;

/// How long the worker sleeps on an empty command queue while halted.
const IDLE_POLL: Duration = Duration::from_millis(20);

enum Command {
    Step(Sender<()>),
}

/// A [`Simulator`] driven by a worker thread.
///
/// All methods take `&self`; the machine is safe to share behind an `Arc`
/// between a control loop and, say, a display refresher. Dropping the
/// machine shuts the worker down and joins it.
pub struct Machine {
    sim: Arc<Mutex<Simulator>>,
    halt: Arc<AtomicBool>,
    ioh: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
    cmd_tx: Sender<Command>,
    worker: Option<JoinHandle<()>>,
}

macro_rules! reg_accessors {
    ($($(#[$attr:meta])* $get:ident, $set:ident => $field:ident),+ $(,)?) => {$(
        $(#[$attr])*
        pub fn $get(&self) -> i16 {
            self.with_sim(|sim| sim.$field)
        }
        /// Writes the register.
        pub fn $set(&self, value: i16) {
            self.with_sim(|sim| sim.$field = value);
        }
    )+};
}

impl Machine {
    /// Creates a halted machine and spawns its worker thread.
    pub fn new(flags: SimFlags) -> Self {
        let sim = Simulator::new(flags);
        let halt = Arc::clone(sim.halt_cell());
        let ioh = Arc::clone(sim.ioh_cell());
        let cancel = Arc::clone(sim.cancel_cell());
        let sim = Arc::new(Mutex::new(sim));

        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        let worker = std::thread::spawn({
            let sim = Arc::clone(&sim);
            let halt = Arc::clone(&halt);
            let cancel = Arc::clone(&cancel);
            move || worker_loop(&sim, &halt, &cancel, &cmd_rx)
        });

        Self {
            sim,
            halt,
            ioh,
            cancel,
            cmd_tx,
            worker: Some(worker),
        }
    }

    fn with_sim<R>(&self, f: impl FnOnce(&mut Simulator) -> R) -> R {
        f(&mut lock(&self.sim))
    }

    /// Starts execution at the current program counter.
    ///
    /// The instruction register is refreshed from core first, so a program
    /// counter or core edit made while halted takes effect.
    pub fn start(&self) {
        self.with_sim(Simulator::prime);
        self.halt.store(false, Ordering::Relaxed);
    }

    /// Stops execution at the next instruction boundary.
    pub fn stop(&self) {
        self.halt.store(true, Ordering::Relaxed);
    }

    /// Whether the machine is halted.
    pub fn is_halted(&self) -> bool {
        self.halt.load(Ordering::Relaxed)
    }

    /// Executes one instruction and returns once it has retired.
    ///
    /// Meant for use while halted; if the machine is running, the step is
    /// queued and this blocks until the machine halts and services it.
    pub fn step(&self) {
        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        if self.cmd_tx.send(Command::Step(ack_tx)).is_ok() {
            let _ = ack_rx.recv();
        }
    }

    /// Whether the I/O hold indicator is raised.
    pub fn ioh(&self) -> bool {
        self.ioh.load(Ordering::Relaxed)
    }

    /// Releases a raised I/O hold, letting the overdue transfer conclude.
    pub fn release_hold(&self) {
        self.ioh.store(false, Ordering::Relaxed);
    }

    /// Clears the registers, flags, and interrupt controller.
    pub fn master_clear(&self) {
        self.with_sim(Simulator::master_clear);
    }

    /// Loads a big-endian program image into core starting at `addr`.
    pub fn load(&self, addr: u16, bytes: &[u8]) {
        self.with_sim(|sim| sim.load_image(addr, bytes));
    }

    /// Reads a core word without breakpoint side effects.
    pub fn examine(&self, addr: u16) -> i16 {
        self.with_sim(|sim| sim.core.get(addr))
    }

    /// Writes a core word without breakpoint side effects.
    pub fn deposit(&self, addr: u16, word: i16) {
        self.with_sim(|sim| sim.core.set(addr, word));
    }

    reg_accessors! {
        /// Reads the A accumulator.
        a, set_a => a,
        /// Reads the B accumulator.
        b, set_b => b,
        /// Reads the transfer register.
        t, set_t => t,
        /// Reads the instruction register.
        ir, set_ir => ir,
        /// Reads the console switch register.
        sr, set_sr => sr,
        /// Reads the index register.
        x, set_x => x,
        /// Reads the program protect register.
        ppr, set_ppr => ppr,
    }

    /// Reads the program counter.
    pub fn pc(&self) -> i16 {
        self.with_sim(|sim| sim.pc())
    }

    /// Sets the program counter, masked to the implemented bits.
    pub fn set_pc(&self, addr: i16) {
        self.with_sim(|sim| sim.set_pc(addr));
    }

    /// Reads the variable base register.
    pub fn vbr(&self) -> i16 {
        self.with_sim(|sim| sim.vbr())
    }

    /// Sets the variable base register; only the page bits are retained.
    pub fn set_vbr(&self, value: i16) {
        self.with_sim(|sim| sim.set_vbr(value));
    }

    /// Reads the overflow flag.
    pub fn ovf(&self) -> bool {
        self.with_sim(|sim| sim.ovf)
    }

    /// Reads the carry flag.
    pub fn cf(&self) -> bool {
        self.with_sim(|sim| sim.cf)
    }

    /// Reads the index pointer.
    pub fn xp(&self) -> bool {
        self.with_sim(|sim| sim.xp)
    }

    /// Why and where the machine last halted itself, if it did.
    pub fn halt_report(&self) -> Option<HaltReport> {
        self.with_sim(|sim| sim.halt_report())
    }

    /// Number of instructions retired since construction.
    pub fn instructions_run(&self) -> u64 {
        self.with_sim(|sim| sim.instructions_run)
    }

    /// Reads the read-breakpoint counter for an address.
    pub fn read_breakpoint(&self, addr: u16) -> i16 {
        self.with_sim(|sim| sim.bp_read.get(addr))
    }

    /// Sets the read-breakpoint counter for an address.
    pub fn set_read_breakpoint(&self, addr: u16, count: i16) {
        self.with_sim(|sim| sim.bp_read.set(addr, count));
    }

    /// Reads the write-breakpoint counter for an address.
    pub fn write_breakpoint(&self, addr: u16) -> i16 {
        self.with_sim(|sim| sim.bp_write.get(addr))
    }

    /// Sets the write-breakpoint counter for an address.
    pub fn set_write_breakpoint(&self, addr: u16, count: i16) {
        self.with_sim(|sim| sim.bp_write.set(addr, count));
    }

    /// Attaches a unit, replacing (and shutting down) any previous one.
    pub fn attach_unit(&self, unit: u8, dev: impl Unit) {
        self.with_sim(|sim| sim.units.attach(unit, dev));
    }

    /// Detaches and shuts down a unit.
    pub fn detach_unit(&self, unit: u8) {
        self.with_sim(|sim| sim.units.detach(unit));
    }

    /// Whether a unit is attached.
    pub fn is_attached(&self, unit: u8) -> bool {
        self.with_sim(|sim| sim.units.is_attached(unit))
    }

    /// Stops the worker thread and shuts down attached units.
    ///
    /// Called automatically on drop; calling it twice is harmless.
    pub fn shutdown(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        self.halt.store(true, Ordering::Relaxed);
        self.ioh.store(false, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.with_sim(|sim| sim.units.shutdown_all());
    }
}

impl Default for Machine {
    fn default() -> Self {
        Machine::new(SimFlags::default())
    }
}

impl Drop for Machine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("halted", &self.is_halted())
            .field("ioh", &self.ioh())
            .finish_non_exhaustive()
    }
}

fn lock<'a>(sim: &'a Arc<Mutex<Simulator>>) -> MutexGuard<'a, Simulator> {
    sim.lock().unwrap_or_else(PoisonError::into_inner)
}

fn worker_loop(
    sim: &Arc<Mutex<Simulator>>,
    halt: &AtomicBool,
    cancel: &AtomicBool,
    cmd_rx: &Receiver<Command>,
) {
    while !cancel.load(Ordering::Relaxed) {
        if halt.load(Ordering::Relaxed) {
            match cmd_rx.recv_timeout(IDLE_POLL) {
                Ok(Command::Step(ack)) => {
                    {
                        let mut sim = lock(sim);
                        sim.prime();
                        sim.step();
                    }
                    let _ = ack.send(());
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        } else {
            let mut sim = lock(sim);
            for _ in 0..STEP_BATCH {
                if halt.load(Ordering::Relaxed) || cancel.load(Ordering::Relaxed) {
                    break;
                }
                sim.step();
            }
        }
    }
}
