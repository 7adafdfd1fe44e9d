//! A functional simulator for the SEL 810A, a 16-bit minicomputer built by
//! Systems Engineering Laboratories in the late 1960s.
//!
//! The machine is word addressed: 32768 words of signed 16-bit core, two
//! accumulators (A and B), a hardware index register, an 8-group priority
//! interrupt system, and polling-handshake I/O to up to 64 external units.
//! This crate simulates the processor at instruction granularity; units
//! plug in through the [`sim::device::Unit`] trait.
//!
//! The important modules here:
//! - [`ast`]: instruction word decoding and disassembly.
//! - [`sim`]: the simulator proper, plus [`sim::sched::Machine`], which
//!   runs it on a worker thread under front-panel style control.
//!
//! # Usage
//!
//! A typical embedding constructs a [`sim::sched::Machine`], loads a
//! program image, and starts it:
//!
//! ```no_run
//! use sel810_emu::sim::sched::Machine;
//! use sel810_emu::sim::SimFlags;
//!
//! let machine = Machine::new(SimFlags::default());
//! machine.load(0, &std::fs::read("boot.bin").unwrap());
//! machine.start();
//! while !machine.is_halted() {
//!     std::thread::sleep(std::time::Duration::from_millis(50));
//! }
//! println!("{}", machine.halt_report().unwrap());
//! ```
//!
//! Single-threaded callers can drive a [`sim::Simulator`] directly; see
//! the [`sim`] module docs.

#![warn(missing_docs)]

pub mod ast;
pub mod sim;
