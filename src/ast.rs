//! Instruction word decoding.
//!
//! The SEL 810A packs its instruction set into 16-bit words with three
//! special opcode spaces and thirteen direct memory-reference opcodes:
//!
//! ```text
//! o ooo xim aaa aaa aaa - memory reference instruction
//! o ooo xis sss aaa aaa - augmented instruction (opcode 0)
//! o ooo rim sss uuu uuu - unit-addressed instruction (opcodes 11 and 15)
//! ```
//!
//! [`Instr::decode`] turns a raw word into an [`Instr`], which the simulator
//! executes. Words that do not decode to a defined operation are treated as
//! no-ops by the simulator, so `decode` returns `None` for them rather than
//! an error.

/// A decoded instruction word.
///
/// Flag fields use the hardware's names: `x` selects indexed addressing,
/// `i` selects indirect addressing, and `m` selects map (current-page)
/// addressing.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Instr {
    /// An augmented (opcode 0) instruction.
    ///
    /// `sc` is the 4-bit shift count, meaningful only for the shift family
    /// and for IXS (where it acts as an increment).
    Aug {
        /// The augmented operation.
        op: AugOp,
        /// Shift count (bits 9-6).
        sc: u32,
        /// Indirect flag, used by the operand-fetching augmented ops.
        i: bool,
        /// Map flag.
        m: bool,
    },
    /// An external-unit control (opcode 11) instruction.
    Ext {
        /// The control operation.
        op: ExtOp,
        /// Unit number (bits 5-0).
        unit: u8,
        /// Indirect flag.
        i: bool,
        /// Map flag.
        m: bool,
    },
    /// An accumulator/memory peripheral transfer (opcode 15) instruction.
    Xfer {
        /// The transfer operation.
        op: XferOp,
        /// Unit number (bits 5-0).
        unit: u8,
        /// Replace flag: on input ops, `false` clears A before accumulating.
        r: bool,
        /// Indirect flag.
        i: bool,
        /// Map flag.
        m: bool,
    },
    /// A direct memory-reference instruction.
    Mem {
        /// The memory-reference operation.
        op: MemOp,
        /// 9-bit base address field.
        base: u16,
        /// Index flag.
        x: bool,
        /// Indirect flag.
        i: bool,
        /// Map flag.
        m: bool,
    },
}

/// Augmented (opcode 0) operations, selected by the low 6 bits.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum AugOp {
    /// Halt.
    HLT,
    /// Round A (add bit 14 of B into A).
    RNA,
    /// Negate A.
    NEG,
    /// Clear A.
    CLA,
    /// Transfer B to A.
    TBA,
    /// Transfer A to B.
    TAB,
    /// Interchange A and B.
    IAB,
    /// Copy sign of B into carry, clearing B's sign bit.
    CSB,
    /// Right shift arithmetic.
    RSA,
    /// Left shift arithmetic (sign preserved).
    LSA,
    /// Full right arithmetic shift across A and B.
    FRA,
    /// Full left logical shift across A and B.
    FLL,
    /// Full rotate left across A and B.
    FRL,
    /// Right shift logical.
    RSL,
    /// Left shift logical.
    LSL,
    /// Full left arithmetic shift across A and B.
    FLA,
    /// Complement sign of accumulator.
    ASC,
    /// Skip on accumulator sign (two-level skip).
    SAS,
    /// Skip if accumulator zero.
    SAZ,
    /// Skip if accumulator negative.
    SAN,
    /// Skip if accumulator positive.
    SAP,
    /// Skip if no overflow (clears overflow otherwise).
    SOF,
    /// Increment B and skip if positive.
    IBS,
    /// AND B into A.
    ABA,
    /// OR B into A.
    OBA,
    /// Load console switches into A.
    LCS,
    /// Skip if accumulator normalized.
    SNO,
    /// No operation.
    NOP,
    /// Convert number system (two's complement to sign-magnitude).
    CNS,
    /// Turn off interrupt (deferred until the next branch boundary).
    TOI,
    /// Long branch (target in the following word).
    LOB,
    /// Set overflow.
    OVS,
    /// Transfer B to protect register.
    TBP,
    /// Transfer protect register to B.
    TPB,
    /// Transfer B to variable base register.
    TBV,
    /// Transfer variable base register to B.
    TVB,
    /// Store index register (operand address in the following word).
    STX,
    /// Load index register (operand address in the following word).
    LIX,
    /// Select the X register for indexed addressing.
    XPX,
    /// Select the B register for indexed addressing.
    XPB,
    /// Skip if indexed addressing uses B.
    SXB,
    /// Add the shift-count field to X and skip if positive.
    IXS,
    /// Transfer A to index register.
    TAX,
    /// Transfer index register to A.
    TXA,
}

impl AugOp {
    /// Decodes the low 6 bits of an augmented instruction word.
    /// Returns `None` for the undefined codes 44-63.
    pub fn from_code(code: u16) -> Option<Self> {
        use AugOp::*;

        const TABLE: [AugOp; 44] = [
            HLT, RNA, NEG, CLA, TBA, TAB, IAB, CSB, RSA, LSA, FRA,
            FLL, FRL, RSL, LSL, FLA, ASC, SAS, SAZ, SAN, SAP, SOF,
            IBS, ABA, OBA, LCS, SNO, NOP, CNS, TOI, LOB, OVS, TBP,
            TPB, TBV, TVB, STX, LIX, XPX, XPB, SXB, IXS, TAX, TXA,
        ];
        TABLE.get(usize::from(code)).copied()
    }
}

/// External-unit control (opcode 11) operations.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ExtOp {
    /// Command external unit. The command word address follows the
    /// instruction.
    CEU {
        /// Wait mode (blocking) rather than skip mode.
        wait: bool,
    },
    /// Test external unit; skips on an asserted test response.
    TEU,
    /// Sense numbered console switch; skips when the switch is off.
    SNS,
    /// Priority interrupt enable (12-bit mask in the following word).
    PIE,
    /// Priority interrupt disable (12-bit mask in the following word).
    PID,
}

/// Peripheral transfer (opcode 15) operations.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum XferOp {
    /// Accumulator output to peripheral.
    AOP {
        /// Wait mode (blocking) rather than skip mode.
        wait: bool,
    },
    /// Accumulator input from peripheral.
    AIP {
        /// Wait mode (blocking) rather than skip mode.
        wait: bool,
    },
    /// Memory output to peripheral.
    MOP {
        /// Wait mode (blocking) rather than skip mode.
        wait: bool,
    },
    /// Memory input from peripheral.
    MIP {
        /// Wait mode (blocking) rather than skip mode.
        wait: bool,
    },
}

/// Direct memory-reference operations (opcodes 1-10, 12-14).
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum MemOp {
    /// Load A accumulator.
    LAA,
    /// Load B accumulator.
    LBA,
    /// Store A accumulator.
    STA,
    /// Store B accumulator.
    STB,
    /// Add memory (and carry) to A.
    AMA,
    /// Subtract memory (and carry) from A.
    SMA,
    /// Multiply B by memory; product split across A and B.
    MPY,
    /// Divide the A/B dividend by memory.
    DIV,
    /// Branch unconditional.
    BRU,
    /// Store place and branch (subroutine call).
    SPB,
    /// Increment memory and skip on zero.
    IMS,
    /// Compare memory and accumulator (two-level skip).
    CMA,
    /// Add memory to B (no carry).
    AMB,
}

impl Instr {
    /// Decodes an instruction word.
    ///
    /// Returns `None` when the word has no defined operation (undefined
    /// augmented codes, or undefined opcode-11 sub-functions). The simulator
    /// treats these as no-ops.
    pub fn decode(word: i16) -> Option<Self> {
        let w = word as u16;
        let i = w & 0x400 != 0;
        let m = w & 0x200 != 0;

        match (w >> 12) & 15 {
            0 => {
                let op = AugOp::from_code(w & 63)?;
                let sc = u32::from((w >> 6) & 15);
                Some(Instr::Aug { op, sc, i, m })
            }
            11 => {
                let unit = (w & 0x3F) as u8;
                let op = match (w >> 6) & 7 {
                    0 => ExtOp::CEU { wait: false },
                    1 => ExtOp::CEU { wait: true },
                    2 => ExtOp::TEU,
                    4 => ExtOp::SNS,
                    6 if unit == 0 => ExtOp::PIE,
                    6 if unit == 1 => ExtOp::PID,
                    _ => return None,
                };
                Some(Instr::Ext { op, unit, i, m })
            }
            15 => {
                let unit = (w & 0x3F) as u8;
                let r = w & 0x800 != 0;
                let op = match (w >> 6) & 7 {
                    0 => XferOp::AOP { wait: false },
                    1 => XferOp::AOP { wait: true },
                    2 => XferOp::AIP { wait: false },
                    3 => XferOp::AIP { wait: true },
                    4 => XferOp::MOP { wait: false },
                    5 => XferOp::MOP { wait: true },
                    6 => XferOp::MIP { wait: false },
                    7 => XferOp::MIP { wait: true },
                    _ => unreachable!("3-bit sub-function"),
                };
                Some(Instr::Xfer { op, unit, r, i, m })
            }
            op => {
                use MemOp::*;

                let op = match op {
                    1 => LAA,
                    2 => LBA,
                    3 => STA,
                    4 => STB,
                    5 => AMA,
                    6 => SMA,
                    7 => MPY,
                    8 => DIV,
                    9 => BRU,
                    10 => SPB,
                    12 => IMS,
                    13 => CMA,
                    14 => AMB,
                    _ => unreachable!("0, 11 and 15 handled above"),
                };
                let x = w & 0x800 != 0;
                Some(Instr::Mem { op, base: w & 511, x, i, m })
            }
        }
    }

    /// Disassembles an instruction word into its mnemonic form.
    ///
    /// Undefined words render as `???`. This is what halt reports use to
    /// describe the instruction the machine stopped on.
    pub fn disasm(word: i16) -> String {
        match Instr::decode(word) {
            Some(instr) => instr.to_string(),
            None => String::from("???"),
        }
    }
}

impl std::fmt::Display for Instr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Instr::Aug { op, sc, .. } => {
                write!(f, "{op:?}")?;
                if matches!(op, AugOp::RSA | AugOp::LSA | AugOp::FRA | AugOp::FLL
                    | AugOp::FRL | AugOp::RSL | AugOp::LSL | AugOp::FLA | AugOp::IXS)
                {
                    write!(f, " {sc}")?;
                }
                Ok(())
            }
            Instr::Ext { op, unit, .. } => match op {
                ExtOp::CEU { wait } => write!(f, "CEU {unit}{}", wait_suffix(wait)),
                ExtOp::TEU => write!(f, "TEU {unit}"),
                ExtOp::SNS => write!(f, "SNS {}", unit & 15),
                ExtOp::PIE => f.write_str("PIE"),
                ExtOp::PID => f.write_str("PID"),
            },
            Instr::Xfer { op, unit, .. } => {
                let (name, wait) = match op {
                    XferOp::AOP { wait } => ("AOP", wait),
                    XferOp::AIP { wait } => ("AIP", wait),
                    XferOp::MOP { wait } => ("MOP", wait),
                    XferOp::MIP { wait } => ("MIP", wait),
                };
                write!(f, "{name} {unit}{}", wait_suffix(wait))
            }
            Instr::Mem { op, base, x, i, m } => {
                write!(f, "{op:?}{} {base:o}", if i { "*" } else { "" })?;
                if x { f.write_str(",X")? }
                if m { f.write_str(",M")? }
                Ok(())
            }
        }
    }
}

fn wait_suffix(wait: bool) -> &'static str {
    if wait { ",W" } else { "" }
}
