//! Simulator for a microcoded accumulator machine.
//!
//! The machine is modelled in two layers. [`DataPath`] owns the register
//! file, the data memory and the two I/O ports, and executes selector and
//! signal sequences one microstep at a time. [`ControlUnit`] latches
//! instruction records and drives the data path through the four phases of
//! every instruction: instruction fetch, address fetch, operand fetch and
//! execute. Ticks are externally observable; the control unit can be
//! advanced one microstep at a time for inspection.
//!
//! Instruction memory stores decoded [`Instruction`] records rather than
//! packed words. The instruction set itself lives in [`isa`].
//!
//! [`DataPath`]: struct.DataPath.html
//! [`ControlUnit`]: struct.ControlUnit.html
//! [`Instruction`]: isa/struct.Instruction.html
//! [`isa`]: isa/index.html

pub mod isa;

mod control;
mod datapath;
mod error;

pub use control::{ControlUnit, RunStats, TickResult};
pub use datapath::{AluFlags, AluIn, AluOp, AluOut, DataPath, DataSelector};
pub use error::MachineError;
pub use isa::{Address, BaseRegister, Instruction, Opcode};

/// Machine word. Every register and every memory cell holds exactly one.
///
/// Arithmetic on words is two's-complement modulo 2³²; the wrap-around is
/// applied in the single ALU output path of the data path.
pub type Word = i32;

/// Upper bound accepted for either memory size.
pub const MAX_MEMORY_SIZE: usize = 1 << 24;
