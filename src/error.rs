use std::error::Error as StdError;
use std::fmt;

use crate::Word;

/// Runtime failure raised by the machine.
///
/// `HALT` is a normal terminator and never surfaces here; callers can rely
/// on an `Err` meaning the simulation went wrong. Errors raised while an
/// instruction is in flight carry the address of that instruction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MachineError {
    /// The instruction pointer left instruction memory.
    InstructionAddress { address: Word },
    /// A read or write signal addressed a cell outside data memory.
    DataAddress { address: Word, at: usize },
    /// `PUT` with a word outside the signed byte range.
    ByteRange { value: Word, at: usize },
    /// An address-bearing instruction reached execution without an address.
    MissingAddress { at: usize },
    /// Control-flow opcode with a data address, or the other way around.
    OperandKind { at: usize },
    /// The program does not fit into instruction memory.
    ProgramTooLarge { size: usize, capacity: usize },
    /// The data image does not fit into data memory.
    DataTooLarge { size: usize, capacity: usize },
    /// A requested memory size exceeds the addressable maximum.
    MemoryTooLarge { size: usize },
    /// The tick budget ran out before `HALT`.
    TickLimit { limit: u64 },
}

impl fmt::Display for MachineError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            MachineError::InstructionAddress { address } => {
                write!(f, "invalid instruction address {}", address)
            }
            MachineError::DataAddress { address, at } => {
                write!(f, "invalid data address {} at instruction {}", address, at)
            }
            MachineError::ByteRange { value, at } => write!(
                f,
                "value {} at instruction {} does not fit an output byte",
                value, at
            ),
            MachineError::MissingAddress { at } => {
                write!(f, "unlinked address operand at instruction {}", at)
            }
            MachineError::OperandKind { at } => {
                write!(f, "operand kind mismatch at instruction {}", at)
            }
            MachineError::ProgramTooLarge { size, capacity } => write!(
                f,
                "program of {} instructions exceeds instruction memory of {}",
                size, capacity
            ),
            MachineError::DataTooLarge { size, capacity } => write!(
                f,
                "data image of {} words exceeds data memory of {}",
                size, capacity
            ),
            MachineError::MemoryTooLarge { size } => {
                write!(f, "memory size {} exceeds the addressable maximum", size)
            }
            MachineError::TickLimit { limit } => {
                write!(f, "tick budget of {} exhausted before HALT", limit)
            }
        }
    }
}

impl StdError for MachineError {}
