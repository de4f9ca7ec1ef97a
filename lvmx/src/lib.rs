//! On-disk container for linked machine programs.
//!
//! A [`Program`] pairs the instruction image with the data image. On disk
//! it is a single JSON object with two fields:
//!
//! ```text
//! {
//!   "code": [
//!     { "opcode": "NOP", "debug": "program start", "index": 0 },
//!     { "opcode": "LD", "address": { "mode": "absolute", "value": 0 }, "index": 1 },
//!     ...
//!   ],
//!   "data": [ 42, 0, ... ]
//! }
//! ```
//!
//! Every code record carries the opcode name, an `address` object for
//! address-bearing opcodes (`mode` plus either `value` or `offset` and
//! `register`), an optional free-form `debug` annotation and an `index`
//! that is written for readability and ignored on load. The reader restores
//! the enum identities exactly; unknown opcode, mode or register strings
//! are load failures, as is an address operand that does not match its
//! opcode.
//!
//! [`Program`]: struct.Program.html

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::{error, fmt};

use lvm::{Address, Instruction, Opcode, Word};

/// A linked program: instruction image plus data image.
#[derive(Debug, PartialEq, Clone)]
pub struct Program {
    code: Vec<Instruction>,
    data: Vec<Word>,
}

impl Program {
    pub fn new(code: Vec<Instruction>, data: Vec<Word>) -> Program {
        Program { code, data }
    }

    pub fn code(&self) -> &[Instruction] {
        &self.code[..]
    }

    pub fn data(&self) -> &[Word] {
        &self.data[..]
    }

    pub fn into_parts(self) -> (Vec<Instruction>, Vec<Word>) {
        (self.code, self.data)
    }
}

/// Failure while reading or writing a code file.
#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    /// The file is not valid JSON or names an unknown opcode, addressing
    /// mode or register.
    Json(serde_json::Error),
    /// Structurally valid JSON describing an impossible instruction.
    Malformed {
        index: usize,
        opcode: Opcode,
        reason: &'static str,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "code file i/o failed: {}", err),
            Error::Json(err) => write!(f, "malformed code file: {}", err),
            Error::Malformed {
                index,
                opcode,
                reason,
            } => write!(f, "instruction {} ({}) {}", index, opcode, reason),
        }
    }
}

impl error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Error {
        Error::Json(err)
    }
}

#[derive(Serialize, Deserialize)]
struct InstructionRecord {
    opcode: Opcode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    address: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    debug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    index: Option<usize>,
}

#[derive(Serialize, Deserialize)]
struct CodeFile {
    code: Vec<InstructionRecord>,
    data: Vec<Word>,
}

/// Reads and validates a program.
pub fn read<R: Read>(reader: &mut R) -> Result<Program, Error> {
    let file: CodeFile = serde_json::from_reader(reader)?;
    let code = file
        .code
        .into_iter()
        .map(|record| Instruction {
            opcode: record.opcode,
            address: record.address,
            debug: record.debug,
        })
        .collect();
    let program = Program {
        code,
        data: file.data,
    };
    validate(&program)?;
    Ok(program)
}

/// Writes a program as pretty-printed JSON.
pub fn write<W: Write>(writer: &mut W, program: &Program) -> Result<(), Error> {
    let file = CodeFile {
        code: program
            .code
            .iter()
            .enumerate()
            .map(|(index, instruction)| InstructionRecord {
                opcode: instruction.opcode,
                address: instruction.address,
                debug: instruction.debug.clone(),
                index: Some(index),
            })
            .collect(),
        data: program.data.clone(),
    };
    serde_json::to_writer_pretty(&mut *writer, &file)?;
    writer.write_all(b"\n")?;
    Ok(())
}

fn validate(program: &Program) -> Result<(), Error> {
    for (index, instruction) in program.code().iter().enumerate() {
        let opcode = instruction.opcode;
        match instruction.address {
            None if opcode.takes_address() => {
                return Err(Error::Malformed {
                    index,
                    opcode,
                    reason: "is missing its address operand",
                });
            }
            Some(_) if !opcode.takes_address() => {
                return Err(Error::Malformed {
                    index,
                    opcode,
                    reason: "must not carry an address operand",
                });
            }
            Some(address) => {
                let control_flow = match address {
                    Address::ControlFlow { .. } => true,
                    _ => false,
                };
                if opcode.is_control_flow() != control_flow {
                    return Err(Error::Malformed {
                        index,
                        opcode,
                        reason: "carries the wrong kind of address operand",
                    });
                }
            }
            None => {}
        }
    }
    Ok(())
}

pub trait ReadProgramExt: Read + Sized {
    fn read_program(&mut self) -> Result<Program, Error> {
        read(self)
    }
}

impl<R: Read + Sized> ReadProgramExt for R {}

pub trait WriteProgramExt: Write + Sized {
    fn write_program(&mut self, program: &Program) -> Result<(), Error> {
        write(self, program)
    }
}

impl<W: Write + Sized> WriteProgramExt for W {}

pub fn read_file<P: AsRef<Path>>(path: P) -> Result<Program, Error> {
    BufReader::new(File::open(path)?).read_program()
}

pub fn write_file<P: AsRef<Path>>(path: P, program: &Program) -> Result<(), Error> {
    BufWriter::new(File::create(path)?).write_program(program)
}
