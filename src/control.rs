use log::debug;

use crate::datapath::{AluFlags, AluIn, AluOp, AluOut, DataPath, DataSelector};
use crate::{Address, BaseRegister, Instruction, MachineError, Opcode, MAX_MEMORY_SIZE};

/// Outcome of advancing the control unit by one tick.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TickResult {
    /// The current instruction has more microsteps to run.
    Busy,
    /// The current instruction retired; the next tick starts a fetch.
    Retired,
    /// `HALT` was reached and the simulation is over.
    Halted,
}

/// Totals reported by [`ControlUnit::run`](struct.ControlUnit.html#method.run).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct RunStats {
    pub instructions: u64,
    pub ticks: u64,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Phase {
    Fetch,
    AddressFetch,
    OperandFetch,
    Execute,
}

/// What a phase function did with its tick.
enum Flow {
    /// The tick was spent; the phase continues at the given microstep.
    Tick(u32),
    /// The tick was spent and the phase is complete.
    Done,
    /// `HALT`: no signals were raised, the simulation stops.
    Halt,
}

/// The latched command register: opcode and operand of the instruction
/// currently in flight.
#[derive(Clone, Copy)]
struct Command {
    opcode: Opcode,
    address: Option<Address>,
}

/// Microcoded control unit.
///
/// Each instruction passes through four phases: instruction fetch, address
/// fetch (address-bearing opcodes only), operand fetch (memory-reading
/// opcodes only) and execute. [`tick`] advances exactly one microstep and
/// is the unit of simulated time; [`run`] drives ticks until `HALT` or a
/// runtime failure.
///
/// [`tick`]: #method.tick
/// [`run`]: #method.run
pub struct ControlUnit {
    program: Vec<Instruction>,
    data_path: DataPath,
    command: Option<Command>,
    current: usize,
    phase: Phase,
    phase_tick: u32,
    ticks: u64,
    instructions: u64,
}

impl ControlUnit {
    /// Builds a control unit over the given program and data path. The
    /// program must fit into `instruction_memory_size` cells.
    pub fn new(
        instruction_memory_size: usize,
        program: Vec<Instruction>,
        data_path: DataPath,
    ) -> Result<ControlUnit, MachineError> {
        if instruction_memory_size > MAX_MEMORY_SIZE {
            return Err(MachineError::MemoryTooLarge {
                size: instruction_memory_size,
            });
        }
        if program.len() > instruction_memory_size {
            return Err(MachineError::ProgramTooLarge {
                size: program.len(),
                capacity: instruction_memory_size,
            });
        }
        Ok(ControlUnit {
            program,
            data_path,
            command: None,
            current: 0,
            phase: Phase::Fetch,
            phase_tick: 0,
            ticks: 0,
            instructions: 0,
        })
    }

    pub fn data_path(&self) -> &DataPath {
        &self.data_path
    }

    /// Ticks spent so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Instructions retired so far. `HALT` itself is not counted.
    pub fn instructions(&self) -> u64 {
        self.instructions
    }

    /// Address of the instruction currently in flight.
    pub fn current(&self) -> usize {
        self.current
    }

    /// Advances the machine by one microstep.
    pub fn tick(&mut self) -> Result<TickResult, MachineError> {
        let flow = match self.phase {
            Phase::Fetch => self.fetch_step(),
            Phase::AddressFetch => self.address_step(self.phase_tick),
            Phase::OperandFetch => self.operand_step(),
            Phase::Execute => self.execute_step(self.phase_tick),
        }
        .map_err(|err| self.locate(err))?;

        match flow {
            Flow::Tick(next) => {
                self.ticks += 1;
                self.phase_tick = next;
                Ok(TickResult::Busy)
            }
            Flow::Done => {
                self.ticks += 1;
                self.phase_tick = 0;
                match self.next_phase() {
                    Some(phase) => {
                        self.phase = phase;
                        Ok(TickResult::Busy)
                    }
                    None => {
                        self.retire();
                        Ok(TickResult::Retired)
                    }
                }
            }
            Flow::Halt => Ok(TickResult::Halted),
        }
    }

    /// Runs the cycle to the next instruction boundary.
    pub fn step_instruction(&mut self) -> Result<TickResult, MachineError> {
        loop {
            match self.tick()? {
                TickResult::Busy => continue,
                boundary => return Ok(boundary),
            }
        }
    }

    /// Runs until `HALT`, failing once `tick_limit` ticks have been spent.
    pub fn run(&mut self, tick_limit: u64) -> Result<RunStats, MachineError> {
        loop {
            if self.ticks >= tick_limit {
                return Err(MachineError::TickLimit { limit: tick_limit });
            }
            if let TickResult::Halted = self.tick()? {
                return Ok(RunStats {
                    instructions: self.instructions,
                    ticks: self.ticks,
                });
            }
        }
    }

    /// Picks the next applicable phase, or `None` at the instruction
    /// boundary. Skipped phases cost no ticks.
    fn next_phase(&self) -> Option<Phase> {
        let opcode = self.command.expect("no instruction in flight").opcode;
        match self.phase {
            Phase::Fetch if opcode.takes_address() => Some(Phase::AddressFetch),
            Phase::Fetch | Phase::AddressFetch if opcode.reads_memory() => {
                Some(Phase::OperandFetch)
            }
            Phase::Fetch | Phase::AddressFetch | Phase::OperandFetch => Some(Phase::Execute),
            Phase::Execute => None,
        }
    }

    fn retire(&mut self) {
        self.instructions += 1;
        self.phase = Phase::Fetch;
        debug!(
            "TICK {:6} [{:4}] {} | {}",
            self.ticks, self.current, self.program[self.current], self.data_path
        );
    }

    fn locate(&self, err: MachineError) -> MachineError {
        match err {
            MachineError::DataAddress { address, .. } => MachineError::DataAddress {
                address,
                at: self.current,
            },
            MachineError::ByteRange { value, .. } => MachineError::ByteRange {
                value,
                at: self.current,
            },
            other => other,
        }
    }

    /// Instruction fetch: latch the command register, increment the
    /// instruction pointer through the ALU.
    fn fetch_step(&mut self) -> Result<Flow, MachineError> {
        let address = self.data_path.instruction_pointer();
        if address < 0 || address as usize >= self.program.len() {
            return Err(MachineError::InstructionAddress { address });
        }
        let instruction = &self.program[address as usize];
        self.command = Some(Command {
            opcode: instruction.opcode,
            address: instruction.address,
        });
        self.current = address as usize;
        self.data_path
            .alu(AluIn::Ip, AluIn::Zero, AluOut::Ip, AluOp::Add, AluFlags::INCREMENT);
        Ok(Flow::Done)
    }

    /// Address fetch: resolve the operand into the address register, or
    /// into the data register for control-flow opcodes.
    fn address_step(&mut self, tick: u32) -> Result<Flow, MachineError> {
        let command = self.command.expect("no instruction in flight");
        let address = match command.address {
            Some(address) => address,
            None => return Err(MachineError::MissingAddress { at: self.current }),
        };
        let control_flow = match address {
            Address::ControlFlow { .. } => true,
            _ => false,
        };
        if command.opcode.is_control_flow() != control_flow {
            return Err(MachineError::OperandKind { at: self.current });
        }
        self.data_path.set_operand(address.operand());
        match address {
            Address::Absolute { .. } => {
                self.data_path
                    .alu(AluIn::Operand, AluIn::Zero, AluOut::Ar, AluOp::Add, AluFlags::NONE);
                Ok(Flow::Done)
            }
            Address::ControlFlow { .. } => {
                self.data_path
                    .alu(AluIn::Operand, AluIn::Zero, AluOut::Dr, AluOp::Add, AluFlags::NONE);
                Ok(Flow::Done)
            }
            Address::Relative { register, .. } => {
                let base = register_selector(register);
                self.data_path
                    .alu(AluIn::Operand, base, AluOut::Ar, AluOp::Add, AluFlags::NONE);
                Ok(Flow::Done)
            }
            Address::RelativeIndirect { register, .. } => match tick {
                0 => {
                    let base = register_selector(register);
                    self.data_path
                        .alu(AluIn::Operand, base, AluOut::Ar, AluOp::Add, AluFlags::NONE);
                    Ok(Flow::Tick(1))
                }
                1 => {
                    self.data_path.select(DataSelector::Memory);
                    self.data_path.read_signal()?;
                    Ok(Flow::Tick(2))
                }
                2 => {
                    self.data_path
                        .alu(AluIn::Dr, AluIn::Zero, AluOut::Ar, AluOp::Add, AluFlags::NONE);
                    Ok(Flow::Done)
                }
                _ => unreachable!(),
            },
        }
    }

    /// Operand fetch: read the addressed word into the data register.
    fn operand_step(&mut self) -> Result<Flow, MachineError> {
        self.data_path.select(DataSelector::Memory);
        self.data_path.read_signal()?;
        Ok(Flow::Done)
    }

    /// Execute: the per-opcode microprogram.
    fn execute_step(&mut self, tick: u32) -> Result<Flow, MachineError> {
        let opcode = self.command.expect("no instruction in flight").opcode;
        let dp = &mut self.data_path;
        match opcode {
            Opcode::ADD => {
                dp.alu(AluIn::Ac, AluIn::Dr, AluOut::Ac, AluOp::Add, AluFlags::NONE);
                Ok(Flow::Done)
            }
            Opcode::SUB => {
                dp.alu(AluIn::Ac, AluIn::Dr, AluOut::Ac, AluOp::Add, AluFlags::SUBTRACT);
                Ok(Flow::Done)
            }
            Opcode::AND => {
                dp.alu(AluIn::Ac, AluIn::Dr, AluOut::Ac, AluOp::And, AluFlags::NONE);
                Ok(Flow::Done)
            }
            Opcode::OR => {
                dp.alu(AluIn::Ac, AluIn::Dr, AluOut::Ac, AluOp::Or, AluFlags::NONE);
                Ok(Flow::Done)
            }
            // Logical complement: left-only ALU pass over the accumulator.
            Opcode::NOT => {
                dp.alu(AluIn::Ac, AluIn::Zero, AluOut::Ac, AluOp::IsZero, AluFlags::NONE);
                Ok(Flow::Done)
            }
            Opcode::ISPOS => {
                dp.alu(AluIn::Ac, AluIn::Zero, AluOut::Ac, AluOp::IsPos, AluFlags::NONE);
                Ok(Flow::Done)
            }
            Opcode::ISNEG => {
                dp.alu(AluIn::Ac, AluIn::Zero, AluOut::Ac, AluOp::IsNeg, AluFlags::NONE);
                Ok(Flow::Done)
            }
            Opcode::ISZERO => {
                dp.alu(AluIn::Ac, AluIn::Zero, AluOut::Ac, AluOp::IsZero, AluFlags::NONE);
                Ok(Flow::Done)
            }
            Opcode::LD => {
                dp.alu(AluIn::Dr, AluIn::Zero, AluOut::Ac, AluOp::Add, AluFlags::NONE);
                Ok(Flow::Done)
            }
            Opcode::ST => match tick {
                0 => {
                    dp.alu(AluIn::Ac, AluIn::Zero, AluOut::Dr, AluOp::Add, AluFlags::NONE);
                    Ok(Flow::Tick(1))
                }
                1 => {
                    dp.select(DataSelector::Memory);
                    dp.write_signal()?;
                    Ok(Flow::Done)
                }
                _ => unreachable!(),
            },
            Opcode::PUT => match tick {
                0 => {
                    dp.alu(AluIn::Ac, AluIn::Zero, AluOut::Dr, AluOp::Add, AluFlags::NONE);
                    Ok(Flow::Tick(1))
                }
                1 => {
                    dp.select(DataSelector::Port);
                    dp.write_signal()?;
                    Ok(Flow::Done)
                }
                _ => unreachable!(),
            },
            Opcode::GET => match tick {
                0 => {
                    dp.select(DataSelector::Port);
                    dp.read_signal()?;
                    Ok(Flow::Tick(1))
                }
                1 => {
                    dp.alu(AluIn::Dr, AluIn::Zero, AluOut::Ac, AluOp::Add, AluFlags::NONE);
                    Ok(Flow::Done)
                }
                _ => unreachable!(),
            },
            Opcode::PUSH => {
                dp.alu(AluIn::Sp, AluIn::Zero, AluOut::Sp, AluOp::Add, AluFlags::DECREMENT);
                Ok(Flow::Done)
            }
            Opcode::POP => {
                dp.alu(AluIn::Sp, AluIn::Zero, AluOut::Sp, AluOp::Add, AluFlags::INCREMENT);
                Ok(Flow::Done)
            }
            Opcode::JMP => {
                dp.alu(AluIn::Dr, AluIn::Zero, AluOut::Ip, AluOp::Add, AluFlags::NONE);
                Ok(Flow::Done)
            }
            Opcode::JZ => {
                if dp.zero() {
                    dp.alu(AluIn::Dr, AluIn::Zero, AluOut::Ip, AluOp::Add, AluFlags::NONE);
                }
                Ok(Flow::Done)
            }
            Opcode::CALL => match tick {
                // Branch target arrived in DR; park it while the stack is
                // set up.
                0 => {
                    dp.alu(AluIn::Dr, AluIn::Zero, AluOut::Br, AluOp::Add, AluFlags::NONE);
                    Ok(Flow::Tick(1))
                }
                // Push the return address.
                1 => {
                    dp.alu(AluIn::Sp, AluIn::Zero, AluOut::Sp, AluOp::Add, AluFlags::DECREMENT);
                    Ok(Flow::Tick(2))
                }
                2 => {
                    dp.alu(AluIn::Ip, AluIn::Zero, AluOut::Dr, AluOp::Add, AluFlags::NONE);
                    Ok(Flow::Tick(3))
                }
                3 => {
                    dp.alu(AluIn::Sp, AluIn::Zero, AluOut::Ar, AluOp::Add, AluFlags::INCREMENT);
                    Ok(Flow::Tick(4))
                }
                4 => {
                    dp.select(DataSelector::Memory);
                    dp.write_signal()?;
                    Ok(Flow::Tick(5))
                }
                // Push the caller's frame pointer.
                5 => {
                    dp.alu(AluIn::Sp, AluIn::Zero, AluOut::Sp, AluOp::Add, AluFlags::DECREMENT);
                    Ok(Flow::Tick(6))
                }
                6 => {
                    dp.alu(AluIn::Fp, AluIn::Zero, AluOut::Dr, AluOp::Add, AluFlags::NONE);
                    Ok(Flow::Tick(7))
                }
                7 => {
                    dp.alu(AluIn::Sp, AluIn::Zero, AluOut::Ar, AluOp::Add, AluFlags::INCREMENT);
                    Ok(Flow::Tick(8))
                }
                8 => {
                    dp.select(DataSelector::Memory);
                    dp.write_signal()?;
                    Ok(Flow::Tick(9))
                }
                9 => {
                    dp.alu(AluIn::Sp, AluIn::Zero, AluOut::Fp, AluOp::Add, AluFlags::NONE);
                    Ok(Flow::Tick(10))
                }
                10 => {
                    dp.alu(AluIn::Br, AluIn::Zero, AluOut::Ip, AluOp::Add, AluFlags::NONE);
                    Ok(Flow::Done)
                }
                _ => unreachable!(),
            },
            Opcode::RET => match tick {
                // Pop the saved frame pointer.
                0 => {
                    dp.alu(AluIn::Sp, AluIn::Zero, AluOut::Ar, AluOp::Add, AluFlags::INCREMENT);
                    Ok(Flow::Tick(1))
                }
                1 => {
                    dp.select(DataSelector::Memory);
                    dp.read_signal()?;
                    Ok(Flow::Tick(2))
                }
                2 => {
                    dp.alu(AluIn::Dr, AluIn::Zero, AluOut::Fp, AluOp::Add, AluFlags::NONE);
                    Ok(Flow::Tick(3))
                }
                3 => {
                    dp.alu(AluIn::Sp, AluIn::Zero, AluOut::Sp, AluOp::Add, AluFlags::INCREMENT);
                    Ok(Flow::Tick(4))
                }
                // Pop the return address.
                4 => {
                    dp.alu(AluIn::Sp, AluIn::Zero, AluOut::Ar, AluOp::Add, AluFlags::INCREMENT);
                    Ok(Flow::Tick(5))
                }
                5 => {
                    dp.select(DataSelector::Memory);
                    dp.read_signal()?;
                    Ok(Flow::Tick(6))
                }
                6 => {
                    dp.alu(AluIn::Dr, AluIn::Zero, AluOut::Ip, AluOp::Add, AluFlags::NONE);
                    Ok(Flow::Tick(7))
                }
                7 => {
                    dp.alu(AluIn::Sp, AluIn::Zero, AluOut::Sp, AluOp::Add, AluFlags::INCREMENT);
                    Ok(Flow::Done)
                }
                _ => unreachable!(),
            },
            Opcode::NOP => Ok(Flow::Done),
            Opcode::HALT => Ok(Flow::Halt),
        }
    }
}

fn register_selector(register: BaseRegister) -> AluIn {
    match register {
        BaseRegister::SP => AluIn::Sp,
        BaseRegister::FP => AluIn::Fp,
    }
}
