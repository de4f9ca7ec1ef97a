#[macro_use]
extern crate clap;

use clap::Arg;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use lvm::{ControlUnit, DataPath};

#[derive(Debug)]
enum Error {
    Io(std::io::Error, PathBuf),
    Load(lvmx::Error),
    Machine(lvm::MachineError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(err, path) => {
                write!(f, "reading \"{}\" failed: {}", path.display(), err)
            }
            Error::Load(err) => write!(f, "{}", err),
            Error::Machine(err) => write!(f, "simulation failed: {}", err),
        }
    }
}

fn main() {
    env_logger::init();

    let matches = app_from_crate!()
        .arg(
            Arg::with_name("PROGRAM")
                .help("Code file to execute")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::with_name("INPUT")
                .help("File providing the machine's input stream")
                .required(true)
                .index(2),
        )
        .arg(
            Arg::with_name("data_memory")
                .short("m")
                .long("data-memory")
                .takes_value(true)
                .value_name("WORDS")
                .default_value("2048")
                .help("Size of the data memory"),
        )
        .arg(
            Arg::with_name("instruction_memory")
                .long("instruction-memory")
                .takes_value(true)
                .value_name("CELLS")
                .default_value("1024")
                .help("Size of the instruction memory"),
        )
        .arg(
            Arg::with_name("tick_limit")
                .short("t")
                .long("tick-limit")
                .takes_value(true)
                .value_name("TICKS")
                .default_value("1000000")
                .help("Tick budget for the simulation"),
        )
        .get_matches();

    let data_memory =
        value_t!(matches.value_of("data_memory"), usize).unwrap_or_else(|e| e.exit());
    let instruction_memory =
        value_t!(matches.value_of("instruction_memory"), usize).unwrap_or_else(|e| e.exit());
    let tick_limit = value_t!(matches.value_of("tick_limit"), u64).unwrap_or_else(|e| e.exit());

    let program = Path::new(matches.value_of("PROGRAM").unwrap());
    let input = Path::new(matches.value_of("INPUT").unwrap());

    if let Err(err) = execute(program, input, data_memory, instruction_memory, tick_limit) {
        eprintln!("{}", err);
        process::exit(1);
    }
}

fn execute(
    program_path: &Path,
    input_path: &Path,
    data_memory: usize,
    instruction_memory: usize,
    tick_limit: u64,
) -> Result<(), Error> {
    let program = lvmx::read_file(program_path).map_err(Error::Load)?;
    let input = fs::read(input_path).map_err(|err| Error::Io(err, input_path.to_owned()))?;

    let (code, data) = program.into_parts();
    let data_path = DataPath::new(data_memory, &data, input).map_err(Error::Machine)?;
    let mut control = ControlUnit::new(instruction_memory, code, data_path).map_err(Error::Machine)?;

    let stats = control.run(tick_limit).map_err(Error::Machine)?;

    println!(
        "{}",
        String::from_utf8_lossy(control.data_path().output())
    );
    println!(
        "instr_counter: {} ticks: {}",
        stats.instructions, stats.ticks
    );
    Ok(())
}
