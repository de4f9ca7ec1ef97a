#[macro_use]
extern crate clap;

use clap::Arg;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

#[derive(Debug)]
enum Error {
    Io(std::io::Error, PathBuf),
    Translate(Box<lvmc::Error>),
    Write(lvmx::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(err, path) => {
                write!(f, "reading \"{}\" failed: {}", path.display(), err)
            }
            Error::Translate(err) => {
                writeln!(f, "translation failed:")?;
                write!(f, "{}", err)
            }
            Error::Write(err) => write!(f, "writing the code file failed: {}", err),
        }
    }
}

fn main() {
    env_logger::init();

    let matches = app_from_crate!()
        .arg(
            Arg::with_name("INPUT")
                .help("Source file to translate")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::with_name("TARGET")
                .help("Code file to write")
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
                .help("Capacity of the data image"),
        )
        .arg(
            Arg::with_name("instruction_memory")
                .long("instruction-memory")
                .takes_value(true)
                .value_name("CELLS")
                .default_value("1024")
                .help("Capacity of the instruction image"),
        )
        .get_matches();

    let data_capacity =
        value_t!(matches.value_of("data_memory"), usize).unwrap_or_else(|e| e.exit());
    let text_capacity =
        value_t!(matches.value_of("instruction_memory"), usize).unwrap_or_else(|e| e.exit());

    let input = Path::new(matches.value_of("INPUT").unwrap());
    let target = Path::new(matches.value_of("TARGET").unwrap());

    if let Err(err) = translate(input, target, data_capacity, text_capacity) {
        eprintln!("{}", err);
        process::exit(1);
    }
}

fn translate(
    input: &Path,
    target: &Path,
    data_capacity: usize,
    text_capacity: usize,
) -> Result<(), Error> {
    let source =
        fs::read_to_string(input).map_err(|err| Error::Io(err, input.to_owned()))?;

    let program = lvmc::translate(&source, data_capacity, text_capacity).map_err(|err| {
        let err = match input.to_str() {
            Some(path) => err.with_path(path),
            None => err,
        };
        Error::Translate(Box::new(err))
    })?;

    lvmx::write_file(target, &program).map_err(Error::Write)?;
    Ok(())
}
