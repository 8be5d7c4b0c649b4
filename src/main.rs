use std::fs::{self, File};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::error;

use m210::note::decode_notes;
use m210::svg::write_svg;
use m210::{Device, Result, Session};

/// Driver and toolchain for the Pegasus Mobile NoteTaker M210.
#[derive(Debug, Parser)]
#[command(name = "m210", about = "Talk to a Pegasus Mobile NoteTaker M210")]
struct Args {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Debug, Subcommand)]
enum CliCommand {
    /// Print firmware/analog/pad versions, operating mode and used memory.
    Info,
    /// Download all stored notes as a raw payload stream.
    Dump {
        /// Where to write the raw N*62 byte payload stream. Defaults to stdout.
        #[arg(long = "output-file", value_name = "FILE")]
        output_file: Option<PathBuf>,
    },
    /// Decode a downloaded payload stream into one SVG file per note.
    Convert {
        /// Raw payload stream to decode. Defaults to stdin.
        #[arg(long = "input-file", value_name = "FILE")]
        input_file: Option<PathBuf>,
        /// Directory to write `m210_note_<number>.svg` files into.
        #[arg(long = "output-dir", value_name = "DIR", default_value = ".")]
        output_dir: PathBuf,
        /// Overwrite existing SVG files instead of failing.
        #[arg(long)]
        overwrite: bool,
    },
    /// Erase all notes stored on the device.
    Delete,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let result = match args.command {
        CliCommand::Info => run_info(),
        CliCommand::Dump { output_file } => run_dump(output_file),
        CliCommand::Convert { input_file, output_dir, overwrite } => {
            run_convert(input_file, output_dir, overwrite)
        }
        CliCommand::Delete => run_delete(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("m210: {e}");
            eprintln!("m210: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run_info() -> Result<()> {
    let device = Device::find()?;
    let session = Session::new(&device);
    let info = session.info()?;
    println!("Firmware version: {}", info.firmware_version);
    println!("Analog version: {}", info.analog_version);
    println!("Pad version: {}", info.pad_version);
    println!("Operating mode: {}", info.mode);
    println!("Used memory: {}", info.used_memory);
    Ok(())
}

fn run_dump(output_file: Option<PathBuf>) -> Result<()> {
    let device = Device::find()?;
    let session = Session::new(&device);

    let mut bytes = Vec::new();
    session.download(&mut bytes)?;

    match output_file {
        Some(path) => fs::write(path, &bytes)?,
        None => io::stdout().write_all(&bytes)?,
    }
    Ok(())
}

fn run_convert(input_file: Option<PathBuf>, output_dir: PathBuf, overwrite: bool) -> Result<()> {
    let bytes = match input_file {
        Some(path) => fs::read(path)?,
        None => {
            let mut buf = Vec::new();
            io::Read::read_to_end(&mut io::stdin(), &mut buf)?;
            buf
        }
    };

    fs::create_dir_all(&output_dir)?;

    for note in decode_notes(&bytes)? {
        if note.paths.is_empty() {
            continue;
        }
        let path = output_dir.join(format!("m210_note_{}.svg", note.number));
        let mut file = if overwrite {
            File::create(&path)?
        } else {
            File::options().write(true).create_new(true).open(&path)?
        };
        write_svg(&note, &mut file)?;
    }
    Ok(())
}

fn run_delete() -> Result<()> {
    let device = Device::find()?;
    let session = Session::new(&device);
    session.erase()
}
