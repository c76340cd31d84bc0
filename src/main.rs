// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use clap::{Parser, Subcommand};
use serialport::{DataBits, Parity, StopBits};
use thiserror::Error;
use boardlink::files::{DeviceFileSystem, FsError};
use boardlink::protocol::DEFAULT_FLASH_TARGET;
use boardlink::raw_repl::SessionOptions;
use boardlink::serial::{RealSerialPort, SerialLink};
use boardlink::transfer::{FlashTransfer, TransferError, TransferEvent, TransferJob, TransferOptions};

#[derive(Parser)]
#[command(name = "boardlink")]
#[command(about = "File management and flashing for MicroPython boards over a serial line", long_about = None)]
#[command(disable_help_subcommand = true)]
struct Cli {
    /// Serial port to use (e.g., /dev/ttyUSB0 or COM1)
    #[arg(short, long)]
    port: String,

    /// Baud rate
    #[arg(short, long, default_value = "115200")]
    baud: u32,

    /// Data bits (5, 6, 7, or 8)
    #[arg(long, default_value = "8", value_name="BITS")]
    data_bits: u8,

    /// Parity (none, odd, or even)
    #[arg(long, default_value = "none")]
    parity: String,

    /// Stop bits (1 or 2)
    #[arg(long, default_value = "1", value_name="BITS")]
    stop_bits: u8,

    /// Deadline in milliseconds for every answer from the board
    #[arg(long, default_value = "5000", value_name = "MS")]
    timeout_ms: u64,

    /// Enable debug output
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List a directory on the board
    Ls {
        #[arg(default_value = "/")]
        dir: String,
        /// Show file sizes
        #[arg(short, long)]
        long: bool,
    },
    /// Copy a file from the board
    Get {
        remote: String,
        /// Defaults to the remote file name in the current directory
        local: Option<PathBuf>,
    },
    /// Copy a file to the board
    Put {
        local: PathBuf,
        /// Defaults to the local file name
        remote: Option<String>,
    },
    /// Remove a file from the board
    Rm {
        path: String,
    },
    /// Create a directory on the board
    Mkdir {
        dir: String,
        #[arg(long)]
        exists_ok: bool,
    },
    /// Remove a directory and everything below it
    Rmdir {
        dir: String,
        #[arg(long)]
        missing_ok: bool,
    },
    /// Run a local script on the board
    Run {
        file: PathBuf,
        /// Start the script without waiting for its output
        #[arg(long)]
        no_wait: bool,
    },
    /// List every file below a directory
    Tree {
        #[arg(default_value = "/")]
        root: String,
    },
    /// Show the firmware version
    Version,
    /// Write a script into flash using the framed protocol
    Flash {
        file: PathBuf,
        #[arg(long, default_value = DEFAULT_FLASH_TARGET)]
        target: String,
    },
    /// Delete a file from flash using the framed protocol
    FlashRm {
        path: String,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Fs(#[from] FsError),
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn parse_data_bits(bits: u8) -> Result<DataBits, String> {
    match bits {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        _ => Err(format!("Invalid data bits: {}. Must be 5, 6, 7, or 8", bits)),
    }
}

fn parse_parity(parity: &str) -> Result<Parity, String> {
    match parity.to_lowercase().as_str() {
        "none" => Ok(Parity::None),
        "odd" => Ok(Parity::Odd),
        "even" => Ok(Parity::Even),
        _ => Err(format!("Invalid parity: {}. Must be 'none', 'odd', or 'even'", parity)),
    }
}

fn parse_stop_bits(bits: u8) -> Result<StopBits, String> {
    match bits {
        1 => Ok(StopBits::One),
        2 => Ok(StopBits::Two),
        _ => Err(format!("Invalid stop bits: {}. Must be 1 or 2", bits)),
    }
}

fn init_logging(debug: bool) {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if debug {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let settings = parse_data_bits(cli.data_bits).and_then(|data_bits| {
        Ok((data_bits, parse_parity(&cli.parity)?, parse_stop_bits(cli.stop_bits)?))
    });
    let (data_bits, parity, stop_bits) = match settings {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    log::info!("Opening serial port: {}", cli.port);
    log::debug!("Settings: {} baud, {:?}, {:?}, {:?}", cli.baud, data_bits, parity, stop_bits);

    let serial_port = match RealSerialPort::open(&cli.port, cli.baud, data_bits, parity, stop_bits) {
        Ok(port) => port,
        Err(e) => {
            eprintln!("Failed to open serial port: {}", e);
            std::process::exit(1);
        }
    };
    let link = Arc::new(SerialLink::new(cli.port.clone(), Box::new(serial_port)));

    let options = SessionOptions {
        timeout: Duration::from_millis(cli.timeout_ms),
        ..SessionOptions::default()
    };

    if let Err(e) = execute(cli.command, link, options) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn execute(command: Commands, link: Arc<SerialLink>, options: SessionOptions) -> Result<(), CliError> {
    let fs = DeviceFileSystem::new(link.clone(), options);

    match command {
        Commands::Ls { dir, long } => {
            for entry in fs.ls(&dir, long)? {
                match entry.size {
                    Some(size) => println!("{:>8}  {}", size, entry.name),
                    None => println!("{}", entry.name),
                }
            }
        }
        Commands::Get { remote, local } => {
            let local = local.unwrap_or_else(|| default_local_name(&remote));
            fs.get_to(&remote, &local)?;
            println!("Copied {} to {}", remote, local.display());
        }
        Commands::Put { local, remote } => {
            let remote = fs.put_from(&local, remote.as_deref())?;
            println!("Copied {} to {}", local.display(), remote);
        }
        Commands::Rm { path } => fs.rm(&path)?,
        Commands::Mkdir { dir, exists_ok } => fs.mkdir(&dir, exists_ok)?,
        Commands::Rmdir { dir, missing_ok } => fs.rmdir(&dir, missing_ok)?,
        Commands::Run { file, no_wait } => {
            if let Some(output) = fs.run(&file, !no_wait)? {
                print!("{}", String::from_utf8_lossy(&output));
            }
        }
        Commands::Tree { root } => {
            for path in fs.tree(&root)? {
                println!("{}", path);
            }
        }
        Commands::Version => {
            for (field, value) in fs.version()? {
                println!("{}: {}", field, value);
            }
        }
        Commands::Flash { file, target } => {
            let job = TransferJob::from_file(&file, target)?;
            FlashTransfer::new(&link, TransferOptions::default()).send(job, &mut print_event)?;
        }
        Commands::FlashRm { path } => {
            FlashTransfer::new(&link, TransferOptions::default()).delete(&path, &mut print_event)?;
        }
    }
    Ok(())
}

fn default_local_name(remote: &str) -> PathBuf {
    let name = Path::new(remote)
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| remote.into());
    PathBuf::from(name)
}

fn print_event(event: TransferEvent) {
    match event {
        TransferEvent::Progress(percent) => println!("Progress: {:.0}%", percent),
        TransferEvent::Retrying { command, attempt } => println!("Resending {} (attempt {})", command, attempt + 1),
        TransferEvent::Complete => println!("Transfer complete"),
        TransferEvent::Failed(message) => eprintln!("Transfer failed: {}", message),
    }
}
