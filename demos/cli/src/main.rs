// Copyright 2024 Kevin Ludwig
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A thin command-line demo for the `fat32` engine: mount an image file
//! under a fixed name and run one filesystem operation against it. This
//! is glue (spec §1, "out of scope"); none of the engine's invariants
//! depend on it.

use std::fs;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::error;

use fat32::{Fs, O_CREATE, O_READ, O_TRUNC, O_WRITE};
use fat32_bdev_std::FileBlockDevice;

const MOUNT_NAME: &str = "img";

#[derive(Parser)]
#[command(about = "Mount a FAT32 image file and run one operation against it")]
struct Args {
    /// Path to the disk image (or partition image) on the host filesystem.
    image: String,

    /// MBR partition index to mount, or 0 for an unpartitioned image.
    #[arg(long, default_value_t = 0)]
    partition: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List a directory's entries.
    Ls { path: String },
    /// Print a file's contents to stdout.
    Cat { path: String },
    /// Copy a host file into the image, creating or truncating it.
    Put { local: String, path: String },
    /// Remove a file or empty directory.
    Rm { path: String },
    /// Create a directory.
    Mkdir { path: String },
    /// Print one entry's decoded metadata.
    Stat { path: String },
}

fn run(args: Args) -> fat32::Result<()> {
    let device = FileBlockDevice::open(&args.image).map_err(|e| {
        error!("opening {:?}: {e}", args.image);
        fat32::Error::Io(fat32::IoError::Read)
    })?;

    let mut fs = Fs::new();
    fs.mount_default_clock(MOUNT_NAME, Box::new(device), args.partition)?;

    match args.command {
        Command::Ls { path } => {
            let mut dir = fs.dir_open(&mount_path(&path))?;
            loop {
                match fs.dir_read(&mut dir) {
                    Ok(entry) => {
                        let kind = if entry.is_dir { "d" } else { "-" };
                        println!("{kind} {:>10}  {}", entry.size, entry.name);
                    }
                    Err(fat32::Error::Eof) => break,
                    Err(e) => return Err(e),
                }
            }
        }
        Command::Cat { path } => {
            let mut file = fs.open(&mount_path(&path), O_READ)?;
            let mut buf = [0u8; 4096];
            loop {
                let n = fs.read(&mut file, &mut buf)?;
                if n == 0 {
                    break;
                }
                print!("{}", String::from_utf8_lossy(&buf[..n]));
            }
            fs.close(file)?;
        }
        Command::Put { local, path } => {
            let data = fs::read(&local).map_err(|e| {
                error!("reading {local:?}: {e}");
                fat32::Error::Io(fat32::IoError::Read)
            })?;
            let mut file = fs.open(&mount_path(&path), O_WRITE | O_CREATE | O_TRUNC)?;
            fs.write(&mut file, &data)?;
            fs.close(file)?;
        }
        Command::Rm { path } => fs.unlink(&mount_path(&path))?,
        Command::Mkdir { path } => fs.dir_create(&mount_path(&path))?,
        Command::Stat { path } => {
            let entry = fs.stat(&mount_path(&path))?;
            println!("{}  size={}  dir={}", entry.name, entry.size, entry.is_dir);
        }
    }

    fs.sync(MOUNT_NAME)?;
    fs.umount(MOUNT_NAME)
}

/// The CLI addresses paths relative to the image root (`a/b.txt`); the
/// engine's paths are always `/mount/...` (spec §4.4).
fn mount_path(path: &str) -> String {
    let trimmed = path.trim_start_matches('/');
    if trimmed.is_empty() {
        format!("/{MOUNT_NAME}")
    } else {
        format!("/{MOUNT_NAME}/{trimmed}")
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e} ({})", e.name());
            ExitCode::FAILURE
        }
    }
}
