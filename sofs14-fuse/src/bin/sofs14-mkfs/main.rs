mod cli;

use std::error::Error;
use std::fs::OpenOptions;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use clap::Parser;
use cli::Cli;
use sofs14::{BlockDevice, SofsFileSystem, BLOCK_SIZE};
use sofs14_fuse::BlockFile;

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("sofs14-mkfs: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), Box<dyn Error>> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(cli.blocks.is_some())
        .open(&cli.image)?;
    if let Some(blocks) = cli.blocks {
        file.set_len(blocks as u64 * BLOCK_SIZE as u64)?;
    }

    let size = file.metadata()?.len();
    if size == 0 || size % BLOCK_SIZE as u64 != 0 {
        return Err("support file size is not a whole number of blocks".into());
    }
    let n_total = u32::try_from(size / BLOCK_SIZE as u64).map_err(|_| "support file too large")?;

    if !cli.quiet {
        println!(
            "Installing a SOFS14 file system in {} ({n_total} blocks)",
            cli.image.display()
        );
    }
    log::info!("image={:?} inodes={} zero={}", cli.image, cli.inodes, cli.zero);

    let device: Arc<dyn BlockDevice> = Arc::new(BlockFile(Mutex::new(file)));
    SofsFileSystem::format(&device, n_total, cli.inodes, &cli.name, cli.zero)?;

    if !cli.quiet {
        println!("Formatting concluded.");
    }
    Ok(())
}
