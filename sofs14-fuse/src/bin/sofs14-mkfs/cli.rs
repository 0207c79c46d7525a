use std::path::PathBuf;

use clap::Parser;

/// The SOFS14 formatting tool: installs the file system metadata on a
/// support file so it can be mounted as a volume.
#[derive(Parser)]
#[command(version)]
pub struct Cli {
    /// Support file holding the volume
    pub image: PathBuf,

    /// Volume name
    #[arg(long, short, default_value = "SOFS14")]
    pub name: String,

    /// Total number of inodes (0 picks one inode per eight blocks)
    #[arg(long, short, default_value_t = 0)]
    pub inodes: u32,

    /// Create or resize the support file to this many blocks first
    #[arg(long, short)]
    pub blocks: Option<u32>,

    /// Zero-fill the payload of every free data cluster
    #[arg(long, short)]
    pub zero: bool,

    /// Print nothing but errors
    #[arg(long, short)]
    pub quiet: bool,
}
