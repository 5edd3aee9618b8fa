use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::ArchiveOptions;

#[derive(Parser, Debug)]
#[command(name = "zipdocs")]
#[command(version)]
#[command(about = "Browse and build ZIP archives as a document tree", long_about = None)]
#[command(after_help = "Examples:\n  \
  zipdocs ls photos.zip / -r                    list every entry\n  \
  zipdocs cat https://example.com/a.zip /a.txt  print one entry of a remote ZIP\n  \
  zipdocs pack out.zip notes/ todo.txt          build an archive from files")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Read and copy buffer size in bytes
    #[arg(long, global = true, value_name = "BYTES", default_value_t = 64 * 1024)]
    pub chunk_size: usize,

    /// DEFLATE level for written entries (0-9)
    #[arg(long, global = true, value_name = "LEVEL", default_value_t = 6)]
    pub level: u32,

    /// Log archive lifecycle events to stderr
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the children of a directory
    Ls {
        /// ZIP file path or HTTP URL
        archive: String,
        /// Directory inside the archive
        #[arg(default_value = "/")]
        path: String,
        /// Descend into subdirectories
        #[arg(short = 'r', long)]
        recursive: bool,
    },
    /// Show the metadata of one entry
    Stat {
        archive: String,
        path: String,
    },
    /// Write an entry's content to stdout
    Cat {
        archive: String,
        path: String,
        /// Start at this byte of the uncompressed content
        #[arg(long, default_value_t = 0)]
        offset: u64,
        /// Stop after this many bytes
        #[arg(long)]
        length: Option<u64>,
    },
    /// Build a new archive from files and directories
    Pack {
        /// Archive to create (overwritten if present)
        output: String,
        /// Files and directories to add
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
}

impl Cli {
    pub fn options(&self) -> ArchiveOptions {
        ArchiveOptions::default()
            .chunk_size(self.chunk_size)
            .compression_level(self.level)
    }

    pub fn log_filter(&self) -> &'static str {
        if self.verbose { "zipdocs=debug" } else { "zipdocs=warn" }
    }
}
