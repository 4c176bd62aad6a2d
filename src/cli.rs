use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "castforge")]
#[command(author, version, about = "Run ffmpeg jobs with progress, workflows and batching")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a single operation described by a JSON job file
    Run {
        /// Operation job file
        #[arg(required = true)]
        file: PathBuf,
    },

    /// Probe a media file and print its metadata as JSON
    Probe {
        /// File to probe
        #[arg(required = true)]
        file: PathBuf,
    },

    /// Run a multi-step workflow described by a JSON job file
    Workflow {
        /// Workflow job file
        #[arg(required = true)]
        file: PathBuf,
    },

    /// Run a JSON array of operations with bounded concurrency
    Batch {
        /// Batch job file
        #[arg(required = true)]
        file: PathBuf,

        /// Maximum number of operations running at once
        #[arg(long)]
        concurrency: Option<usize>,

        /// Retries per operation after its first failure
        #[arg(long)]
        retries: Option<u32>,

        /// Delay before a failed operation is retried, in milliseconds
        #[arg(long)]
        backoff_ms: Option<u64>,
    },

    /// Check that required external tools are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
