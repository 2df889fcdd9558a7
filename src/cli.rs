//! CLI argument parsing with clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rkndaemon")]
#[command(author, version, about = "RKN registry ingestion daemon")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file path (default: ./rkndaemon.yaml, then /etc/rkndaemon/config.yaml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose mode (debug output)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

impl Cli {
    /// Log filter: `-v` and `-q` win, then `RUST_LOG` directives, then info.
    pub fn log_filter(&self, rust_log: Option<&str>) -> EnvFilter {
        let level = if self.verbose {
            LevelFilter::DEBUG
        } else if self.quiet {
            LevelFilter::ERROR
        } else if let Some(filter) = rust_log.and_then(|dirs| EnvFilter::try_new(dirs).ok()) {
            return filter;
        } else {
            LevelFilter::INFO
        };
        EnvFilter::default().add_directive(level.into())
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the ingestion daemon
    Run {
        /// One-shot mode: run every enabled feed once, then exit
        #[arg(long)]
        cron: bool,
    },

    /// Classify a local registry document and publish the lists
    Classify {
        /// Dump or social register, as XML or as the zip archive
        file: PathBuf,

        /// Output directory (default: output_dir from the config)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Treat the document as the social resources register
        #[arg(long)]
        social: bool,
    },

    /// Make an ipset match a list of IPv4 addresses
    IpsetSync {
        /// File with one IPv4 address per line
        file: PathBuf,

        /// Name of the ipset
        set: String,

        /// Only add addresses, never delete (also NOCLEAR=1)
        #[arg(long)]
        no_clear: bool,
    },

    /// Show version
    Version,
}
