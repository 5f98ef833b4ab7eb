use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::DEFAULT_CONFIG_FILE;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Increase log verbosity (-v: info, -vv: debug). `RUST_LOG` takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Build a .pkg.tar.xz package from a package description.
    #[command(alias = "b")]
    Build {
        /// Package description file.
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,

        /// Exact output path. Overrides `output_dir` and `output_file` from the description.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Directory for the package file, named `<name>-<version>-<release>-<arch>.pkg.tar.xz`.
        #[arg(long, conflicts_with = "output")]
        output_dir: Option<PathBuf>,
    },

    /// Print the uncompressed .MTREE manifest the package would contain.
    #[command(alias = "m")]
    Manifest {
        /// Package description file.
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },

    /// Print the .PKGINFO record the package would contain.
    #[command(alias = "i")]
    Pkginfo {
        /// Package description file.
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },
}

/// Parses command-line arguments using `clap`.
///
/// Parse failures, `--help` and `--version` come back as a [`clap::Error`]
/// for the binary to print with the right exit code.
pub fn run() -> Result<Args, Box<dyn std::error::Error>> {
    Ok(Args::try_parse()?)
}
