//! Command dispatch for the `archpack` binary.
//!
//! The library never deletes output; this is the call site that owns the
//! destination file. Packages are written to a temporary file next to the
//! final path and only moved into place once the build succeeded.

use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::assembler::{self, PreparedPackage};
use crate::cli::{self, Commands};
use crate::config::{self, PackageConfig};
use crate::PackageError;

/// Mode of a finished package file.
#[cfg(unix)]
const PACKAGE_FILE_MODE: u32 = 0o644;

/// Public entry for running the CLI.
pub fn run_cli_app() -> Result<(), Box<dyn std::error::Error>> {
    let args = cli::run()?;
    init_logging(args.verbose);

    match &args.command {
        Commands::Build { config, output, output_dir } => {
            let config = PackageConfig::load(config)?;
            let path = output_path(&config, output.as_deref(), output_dir.as_deref());
            let package = prepare(&config)?;
            write_package(&package, &path)?;
            println!("{}", path.display());
        }
        Commands::Manifest { config } => {
            let package = prepare(&PackageConfig::load(config)?)?;
            io::stdout().write_all(package.manifest().as_bytes())?;
        }
        Commands::Pkginfo { config } => {
            let package = prepare(&PackageConfig::load(config)?)?;
            io::stdout().write_all(package.pkginfo().as_bytes())?;
        }
    }

    Ok(())
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // A second initialisation (e.g. from tests) is harmless.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).try_init();
}

fn prepare(config: &PackageConfig) -> Result<PreparedPackage, PackageError> {
    let epoch = std::env::var(config::SOURCE_DATE_EPOCH).ok();
    let build_time = config::build_time_from_epoch(epoch.as_deref())?;
    assembler::prepare(&config.to_settings(build_time)?)
}

fn output_path(config: &PackageConfig, output: Option<&Path>, output_dir: Option<&Path>) -> PathBuf {
    if let Some(output) = output {
        return output.to_path_buf();
    }
    let dir = output_dir.map(Path::to_path_buf).unwrap_or_else(|| config.output_dir());
    dir.join(config.output_file_name())
}

/// Writes `package` to `path` through a temporary file that is discarded on failure.
fn write_package(package: &PreparedPackage, path: &Path) -> Result<(), PackageError> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).map_err(|e| PackageError::io(e, &dir))?;

    let mut temp_file = NamedTempFile::new_in(&dir).map_err(|e| PackageError::io(e, &dir))?;
    let writer = BufWriter::with_capacity(1024 * 1024, temp_file.as_file_mut());
    package.write_to(writer)?.flush().map_err(|e| PackageError::io(e, path))?;

    // NamedTempFile creates files as 0600.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        temp_file
            .as_file()
            .set_permissions(fs::Permissions::from_mode(PACKAGE_FILE_MODE))
            .map_err(|e| PackageError::io(e, temp_file.path()))?;
    }

    // Dropping the temp file on an earlier `?` removes it.
    temp_file.persist(path).map_err(|e| PackageError::io(e.error, path))?;
    info!(path = %path.display(), "package written");
    Ok(())
}
