use std::path::PathBuf;

use thiserror::Error;

/// The primary error type for all operations in the `archpack` crate.
///
/// Every variant is fatal for the build that raised it.
#[derive(Debug, Error)]
pub enum PackageError {
    /// A required package field was not supplied.
    #[error("{0} must be specified")]
    MissingField(&'static str),

    /// A package field was supplied but violates its character rules.
    #[error("invalid {field} '{value}': {reason}")]
    InvalidField {
        field: &'static str,
        value: String,
        reason: &'static str,
    },

    /// The payload root does not exist or is not a directory.
    #[error("root directory '{}' does not exist", .0.display())]
    RootNotFound(PathBuf),

    /// A permission mode outside `0..=0o777`.
    #[error("illegal mode {0:o}")]
    InvalidMode(u32),

    /// A permission rule carried a glob that does not compile.
    #[error("invalid path pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        source: globset::Error,
    },

    /// Two entries claimed the same archive path.
    #[error("duplicate path {0}")]
    DuplicatePath(String),

    /// The payload contains something that is neither a file, a directory nor a symlink.
    #[error("unsupported file type at '{}'", .0.display())]
    UnsupportedType(PathBuf),

    /// An error occurred when trying to strip the payload root from a walked path.
    #[error("could not strip prefix '{}' from path '{}'", .prefix.display(), .path.display())]
    StripPrefix { prefix: PathBuf, path: PathBuf },

    /// Archive member names must be valid UTF-8 to be listed in the manifest.
    #[error("path '{}' is not valid UTF-8", .0.display())]
    NonUtf8Path(PathBuf),

    /// A payload file changed length between digesting and archiving.
    #[error("file '{}' changed size while packaging (expected {expected} bytes, found {actual})", .path.display())]
    ContentChanged {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    /// An error from the directory walker while enumerating the payload.
    #[error("failed to walk payload tree: {0}")]
    Walk(#[from] walkdir::Error),

    /// The package description file could not be parsed.
    #[error("invalid package description '{}': {source}", .path.display())]
    Config {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// An I/O error occurred, typically while reading or writing a file.
    /// Includes the path where the error happened.
    #[error("I/O error on path '{}': {source}", .path.display())]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

impl PackageError {
    pub(crate) fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        PackageError::Io {
            source,
            path: path.into(),
        }
    }
}

// Generic IO error conversion that doesn't require a path
impl From<std::io::Error> for PackageError {
    fn from(err: std::io::Error) -> Self {
        PackageError::Io {
            source: err,
            path: PathBuf::new(),
        }
    }
}
