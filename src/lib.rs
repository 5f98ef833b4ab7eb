//! # archpack Core Library
//!
//! This crate builds Arch Linux packages (`.pkg.tar.xz`) from a prepared
//! directory tree. It enumerates the payload, resolves ownership and modes,
//! checksums every file, generates the `.PKGINFO` record and the `.MTREE`
//! manifest, and writes one XZ-compressed tar archive whose members are in
//! a fixed, path-sorted order.
//!
//! It is designed to be used by the `archpack` command-line application, but
//! the library API is self-contained.
//!
//! ## Key Modules
//!
//! - [`assembler`]: validation, enumeration and archive serialization.
//! - [`entry`]: the archive member model and the path-ordered entry set.
//! - [`mtree`]: the `.MTREE` manifest writer.
//! - [`pkginfo`]: package metadata and the `.PKGINFO` record.
//! - [`permissions`]: per-path mode and ownership rules.
//! - [`digest`]: single-pass MD5 + SHA-256 checksums.
//! - [`config`]: the TOML package description used by the CLI.
//!
//! ## Examples
//!
//! ```no_run
//! use archpack::{assembler, PackageMetadata, PackageSettings};
//!
//! let metadata = PackageMetadata {
//!     name: "demo".into(),
//!     version: "1.0.0".into(),
//!     release: "1".into(),
//!     arch: "any".into(),
//!     ..PackageMetadata::default()
//! };
//! let settings = PackageSettings::new("build/root", metadata);
//! let file = std::fs::File::create("demo-1.0.0-1-any.pkg.tar.xz")?;
//! assembler::build(&settings, file)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod assembler;
pub mod cli;
pub mod cli_runner;
pub mod config;
pub mod digest;
pub mod entry;
pub mod error;
pub mod mtree;
pub mod permissions;
pub mod pkginfo;

pub use assembler::{PackageSettings, PreparedPackage};
pub use entry::{ContentSource, EntryKind, EntrySet, PackageEntry};
pub use error::PackageError;
pub use permissions::{PermissionPolicy, PermissionRule, Permissions};
pub use pkginfo::PackageMetadata;
