//! # Package Assembly
//!
//! Ties the pieces together into one deterministic build:
//!
//! 1. validates the [`PackageSettings`] before touching any output,
//! 2. walks the payload tree into an [`EntrySet`] (digests and permissions
//!    are resolved per entry as it is created),
//! 3. adds declared symlinks and the directories they imply,
//! 4. adds the optional `.INSTALL` script,
//! 5. renders `.PKGINFO`, then `.MTREE` over everything collected so far,
//! 6. writes all members, in path order, as an XZ-compressed tar stream.
//!
//! Steps 1-5 happen in [`prepare`]; step 6 is [`PreparedPackage::write_to`].
//! [`build`] runs both.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use xz2::write::XzEncoder;

use crate::entry::{normalize_link_target, ContentSource, EntrySet, PackageEntry};
use crate::mtree;
use crate::permissions::PermissionPolicy;
use crate::pkginfo::PackageMetadata;
use crate::PackageError;

pub const INSTALL_NAME: &str = ".INSTALL";
pub const PKGINFO_NAME: &str = ".PKGINFO";
pub const MTREE_NAME: &str = ".MTREE";

/// XZ preset used for the outer archive.
pub const XZ_PRESET: u32 = 6;

/// Everything one build needs. Constructed once by the caller, never mutated.
#[derive(Debug, Clone)]
pub struct PackageSettings {
    /// Directory whose contents become the package payload.
    pub root_dir: PathBuf,
    /// Stored as `.INSTALL` when present.
    pub install_script: Option<ContentSource>,
    pub metadata: PackageMetadata,
    /// Extra symlinks, archive path → link target.
    pub symlinks: BTreeMap<String, String>,
    pub permissions: PermissionPolicy,
    /// Fixed build time for reproducible output; the current time when `None`.
    pub build_time: Option<DateTime<Utc>>,
}

impl PackageSettings {
    pub fn new(root_dir: impl Into<PathBuf>, metadata: PackageMetadata) -> Self {
        Self {
            root_dir: root_dir.into(),
            install_script: None,
            metadata,
            symlinks: BTreeMap::new(),
            permissions: PermissionPolicy::default(),
            build_time: None,
        }
    }

    /// Checks the settings without any filesystem writes.
    pub fn validate(&self) -> Result<(), PackageError> {
        if !self.root_dir.is_dir() {
            return Err(PackageError::RootNotFound(self.root_dir.clone()));
        }
        self.metadata.validate()?;
        for (name, target) in &self.symlinks {
            normalize_name(name)?;
            normalize_link_target(target)?;
        }
        Ok(())
    }
}

/// A fully enumerated package, ready to be serialized.
#[derive(Debug)]
pub struct PreparedPackage {
    entries: EntrySet,
    installed_size: u64,
    pkginfo: String,
    manifest: String,
}

impl PreparedPackage {
    /// All members, including `.PKGINFO` and `.MTREE`, in archive order.
    pub fn entries(&self) -> &EntrySet {
        &self.entries
    }

    /// Sum of the payload file sizes.
    pub fn installed_size(&self) -> u64 {
        self.installed_size
    }

    /// The `.PKGINFO` text.
    pub fn pkginfo(&self) -> &str {
        &self.pkginfo
    }

    /// The uncompressed `.MTREE` text.
    pub fn manifest(&self) -> &str {
        &self.manifest
    }

    /// Serializes every entry as an XZ-compressed tar stream into `out`.
    ///
    /// Returns `out` once the tar trailer and the XZ stream have been
    /// flushed. On error the sink may hold partial output; discarding it is
    /// up to the caller.
    pub fn write_to<W: Write>(&self, out: W) -> Result<W, PackageError> {
        let encoder = XzEncoder::new(out, XZ_PRESET);
        let mut tar = tar::Builder::new(encoder);

        for entry in &self.entries {
            debug!(path = entry.path(), size = entry.size(), "archiving");
            entry.append_to(&mut tar)?;
        }

        let encoder = tar.into_inner()?;
        let mut out = encoder.finish()?;
        out.flush()?;
        info!(members = self.entries.len(), "package archive written");
        Ok(out)
    }
}

/// Validates `settings` and collects every entry of the package.
pub fn prepare(settings: &PackageSettings) -> Result<PreparedPackage, PackageError> {
    settings.validate()?;

    let meta = &settings.metadata;
    let build_time = settings.build_time.unwrap_or_else(Utc::now);
    info!(name = %meta.name, version = %meta.full_version(), root = %settings.root_dir.display(), "assembling package");

    let (mut entries, installed_size) = enumerate_payload(&settings.root_dir, &settings.permissions)?;

    for rule in settings.permissions.unmatched(entries.paths()) {
        warn!(patterns = rule.patterns(), "permission rule matched no payload path");
    }

    for (name, target) in &settings.symlinks {
        let name = normalize_name(name)?;
        let target = normalize_link_target(target)?;
        entries.insert(PackageEntry::symlink(&name, &target, build_time))?;
        add_parent_dirs(&mut entries, &name, build_time);
        debug!(path = %name, target = %target, "added symlink");
    }

    if let Some(script) = &settings.install_script {
        entries.insert(PackageEntry::from_source(INSTALL_NAME, script, build_time)?)?;
    }

    let pkginfo = meta.render(build_time, installed_size);
    entries.insert(PackageEntry::from_bytes(PKGINFO_NAME, pkginfo.clone().into_bytes(), build_time))?;

    let manifest = mtree::render(&entries)?;
    entries.insert(PackageEntry::from_bytes(MTREE_NAME, mtree::compress(&manifest)?, build_time))?;

    info!(entries = entries.len(), installed_size, "package prepared");
    Ok(PreparedPackage { entries, installed_size, pkginfo, manifest })
}

/// Builds the package described by `settings` into `out`.
///
/// Nothing is written to `out` unless validation and enumeration succeed.
pub fn build<W: Write>(settings: &PackageSettings, out: W) -> Result<W, PackageError> {
    prepare(settings)?.write_to(out)
}

fn enumerate_payload(root: &Path, policy: &PermissionPolicy) -> Result<(EntrySet, u64), PackageError> {
    let mut entries = EntrySet::new();
    let mut installed_size = 0u64;

    for dent in WalkDir::new(root).min_depth(1).follow_links(false).sort_by_file_name() {
        let dent = dent?;
        let name = relative_name(root, dent.path())?;
        let entry = PackageEntry::from_path(dent.path(), &name, policy)?;
        if entry.is_file() {
            installed_size += entry.size();
        }
        debug!(path = %name, mode = %format!("{:o}", entry.permissions().mode), "payload entry");
        entries.insert(entry)?;
    }

    Ok((entries, installed_size))
}

/// Path of `path` relative to `root`, `/`-separated.
fn relative_name(root: &Path, path: &Path) -> Result<String, PackageError> {
    let rel = path.strip_prefix(root).map_err(|_| PackageError::StripPrefix {
        prefix: root.to_path_buf(),
        path: path.to_path_buf(),
    })?;
    let rel = rel.to_str().ok_or_else(|| PackageError::NonUtf8Path(path.to_path_buf()))?;
    Ok(rel.replace('\\', "/"))
}

/// Canonical form of a caller-supplied archive path: `/` separators, no
/// leading `./` or `/`, no trailing `/`.
fn normalize_name(name: &str) -> Result<String, PackageError> {
    let mut s = name.replace('\\', "/");
    while let Some(rest) = s.strip_prefix("./").or_else(|| s.strip_prefix('/')) {
        s = rest.to_string();
    }
    let s = s.trim_end_matches('/');
    if s.is_empty() || s.split('/').any(|c| c.is_empty() || c == "." || c == "..") {
        return Err(PackageError::InvalidField {
            field: "symlink name",
            value: name.to_string(),
            reason: "must be a relative path without empty, '.' or '..' components",
        });
    }
    Ok(s.to_string())
}

/// Inserts a directory entry for every missing ancestor of `name`.
fn add_parent_dirs(entries: &mut EntrySet, name: &str, modified: DateTime<Utc>) {
    let mut path = name;
    while let Some((parent, _)) = path.rsplit_once('/') {
        if entries.insert_if_absent(PackageEntry::directory(parent, modified)) {
            debug!(path = parent, "synthesized parent directory");
        }
        path = parent;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::fs;
    use tempfile::tempdir;

    fn metadata() -> PackageMetadata {
        PackageMetadata {
            name: "demo".into(),
            version: "1.0".into(),
            release: "1".into(),
            arch: "any".into(),
            ..PackageMetadata::default()
        }
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("opt/lib.so").unwrap(), "opt/lib.so");
        assert_eq!(normalize_name("/opt/lib.so").unwrap(), "opt/lib.so");
        assert_eq!(normalize_name("./usr\\lib/").unwrap(), "usr/lib");
        assert!(normalize_name("/").is_err());
        assert!(normalize_name("opt//lib").is_err());
        assert!(normalize_name("../etc/passwd").is_err());
    }

    #[test]
    fn test_add_parent_dirs_only_fills_gaps() {
        let t = Utc.timestamp_opt(0, 0).unwrap();
        let mut entries = EntrySet::new();
        entries.insert(PackageEntry::from_bytes("usr", vec![], t)).unwrap();
        entries.insert(PackageEntry::symlink("usr/lib/x/lib.so", "lib.so.1", t)).unwrap();
        add_parent_dirs(&mut entries, "usr/lib/x/lib.so", t);

        let paths: Vec<&str> = entries.paths().collect();
        assert_eq!(paths, ["usr", "usr/lib", "usr/lib/x", "usr/lib/x/lib.so"]);
        // The pre-existing entry is left untouched.
        assert!(entries.get("usr").unwrap().is_file());
    }

    #[test]
    fn test_validation_happens_before_output() -> Result<(), Box<dyn std::error::Error>> {
        let root = tempdir()?;
        let settings = PackageSettings::new(root.path().join("missing"), metadata());
        let mut sink = Vec::new();
        let err = build(&settings, &mut sink).unwrap_err();
        assert!(matches!(err, PackageError::RootNotFound(_)));
        assert!(sink.is_empty());

        let settings = PackageSettings::new(root.path(), PackageMetadata { version: "1-2".into(), ..metadata() });
        assert!(matches!(build(&settings, &mut sink), Err(PackageError::InvalidField { .. })));
        assert!(sink.is_empty());
        Ok(())
    }

    #[test]
    fn test_prepare_collects_payload_and_metadata() -> Result<(), Box<dyn std::error::Error>> {
        let root = tempdir()?;
        fs::create_dir_all(root.path().join("opt/app"))?;
        fs::write(root.path().join("opt/app/a.txt"), b"12345")?;
        fs::write(root.path().join("opt/b.bin"), b"xyz")?;

        let mut settings = PackageSettings::new(root.path(), metadata());
        settings.symlinks.insert("usr/lib/libdemo.so".into(), "/opt/app/libdemo.so".into());
        settings.install_script = Some(b"post_install() { :; }\n".to_vec().into());
        settings.build_time = Some(Utc.timestamp_opt(1_000_000, 0).unwrap());

        let package = prepare(&settings)?;
        assert_eq!(package.installed_size(), 8);

        let paths: Vec<&str> = package.entries().paths().collect();
        assert_eq!(
            paths,
            [".INSTALL", ".MTREE", ".PKGINFO", "opt", "opt/app", "opt/app/a.txt", "opt/b.bin", "usr", "usr/lib", "usr/lib/libdemo.so"]
        );
        assert!(package.pkginfo().contains("size = 8\n"));
        assert!(package.pkginfo().contains("builddate = 1000000\n"));

        // The manifest lists everything except itself.
        let listed: Vec<&str> = package.manifest().lines().skip(2).map(|l| l.split(' ').next().unwrap()).collect();
        assert_eq!(listed.len(), paths.len() - 1);
        assert!(!listed.contains(&"./.MTREE"));
        assert!(package.manifest().contains("./usr/lib time=1000000.0 mode=755 type=dir\n"));
        Ok(())
    }

    #[test]
    fn test_empty_symlink_target_is_rejected_before_output() -> Result<(), Box<dyn std::error::Error>> {
        let root = tempdir()?;
        fs::write(root.path().join("file"), b"data")?;

        let mut settings = PackageSettings::new(root.path(), metadata());
        settings.install_script = Some(b"post_install() { :; }\n".to_vec().into());
        settings.symlinks.insert("opt/dangling".into(), String::new());

        let mut sink = Vec::new();
        let err = build(&settings, &mut sink).unwrap_err();
        assert!(matches!(err, PackageError::InvalidField { field: "symlink target", .. }), "{err:?}");
        assert!(sink.is_empty());
        Ok(())
    }

    #[test]
    fn test_symlink_target_is_stored_normalized() -> Result<(), Box<dyn std::error::Error>> {
        let root = tempdir()?;
        let mut settings = PackageSettings::new(root.path(), metadata());
        settings.symlinks.insert("opt/x.so".into(), "./lib//x.so/".into());
        settings.build_time = Some(Utc.timestamp_opt(86_400, 0).unwrap());

        let package = prepare(&settings)?;
        assert!(package.manifest().contains("./opt/x.so time=86400.0 mode=777 type=link link=./lib/x.so/\n"));

        let bytes = package.write_to(Vec::new())?;
        let mut archive = tar::Archive::new(xz2::read::XzDecoder::new(&bytes[..]));
        let mut link = None;
        for member in archive.entries()? {
            let member = member?;
            if &*member.path_bytes() == &b"opt/x.so"[..] {
                link = member.link_name_bytes().map(|l| l.into_owned());
            }
        }
        assert_eq!(link.as_deref(), Some(&b"./lib/x.so/"[..]));
        Ok(())
    }

    #[test]
    fn test_symlink_collision_is_fatal()-> Result<(), Box<dyn std::error::Error>> {
        let root = tempdir()?;
        fs::create_dir(root.path().join("opt"))?;
        fs::write(root.path().join("opt/lib.so"), b"elf")?;

        let mut settings = PackageSettings::new(root.path(), metadata());
        settings.symlinks.insert("/opt/lib.so".into(), "lib.so.1".into());

        let mut sink = Vec::new();
        let err = build(&settings, &mut sink).unwrap_err();
        assert!(matches!(err, PackageError::DuplicatePath(ref p) if p == "opt/lib.so"));
        assert!(sink.is_empty());
        Ok(())
    }
}
