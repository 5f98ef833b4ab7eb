//! # Package Entries
//!
//! A [`PackageEntry`] is one archive member: a regular file, a directory or a
//! symlink, either found in the payload tree or synthesized by the assembler.
//! File entries carry a [`ContentSource`] that can be opened again for the
//! final archive pass, and their digests are computed as soon as the entry is
//! constructed.
//!
//! Entries are collected in an [`EntrySet`], which keeps them ordered by path
//! so that the manifest and the archive come out in the same deterministic order.

use std::collections::btree_map::{self, BTreeMap, Entry};
use std::fs::{self, File};
use std::io::{self, BufReader, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tar::{EntryType, Header};

use crate::digest::{self, Digests};
use crate::mtree::{FileType, MtreeRecord};
use crate::permissions::{Defaults, PermissionPolicy, Permissions};
use crate::PackageError;

/// A repeatable factory for the bytes of a file entry.
#[derive(Debug, Clone)]
pub enum ContentSource {
    /// Content lives on disk and is re-opened on every read.
    Path(PathBuf),
    /// Content generated in memory (metadata records, inline install scripts).
    Memory(Arc<[u8]>),
}

impl ContentSource {
    /// Opens a fresh reader positioned at the start of the content.
    pub fn open(&self) -> Result<Box<dyn Read + '_>, PackageError> {
        match self {
            ContentSource::Path(path) => {
                let file = File::open(path).map_err(|e| PackageError::io(e, path))?;
                Ok(Box::new(BufReader::new(file)))
            }
            ContentSource::Memory(data) => Ok(Box::new(Cursor::new(&data[..]))),
        }
    }

    fn path(&self) -> Option<&Path> {
        match self {
            ContentSource::Path(path) => Some(path),
            ContentSource::Memory(_) => None,
        }
    }
}

/// Canonical form of a symlink target, byte-identical to the link name the
/// tar header will hold: repeated `/` collapse, `.` components vanish except
/// a leading one, and a leading or trailing `/` is kept.
pub fn normalize_link_target(target: &str) -> Result<String, PackageError> {
    let invalid = |reason| PackageError::InvalidField { field: "symlink target", value: target.to_string(), reason };
    if target.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if target.contains('\0') {
        return Err(invalid("must not contain NUL bytes"));
    }

    let absolute = target.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for (i, part) in target.split('/').enumerate() {
        match part {
            "" => {}
            "." if i == 0 => parts.push(part),
            "." => {}
            _ => parts.push(part),
        }
    }
    if parts.is_empty() {
        return Err(invalid("must name a path"));
    }

    let mut out = String::with_capacity(target.len());
    if absolute {
        out.push('/');
    }
    out.push_str(&parts.join("/"));
    if target.ends_with('/') {
        out.push('/');
    }
    Ok(out)
}

impl From<Vec<u8>> for ContentSource {
    fn from(data: Vec<u8>) -> Self {
        ContentSource::Memory(data.into())
    }
}

/// Kind-specific data of an entry.
#[derive(Debug, Clone)]
pub enum EntryKind {
    File {
        size: u64,
        digests: Digests,
        source: ContentSource,
    },
    Directory,
    Symlink {
        target: String,
    },
}

/// One archive member.
#[derive(Debug, Clone)]
pub struct PackageEntry {
    path: String,
    kind: EntryKind,
    modified: DateTime<Utc>,
    permissions: Permissions,
}

impl PackageEntry {
    /// Builds an entry for a filesystem object found in the payload tree.
    ///
    /// `name` is the relative archive path. Ownership comes from `policy`;
    /// regular files are digested here, which is the first of the two reads
    /// of their content.
    pub fn from_path(path: &Path, name: &str, policy: &PermissionPolicy) -> Result<Self, PackageError> {
        let meta = fs::symlink_metadata(path).map_err(|e| PackageError::io(e, path))?;
        let modified = DateTime::<Utc>::from(meta.modified().map_err(|e| PackageError::io(e, path))?);
        let file_type = meta.file_type();

        // Symlinks first: anything that follows links would report the target's type.
        let (kind, permissions) = if file_type.is_symlink() {
            let target = fs::read_link(path).map_err(|e| PackageError::io(e, path))?;
            let target = normalize_link_target(target.to_str().ok_or_else(|| PackageError::NonUtf8Path(target.clone()))?)?;
            let resolved = policy.resolve(name, false);
            let permissions = Permissions { mode: Defaults::LINK_MODE, ..resolved };
            (EntryKind::Symlink { target }, permissions)
        } else if file_type.is_dir() {
            (EntryKind::Directory, policy.resolve(name, true))
        } else if file_type.is_file() {
            let source = ContentSource::Path(path.to_path_buf());
            let digests = digest::digest(source.open()?).map_err(|e| PackageError::io(e, path))?;
            let kind = EntryKind::File { size: meta.len(), digests, source };
            (kind, policy.resolve(name, false))
        } else {
            return Err(PackageError::UnsupportedType(path.to_path_buf()));
        };

        Ok(Self { path: name.to_string(), kind, modified, permissions })
    }

    /// Builds a file entry over in-memory bytes with default ownership.
    pub fn from_bytes(name: &str, data: Vec<u8>, modified: DateTime<Utc>) -> Self {
        let digests = digest::digest_bytes(&data);
        let kind = EntryKind::File { size: data.len() as u64, digests, source: data.into() };
        Self { path: name.to_string(), kind, modified, permissions: Permissions::file() }
    }

    /// Builds a file entry named `name` from any content source.
    ///
    /// Path sources take their size and modification time from the file
    /// itself; in-memory sources are stamped with `modified`.
    pub fn from_source(name: &str, source: &ContentSource, modified: DateTime<Utc>) -> Result<Self, PackageError> {
        let (size, digests, modified) = match source {
            ContentSource::Memory(data) => (data.len() as u64, digest::digest_bytes(data), modified),
            ContentSource::Path(path) => {
                let meta = fs::metadata(path).map_err(|e| PackageError::io(e, path))?;
                if !meta.is_file() {
                    return Err(PackageError::UnsupportedType(path.clone()));
                }
                let modified = DateTime::<Utc>::from(meta.modified().map_err(|e| PackageError::io(e, path))?);
                let digests = digest::digest(source.open()?).map_err(|e| PackageError::io(e, path))?;
                (meta.len(), digests, modified)
            }
        };

        let kind = EntryKind::File { size, digests, source: source.clone() };
        Ok(Self { path: name.to_string(), kind, modified, permissions: Permissions::file() })
    }

    /// Builds a symlink entry with the default link mode.
    pub fn symlink(name: &str, target: &str, modified: DateTime<Utc>) -> Self {
        let kind = EntryKind::Symlink { target: target.to_string() };
        Self { path: name.to_string(), kind, modified, permissions: Permissions::symlink() }
    }

    /// Builds a synthetic directory entry with the default directory mode.
    pub fn directory(name: &str, modified: DateTime<Utc>) -> Self {
        let name = name.trim_end_matches('/');
        Self { path: name.to_string(), kind: EntryKind::Directory, modified, permissions: Permissions::directory() }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn kind(&self) -> &EntryKind {
        &self.kind
    }

    pub fn modified(&self) -> DateTime<Utc> {
        self.modified
    }

    pub fn permissions(&self) -> Permissions {
        self.permissions
    }

    /// Content length; always 0 for directories and symlinks.
    pub fn size(&self) -> u64 {
        match &self.kind {
            EntryKind::File { size, .. } => *size,
            EntryKind::Directory | EntryKind::Symlink { .. } => 0,
        }
    }

    pub fn digests(&self) -> Option<&Digests> {
        match &self.kind {
            EntryKind::File { digests, .. } => Some(digests),
            _ => None,
        }
    }

    pub fn link_target(&self) -> Option<&str> {
        match &self.kind {
            EntryKind::Symlink { target } => Some(target),
            _ => None,
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self.kind, EntryKind::File { .. })
    }

    /// Name of the tar member; directories get a trailing slash.
    pub fn member_name(&self) -> String {
        match self.kind {
            EntryKind::Directory => format!("{}/", self.path),
            _ => self.path.clone(),
        }
    }

    /// The manifest view of this entry.
    pub fn mtree_record(&self) -> MtreeRecord<'_> {
        let file_type = match self.kind {
            EntryKind::File { .. } => FileType::File,
            EntryKind::Directory => FileType::Dir,
            EntryKind::Symlink { .. } => FileType::Link,
        };
        let digests = self.digests();
        MtreeRecord {
            name: &self.path,
            file_type,
            size: self.size(),
            modified: self.modified,
            mode: self.permissions.mode,
            uid: self.permissions.uid,
            gid: self.permissions.gid,
            link: self.link_target(),
            md5digest: digests.map(|d| d.md5.as_str()),
            sha256digest: digests.map(|d| d.sha256.as_str()),
        }
    }

    fn tar_header(&self) -> Header {
        let mut header = Header::new_gnu();
        let entry_type = match self.kind {
            EntryKind::File { .. } => EntryType::Regular,
            EntryKind::Directory => EntryType::Directory,
            EntryKind::Symlink { .. } => EntryType::Symlink,
        };
        header.set_entry_type(entry_type);
        header.set_size(self.size());
        header.set_mode(self.permissions.mode);
        header.set_uid(u64::from(self.permissions.uid));
        header.set_gid(u64::from(self.permissions.gid));
        header.set_mtime(self.modified.timestamp().max(0) as u64);
        // Both names are short ASCII and always fit the GNU header fields.
        let _ = header.set_username(Defaults::USER_NAME);
        let _ = header.set_groupname(Defaults::GROUP_NAME);
        header
    }

    /// Appends this entry to `builder`, re-reading file content from its source.
    pub fn append_to<W: Write>(&self, builder: &mut tar::Builder<W>) -> Result<(), PackageError> {
        let mut header = self.tar_header();
        let name = self.member_name();

        match &self.kind {
            EntryKind::Directory => {
                builder.append_data(&mut header, &name, io::empty())?;
            }
            EntryKind::Symlink { target } => {
                builder
                    .append_link(&mut header, &name, target)
                    .map_err(|e| PackageError::io(e, &self.path))?;
            }
            EntryKind::File { size, source, .. } => {
                if let Some(path) = source.path() {
                    let actual = fs::metadata(path).map_err(|e| PackageError::io(e, path))?.len();
                    if actual != *size {
                        return Err(PackageError::ContentChanged { path: path.to_path_buf(), expected: *size, actual });
                    }
                }
                let reader = source.open()?.take(*size);
                builder
                    .append_data(&mut header, &name, reader)
                    .map_err(|e| PackageError::io(e, source.path().unwrap_or(Path::new(&name))))?;
            }
        }
        Ok(())
    }
}

/// Path-ordered, duplicate-free collection of entries.
#[derive(Debug, Default)]
pub struct EntrySet {
    entries: BTreeMap<String, PackageEntry>,
}

impl EntrySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `entry`, failing if its path is already taken.
    pub fn insert(&mut self, entry: PackageEntry) -> Result<(), PackageError> {
        match self.entries.entry(entry.path.clone()) {
            Entry::Occupied(e) => Err(PackageError::DuplicatePath(e.key().clone())),
            Entry::Vacant(v) => {
                v.insert(entry);
                Ok(())
            }
        }
    }

    /// Inserts `entry` unless its path is taken. Returns whether it was added.
    pub fn insert_if_absent(&mut self, entry: PackageEntry) -> bool {
        match self.entries.entry(entry.path.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(v) => {
                v.insert(entry);
                true
            }
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn get(&self, path: &str) -> Option<&PackageEntry> {
        self.entries.get(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in ascending byte order of their paths.
    pub fn iter(&self) -> btree_map::Values<'_, String, PackageEntry> {
        self.entries.values()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> + Clone {
        self.entries.keys().map(String::as_str)
    }
}

impl<'a> IntoIterator for &'a EntrySet {
    type Item = &'a PackageEntry;
    type IntoIter = btree_map::Values<'a, String, PackageEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
