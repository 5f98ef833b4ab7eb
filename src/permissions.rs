//! Ownership and permission policy for archive members.
//!
//! A [`PermissionPolicy`] is an ordered list of [`PermissionRule`]s. Resolving
//! a path starts from [`Defaults`] and lets every matching rule overwrite the
//! fields it specifies, so later rules win.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

use crate::PackageError;

/// Global ownership and mode defaults. Never mutated.
pub struct Defaults;

impl Defaults {
    pub const MODE_MASK: u32 = 0o777;
    pub const FILE_MODE: u32 = 0o644;
    pub const DIRECTORY_MODE: u32 = 0o755;
    pub const LINK_MODE: u32 = 0o777;
    pub const UID: u32 = 0;
    pub const GID: u32 = 0;
    pub const USER_NAME: &'static str = "root";
    pub const GROUP_NAME: &'static str = "root";
}

/// Effective mode and ownership of one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permissions {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
}

impl Permissions {
    /// Fails with [`PackageError::InvalidMode`] if `mode` has bits outside `0o777`.
    pub fn new(mode: u32, uid: u32, gid: u32) -> Result<Self, PackageError> {
        check_mode(mode)?;
        Ok(Self { mode, uid, gid })
    }

    pub fn file() -> Self {
        Self { mode: Defaults::FILE_MODE, uid: Defaults::UID, gid: Defaults::GID }
    }

    pub fn directory() -> Self {
        Self { mode: Defaults::DIRECTORY_MODE, uid: Defaults::UID, gid: Defaults::GID }
    }

    pub fn symlink() -> Self {
        Self { mode: Defaults::LINK_MODE, uid: Defaults::UID, gid: Defaults::GID }
    }

    fn default_for(is_directory: bool) -> Self {
        if is_directory {
            Self::directory()
        } else {
            Self::file()
        }
    }
}

fn check_mode(mode: u32) -> Result<(), PackageError> {
    if mode & !Defaults::MODE_MASK != 0 {
        return Err(PackageError::InvalidMode(mode));
    }
    Ok(())
}

/// A path matcher plus the overrides it applies.
#[derive(Debug, Clone)]
pub struct PermissionRule {
    include: Option<GlobSet>,
    exclude: Option<GlobSet>,
    patterns: String,
    file_mode: Option<u32>,
    directory_mode: Option<u32>,
    uid: Option<u32>,
    gid: Option<u32>,
}

impl PermissionRule {
    /// Builds a rule from include and exclude globs.
    ///
    /// An empty include list matches every path. Globs are matched against the
    /// relative archive path (`usr/bin/tool`), and `*` does not cross `/`.
    pub fn new<I, E>(include: I, exclude: E) -> Result<Self, PackageError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
        E: IntoIterator,
        E::Item: AsRef<str>,
    {
        let include: Vec<String> = include.into_iter().map(|p| p.as_ref().to_string()).collect();
        let exclude: Vec<String> = exclude.into_iter().map(|p| p.as_ref().to_string()).collect();
        let patterns = if include.is_empty() { "**".to_string() } else { include.join(",") };

        Ok(Self {
            include: compile_globset(&include)?,
            exclude: compile_globset(&exclude)?,
            patterns,
            file_mode: None,
            directory_mode: None,
            uid: None,
            gid: None,
        })
    }

    pub fn file_mode(mut self, mode: u32) -> Result<Self, PackageError> {
        check_mode(mode)?;
        self.file_mode = Some(mode);
        Ok(self)
    }

    pub fn directory_mode(mut self, mode: u32) -> Result<Self, PackageError> {
        check_mode(mode)?;
        self.directory_mode = Some(mode);
        Ok(self)
    }

    pub fn uid(mut self, uid: u32) -> Self {
        self.uid = Some(uid);
        self
    }

    pub fn gid(mut self, gid: u32) -> Self {
        self.gid = Some(gid);
        self
    }

    pub fn matches(&self, path: &str) -> bool {
        let included = self.include.as_ref().map_or(true, |set| set.is_match(path));
        included && !self.exclude.as_ref().map_or(false, |set| set.is_match(path))
    }

    /// Human-readable pattern list, used in log messages.
    pub fn patterns(&self) -> &str {
        &self.patterns
    }

    fn apply(&self, permissions: &mut Permissions, is_directory: bool) {
        let mode = if is_directory { self.directory_mode } else { self.file_mode };
        if let Some(mode) = mode {
            permissions.mode = mode;
        }
        if let Some(uid) = self.uid {
            permissions.uid = uid;
        }
        if let Some(gid) = self.gid {
            permissions.gid = gid;
        }
    }
}

fn compile_globset(patterns: &[String]) -> Result<Option<GlobSet>, PackageError> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|source| PackageError::Pattern { pattern: pattern.clone(), source })?;
        builder.add(glob);
    }
    builder
        .build()
        .map(Some)
        .map_err(|source| PackageError::Pattern { pattern: patterns.join(","), source })
}

/// Ordered permission rules. The empty policy resolves everything to [`Defaults`].
#[derive(Debug, Clone, Default)]
pub struct PermissionPolicy {
    rules: Vec<PermissionRule>,
}

impl PermissionPolicy {
    pub fn new(rules: Vec<PermissionRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[PermissionRule] {
        &self.rules
    }

    /// Resolves the effective permissions of `path`.
    pub fn resolve(&self, path: &str, is_directory: bool) -> Permissions {
        self.rules
            .iter()
            .filter(|rule| rule.matches(path))
            .fold(Permissions::default_for(is_directory), |mut acc, rule| {
                rule.apply(&mut acc, is_directory);
                acc
            })
    }

    /// Rules that match none of `paths`.
    pub fn unmatched<'p, I>(&self, paths: I) -> Vec<&PermissionRule>
    where
        I: IntoIterator<Item = &'p str> + Clone,
    {
        self.rules
            .iter()
            .filter(|rule| !paths.clone().into_iter().any(|path| rule.matches(path)))
            .collect()
    }
}
