//! Package description file (`archpack.toml`).
//!
//! Relative paths in the file are resolved against the directory that
//! contains it, so a description can be checked in next to its payload.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::assembler::PackageSettings;
use crate::entry::ContentSource;
use crate::permissions::{PermissionPolicy, PermissionRule};
use crate::pkginfo::PackageMetadata;
use crate::PackageError;

pub const DEFAULT_CONFIG_FILE: &str = "archpack.toml";

/// Environment variable carrying a fixed build timestamp (Unix seconds).
pub const SOURCE_DATE_EPOCH: &str = "SOURCE_DATE_EPOCH";

/// One `[[permissions]]` table.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PermissionRuleConfig {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Octal string, e.g. `"755"`.
    pub file_mode: Option<String>,
    /// Octal string, e.g. `"750"`.
    pub directory_mode: Option<String>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

impl PermissionRuleConfig {
    fn to_rule(&self) -> Result<PermissionRule, PackageError> {
        let mut rule = PermissionRule::new(&self.include, &self.exclude)?;
        if let Some(mode) = &self.file_mode {
            rule = rule.file_mode(parse_mode("file_mode", mode)?)?;
        }
        if let Some(mode) = &self.directory_mode {
            rule = rule.directory_mode(parse_mode("directory_mode", mode)?)?;
        }
        if let Some(uid) = self.uid {
            rule = rule.uid(uid);
        }
        if let Some(gid) = self.gid {
            rule = rule.gid(gid);
        }
        Ok(rule)
    }
}

/// The whole description file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PackageConfig {
    /// Payload directory.
    pub root: PathBuf,
    /// Script stored as `.INSTALL`.
    pub install_script: Option<PathBuf>,
    /// Where `archpack build` puts the package when `--output` is not given.
    pub output_dir: Option<PathBuf>,
    /// File name override; defaults to the conventional package file name.
    pub output_file: Option<String>,
    pub package: PackageMetadata,
    #[serde(default)]
    pub symlinks: BTreeMap<String, String>,
    #[serde(default)]
    pub permissions: Vec<PermissionRuleConfig>,
    /// Directory the relative paths above are resolved against.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl PackageConfig {
    /// Reads and parses a description file.
    pub fn load(path: &Path) -> Result<Self, PackageError> {
        let text = fs::read_to_string(path).map_err(|e| PackageError::io(e, path))?;
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self::parse(&text, base_dir).map_err(|e| match e {
            PackageError::Config { source, .. } => PackageError::Config { path: path.to_path_buf(), source },
            other => other,
        })
    }

    /// Parses description text; relative paths will resolve against `base_dir`.
    pub fn parse(text: &str, base_dir: impl Into<PathBuf>) -> Result<Self, PackageError> {
        let mut config: PackageConfig =
            toml::from_str(text).map_err(|source| PackageError::Config { path: PathBuf::new(), source })?;
        config.base_dir = base_dir.into();
        Ok(config)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Directory the package file is written to.
    pub fn output_dir(&self) -> PathBuf {
        match &self.output_dir {
            Some(dir) => self.resolve(dir),
            None => self.base_dir.clone(),
        }
    }

    /// Package file name, honouring `output_file`.
    pub fn output_file_name(&self) -> String {
        self.output_file.clone().unwrap_or_else(|| self.package.file_name())
    }

    /// Converts the description into build settings.
    pub fn to_settings(&self, build_time: Option<DateTime<Utc>>) -> Result<PackageSettings, PackageError> {
        let rules = self.permissions.iter().map(PermissionRuleConfig::to_rule).collect::<Result<Vec<_>, _>>()?;

        Ok(PackageSettings {
            root_dir: self.resolve(&self.root),
            install_script: self.install_script.as_deref().map(|p| ContentSource::Path(self.resolve(p))),
            metadata: self.package.clone(),
            symlinks: self.symlinks.clone(),
            permissions: PermissionPolicy::new(rules),
            build_time,
        })
    }
}

/// Parses an octal permission string such as `"755"` or `"0644"`.
pub fn parse_mode(field: &'static str, value: &str) -> Result<u32, PackageError> {
    let digits = value.trim().trim_start_matches("0o");
    u32::from_str_radix(digits, 8).map_err(|_| PackageError::InvalidField {
        field,
        value: value.to_string(),
        reason: "expected an octal mode such as 644",
    })
}

/// Reads `SOURCE_DATE_EPOCH` from `value` (as taken from the environment).
pub fn build_time_from_epoch(value: Option<&str>) -> Result<Option<DateTime<Utc>>, PackageError> {
    let Some(value) = value else {
        return Ok(None);
    };
    let invalid = || PackageError::InvalidField {
        field: "SOURCE_DATE_EPOCH",
        value: value.to_string(),
        reason: "expected a Unix timestamp in seconds",
    };
    let secs: i64 = value.trim().parse().map_err(|_| invalid())?;
    Utc.timestamp_opt(secs, 0).single().map(Some).ok_or_else(invalid)
}
