//! Package identity and the `.PKGINFO` record.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::PackageError;

pub const DEFAULT_RELEASE: &str = "1";
pub const DEFAULT_ARCH: &str = "any";

/// Descriptive metadata of one package. The installed size is computed by
/// the assembler and passed to [`PackageMetadata::render`] separately.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageMetadata {
    pub name: String,
    pub version: String,
    #[serde(default = "default_release")]
    pub release: String,
    #[serde(default = "default_arch")]
    pub arch: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub packager: Option<String>,
    #[serde(default)]
    pub licenses: Vec<String>,
    #[serde(default)]
    pub depends: Vec<String>,
    #[serde(default)]
    pub optdepends: Vec<String>,
}

fn default_release() -> String {
    DEFAULT_RELEASE.into()
}

fn default_arch() -> String {
    DEFAULT_ARCH.into()
}

impl PackageMetadata {
    /// Checks required fields and their character rules.
    pub fn validate(&self) -> Result<(), PackageError> {
        require("package name", &self.name)?;
        validate_name(&self.name)?;

        require("package version", &self.version)?;
        if self.version.contains(':') || self.version.contains('-') {
            return Err(PackageError::InvalidField {
                field: "package version",
                value: self.version.clone(),
                reason: "colons and hyphens are not allowed",
            });
        }

        require("release number", &self.release)?;
        if self.release.contains('-') {
            return Err(PackageError::InvalidField {
                field: "release number",
                value: self.release.clone(),
                reason: "hyphens are not allowed",
            });
        }

        require("target architecture", &self.arch)?;
        Ok(())
    }

    /// `<version>-<release>`, the `pkgver` value.
    pub fn full_version(&self) -> String {
        format!("{}-{}", self.version, self.release)
    }

    /// Conventional package file name: `<name>-<version>-<release>-<arch>.pkg.tar.xz`.
    pub fn file_name(&self) -> String {
        format!("{}-{}-{}.pkg.tar.xz", self.name, self.full_version(), self.arch)
    }

    /// Renders the `.PKGINFO` record.
    ///
    /// `pkgdesc` is always present (empty when unset); other unset optional
    /// fields are left out.
    pub fn render(&self, build_date: DateTime<Utc>, installed_size: u64) -> String {
        let mut out = String::with_capacity(512);
        let mut field = |key: &str, value: &str| {
            // Writing into a String cannot fail.
            let _ = writeln!(out, "{key} = {value}");
        };

        field("pkgname", &self.name);
        field("pkgver", &self.full_version());
        field("pkgdesc", self.description.as_deref().unwrap_or(""));
        if let Some(url) = &self.url {
            field("url", url);
        }
        field("builddate", &build_date.timestamp().to_string());
        if let Some(packager) = &self.packager {
            field("packager", packager);
        }
        field("size", &installed_size.to_string());
        field("arch", &self.arch);
        for license in &self.licenses {
            field("license", license);
        }
        for depend in &self.depends {
            field("depend", depend);
        }
        for optdepend in &self.optdepends {
            field("optdepend", optdepend);
        }
        out
    }
}

fn require(field: &'static str, value: &str) -> Result<(), PackageError> {
    if value.trim().is_empty() {
        return Err(PackageError::MissingField(field));
    }
    Ok(())
}

/// Names use alphanumerics and `@ . _ + -`, and must not start with `-` or `.`.
fn validate_name(name: &str) -> Result<(), PackageError> {
    let invalid = |reason| PackageError::InvalidField { field: "package name", value: name.to_string(), reason };

    if name.starts_with('-') || name.starts_with('.') {
        return Err(invalid("must not start with a hyphen or a dot"));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || "@._+-".contains(c)) {
        return Err(invalid("only alphanumerics and @ . _ + - are allowed"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> PackageMetadata {
        PackageMetadata {
            name: "demo".into(),
            version: "1.2.3".into(),
            release: "2".into(),
            arch: "x86_64".into(),
            description: Some("A demo package".into()),
            url: Some("https://example.org".into()),
            packager: Some("Jane Doe <jane@example.org>".into()),
            licenses: vec!["MIT".into(), "Apache".into()],
            depends: vec!["glibc".into(), "zlib>=1.2".into()],
            optdepends: vec!["bash: completion".into()],
        }
    }

    #[test]
    fn test_render_field_order() {
        let date = Utc.timestamp_opt(1_467_238_830, 0).unwrap();
        let text = sample().render(date, 4096);
        assert_eq!(
            text,
            "pkgname = demo\n\
             pkgver = 1.2.3-2\n\
             pkgdesc = A demo package\n\
             url = https://example.org\n\
             builddate = 1467238830\n\
             packager = Jane Doe <jane@example.org>\n\
             size = 4096\n\
             arch = x86_64\n\
             license = MIT\n\
             license = Apache\n\
             depend = glibc\n\
             depend = zlib>=1.2\n\
             optdepend = bash: completion\n"
        );
    }

    #[test]
    fn test_render_minimal() {
        let meta = PackageMetadata { name: "min".into(), version: "0.1".into(), ..PackageMetadata::default() };
        let meta = PackageMetadata { release: default_release(), arch: default_arch(), ..meta };
        let text = meta.render(Utc.timestamp_opt(10, 0).unwrap(), 0);
        assert_eq!(text, "pkgname = min\npkgver = 0.1-1\npkgdesc = \nbuilddate = 10\nsize = 0\narch = any\n");
    }

    #[test]
    fn test_validate() {
        assert!(sample().validate().is_ok());

        let bad_version = PackageMetadata { version: "1:2.0".into(), ..sample() };
        assert!(matches!(bad_version.validate(), Err(PackageError::InvalidField { field: "package version", .. })));

        let hyphen_version = PackageMetadata { version: "1.0-beta".into(), ..sample() };
        assert!(hyphen_version.validate().is_err());

        let bad_release = PackageMetadata { release: "1-1".into(), ..sample() };
        assert!(matches!(bad_release.validate(), Err(PackageError::InvalidField { field: "release number", .. })));

        let no_arch = PackageMetadata { arch: String::new(), ..sample() };
        assert!(matches!(no_arch.validate(), Err(PackageError::MissingField("target architecture"))));

        let no_name = PackageMetadata { name: " ".into(), ..sample() };
        assert!(matches!(no_name.validate(), Err(PackageError::MissingField("package name"))));
    }

    #[test]
    fn test_name_rules() {
        for ok in ["demo", "lib32-foo", "python3.11", "gtk+", "x@y_z"] {
            assert!(PackageMetadata { name: ok.into(), ..sample() }.validate().is_ok(), "{ok}");
        }
        for bad in ["-demo", ".hidden", "with space", "ünï"] {
            assert!(PackageMetadata { name: bad.into(), ..sample() }.validate().is_err(), "{bad}");
        }
    }

    #[test]
    fn test_file_name() {
        assert_eq!(sample().file_name(), "demo-1.2.3-2-x86_64.pkg.tar.xz");
    }

    #[test]
    fn test_serde_defaults() -> Result<(), toml::de::Error> {
        let meta: PackageMetadata = toml::from_str("name = \"demo\"\nversion = \"1.0\"\n")?;
        assert_eq!(meta.release, "1");
        assert_eq!(meta.arch, "any");
        assert!(meta.licenses.is_empty());
        Ok(())
    }
}
