//! # Manifest (mtree) Writer
//!
//! Renders archive members in the mtree text format stored as `.MTREE`
//! inside a package. The header declares `type=file uid=0 gid=0 mode=644` as
//! the manifest-wide defaults, so per-entry lines only carry what differs:
//!
//! ```text
//! #mtree
//! /set type=file uid=0 gid=0 mode=644
//! ./opt/test.txt time=1467238830.999000000 size=5 md5digest=... sha256digest=...
//! ./opt/lib.so time=1467238830.999000000 mode=777 type=link link=/opt/lib.so.0.0
//! ```
//!
//! File names are escaped so every line stays whitespace-separable: printable
//! ASCII other than `\` is kept as is, every other character is written as
//! its UTF-8 bytes in `\nnn` octal form.

use std::fmt::Write as _;
use std::io::{self, Write};

use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::entry::EntrySet;
use crate::permissions::Defaults;

pub const MAGIC: &str = "#mtree";

/// mtree `type=` keywords.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Block,
    Char,
    Dir,
    Fifo,
    File,
    Link,
    Socket,
}

impl FileType {
    pub fn code(self) -> &'static str {
        match self {
            FileType::Block => "block",
            FileType::Char => "char",
            FileType::Dir => "dir",
            FileType::Fifo => "fifo",
            FileType::File => "file",
            FileType::Link => "link",
            FileType::Socket => "socket",
        }
    }
}

/// Everything the manifest records about one member.
#[derive(Debug, Clone)]
pub struct MtreeRecord<'a> {
    pub name: &'a str,
    pub file_type: FileType,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub link: Option<&'a str>,
    pub md5digest: Option<&'a str>,
    pub sha256digest: Option<&'a str>,
}

/// Streams mtree lines into any writer.
pub struct MtreeWriter<W: Write> {
    out: W,
    line: String,
}

impl<W: Write> MtreeWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out, line: String::with_capacity(256) }
    }

    pub fn write_header(&mut self) -> io::Result<&mut Self> {
        writeln!(self.out, "{MAGIC}")?;
        writeln!(
            self.out,
            "/set type=file uid={} gid={} mode={:03o}",
            Defaults::UID,
            Defaults::GID,
            Defaults::FILE_MODE
        )?;
        Ok(self)
    }

    pub fn write_entry(&mut self, record: &MtreeRecord<'_>) -> io::Result<&mut Self> {
        self.line.clear();
        format_entry(&mut self.line, record);
        self.out.write_all(self.line.as_bytes())?;
        Ok(self)
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

fn format_entry(line: &mut String, record: &MtreeRecord<'_>) {
    line.push_str("./");
    let escaped = escape_filename(record.name);
    line.push_str(escaped.trim_end_matches('/'));

    // Writing into a String cannot fail.
    let _ = write!(line, " time={}.{}", record.modified.timestamp(), record.modified.timestamp_subsec_nanos());

    if record.mode != Defaults::FILE_MODE {
        let _ = write!(line, " mode={:03o}", record.mode);
    }

    if record.uid != 0 || record.gid != 0 {
        let _ = write!(line, " uid={} gid={}", record.uid, record.gid);
    }

    if record.file_type == FileType::File {
        let _ = write!(line, " size={}", record.size);
    } else {
        let _ = write!(line, " type={}", record.file_type.code());
    }

    if let Some(link) = record.link.filter(|l| !l.is_empty()) {
        let _ = write!(line, " link={link}");
    }

    if record.file_type == FileType::File {
        if let Some(md5) = record.md5digest {
            let _ = write!(line, " md5digest={md5}");
        }
        if let Some(sha256) = record.sha256digest {
            let _ = write!(line, " sha256digest={sha256}");
        }
    }

    line.push('\n');
}

/// Escapes a path for an mtree line.
pub fn escape_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 16);
    let mut utf8 = [0u8; 4];

    for c in name.chars() {
        if (' '..='~').contains(&c) && c != '\\' {
            out.push(c);
        } else {
            for b in c.encode_utf8(&mut utf8).bytes() {
                let _ = write!(out, "\\{b:03o}");
            }
        }
    }
    out
}

/// Renders the full manifest text for `entries`, in their path order.
pub fn render(entries: &EntrySet) -> io::Result<String> {
    let mut writer = MtreeWriter::new(Vec::with_capacity(4096));
    writer.write_header()?;
    for entry in entries {
        writer.write_entry(&entry.mtree_record())?;
    }
    let bytes = writer.into_inner();
    // Escaping keeps the output ASCII.
    String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Gzip-compresses manifest text the way it is stored inside the package.
///
/// The gzip header carries no timestamp or file name, so identical text
/// always yields identical bytes.
pub fn compress(text: &str) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(text.len() / 4 + 64), Compression::default());
    encoder.write_all(text.as_bytes())?;
    encoder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::PackageEntry;
    use chrono::TimeZone;
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn stamp() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2016, 6, 29, 22, 20, 30).unwrap() + chrono::Duration::milliseconds(999)
    }

    fn record<'a>(name: &'a str, file_type: FileType, mode: u32) -> MtreeRecord<'a> {
        MtreeRecord {
            name,
            file_type,
            size: 0,
            modified: stamp(),
            mode,
            uid: 0,
            gid: 0,
            link: None,
            md5digest: None,
            sha256digest: None,
        }
    }

    fn lines(records: &[MtreeRecord<'_>]) -> Vec<String> {
        let mut writer = MtreeWriter::new(Vec::new());
        writer.write_header().unwrap();
        for r in records {
            writer.write_entry(r).unwrap();
        }
        let text = String::from_utf8(writer.into_inner()).unwrap();
        assert!(text.ends_with('\n'));
        text.lines().map(str::to_string).collect()
    }

    #[test]
    fn test_write_entry() {
        let file = MtreeRecord { size: 123, ..record("opt/testąš.txt", FileType::File, Defaults::FILE_MODE) };
        let link = MtreeRecord { link: Some("/opt/lib.so.0.0"), ..record("opt/lib.so", FileType::Link, Defaults::LINK_MODE) };

        let lines = lines(&[file, link]);
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "#mtree");
        assert_eq!(lines[1], "/set type=file uid=0 gid=0 mode=644");
        assert_eq!(lines[2], "./opt/test\\304\\205\\305\\241.txt time=1467238830.999000000 size=123");
        assert_eq!(lines[3], "./opt/lib.so time=1467238830.999000000 mode=777 type=link link=/opt/lib.so.0.0");
    }

    #[test]
    fn test_directory_and_digests() {
        let dir = record("usr/share/", FileType::Dir, Defaults::DIRECTORY_MODE);
        let file = MtreeRecord {
            size: 3,
            md5digest: Some("900150983cd24fb0d6963f7d28e17f72"),
            sha256digest: Some("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"),
            ..record(".PKGINFO", FileType::File, Defaults::FILE_MODE)
        };

        let lines = lines(&[dir, file]);
        assert_eq!(lines[2], "./usr/share time=1467238830.999000000 mode=755 type=dir");
        assert_eq!(
            lines[3],
            "./.PKGINFO time=1467238830.999000000 size=3 md5digest=900150983cd24fb0d6963f7d28e17f72 \
             sha256digest=ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_uid_gid_emitted_together() {
        let only_gid = MtreeRecord { gid: 100, size: 1, ..record("a", FileType::File, 0o644) };
        let custom_mode = MtreeRecord { size: 1, ..record("b", FileType::File, 0o600) };

        let lines = lines(&[only_gid, custom_mode]);
        assert_eq!(lines[2], "./a time=1467238830.999000000 uid=0 gid=100 size=1");
        assert_eq!(lines[3], "./b time=1467238830.999000000 mode=600 size=1");
    }

    #[test]
    fn test_whole_second_timestamp() {
        let r = MtreeRecord { modified: Utc.timestamp_opt(86_400, 0).unwrap(), ..record("x", FileType::File, 0o644) };
        assert_eq!(lines(&[r])[2], "./x time=86400.0 size=0");
    }

    #[test]
    fn test_escape_filename() {
        assert_eq!(escape_filename("plain name.txt"), "plain name.txt");
        assert_eq!(escape_filename("back\\slash"), "back\\134slash");
        assert_eq!(escape_filename("tab\there"), "tab\\011here");
        assert_eq!(escape_filename("del\u{7f}"), "del\\177");
        assert_eq!(escape_filename("🐉"), "\\360\\237\\220\\211");
    }

    /// Inverse of `escape_filename`, used to check the escaping is lossless.
    fn unescape(escaped: &str) -> Vec<u8> {
        let bytes = escaped.as_bytes();
        let mut out = Vec::new();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'\\' {
                let digits = &escaped[i + 1..i + 4];
                assert!(digits.bytes().all(|d| (b'0'..=b'7').contains(&d)), "bad escape {digits}");
                out.push(u8::from_str_radix(digits, 8).unwrap());
                i += 4;
            } else {
                out.push(bytes[i]);
                i += 1;
            }
        }
        out
    }

    #[test]
    fn test_escape_is_reversible() {
        for name in ["opt/testąš.txt", "sp ace/\\x", "日本語/ファイル", "a\u{0}b", "mixed-€-ß-\u{10FFFF}"] {
            let escaped = escape_filename(name);
            assert!(escaped.bytes().all(|b| (0x20..=0x7e).contains(&b)));
            assert_eq!(unescape(&escaped), name.as_bytes());
        }
    }

    #[test]
    fn test_render_follows_entry_order() -> io::Result<()> {
        let mut set = EntrySet::new();
        set.insert(PackageEntry::from_bytes("zeta", b"z".to_vec(), stamp())).unwrap();
        set.insert(PackageEntry::directory("alpha", stamp())).unwrap();
        set.insert(PackageEntry::from_bytes(".PKGINFO", b"p".to_vec(), stamp())).unwrap();

        let text = render(&set)?;
        let names: Vec<&str> = text.lines().skip(2).map(|l| l.split(' ').next().unwrap()).collect();
        assert_eq!(names, ["./.PKGINFO", "./alpha", "./zeta"]);
        Ok(())
    }

    #[test]
    fn test_compress_is_deterministic_gzip() -> io::Result<()> {
        let text = "#mtree\n/set type=file uid=0 gid=0 mode=644\n";
        let a = compress(text)?;
        assert_eq!(a, compress(text)?);
        assert_eq!(&a[..2], &[0x1f, 0x8b]);

        let mut round = String::new();
        GzDecoder::new(&a[..]).read_to_string(&mut round)?;
        assert_eq!(round, text);
        Ok(())
    }
}
