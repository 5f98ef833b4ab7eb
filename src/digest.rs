//! Single-pass MD5 + SHA-256 content checksums.

use std::io::{self, Read};

use md5::Md5;
use sha2::{Digest, Sha256};

const BUF_SZ: usize = 64 * 1024;

/// Lowercase hex checksums of one content stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digests {
    pub md5: String,
    pub sha256: String,
}

/// Streams `reader` to EOF once, feeding both hashers from the same buffer.
pub fn digest<R: Read>(mut reader: R) -> io::Result<Digests> {
    let mut md5 = Md5::new();
    let mut sha256 = Sha256::new();
    let mut buf = vec![0u8; BUF_SZ];

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        md5.update(&buf[..n]);
        sha256.update(&buf[..n]);
    }

    Ok(Digests {
        md5: hex::encode(md5.finalize()),
        sha256: hex::encode(sha256.finalize()),
    })
}

/// Convenience wrapper for in-memory content.
pub fn digest_bytes(data: &[u8]) -> Digests {
    Digests {
        md5: hex::encode(Md5::digest(data)),
        sha256: hex::encode(Sha256::digest(data)),
    }
}
