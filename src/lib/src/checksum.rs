//! Content digests used by checksum entries of the trust policy.

use std::fmt;
use std::io::{self, Read, Write};
use std::str::FromStr;

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

use crate::error::DVError;

/// Supported checksum algorithms, ordered from weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumKind {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl ChecksumKind {
    pub const ALL: [ChecksumKind; 4] = [
        ChecksumKind::Md5,
        ChecksumKind::Sha1,
        ChecksumKind::Sha256,
        ChecksumKind::Sha512,
    ];

    /// Name used as the XML element and on the command line.
    pub fn name(&self) -> &'static str {
        match self {
            ChecksumKind::Md5 => "md5",
            ChecksumKind::Sha1 => "sha1",
            ChecksumKind::Sha256 => "sha256",
            ChecksumKind::Sha512 => "sha512",
        }
    }

    /// Length of the lowercase hex encoding of a digest.
    pub fn hex_len(&self) -> usize {
        match self {
            ChecksumKind::Md5 => 32,
            ChecksumKind::Sha1 => 40,
            ChecksumKind::Sha256 => 64,
            ChecksumKind::Sha512 => 128,
        }
    }
}

impl fmt::Display for ChecksumKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ChecksumKind {
    type Err = DVError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "md5" => Ok(ChecksumKind::Md5),
            "sha1" => Ok(ChecksumKind::Sha1),
            "sha256" => Ok(ChecksumKind::Sha256),
            "sha512" => Ok(ChecksumKind::Sha512),
            _ => Err(DVError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

#[derive(Clone)]
enum State {
    Md5(Md5),
    Sha1(Sha1),
    Sha256(Sha256),
    Sha512(Sha512),
}

/// Incremental hasher producing a lowercase hex digest.
#[derive(Clone)]
pub struct Checksummer {
    kind: ChecksumKind,
    state: State,
}

impl Checksummer {
    pub fn new(kind: ChecksumKind) -> Self {
        let state = match kind {
            ChecksumKind::Md5 => State::Md5(Md5::new()),
            ChecksumKind::Sha1 => State::Sha1(Sha1::new()),
            ChecksumKind::Sha256 => State::Sha256(Sha256::new()),
            ChecksumKind::Sha512 => State::Sha512(Sha512::new()),
        };
        Checksummer { kind, state }
    }

    pub fn kind(&self) -> ChecksumKind {
        self.kind
    }

    pub fn update<T: AsRef<[u8]>>(&mut self, data: T) {
        let data = data.as_ref();
        match &mut self.state {
            State::Md5(h) => h.update(data),
            State::Sha1(h) => h.update(data),
            State::Sha256(h) => h.update(data),
            State::Sha512(h) => h.update(data),
        }
    }

    pub fn finalize_hex(self) -> String {
        match self.state {
            State::Md5(h) => hex::encode(h.finalize()),
            State::Sha1(h) => hex::encode(h.finalize()),
            State::Sha256(h) => hex::encode(h.finalize()),
            State::Sha512(h) => hex::encode(h.finalize()),
        }
    }
}

impl Write for Checksummer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Hex digest of `bytes`.
pub fn digest(bytes: &[u8], kind: ChecksumKind) -> String {
    let mut h = Checksummer::new(kind);
    h.update(bytes);
    h.finalize_hex()
}

/// Hex digest of `bytes` for an algorithm given by name.
pub fn digest_named(bytes: &[u8], algorithm: &str) -> Result<String, DVError> {
    let kind = algorithm.parse::<ChecksumKind>()?;
    Ok(digest(bytes, kind))
}

/// Hex digest of everything readable from `reader`.
pub fn digest_reader(reader: &mut impl Read, kind: ChecksumKind) -> Result<String, DVError> {
    let mut h = Checksummer::new(kind);
    io::copy(reader, &mut h)?;
    Ok(h.finalize_hex())
}
