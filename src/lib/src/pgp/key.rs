use std::fmt;
use std::str::FromStr;

use sequoia_openpgp as openpgp;
use serde::{Serialize, Serializer};

use crate::error::*;

/// A 64-bit OpenPGP key id.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct KeyId(u64);

impl KeyId {
    pub fn new(id: u64) -> Self {
        KeyId(id)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, DVError> {
        let bytes: [u8; 8] = bytes.try_into().map_err(|_| DVError::ParseError)?;
        Ok(KeyId(u64::from_be_bytes(bytes)))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn to_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}", self.0)
    }
}

impl fmt::Debug for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyId({self})")
    }
}

impl FromStr for KeyId {
    type Err = DVError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = strip_hex_prefix(s);
        if s.len() != 16 {
            return Err(DVError::ParseError);
        }
        u64::from_str_radix(s, 16)
            .map(KeyId)
            .map_err(|_| DVError::ParseError)
    }
}

impl Serialize for KeyId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

fn strip_hex_prefix(s: &str) -> &str {
    let s = s.trim();
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}

/// A v4 key fingerprint.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Fingerprint(Vec<u8>);

impl Fingerprint {
    pub const V4_LEN: usize = 20;

    pub fn from_slice(bytes: &[u8]) -> Result<Self, DVError> {
        if bytes.len() != Self::V4_LEN {
            return Err(DVError::ParseError);
        }
        Ok(Fingerprint(bytes.to_vec()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The key id is the low 64 bits of a v4 fingerprint.
    pub fn key_id(&self) -> KeyId {
        let mut id = [0u8; 8];
        id.copy_from_slice(&self.0[self.0.len() - 8..]);
        KeyId(u64::from_be_bytes(id))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(&self.0))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

impl FromStr for Fingerprint {
    type Err = DVError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s: String = strip_hex_prefix(s)
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        let bytes = hex::decode(s).map_err(|_| DVError::ParseError)?;
        Fingerprint::from_slice(&bytes)
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A key as written in verification metadata: a long key id or a full fingerprint.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum KeyRef {
    Id(KeyId),
    Fingerprint(Fingerprint),
}

impl KeyRef {
    pub fn key_id(&self) -> KeyId {
        match self {
            KeyRef::Id(id) => *id,
            KeyRef::Fingerprint(fpr) => fpr.key_id(),
        }
    }

    /// Fingerprints are compared in full when the signer's fingerprint is known.
    pub fn matches(&self, key_id: KeyId, fingerprint: Option<&Fingerprint>) -> bool {
        match (self, fingerprint) {
            (KeyRef::Id(id), _) => *id == key_id,
            (KeyRef::Fingerprint(fpr), Some(other)) => fpr == other,
            (KeyRef::Fingerprint(fpr), None) => fpr.key_id() == key_id,
        }
    }
}

impl From<KeyId> for KeyRef {
    fn from(id: KeyId) -> Self {
        KeyRef::Id(id)
    }
}

impl From<Fingerprint> for KeyRef {
    fn from(fpr: Fingerprint) -> Self {
        KeyRef::Fingerprint(fpr)
    }
}

impl fmt::Display for KeyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyRef::Id(id) => id.fmt(f),
            KeyRef::Fingerprint(fpr) => fpr.fmt(f),
        }
    }
}

impl FromStr for KeyRef {
    type Err = DVError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = strip_hex_prefix(s);
        match trimmed.len() {
            16 => Ok(KeyRef::Id(trimmed.parse()?)),
            40 => Ok(KeyRef::Fingerprint(trimmed.parse()?)),
            _ => Err(DVError::ParseError),
        }
    }
}

impl Serialize for KeyRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl TryFrom<&openpgp::KeyID> for KeyId {
    type Error = DVError;

    fn try_from(id: &openpgp::KeyID) -> Result<Self, Self::Error> {
        KeyId::from_slice(id.as_bytes())
    }
}

impl TryFrom<&openpgp::Fingerprint> for Fingerprint {
    type Error = DVError;

    /// Only v4 fingerprints are accepted.
    fn try_from(fpr: &openpgp::Fingerprint) -> Result<Self, Self::Error> {
        Fingerprint::from_slice(fpr.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_id_display_and_parse() {
        let id = KeyId::new(0xADC1B3B30173922E);
        assert_eq!(id.to_string(), "ADC1B3B30173922E");
        assert_eq!("adc1b3b30173922e".parse::<KeyId>().unwrap(), id);
        assert_eq!("0xADC1B3B30173922E".parse::<KeyId>().unwrap(), id);
        assert!("ADC1B3B3".parse::<KeyId>().is_err());
        assert!("ZZC1B3B30173922E".parse::<KeyId>().is_err());
    }

    #[test]
    fn test_fingerprint_key_id() {
        let fpr: Fingerprint = "287D01D4966C766927825487ADC1B3B30173922E".parse().unwrap();
        assert_eq!(fpr.key_id(), KeyId::new(0xADC1B3B30173922E));
        assert_eq!(fpr.to_string(), "287D01D4966C766927825487ADC1B3B30173922E");
        let spaced: Fingerprint = "287D 01D4 966C 7669 2782 5487 ADC1 B3B3 0173 922E"
            .parse()
            .unwrap();
        assert_eq!(spaced, fpr);
    }

    #[test]
    fn test_key_ref_matching() {
        let fpr: Fingerprint = "287D01D4966C766927825487ADC1B3B30173922E".parse().unwrap();
        let other: Fingerprint = "0000000000000000000000000000000000000001".parse().unwrap();
        let id = fpr.key_id();

        let by_id: KeyRef = "ADC1B3B30173922E".parse().unwrap();
        assert!(by_id.matches(id, Some(&other)));
        assert!(!by_id.matches(KeyId::new(1), None));

        let by_fpr: KeyRef = fpr.to_string().parse().unwrap();
        assert!(by_fpr.matches(id, Some(&fpr)));
        assert!(by_fpr.matches(id, None));
        assert!(!by_fpr.matches(id, Some(&other)));
        assert!("1234".parse::<KeyRef>().is_err());
    }

    #[test]
    fn test_from_openpgp_handles() {
        let fpr: openpgp::Fingerprint = "287D01D4966C766927825487ADC1B3B30173922E".parse().unwrap();
        let ours = Fingerprint::try_from(&fpr).unwrap();
        assert_eq!(ours.to_string(), "287D01D4966C766927825487ADC1B3B30173922E");
        let id = openpgp::KeyID::from(&fpr);
        assert_eq!(KeyId::try_from(&id).unwrap(), ours.key_id());
    }
}
