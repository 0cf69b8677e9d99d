//! A deduplicated, ordered set of public keys.
//!
//! Keys are unique by primary key id. When the same key is seen more
//! than once, the copy carrying more subkeys wins; on a tie the first
//! copy seen is kept.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::*;
use crate::pgp::*;

mod export;

pub use export::*;

/// On-disk representations of an exported keyring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum KeyringFormat {
    Armored,
    Binary,
    #[default]
    Both,
}

impl KeyringFormat {
    pub fn name(&self) -> &'static str {
        match self {
            KeyringFormat::Armored => "armored",
            KeyringFormat::Binary => "binary",
            KeyringFormat::Both => "both",
        }
    }

    pub fn writes_binary(&self) -> bool {
        matches!(self, KeyringFormat::Binary | KeyringFormat::Both)
    }

    pub fn writes_armored(&self) -> bool {
        matches!(self, KeyringFormat::Armored | KeyringFormat::Both)
    }
}

impl fmt::Display for KeyringFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for KeyringFormat {
    type Err = DVError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "armored" => Ok(KeyringFormat::Armored),
            "binary" => Ok(KeyringFormat::Binary),
            "both" => Ok(KeyringFormat::Both),
            _ => Err(DVError::KeyringError(format!("unknown keyring format '{s}'"))),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Keyring {
    keys: Vec<Arc<PublicKey>>,
    by_id: HashMap<KeyId, usize>,
    by_subkey_id: HashMap<KeyId, usize>,
}

impl PartialEq for Keyring {
    fn eq(&self, other: &Self) -> bool {
        self.keys == other.keys
    }
}

impl Eq for Keyring {}

impl Keyring {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a binary or ASCII-armored keyring. Armored input may hold
    /// several key blocks with text between them.
    pub fn from_bytes(data: &[u8]) -> Result<Self, DVError> {
        let mut keyring = Keyring::new();
        match as_armored(data) {
            Some(text) => {
                for block in armored_blocks(text, "PGP PUBLIC KEY BLOCK") {
                    keyring.extend_from(block.as_bytes())?;
                }
            }
            None => keyring.extend_from(data)?,
        }
        Ok(keyring)
    }

    fn extend_from(&mut self, data: &[u8]) -> Result<(), DVError> {
        for key in PublicKey::parse_all(data)? {
            self.insert(Arc::new(key));
        }
        Ok(())
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, DVError> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|e| {
            DVError::KeyringError(format!("failed to read '{}': {}", path.display(), e))
        })?;
        Self::from_bytes(&data)
    }

    /// Builds a keyring from keys in encounter order, deduplicating as it goes.
    pub fn from_keys(keys: impl IntoIterator<Item = Arc<PublicKey>>) -> Self {
        let mut keyring = Keyring::new();
        for key in keys {
            keyring.insert(key);
        }
        keyring
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<PublicKey>> {
        self.keys.iter()
    }

    pub fn key_ids(&self) -> Vec<KeyId> {
        self.keys.iter().map(|k| k.key_id()).collect()
    }

    /// Looks a key up by its primary key id.
    pub fn get(&self, key_id: KeyId) -> Option<&Arc<PublicKey>> {
        self.by_id.get(&key_id).map(|&i| &self.keys[i])
    }

    /// Looks a key up by its primary key id or the id of one of its subkeys.
    pub fn find(&self, key_id: KeyId) -> Option<&Arc<PublicKey>> {
        self.get(key_id)
            .or_else(|| self.by_subkey_id.get(&key_id).map(|&i| &self.keys[i]))
    }

    fn index_subkeys(&mut self, position: usize) {
        let ids: Vec<KeyId> = self.keys[position]
            .subkeys()
            .iter()
            .map(KeyPacket::key_id)
            .collect();
        for id in ids {
            self.by_subkey_id.entry(id).or_insert(position);
        }
    }

    /// Adds a key. An existing entry is replaced only by a copy with
    /// strictly more subkeys. Returns true if the keyring changed.
    pub fn insert(&mut self, key: Arc<PublicKey>) -> bool {
        let id = key.key_id();
        match self.by_id.get(&id) {
            Some(&position) => {
                if key.subkey_count() > self.keys[position].subkey_count() {
                    log::debug!(
                        "Replacing key {id} with a copy carrying {} subkeys",
                        key.subkey_count()
                    );
                    self.keys[position] = key;
                    self.index_subkeys(position);
                    true
                } else {
                    false
                }
            }
            None => {
                let position = self.keys.len();
                self.keys.push(key);
                self.by_id.insert(id, position);
                self.index_subkeys(position);
                true
            }
        }
    }

    pub fn merge(&mut self, other: &Keyring) {
        for key in other.iter() {
            self.insert(key.clone());
        }
    }

    /// Sorted by ascending numeric key id.
    pub fn sorted(&self) -> Keyring {
        let mut keys = self.keys.clone();
        keys.sort_by_key(|k| k.key_id());
        Keyring::from_keys(keys)
    }

    pub fn sanitized(&self) -> Keyring {
        Keyring::from_keys(self.keys.iter().map(|k| Arc::new(k.sanitized())))
    }

    pub fn to_binary(&self) -> Result<Vec<u8>, DVError> {
        let mut out = vec![];
        for key in &self.keys {
            out.extend(key.to_bytes()?);
        }
        Ok(out)
    }

    /// One armored block per key, each preceded by `pub`, `uid` and
    /// `sub` summary lines.
    pub fn to_armored(&self) -> Result<String, DVError> {
        let mut out = String::new();
        for key in &self.keys {
            out.push_str(&describe_key(key));
            out.push('\n');
            out.push_str(&key.to_armored()?);
        }
        Ok(out)
    }
}

/// Human-readable summary lines for a key.
pub fn describe_key(key: &PublicKey) -> String {
    let mut out = format!(
        "pub    {} {}\n",
        algorithm_label(key.primary()),
        key.fingerprint()
    );
    for uid in key.user_ids() {
        out.push_str(&format!("uid    {uid}\n"));
    }
    for subkey in key.subkeys() {
        out.push_str(&format!(
            "sub    {} {}\n",
            algorithm_label(subkey),
            subkey.fingerprint()
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestKey;
    use proptest::prelude::*;

    fn key(seed: u8, subkeys: usize) -> Arc<PublicKey> {
        Arc::new(TestKey::new(seed).public_key(&format!("Key {seed}"), subkeys))
    }

    #[test]
    fn test_insert_keeps_richer_copy() {
        let mut keyring = Keyring::new();
        assert!(keyring.insert(key(1, 0)));
        assert!(keyring.insert(key(1, 2)));
        assert!(!keyring.insert(key(1, 1)));
        assert_eq!(keyring.len(), 1);
        assert_eq!(keyring.iter().next().unwrap().subkey_count(), 2);
    }

    #[test]
    fn test_tie_keeps_first_seen() {
        let owner = TestKey::new(2);
        let first = key(2, 1);
        let mut packets = owner.cert_packets("Other");
        packets.extend(owner.bind(&TestKey::new(owner.subkey_seed(0))));
        let cert = sequoia_openpgp::Cert::from_packets(packets.into_iter()).unwrap();
        let second = Arc::new(PublicKey::from_cert(cert).unwrap());
        assert_eq!(second.subkey_count(), 1);
        let keyring = Keyring::from_keys([first.clone(), second]);
        assert!(Arc::ptr_eq(keyring.iter().next().unwrap(), &first));
    }

    #[test]
    fn test_find_by_subkey() {
        let k = key(3, 2);
        let subkey_id = k.subkeys()[1].key_id();
        let keyring = Keyring::from_keys([k.clone()]);
        assert_eq!(keyring.find(subkey_id).map(|k| k.key_id()), Some(k.key_id()));
        assert!(keyring.get(subkey_id).is_none());
    }

    #[test]
    fn test_sorted_ascending() {
        let keyring = Keyring::from_keys((1..=20).map(|s| key(s, 0))).sorted();
        let ids = keyring.key_ids();
        let mut expected = ids.clone();
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_binary_and_armored_round_trip() {
        let keyring = Keyring::from_keys([key(4, 1), key(5, 0), key(6, 2)]).sorted();
        let binary = keyring.to_binary().unwrap();
        assert_eq!(Keyring::from_bytes(&binary).unwrap(), keyring);
        let armored = keyring.to_armored().unwrap();
        assert!(armored.starts_with("pub    eddsa"));
        assert_eq!(armored.matches("-----BEGIN PGP PUBLIC KEY BLOCK-----").count(), 3);
        assert!(armored.contains("uid    Key 6\n"));
        assert_eq!(Keyring::from_bytes(armored.as_bytes()).unwrap(), keyring);
    }

    #[test]
    fn test_merge_fifty_with_duplicates() {
        let mut entries: Vec<Arc<PublicKey>> = (1..=40).map(|s| key(s, 0)).collect();
        let repeated = key(100, 0);
        entries.extend(std::iter::repeat(repeated).take(10));
        let keyring = Keyring::from_keys(entries).sorted();
        assert_eq!(keyring.len(), 41);
        let ids = keyring.key_ids();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_merge_keeps_one_entry_per_key_with_most_subkeys(
            counts in proptest::collection::vec((0u8..6, 0usize..3), 1..16)
        ) {
            let keys: Vec<Arc<PublicKey>> = counts.iter().map(|&(s, n)| key(s + 1, n)).collect();
            let keyring = Keyring::from_keys(keys).sorted();
            let mut distinct: Vec<u8> = counts.iter().map(|&(s, _)| s).collect();
            distinct.sort();
            distinct.dedup();
            prop_assert_eq!(keyring.len(), distinct.len());
            for s in distinct {
                let max = counts.iter().filter(|&&(x, _)| x == s).map(|&(_, n)| n).max().unwrap();
                let id = TestKey::new(s + 1).key_id();
                prop_assert_eq!(keyring.get(id).unwrap().subkey_count(), max);
            }
            let ids = keyring.key_ids();
            prop_assert!(ids.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
