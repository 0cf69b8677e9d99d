use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use super::{KeyLookup, KeyServerClient};
use crate::keyring::Keyring;
use crate::pgp::{KeyId, PublicKey};

/// Resolves signer keys from a local keyring first, then from key
/// servers. Each key id is fetched at most once per resolver, even when
/// many workers ask for it concurrently.
pub struct KeyResolver {
    local: Keyring,
    client: Option<KeyServerClient>,
    remote: Mutex<HashMap<KeyId, Arc<OnceLock<KeyLookup>>>>,
    remote_lookups: AtomicUsize,
}

impl KeyResolver {
    /// `client` is `None` when remote lookups are disabled.
    pub fn new(local: Keyring, client: Option<KeyServerClient>) -> Self {
        KeyResolver {
            local,
            client,
            remote: Mutex::new(HashMap::new()),
            remote_lookups: AtomicUsize::new(0),
        }
    }

    pub fn offline(local: Keyring) -> Self {
        Self::new(local, None)
    }

    pub fn resolve(&self, key_id: KeyId) -> KeyLookup {
        if let Some(key) = self.local.find(key_id) {
            return KeyLookup::Found(key.clone());
        }
        let Some(client) = &self.client else {
            return KeyLookup::NotFound;
        };
        let cell = {
            let mut remote = self.remote.lock().unwrap_or_else(|e| e.into_inner());
            remote.entry(key_id).or_default().clone()
        };
        cell.get_or_init(|| {
            self.remote_lookups.fetch_add(1, Ordering::SeqCst);
            client.resolve(key_id)
        })
        .clone()
    }

    /// Number of key ids looked up on key servers so far.
    pub fn remote_lookups(&self) -> usize {
        self.remote_lookups.load(Ordering::SeqCst)
    }

    pub fn has_key_servers(&self) -> bool {
        self.client.as_ref().is_some_and(|c| !c.is_empty())
    }

    /// Keys downloaded from key servers, ordered by key id.
    pub fn downloaded(&self) -> Vec<Arc<PublicKey>> {
        let remote = self.remote.lock().unwrap_or_else(|e| e.into_inner());
        let found: BTreeMap<KeyId, Arc<PublicKey>> = remote
            .values()
            .filter_map(|cell| cell.get().and_then(KeyLookup::key).cloned())
            .map(|key| (key.key_id(), key))
            .collect();
        found.into_values().collect()
    }
}
