//! Public key lookup against HKP key servers.
//!
//! Servers are queried in the configured order. A server that is
//! unreachable or fails is skipped with a warning; the first server that
//! returns the key wins.

mod hkp;
mod resolver;

pub use hkp::*;
pub use resolver::*;

use std::sync::Arc;

use crate::pgp::{KeyId, PublicKey};

/// Key servers used when the metadata does not configure any.
pub const DEFAULT_KEY_SERVERS: &[&str] = &[
    "hkps://keyserver.ubuntu.com",
    "hkps://keys.openpgp.org",
];

/// Result of asking a single server for a key.
#[derive(Debug, Clone)]
pub enum LookupOutcome {
    Found(Arc<PublicKey>),
    NotFound,
    TransientError(String),
}

/// Result of resolving a key across every configured source.
#[derive(Debug, Clone)]
pub enum KeyLookup {
    Found(Arc<PublicKey>),
    NotFound,
}

impl KeyLookup {
    pub fn key(&self) -> Option<&Arc<PublicKey>> {
        match self {
            KeyLookup::Found(key) => Some(key),
            KeyLookup::NotFound => None,
        }
    }
}

/// A source of public keys reachable over the network.
pub trait KeyServer: Send + Sync {
    fn uri(&self) -> &str;

    fn lookup(&self, key_id: KeyId) -> LookupOutcome;
}

/// Ordered list of key servers.
#[derive(Default)]
pub struct KeyServerClient {
    servers: Vec<Box<dyn KeyServer>>,
}

impl KeyServerClient {
    pub fn new(servers: Vec<Box<dyn KeyServer>>) -> Self {
        KeyServerClient { servers }
    }

    pub fn servers(&self) -> impl Iterator<Item = &str> {
        self.servers.iter().map(|s| s.uri())
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Tries each server in order until one returns the key.
    pub fn resolve(&self, key_id: KeyId) -> KeyLookup {
        for server in &self.servers {
            match server.lookup(key_id) {
                LookupOutcome::Found(key) => {
                    log::debug!("Key {} found on {}", key_id, server.uri());
                    return KeyLookup::Found(key);
                }
                LookupOutcome::NotFound => {
                    log::debug!("Key {} not found on {}", key_id, server.uri());
                }
                LookupOutcome::TransientError(e) => {
                    log::warn!("Key server {} failed for key {}: {}", server.uri(), key_id, e);
                }
            }
        }
        KeyLookup::NotFound
    }
}
