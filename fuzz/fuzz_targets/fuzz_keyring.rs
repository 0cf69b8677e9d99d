//! Fuzz target for keyring parsing, sanitizing and export
//!
//! Exercises the key material read from disk or key servers:
//! - Binary and armored transferable public keys
//! - User ids, subkeys and their binding signatures
//!
//! Security concerns:
//! - Memory exhaustion via oversized packets
//! - Panics while dropping unbound subkeys or certifications
//! - Exports that do not read back to the same keys

#![no_main]

use depverify::keyring::Keyring;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(keyring) = Keyring::from_bytes(data) {
        let sanitized = keyring.sanitized();
        // A sanitized export must read back unchanged, in both formats
        if let Ok(binary) = sanitized.to_binary() {
            let reparsed = Keyring::from_bytes(&binary).expect("exported keyring must parse");
            assert_eq!(reparsed.key_ids(), sanitized.key_ids());
        }
        if let Ok(armored) = sanitized.to_armored() {
            let reparsed =
                Keyring::from_bytes(armored.as_bytes()).expect("armored keyring must parse");
            assert_eq!(reparsed.key_ids(), sanitized.key_ids());
        }
    }
});
