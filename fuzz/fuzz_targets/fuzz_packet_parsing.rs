//! Fuzz target for detached signature parsing
//!
//! Exercises the signature files shipped next to artifacts:
//! - Binary packet streams and one or more armored blocks
//! - Signature subpackets and issuer extraction
//!
//! Security concerns:
//! - Length prefixes larger than the remaining input
//! - Panics on truncated signature packets
//! - Issuers lost when a signature is written back out

#![no_main]

use depverify::pgp::parse_detached;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Signatures that parse must serialize and parse back with the same issuers
    if let Ok(signatures) = parse_detached(data) {
        let mut out = vec![];
        for signature in &signatures {
            if let Ok(bytes) = signature.to_bytes() {
                out.extend(bytes);
            }
        }
        if let Ok(reparsed) = parse_detached(&out) {
            let issuers: Vec<_> = signatures.iter().map(|s| s.issuer()).collect();
            let reissuers: Vec<_> = reparsed.iter().map(|s| s.issuer()).collect();
            assert_eq!(issuers, reissuers);
        }
    }
});
