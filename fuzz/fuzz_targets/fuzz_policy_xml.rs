//! Fuzz target for verification metadata parsing
//!
//! Security concerns:
//! - Unbalanced or deeply nested elements
//! - Invalid escapes in attribute values
//! - Catastrophic regular expressions in trust scopes

#![no_main]

use depverify::policy::TrustPolicy;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(xml) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(policy) = TrustPolicy::from_xml(xml) {
        // A parsed policy writes out a document that parses to the same policy
        let written = policy.to_xml().expect("parsed policy must serialize");
        let reparsed = TrustPolicy::from_xml(&written).expect("written policy must parse");
        assert_eq!(reparsed, policy);
    }
});
