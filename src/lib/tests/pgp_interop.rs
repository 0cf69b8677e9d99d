//! Signatures and keys produced by GnuPG.
//!
//! Fixtures: Alice (RSA-2048, SHA-512 signatures), Bob (Ed25519) and
//! Carol (NIST P-256), each signing `demo-lib-1.0.jar`.

use std::path::PathBuf;

use depverify::keyring::Keyring;
use depverify::pgp::{
    parse_detached, verify_signature, Fingerprint, InvalidReason, KeyId, PublicKeyAlgorithm,
    SignatureCheck, SignatureType,
};

const ALICE: u64 = 0xADC1B3B30173922E;
const BOB: u64 = 0x2BDF5FAC7D64304B;
const CAROL: u64 = 0x09D4E764B4ABDE06;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn read(name: &str) -> Vec<u8> {
    std::fs::read(fixture(name)).unwrap()
}

fn keyring(names: &[&str]) -> Keyring {
    let mut keyring = Keyring::new();
    for name in names {
        keyring.merge(&Keyring::from_file(fixture(name)).unwrap());
    }
    keyring
}

fn check(keys: &Keyring, signature_file: &str, data: &[u8]) -> Vec<SignatureCheck> {
    parse_detached(&read(signature_file))
        .unwrap()
        .iter()
        .map(|signature| {
            let issuer = signature.issuer().unwrap();
            let key = keys.find(issuer).unwrap();
            verify_signature(data, signature, key.signing_key(issuer).unwrap())
        })
        .collect()
}

#[test]
fn test_key_identity() {
    let keys = keyring(&["alice.gpg", "bob.gpg", "carol.gpg"]);
    let alice = keys.get(KeyId::new(ALICE)).unwrap();
    assert_eq!(
        alice.fingerprint(),
        &"287D01D4966C766927825487ADC1B3B30173922E"
            .parse::<Fingerprint>()
            .unwrap()
    );
    assert_eq!(alice.primary().algorithm(), PublicKeyAlgorithm::RSAEncryptSign);
    assert_eq!(alice.primary().bits(), Some(2048));

    let bob = keys.get(KeyId::new(BOB)).unwrap();
    assert_eq!(bob.primary().algorithm(), PublicKeyAlgorithm::EdDSA);
    assert_eq!(bob.subkey_count(), 2);
    assert_eq!(bob.primary_user_id(), Some("Bob Releaser <bob@example.com>"));

    let carol = keys.get(KeyId::new(CAROL)).unwrap();
    assert_eq!(carol.primary().algorithm(), PublicKeyAlgorithm::ECDSA);
}

#[test]
fn test_armored_and_binary_keyrings_agree() {
    assert_eq!(keyring(&["alice.asc"]), keyring(&["alice.gpg"]));
}

#[test]
fn test_rsa_signature() {
    let keys = keyring(&["alice.gpg"]);
    let jar = read("demo-lib-1.0.jar");
    assert_eq!(check(&keys, "demo-lib-1.0.jar.alice.asc", &jar), vec![SignatureCheck::Valid]);
}

#[test]
fn test_eddsa_signature() {
    let keys = keyring(&["bob.gpg"]);
    let jar = read("demo-lib-1.0.jar");
    assert_eq!(check(&keys, "demo-lib-1.0.jar.bob.asc", &jar), vec![SignatureCheck::Valid]);
}

#[test]
fn test_ecdsa_signature() {
    let keys = keyring(&["carol.gpg"]);
    let jar = read("demo-lib-1.0.jar");
    assert_eq!(check(&keys, "demo-lib-1.0.jar.carol.asc", &jar), vec![SignatureCheck::Valid]);
}

#[test]
fn test_binary_signature_file() {
    let keys = keyring(&["alice.gpg"]);
    let pom = read("demo-lib-1.0.pom");
    let signatures = parse_detached(&read("demo-lib-1.0.pom.alice.sig")).unwrap();
    assert_eq!(signatures[0].sig_type(), SignatureType::Binary);
    assert_eq!(check(&keys, "demo-lib-1.0.pom.alice.sig", &pom), vec![SignatureCheck::Valid]);
}

#[test]
fn test_multiple_signers() {
    let keys = keyring(&["alice.gpg", "carol.gpg"]);
    let jar = read("demo-lib-1.0.jar");
    let signatures = parse_detached(&read("demo-lib-1.0.jar.multi.asc")).unwrap();
    let issuers: Vec<_> = signatures.iter().map(|s| s.issuer().unwrap()).collect();
    assert_eq!(issuers, vec![KeyId::new(ALICE), KeyId::new(CAROL)]);
    assert_eq!(
        check(&keys, "demo-lib-1.0.jar.multi.asc", &jar),
        vec![SignatureCheck::Valid, SignatureCheck::Valid]
    );
}

#[test]
fn test_tampered_content_never_verifies() {
    let keys = keyring(&["alice.gpg", "bob.gpg", "carol.gpg"]);
    let jar = read("demo-lib-1.0.jar");
    for offset in [0, jar.len() / 2, jar.len() - 1] {
        let mut tampered = jar.clone();
        tampered[offset] ^= 0x20;
        for signer in ["alice", "bob", "carol"] {
            let checks = check(&keys, &format!("demo-lib-1.0.jar.{signer}.asc"), &tampered);
            assert_eq!(
                checks,
                vec![SignatureCheck::Invalid(InvalidReason::Mismatch)],
                "{signer} at offset {offset}"
            );
        }
    }
}

#[test]
fn test_wrong_key_family() {
    let keys = keyring(&["alice.gpg", "carol.gpg"]);
    let jar = read("demo-lib-1.0.jar");
    let signature = &parse_detached(&read("demo-lib-1.0.jar.alice.asc")).unwrap()[0];
    let carol = keys.get(KeyId::new(CAROL)).unwrap();
    assert_eq!(
        verify_signature(&jar, signature, carol.primary()),
        SignatureCheck::Invalid(InvalidReason::Malformed)
    );
}

#[test]
fn test_garbled_signature_never_verifies() {
    let keys = keyring(&["bob.gpg"]);
    let jar = read("demo-lib-1.0.jar");
    let text = String::from_utf8(read("demo-lib-1.0.jar.bob.asc")).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    let body = lines.iter().position(|l| l.is_empty()).unwrap() + 1;
    let mut garbled: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
    garbled[body] = garbled[body].chars().rev().collect();
    let garbled = garbled.join("\n");

    let Ok(signatures) = parse_detached(garbled.as_bytes()) else {
        return;
    };
    for signature in &signatures {
        let Some(key) = signature.issuer().and_then(|id| keys.find(id)) else {
            continue;
        };
        let signing_key = signature.issuer().and_then(|id| key.signing_key(id));
        if let Some(signing_key) = signing_key {
            assert!(!verify_signature(&jar, signature, signing_key).is_valid());
        }
    }
}
