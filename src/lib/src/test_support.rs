//! Deterministic Ed25519 OpenPGP keys and signatures for unit tests.

use std::io::Write;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use sequoia_openpgp as openpgp;

use openpgp::armor;
use openpgp::cert::Cert;
use openpgp::crypto::KeyPair;
use openpgp::packet::key::{
    Key4, PrimaryRole, PublicParts, SecretParts, SubordinateRole, UnspecifiedRole,
};
use openpgp::packet::signature::SignatureBuilder;
use openpgp::packet::{Key, Packet, UserID};
use openpgp::types::{KeyFlags, SignatureType};

use crate::pgp::*;

pub(crate) struct TestKey {
    secret: Key<SecretParts, UnspecifiedRole>,
    fingerprint: Fingerprint,
}

impl TestKey {
    pub fn new(seed: u8) -> Self {
        let created = UNIX_EPOCH + Duration::from_secs(1_600_000_000 + seed as u64);
        let key4 = Key4::<SecretParts, UnspecifiedRole>::import_secret_ed25519(&[seed; 32], created)
            .unwrap();
        let secret = Key::from(key4);
        let fingerprint = Fingerprint::try_from(&secret.fingerprint()).unwrap();
        TestKey {
            secret,
            fingerprint,
        }
    }

    fn keypair(&self) -> KeyPair {
        self.secret.clone().into_keypair().unwrap()
    }

    pub fn key_id(&self) -> KeyId {
        self.fingerprint.key_id()
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn primary_key(&self) -> Key<PublicParts, PrimaryRole> {
        self.secret.clone().parts_into_public().role_into_primary()
    }

    pub fn subkey(&self) -> Key<PublicParts, SubordinateRole> {
        self.secret.clone().parts_into_public().role_into_subordinate()
    }

    pub fn packet(&self) -> KeyPacket {
        KeyPacket::new(self.secret.clone().parts_into_public(), true).unwrap()
    }

    pub fn sign(&self, data: &[u8]) -> Signature {
        self.sign_with_type(data, SignatureType::Binary)
    }

    pub fn sign_with_type(&self, data: &[u8], sig_type: SignatureType) -> Signature {
        let content = match sig_type {
            SignatureType::Text => canonical_text(data),
            _ => data.to_vec(),
        };
        let packet = SignatureBuilder::new(sig_type)
            .sign_message(&mut self.keypair(), &content)
            .unwrap();
        Signature::from_packet(packet)
    }

    /// Binary detached signature file contents.
    pub fn detached(&self, data: &[u8]) -> Vec<u8> {
        self.sign(data).to_bytes().unwrap()
    }

    pub fn detached_armored(&self, data: &[u8]) -> Vec<u8> {
        let mut writer = armor::Writer::new(vec![], armor::Kind::Signature).unwrap();
        writer.write_all(&self.detached(data)).unwrap();
        writer.finalize().unwrap()
    }

    /// A positive self-certification of `user_id`.
    pub fn certification(&self, user_id: &str) -> Signature {
        Signature::from_packet(self.certify(self, user_id))
    }

    /// Certifies `owner`'s `user_id` with this key.
    pub fn certify(&self, owner: &TestKey, user_id: &str) -> openpgp::packet::Signature {
        let sig_type = if owner.key_id() == self.key_id() {
            SignatureType::PositiveCertification
        } else {
            SignatureType::GenericCertification
        };
        SignatureBuilder::new(sig_type)
            .set_key_flags(KeyFlags::empty().set_certification().set_signing())
            .unwrap()
            .sign_userid_binding(&mut self.keypair(), &owner.primary_key(), &UserID::from(user_id))
            .unwrap()
    }

    pub fn user_id_packets(&self, user_id: &str) -> Vec<Packet> {
        vec![
            UserID::from(user_id).into(),
            self.certify(self, user_id).into(),
        ]
    }

    /// The primary key and one self-certified user id.
    pub fn cert_packets(&self, user_id: &str) -> Vec<Packet> {
        let mut packets: Vec<Packet> = vec![self.primary_key().into()];
        packets.extend(self.user_id_packets(user_id));
        packets
    }

    /// `subkey` bound as a signing subkey, with its back-signature.
    pub fn bind(&self, subkey: &TestKey) -> Vec<Packet> {
        let backsig = SignatureBuilder::new(SignatureType::PrimaryKeyBinding)
            .sign_primary_key_binding(&mut subkey.keypair(), &self.primary_key(), &subkey.subkey())
            .unwrap();
        let binding = SignatureBuilder::new(SignatureType::SubkeyBinding)
            .set_key_flags(KeyFlags::empty().set_signing())
            .unwrap()
            .set_embedded_signature(backsig)
            .unwrap()
            .sign_subkey_binding(&mut self.keypair(), &self.primary_key(), &subkey.subkey())
            .unwrap();
        vec![subkey.subkey().into(), binding.into()]
    }

    /// `subkey` bound for encryption only.
    pub fn bind_for_encryption(&self, subkey: &TestKey) -> Vec<Packet> {
        let binding = SignatureBuilder::new(SignatureType::SubkeyBinding)
            .set_key_flags(KeyFlags::empty().set_storage_encryption())
            .unwrap()
            .sign_subkey_binding(&mut self.keypair(), &self.primary_key(), &subkey.subkey())
            .unwrap();
        vec![subkey.subkey().into(), binding.into()]
    }

    /// A binding of this key under `owner`, claiming `owner` as issuer but
    /// made with this key.
    pub fn forged_binding(&self, owner: &TestKey) -> openpgp::packet::Signature {
        let primary = owner.primary_key();
        SignatureBuilder::new(SignatureType::SubkeyBinding)
            .set_key_flags(KeyFlags::empty().set_signing())
            .unwrap()
            .set_issuer(primary.keyid())
            .unwrap()
            .set_issuer_fingerprint(primary.fingerprint())
            .unwrap()
            .sign_subkey_binding(&mut self.keypair(), &primary, &self.subkey())
            .unwrap()
    }

    pub fn subkey_seed(&self, index: usize) -> u8 {
        self.fingerprint.as_bytes()[0] ^ (0x80 | index as u8)
    }

    /// A self-certified key with `subkeys` bound signing subkeys.
    pub fn cert(&self, user_id: &str, subkeys: usize) -> Cert {
        let mut packets = self.cert_packets(user_id);
        for i in 0..subkeys {
            packets.extend(self.bind(&TestKey::new(self.subkey_seed(i))));
        }
        Cert::from_packets(packets.into_iter()).unwrap()
    }

    pub fn public_key(&self, user_id: &str, subkeys: usize) -> PublicKey {
        PublicKey::from_cert(self.cert(user_id, subkeys)).unwrap()
    }
}
