use std::fmt;

use sequoia_openpgp as openpgp;

use openpgp::cert::{Cert, CertParser};
use openpgp::cert::amalgamation::ValidAmalgamation;
use openpgp::packet::key::{PublicParts, UnspecifiedRole};
use openpgp::packet::{Key, Packet};
use openpgp::parse::Parse;
use openpgp::serialize::{Serialize, SerializeInto};

use super::key::*;
use super::{openpgp_error, PublicKeyAlgorithm, POLICY};
use crate::error::*;

/// A primary key or a bound subkey.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyPacket {
    key: Key<PublicParts, UnspecifiedRole>,
    key_id: KeyId,
    fingerprint: Fingerprint,
    signing: bool,
}

impl KeyPacket {
    pub(crate) fn new(
        key: Key<PublicParts, UnspecifiedRole>,
        signing: bool,
    ) -> Result<Self, DVError> {
        let fingerprint = Fingerprint::try_from(&key.fingerprint())?;
        Ok(KeyPacket {
            key_id: fingerprint.key_id(),
            fingerprint,
            key,
            signing,
        })
    }

    pub fn key_id(&self) -> KeyId {
        self.key_id
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn algorithm(&self) -> PublicKeyAlgorithm {
        self.key.pk_algo()
    }

    /// Key size in bits, when it is meaningful for the algorithm.
    pub fn bits(&self) -> Option<usize> {
        self.key.mpis().bits()
    }

    /// Whether the key may make document signatures. Primary keys always
    /// may; a subkey only when its binding signature grants it.
    pub fn can_sign(&self) -> bool {
        self.signing
    }

    pub(crate) fn material(&self) -> &Key<PublicParts, UnspecifiedRole> {
        &self.key
    }
}

/// Short algorithm name in the style of `gpg --list-keys`, with the key size.
pub fn algorithm_label(key: &KeyPacket) -> String {
    let name = match u8::from(key.algorithm()) {
        1..=3 => "rsa".to_string(),
        16 | 20 => "elg".to_string(),
        17 => "dsa".to_string(),
        18 => "ecdh".to_string(),
        19 => "ecdsa".to_string(),
        22 => "eddsa".to_string(),
        id => format!("algo{id}"),
    };
    match key.bits() {
        Some(bits) => format!("{name}{bits}"),
        None => name,
    }
}

/// A transferable public key.
///
/// Subkeys are only exposed once their binding signature has been
/// checked against the primary key, so a subkey appended to someone
/// else's certificate is never treated as theirs.
#[derive(Debug, Clone)]
pub struct PublicKey {
    cert: Cert,
    primary: KeyPacket,
    subkeys: Vec<KeyPacket>,
    user_ids: Vec<String>,
    primary_user_id: Option<String>,
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.primary == other.primary && self.to_bytes().ok() == other.to_bytes().ok()
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.primary.fingerprint)
    }
}

impl PublicKey {
    pub fn from_cert(cert: Cert) -> Result<Self, DVError> {
        let primary_key = cert.primary_key().key().clone().role_into_unspecified();
        let primary = KeyPacket::new(primary_key, true)?;
        let user_ids: Vec<String> = cert
            .userids()
            .map(|uid| String::from_utf8_lossy(uid.userid().value()).into_owned())
            .collect();
        let (subkeys, primary_user_id) = match cert.with_policy(&POLICY, None) {
            Ok(valid) => {
                let subkeys = valid
                    .keys()
                    .subkeys()
                    .filter_map(|subkey| {
                        let key = subkey.key().clone().role_into_unspecified();
                        KeyPacket::new(key, subkey.for_signing()).ok()
                    })
                    .collect();
                let primary_user_id = valid
                    .primary_userid()
                    .ok()
                    .map(|uid| String::from_utf8_lossy(uid.userid().value()).into_owned());
                (subkeys, primary_user_id)
            }
            Err(e) => {
                log::debug!("Key {} has no usable self-signature: {e}", primary.key_id());
                (vec![], None)
            }
        };
        Ok(PublicKey {
            primary_user_id: primary_user_id.or_else(|| user_ids.first().cloned()),
            cert,
            primary,
            subkeys,
            user_ids,
        })
    }

    /// Parses every certificate in a binary or single armored block.
    pub fn parse_all(data: &[u8]) -> Result<Vec<PublicKey>, DVError> {
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(vec![]);
        }
        let mut keys = vec![];
        for cert in CertParser::from_bytes(data).map_err(openpgp_error)? {
            let cert = cert.map_err(|e| DVError::KeyringError(e.to_string()))?;
            match PublicKey::from_cert(cert) {
                Ok(key) => keys.push(key),
                Err(e) => log::warn!("Skipping unsupported key: {e}"),
            }
        }
        Ok(keys)
    }

    pub fn key_id(&self) -> KeyId {
        self.primary.key_id()
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        self.primary.fingerprint()
    }

    pub fn primary(&self) -> &KeyPacket {
        &self.primary
    }

    /// Subkeys carrying a valid binding signature.
    pub fn subkeys(&self) -> &[KeyPacket] {
        &self.subkeys
    }

    pub fn subkey_count(&self) -> usize {
        self.subkeys.len()
    }

    pub fn user_ids(&self) -> &[String] {
        &self.user_ids
    }

    /// The user id flagged primary by a self-signature, or the first one.
    pub fn primary_user_id(&self) -> Option<&str> {
        self.primary_user_id.as_deref()
    }

    pub fn user_attribute_count(&self) -> usize {
        self.cert.user_attributes().count()
    }

    /// User id certifications made by other keys.
    pub fn third_party_certifications(&self) -> usize {
        self.cert
            .userids()
            .map(|uid| uid.certifications().into_iter().count())
            .sum()
    }

    pub fn cert(&self) -> &Cert {
        &self.cert
    }

    /// The primary key, or a bound subkey allowed to sign, with this id.
    pub fn signing_key(&self, key_id: KeyId) -> Option<&KeyPacket> {
        if self.primary.key_id() == key_id {
            return Some(&self.primary);
        }
        self.subkeys
            .iter()
            .find(|k| k.key_id() == key_id && k.can_sign())
    }

    pub fn has_key_id(&self, key_id: KeyId) -> bool {
        self.primary.key_id() == key_id || self.subkeys.iter().any(|k| k.key_id() == key_id)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, DVError> {
        let mut out = vec![];
        self.cert.serialize(&mut out).map_err(openpgp_error)?;
        Ok(out)
    }

    pub fn to_armored(&self) -> Result<String, DVError> {
        let armored = self.cert.armored().to_vec().map_err(openpgp_error)?;
        String::from_utf8(armored).map_err(|e| DVError::InternalError(e.to_string()))
    }

    /// The primary key with its direct-key and primary user id
    /// self-signatures, plus each bound subkey with its current binding.
    fn minimal_cert(&self) -> openpgp::Result<Cert> {
        let valid = self.cert.with_policy(&POLICY, None)?;
        let mut packets: Vec<Packet> = vec![valid.primary_key().key().clone().into()];
        if let Ok(direct) = valid.direct_key_signature() {
            packets.push(direct.clone().into());
        }
        if let Ok(uid) = valid.primary_userid() {
            packets.push(uid.userid().clone().into());
            packets.push(uid.binding_signature().clone().into());
        }
        for subkey in valid.keys().subkeys() {
            packets.push(subkey.key().clone().into());
            packets.push(subkey.binding_signature().clone().into());
        }
        Cert::from_packets(packets.into_iter())
    }

    /// Reduces the key to what verification needs: self-signatures, one
    /// user id and bound subkeys. User attributes, third-party
    /// certifications and unbound subkeys are dropped. A key without a
    /// valid self-signature keeps only its primary key.
    pub fn sanitized(&self) -> PublicKey {
        let cert = self.minimal_cert().or_else(|e| {
            log::debug!("Keeping only the primary key of {}: {e}", self.key_id());
            let primary: Packet = self.cert.primary_key().key().clone().into();
            Cert::from_packets(std::iter::once(primary))
        });
        match cert.map_err(openpgp_error).and_then(PublicKey::from_cert) {
            Ok(key) => key,
            Err(e) => {
                log::warn!("Unable to sanitize key {}: {e}", self.key_id());
                self.clone()
            }
        }
    }
}
