use sequoia_openpgp as openpgp;

use openpgp::parse::Parse;
use openpgp::serialize::Serialize;
use openpgp::types::HashAlgorithm;
use openpgp::{Packet, PacketPile};

use super::key::*;
use super::{armored_blocks, as_armored, openpgp_error, SignatureType};
use crate::error::*;

/// A signature packet with its issuer resolved to the key id and, when
/// the signature names it, the full fingerprint.
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    packet: openpgp::packet::Signature,
    issuer: Option<KeyId>,
    issuer_fingerprint: Option<Fingerprint>,
}

impl Signature {
    pub fn from_packet(packet: openpgp::packet::Signature) -> Self {
        let issuer_fingerprint = packet
            .issuer_fingerprints()
            .find_map(|fpr| Fingerprint::try_from(fpr).ok());
        let issuer = packet
            .issuers()
            .find_map(|id| KeyId::try_from(id).ok())
            .or_else(|| issuer_fingerprint.as_ref().map(Fingerprint::key_id));
        Signature {
            packet,
            issuer,
            issuer_fingerprint,
        }
    }

    pub fn sig_type(&self) -> SignatureType {
        self.packet.typ()
    }

    pub fn hash_algorithm(&self) -> HashAlgorithm {
        self.packet.hash_algo()
    }

    pub fn issuer(&self) -> Option<KeyId> {
        self.issuer
    }

    pub fn issuer_fingerprint(&self) -> Option<&Fingerprint> {
        self.issuer_fingerprint.as_ref()
    }

    pub fn packet(&self) -> &openpgp::packet::Signature {
        &self.packet
    }

    /// The binary signature packet.
    pub fn to_bytes(&self) -> Result<Vec<u8>, DVError> {
        let mut out = vec![];
        Packet::from(self.packet.clone())
            .serialize(&mut out)
            .map_err(openpgp_error)?;
        Ok(out)
    }
}

fn read_signatures(data: &[u8], signatures: &mut Vec<Signature>) -> Result<(), DVError> {
    let pile = PacketPile::from_bytes(data).map_err(openpgp_error)?;
    for packet in pile.into_children() {
        match packet {
            Packet::Signature(signature) => signatures.push(Signature::from_packet(signature)),
            other => log::debug!("Ignoring {} packet in a signature file", other.tag()),
        }
    }
    Ok(())
}

/// Parses a detached signature file, binary or ASCII-armored.
/// A file may carry several signatures, in one block or several.
pub fn parse_detached(data: &[u8]) -> Result<Vec<Signature>, DVError> {
    let mut signatures = vec![];
    match as_armored(data) {
        Some(text) => {
            for block in armored_blocks(text, "PGP SIGNATURE") {
                read_signatures(block.as_bytes(), &mut signatures)?;
            }
        }
        None => read_signatures(data, &mut signatures)?,
    }
    if signatures.is_empty() {
        return Err(DVError::MalformedPacket(
            "no signature packet found".to_string(),
        ));
    }
    Ok(signatures)
}
