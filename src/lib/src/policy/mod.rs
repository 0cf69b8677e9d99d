//! The trust policy: which checksums and which signing keys are accepted
//! for which artifacts.
//!
//! The policy is persisted as an XML document, `verification-metadata.xml`:
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8"?>
//! <verification-metadata>
//!    <configuration>
//!       <verify-metadata>true</verify-metadata>
//!       <verify-signatures>true</verify-signatures>
//!       <key-servers>
//!          <key-server uri="hkps://keys.openpgp.org"/>
//!       </key-servers>
//!       <trusted-keys>
//!          <trusted-key id="ADC1B3B30173922E" group="org.example"/>
//!       </trusted-keys>
//!       <ignored-keys>
//!          <ignored-key id="2BDF5FAC7D64304B" reason="Key couldn't be downloaded from any key server"/>
//!       </ignored-keys>
//!    </configuration>
//!    <components>
//!       <component group="org.example" name="demo-lib" version="1.0">
//!          <artifact name="demo-lib-1.0.jar">
//!             <sha256 value="..." origin="Generated by depverify"/>
//!             <pgp value="025102BAD906249D9AE3E5AC09D4E764B4ABDE06"/>
//!          </artifact>
//!       </component>
//!    </components>
//! </verification-metadata>
//! ```
//!
//! Narrower scopes take precedence: a key ignored or trusted for one
//! artifact overrides the configuration-level trusted and ignored keys.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::Arc;

use regex::Regex;
use serde::Serialize;

use crate::checksum::ChecksumKind;
use crate::error::*;
use crate::keyring::KeyringFormat;
use crate::pgp::{Fingerprint, KeyId, KeyRef};

mod artifact;
mod xml;

pub use artifact::*;

pub const METADATA_FILE: &str = "verification-metadata.xml";

// ============================================================================
// Entries
// ============================================================================

/// A recorded digest for an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Checksum {
    pub kind: ChecksumKind,
    pub value: String,
    /// Additional digests accepted for the same artifact.
    pub also_trust: Vec<String>,
    pub origin: Option<String>,
    pub reason: Option<String>,
}

impl Checksum {
    pub fn new(kind: ChecksumKind, value: impl Into<String>) -> Self {
        Checksum {
            kind,
            value: value.into().to_ascii_lowercase(),
            also_trust: vec![],
            origin: None,
            reason: None,
        }
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_also_trust(mut self, value: impl Into<String>) -> Self {
        self.also_trust.push(value.into().to_ascii_lowercase());
        self
    }

    /// Compares a hex digest against the recorded value and the
    /// `also-trust` alternatives.
    pub fn matches(&self, actual: &str) -> bool {
        self.value.eq_ignore_ascii_case(actual)
            || self.also_trust.iter().any(|v| v.eq_ignore_ascii_case(actual))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct IgnoredKey {
    pub key: KeyRef,
    pub reason: Option<String>,
}

impl IgnoredKey {
    pub fn new(key: impl Into<KeyRef>, reason: Option<String>) -> Self {
        IgnoredKey {
            key: key.into(),
            reason,
        }
    }
}

/// Artifacts a trusted key applies to. Unset fields match anything;
/// with `regex` set, fields are full-match regular expressions, compiled
/// once when the scope is created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TrustScope {
    group: Option<String>,
    name: Option<String>,
    version: Option<String>,
    file: Option<String>,
    regex: bool,
    #[serde(skip)]
    compiled: ScopeRegexes,
}

/// Compiled patterns of a regex scope, in field order. Derived entirely
/// from the pattern strings, so it takes no part in comparisons.
#[derive(Debug, Clone, Default)]
struct ScopeRegexes(Option<Arc<[Option<Regex>; 4]>>);

impl PartialEq for ScopeRegexes {
    fn eq(&self, _: &Self) -> bool {
        true
    }
}

impl Eq for ScopeRegexes {}

impl PartialOrd for ScopeRegexes {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScopeRegexes {
    fn cmp(&self, _: &Self) -> Ordering {
        Ordering::Equal
    }
}

impl Hash for ScopeRegexes {
    fn hash<H: Hasher>(&self, _: &mut H) {}
}

fn compile_pattern(pattern: &Option<String>) -> Result<Option<Regex>, DVError> {
    pattern
        .as_deref()
        .map(|p| {
            Regex::new(&format!("^(?:{p})$")).map_err(|e| {
                DVError::PolicyParseError(format!("invalid regular expression '{p}': {e}"))
            })
        })
        .transpose()
}

impl TrustScope {
    /// A scope over the given coordinates. With `regex` set, an invalid
    /// pattern is a `PolicyParseError`.
    pub fn new(
        group: Option<String>,
        name: Option<String>,
        version: Option<String>,
        file: Option<String>,
        regex: bool,
    ) -> Result<Self, DVError> {
        let compiled = if regex {
            ScopeRegexes(Some(Arc::new([
                compile_pattern(&group)?,
                compile_pattern(&name)?,
                compile_pattern(&version)?,
                compile_pattern(&file)?,
            ])))
        } else {
            ScopeRegexes::default()
        };
        Ok(TrustScope {
            group,
            name,
            version,
            file,
            regex,
            compiled,
        })
    }

    pub fn group(group: impl Into<String>) -> Self {
        TrustScope {
            group: Some(group.into()),
            ..Default::default()
        }
    }

    pub fn is_regex(&self) -> bool {
        self.regex
    }

    pub fn is_unrestricted(&self) -> bool {
        self.group.is_none() && self.name.is_none() && self.version.is_none() && self.file.is_none()
    }

    pub fn matches(&self, artifact: &ArtifactRef) -> bool {
        let fields = [&self.group, &self.name, &self.version, &self.file];
        let values = [
            artifact.group(),
            artifact.name(),
            artifact.version(),
            artifact.file(),
        ];
        match &self.compiled.0 {
            Some(regexes) => regexes
                .iter()
                .zip(values)
                .all(|(re, value)| re.as_ref().map_or(true, |re| re.is_match(value))),
            None => fields
                .into_iter()
                .zip(values)
                .all(|(pattern, value)| pattern.as_deref().map_or(true, |p| p == value)),
        }
    }
}

/// A key trusted for every artifact, or for the artifacts in `scopes`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TrustedKey {
    pub key: KeyRef,
    pub scopes: Vec<TrustScope>,
}

impl TrustedKey {
    pub fn global(key: impl Into<KeyRef>) -> Self {
        TrustedKey {
            key: key.into(),
            scopes: vec![],
        }
    }

    pub fn scoped(key: impl Into<KeyRef>, scope: TrustScope) -> Self {
        let scopes = if scope.is_unrestricted() { vec![] } else { vec![scope] };
        TrustedKey {
            key: key.into(),
            scopes,
        }
    }

    pub fn is_global(&self) -> bool {
        self.scopes.is_empty()
    }

    pub fn applies_to(&self, artifact: &ArtifactRef) -> bool {
        self.is_global() || self.scopes.iter().any(|s| s.matches(artifact))
    }
}

/// What the policy records for one artifact file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArtifactVerification {
    pub checksums: Vec<Checksum>,
    pub ignored_keys: Vec<IgnoredKey>,
    pub trusted_pgp_keys: Vec<KeyRef>,
}

impl ArtifactVerification {
    pub fn checksum(&self, kind: ChecksumKind) -> Option<&Checksum> {
        self.checksums.iter().find(|c| c.kind == kind)
    }

    pub fn is_empty(&self) -> bool {
        self.checksums.is_empty()
            && self.ignored_keys.is_empty()
            && self.trusted_pgp_keys.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentVerification {
    pub module: ModuleId,
    pub artifacts: BTreeMap<String, ArtifactVerification>,
}

/// How the policy regards a signing key for a given artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTrust {
    Trusted,
    Ignored,
    Unknown,
}

// ============================================================================
// Policy
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustPolicy {
    verify_metadata: bool,
    verify_signatures: bool,
    keyring_format: Option<KeyringFormat>,
    key_servers_enabled: bool,
    key_servers: Vec<String>,
    trusted_keys: Vec<TrustedKey>,
    ignored_keys: Vec<IgnoredKey>,
    components: BTreeMap<ModuleId, ComponentVerification>,
}

impl Default for TrustPolicy {
    fn default() -> Self {
        Self {
            verify_metadata: true,
            verify_signatures: false,
            keyring_format: None,
            key_servers_enabled: true,
            key_servers: vec![],
            trusted_keys: vec![],
            ignored_keys: vec![],
            components: BTreeMap::new(),
        }
    }
}

impl TrustPolicy {
    pub fn builder() -> TrustPolicyBuilder {
        TrustPolicyBuilder::new()
    }

    /// A builder seeded with this policy's content.
    pub fn to_builder(&self) -> TrustPolicyBuilder {
        TrustPolicyBuilder {
            policy: self.clone(),
        }
    }

    pub fn from_xml(xml: &str) -> Result<Self, DVError> {
        xml::parse(xml)
    }

    pub fn to_xml(&self) -> Result<String, DVError> {
        xml::write(self)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, DVError> {
        let path = path.as_ref();
        let xml = std::fs::read_to_string(path).map_err(|e| {
            DVError::PolicyParseError(format!("failed to read '{}': {}", path.display(), e))
        })?;
        Self::from_xml(&xml)
    }

    pub fn verify_metadata(&self) -> bool {
        self.verify_metadata
    }

    pub fn verify_signatures(&self) -> bool {
        self.verify_signatures
    }

    pub fn keyring_format(&self) -> KeyringFormat {
        self.keyring_format.unwrap_or_default()
    }

    pub fn declared_keyring_format(&self) -> Option<KeyringFormat> {
        self.keyring_format
    }

    pub fn key_servers_enabled(&self) -> bool {
        self.key_servers_enabled
    }

    pub fn key_servers(&self) -> &[String] {
        &self.key_servers
    }

    pub fn trusted_keys(&self) -> &[TrustedKey] {
        &self.trusted_keys
    }

    pub fn ignored_keys(&self) -> &[IgnoredKey] {
        &self.ignored_keys
    }

    pub fn components(&self) -> impl Iterator<Item = &ComponentVerification> {
        self.components.values()
    }

    pub fn artifact(&self, artifact: &ArtifactRef) -> Option<&ArtifactVerification> {
        self.components
            .get(&artifact.module)
            .and_then(|c| c.artifacts.get(artifact.file()))
    }

    /// Resolves how `key_id` is regarded for `artifact`, from the
    /// narrowest scope outwards: artifact entries, scoped trusted keys,
    /// configuration-level ignored keys, global trusted keys.
    pub fn key_trust(
        &self,
        artifact: &ArtifactRef,
        key_id: KeyId,
        fingerprint: Option<&Fingerprint>,
    ) -> KeyTrust {
        if let Some(entry) = self.artifact(artifact) {
            if entry.ignored_keys.iter().any(|k| k.key.matches(key_id, fingerprint)) {
                return KeyTrust::Ignored;
            }
            if entry.trusted_pgp_keys.iter().any(|k| k.matches(key_id, fingerprint)) {
                return KeyTrust::Trusted;
            }
        }
        let trusted = |global: bool| {
            self.trusted_keys.iter().any(|t| {
                t.is_global() == global
                    && t.key.matches(key_id, fingerprint)
                    && t.applies_to(artifact)
            })
        };
        if trusted(false) {
            return KeyTrust::Trusted;
        }
        if self.ignored_keys.iter().any(|k| k.key.matches(key_id, fingerprint)) {
            return KeyTrust::Ignored;
        }
        if trusted(true) {
            return KeyTrust::Trusted;
        }
        KeyTrust::Unknown
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Assembles a [`TrustPolicy`] in canonical order.
#[derive(Debug, Clone, Default)]
pub struct TrustPolicyBuilder {
    policy: TrustPolicy,
}

impl TrustPolicyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn verify_metadata(&mut self, enabled: bool) -> &mut Self {
        self.policy.verify_metadata = enabled;
        self
    }

    pub fn verify_signatures(&mut self, enabled: bool) -> &mut Self {
        self.policy.verify_signatures = enabled;
        self
    }

    pub fn keyring_format(&mut self, format: KeyringFormat) -> &mut Self {
        self.policy.keyring_format = Some(format);
        self
    }

    pub fn key_servers_enabled(&mut self, enabled: bool) -> &mut Self {
        self.policy.key_servers_enabled = enabled;
        self
    }

    /// Key servers keep their declaration order; duplicates are dropped.
    pub fn add_key_server(&mut self, uri: impl Into<String>) -> &mut Self {
        let uri = uri.into();
        if !self.policy.key_servers.contains(&uri) {
            self.policy.key_servers.push(uri);
        }
        self
    }

    /// Scopes of a key trusted more than once are combined; a global
    /// entry absorbs scoped ones.
    pub fn add_trusted_key(&mut self, key: TrustedKey) -> &mut Self {
        match self.policy.trusted_keys.iter_mut().find(|t| t.key == key.key) {
            Some(existing) => {
                if existing.is_global() || key.is_global() {
                    existing.scopes.clear();
                } else {
                    existing.scopes.extend(key.scopes);
                }
            }
            None => self.policy.trusted_keys.push(key),
        }
        self
    }

    /// The first reason recorded for a key is kept.
    pub fn add_ignored_key(&mut self, key: IgnoredKey) -> &mut Self {
        if !self.policy.ignored_keys.iter().any(|k| k.key == key.key) {
            self.policy.ignored_keys.push(key);
        }
        self
    }

    fn entry(&mut self, artifact: &ArtifactRef) -> &mut ArtifactVerification {
        self.policy
            .components
            .entry(artifact.module.clone())
            .or_insert_with(|| ComponentVerification {
                module: artifact.module.clone(),
                artifacts: BTreeMap::new(),
            })
            .artifacts
            .entry(artifact.file().to_string())
            .or_default()
    }

    /// Registers an artifact without any entries.
    pub fn add_artifact(&mut self, artifact: &ArtifactRef) -> &mut Self {
        self.entry(artifact);
        self
    }

    /// Adds a checksum. A differing value for an algorithm already
    /// recorded becomes an `also-trust` alternative.
    pub fn add_checksum(&mut self, artifact: &ArtifactRef, checksum: Checksum) -> &mut Self {
        let entry = self.entry(artifact);
        match entry.checksums.iter_mut().find(|c| c.kind == checksum.kind) {
            Some(existing) => {
                for value in std::iter::once(checksum.value).chain(checksum.also_trust) {
                    if !existing.matches(&value) {
                        existing.also_trust.push(value);
                    }
                }
                if existing.origin.is_none() {
                    existing.origin = checksum.origin;
                }
                if existing.reason.is_none() {
                    existing.reason = checksum.reason;
                }
            }
            None => entry.checksums.push(checksum),
        }
        self
    }

    pub fn add_artifact_ignored_key(
        &mut self,
        artifact: &ArtifactRef,
        key: IgnoredKey,
    ) -> &mut Self {
        let entry = self.entry(artifact);
        if !entry.ignored_keys.iter().any(|k| k.key == key.key) {
            entry.ignored_keys.push(key);
        }
        self
    }

    pub fn add_trusted_artifact_key(
        &mut self,
        artifact: &ArtifactRef,
        key: impl Into<KeyRef>,
    ) -> &mut Self {
        let key = key.into();
        let entry = self.entry(artifact);
        if !entry.trusted_pgp_keys.contains(&key) {
            entry.trusted_pgp_keys.push(key);
        }
        self
    }

    /// The policy in canonical order.
    pub fn build(&self) -> TrustPolicy {
        let mut policy = self.policy.clone();
        for trusted in &mut policy.trusted_keys {
            trusted.scopes.sort();
            trusted.scopes.dedup();
        }
        policy.trusted_keys.sort_by(|a, b| a.key.cmp(&b.key));
        policy.ignored_keys.sort_by(|a, b| a.key.cmp(&b.key));
        for component in policy.components.values_mut() {
            for entry in component.artifacts.values_mut() {
                entry.checksums.sort_by_key(|c| c.kind);
                for checksum in &mut entry.checksums {
                    checksum.also_trust.sort();
                    checksum.also_trust.dedup();
                }
                entry.ignored_keys.sort_by(|a, b| a.key.cmp(&b.key));
                entry.trusted_pgp_keys.sort();
            }
        }
        policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(group: &str, name: &str, file: &str) -> ArtifactRef {
        ArtifactRef::new(ModuleId::new(group, name, "1.0"), file)
    }

    fn key(id: u64) -> KeyRef {
        KeyRef::Id(KeyId::new(id))
    }

    #[test]
    fn test_defaults() {
        let policy = TrustPolicy::default();
        assert!(policy.verify_metadata());
        assert!(!policy.verify_signatures());
        assert!(policy.key_servers_enabled());
        assert_eq!(policy.keyring_format(), KeyringFormat::Both);
        assert_eq!(policy.declared_keyring_format(), None);
    }

    #[test]
    fn test_key_servers_keep_order_without_duplicates() {
        let policy = TrustPolicy::builder()
            .add_key_server("hkps://b.example")
            .add_key_server("hkps://a.example")
            .add_key_server("hkps://b.example")
            .build();
        assert_eq!(policy.key_servers(), &["hkps://b.example", "hkps://a.example"]);
    }

    #[test]
    fn test_scope_matching() {
        let a = artifact("org.example", "demo-lib", "demo-lib-1.0.jar");
        assert!(TrustScope::group("org.example").matches(&a));
        assert!(!TrustScope::group("org.other").matches(&a));
        assert!(!TrustScope::group("org.ex.*").matches(&a));
        let regex = TrustScope::new(
            Some("org\\.ex.*".to_string()),
            None,
            None,
            Some(".*\\.jar".to_string()),
            true,
        )
        .unwrap();
        assert!(regex.matches(&a));
        let partial = TrustScope::new(Some("org".to_string()), None, None, None, true).unwrap();
        assert!(!partial.matches(&a));
    }

    #[test]
    fn test_invalid_regex_rejected() {
        let err = TrustScope::new(None, Some("(".to_string()), None, None, true).unwrap_err();
        assert!(matches!(err, DVError::PolicyParseError(_)));
        assert!(TrustScope::new(None, Some("(".to_string()), None, None, false).is_ok());
    }

    #[test]
    fn test_regex_scope_compares_by_pattern() {
        let compiled = TrustScope::new(Some("a".to_string()), None, None, None, true).unwrap();
        let literal = TrustScope::new(Some("a".to_string()), None, None, None, false).unwrap();
        assert_ne!(compiled, literal);
        assert_eq!(compiled.clone(), compiled);
        assert!(literal < compiled);
    }

    #[test]
    fn test_narrowest_scope_wins() {
        let a = artifact("org.example", "demo-lib", "demo-lib-1.0.jar");
        let b = artifact("org.example", "demo-lib", "demo-lib-1.0.pom");
        let policy = TrustPolicy::builder()
            .add_trusted_key(TrustedKey::global(key(1)))
            .add_artifact_ignored_key(&a, IgnoredKey::new(key(1), None))
            .add_ignored_key(IgnoredKey::new(key(2), None))
            .add_trusted_artifact_key(&a, key(2))
            .add_trusted_key(TrustedKey::scoped(key(3), TrustScope::group("org.example")))
            .add_ignored_key(IgnoredKey::new(key(3), None))
            .build();
        assert_eq!(policy.key_trust(&a, KeyId::new(1), None), KeyTrust::Ignored);
        assert_eq!(policy.key_trust(&b, KeyId::new(1), None), KeyTrust::Trusted);
        assert_eq!(policy.key_trust(&a, KeyId::new(2), None), KeyTrust::Trusted);
        assert_eq!(policy.key_trust(&b, KeyId::new(2), None), KeyTrust::Ignored);
        assert_eq!(policy.key_trust(&a, KeyId::new(3), None), KeyTrust::Trusted);
        assert_eq!(policy.key_trust(&a, KeyId::new(4), None), KeyTrust::Unknown);
    }

    #[test]
    fn test_trusted_key_scopes_merge() {
        let policy = TrustPolicy::builder()
            .add_trusted_key(TrustedKey::scoped(key(1), TrustScope::group("b")))
            .add_trusted_key(TrustedKey::scoped(key(1), TrustScope::group("a")))
            .add_trusted_key(TrustedKey::scoped(key(2), TrustScope::group("a")))
            .add_trusted_key(TrustedKey::global(key(2)))
            .build();
        assert_eq!(policy.trusted_keys().len(), 2);
        assert_eq!(
            policy.trusted_keys()[0].scopes,
            vec![TrustScope::group("a"), TrustScope::group("b")]
        );
        assert!(policy.trusted_keys()[1].is_global());
    }

    #[test]
    fn test_checksum_alternatives() {
        let a = artifact("g", "n", "n-1.0.jar");
        let policy = TrustPolicy::builder()
            .add_checksum(&a, Checksum::new(ChecksumKind::Sha256, "AA"))
            .add_checksum(&a, Checksum::new(ChecksumKind::Sha256, "aa").with_reason("dup"))
            .add_checksum(&a, Checksum::new(ChecksumKind::Sha256, "bb"))
            .add_checksum(&a, Checksum::new(ChecksumKind::Sha1, "cc"))
            .build();
        let entry = policy.artifact(&a).unwrap();
        assert_eq!(entry.checksums[0].kind, ChecksumKind::Sha1);
        let sha256 = entry.checksum(ChecksumKind::Sha256).unwrap();
        assert_eq!(sha256.value, "aa");
        assert_eq!(sha256.also_trust, vec!["bb".to_string()]);
        assert_eq!(sha256.reason.as_deref(), Some("dup"));
        assert!(sha256.matches("BB"));
        assert!(!sha256.matches("cc"));
    }

    #[test]
    fn test_first_ignore_reason_kept() {
        let policy = TrustPolicy::builder()
            .add_ignored_key(IgnoredKey::new(key(9), Some("first".to_string())))
            .add_ignored_key(IgnoredKey::new(key(9), Some("second".to_string())))
            .build();
        assert_eq!(policy.ignored_keys().len(), 1);
        assert_eq!(policy.ignored_keys()[0].reason.as_deref(), Some("first"));
    }
}
