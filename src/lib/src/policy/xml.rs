//! Reading and writing `verification-metadata.xml`.
//!
//! The writer emits entries in a fixed order, so writing a policy that
//! was read back produces identical bytes.

use std::collections::BTreeMap;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use super::*;

const ROOT: &str = "verification-metadata";
const INDENT: usize = 3;

fn malformed(msg: impl Into<String>) -> DVError {
    DVError::PolicyParseError(msg.into())
}

fn element_name(e: &BytesStart) -> Result<String, DVError> {
    Ok(std::str::from_utf8(e.name().as_ref())?.to_string())
}

fn attributes(e: &BytesStart) -> Result<BTreeMap<String, String>, DVError> {
    let mut attrs = BTreeMap::new();
    for attr in e.attributes() {
        let attr = attr?;
        let key = std::str::from_utf8(attr.key.as_ref())?.to_string();
        let value = attr.unescape_value()?.into_owned();
        attrs.insert(key, value);
    }
    Ok(attrs)
}

fn required(
    attrs: &mut BTreeMap<String, String>,
    name: &str,
    element: &str,
) -> Result<String, DVError> {
    attrs
        .remove(name)
        .ok_or_else(|| malformed(format!("<{element}> is missing the '{name}' attribute")))
}

fn parse_bool(value: &str, element: &str) -> Result<bool, DVError> {
    match value.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(malformed(format!(
            "<{element}> expects 'true' or 'false', got '{other}'"
        ))),
    }
}

fn parse_key(value: &str, element: &str) -> Result<KeyRef, DVError> {
    value
        .parse()
        .map_err(|e| malformed(format!("<{element}> has an invalid key '{value}': {e}")))
}

fn parse_scope(
    attrs: &mut BTreeMap<String, String>,
    element: &str,
) -> Result<TrustScope, DVError> {
    let regex = match attrs.remove("regex") {
        Some(value) => parse_bool(&value, element)?,
        None => false,
    };
    TrustScope::new(
        attrs.remove("group"),
        attrs.remove("name"),
        attrs.remove("version"),
        attrs.remove("file"),
        regex,
    )
}

/// Parser state while walking the element tree.
#[derive(Default)]
struct PolicyParser {
    builder: TrustPolicyBuilder,
    saw_root: bool,
    trusted_key: Option<TrustedKey>,
    module: Option<ModuleId>,
    artifact: Option<ArtifactRef>,
    checksum: Option<Checksum>,
}

impl PolicyParser {
    fn open(&mut self, stack: &[String], name: &str, e: &BytesStart) -> Result<(), DVError> {
        let parent = stack.last().map(String::as_str);
        let mut attrs = attributes(e)?;
        match (parent, name) {
            (None, ROOT) => self.saw_root = true,
            (Some(ROOT), "configuration" | "components") => {}
            (
                Some("configuration"),
                "verify-metadata" | "verify-signatures" | "keyring-format",
            ) => {}
            (Some("configuration"), "trusted-keys" | "ignored-keys") => {}
            (Some("configuration"), "key-servers") => {
                if let Some(enabled) = attrs.remove("enabled") {
                    self.builder.key_servers_enabled(parse_bool(&enabled, name)?);
                }
            }
            (Some("key-servers"), "key-server") => {
                let uri = required(&mut attrs, "uri", name)?;
                self.builder.add_key_server(uri);
            }
            (Some("trusted-keys"), "trusted-key") => {
                let key = parse_key(&required(&mut attrs, "id", name)?, name)?;
                let scope = parse_scope(&mut attrs, name)?;
                self.trusted_key = Some(TrustedKey::scoped(key, scope));
            }
            (Some("trusted-key"), "trusting") => {
                let scope = parse_scope(&mut attrs, name)?;
                if scope.is_unrestricted() {
                    return Err(malformed("<trusting> must restrict at least one coordinate"));
                }
                if let Some(trusted) = self.trusted_key.as_mut() {
                    trusted.scopes.push(scope);
                }
            }
            (Some("ignored-keys"), "ignored-key") => {
                let key = parse_key(&required(&mut attrs, "id", name)?, name)?;
                let ignored = IgnoredKey::new(key, attrs.remove("reason"));
                match (&self.artifact, stack.len() >= 2 && stack[stack.len() - 2] == "artifact") {
                    (Some(artifact), true) => {
                        self.builder.add_artifact_ignored_key(artifact, ignored);
                    }
                    _ => {
                        self.builder.add_ignored_key(ignored);
                    }
                }
            }
            (Some("components"), "component") => {
                let group = required(&mut attrs, "group", name)?;
                let module_name = required(&mut attrs, "name", name)?;
                let version = required(&mut attrs, "version", name)?;
                self.module = Some(ModuleId::new(group, module_name, version));
            }
            (Some("component"), "artifact") => {
                let file = required(&mut attrs, "name", name)?;
                let module = self
                    .module
                    .clone()
                    .ok_or_else(|| malformed("<artifact> outside of a <component>"))?;
                let artifact = ArtifactRef::new(module, file);
                self.builder.add_artifact(&artifact);
                self.artifact = Some(artifact);
            }
            (Some("artifact"), "ignored-keys") => {}
            (Some("artifact"), "pgp") => {
                let key = parse_key(&required(&mut attrs, "value", name)?, name)?;
                if let Some(artifact) = &self.artifact {
                    self.builder.add_trusted_artifact_key(artifact, key);
                }
            }
            (Some("artifact"), "md5" | "sha1" | "sha256" | "sha512") => {
                let kind: ChecksumKind = name.parse()?;
                let mut checksum = Checksum::new(kind, required(&mut attrs, "value", name)?);
                checksum.origin = attrs.remove("origin");
                checksum.reason = attrs.remove("reason");
                self.checksum = Some(checksum);
            }
            (Some(parent), "also-trust") if parent.parse::<ChecksumKind>().is_ok() => {
                let value = required(&mut attrs, "value", name)?;
                if let Some(checksum) = self.checksum.take() {
                    self.checksum = Some(checksum.with_also_trust(value));
                }
            }
            (Some(parent), _) => {
                return Err(malformed(format!("unexpected element <{name}> in <{parent}>")));
            }
            (None, _) => {
                return Err(malformed(format!(
                    "expected <{ROOT}> as the root element, found <{name}>"
                )));
            }
        }
        Ok(())
    }

    fn close(&mut self, name: &str) -> Result<(), DVError> {
        match name {
            "trusted-key" => {
                if let Some(trusted) = self.trusted_key.take() {
                    self.builder.add_trusted_key(trusted);
                }
            }
            "artifact" => self.artifact = None,
            "component" => self.module = None,
            _ => {
                if let (Some(checksum), Some(artifact)) = (&self.checksum, &self.artifact) {
                    if checksum.kind.name() == name {
                        let checksum = checksum.clone();
                        let artifact = artifact.clone();
                        self.builder.add_checksum(&artifact, checksum);
                        self.checksum = None;
                    }
                }
            }
        }
        Ok(())
    }

    fn text(&mut self, stack: &[String], text: &str) -> Result<(), DVError> {
        let Some(element) = stack.last().map(String::as_str) else {
            return Err(malformed("text outside of the root element"));
        };
        match element {
            "verify-metadata" => {
                self.builder.verify_metadata(parse_bool(text, element)?);
            }
            "verify-signatures" => {
                self.builder.verify_signatures(parse_bool(text, element)?);
            }
            "keyring-format" => {
                let format = text.trim().parse().map_err(|_| {
                    malformed(format!("unknown keyring format '{}'", text.trim()))
                })?;
                self.builder.keyring_format(format);
            }
            _ if text.trim().is_empty() => {}
            _ => return Err(malformed(format!("unexpected text in <{element}>"))),
        }
        Ok(())
    }
}

pub(super) fn parse(xml: &str) -> Result<TrustPolicy, DVError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut parser = PolicyParser::default();
    let mut stack: Vec<String> = vec![];
    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = element_name(&e)?;
                parser.open(&stack, &name, &e)?;
                stack.push(name);
            }
            Event::Empty(e) => {
                let name = element_name(&e)?;
                parser.open(&stack, &name, &e)?;
                parser.close(&name)?;
            }
            Event::End(_) => {
                let name = stack
                    .pop()
                    .ok_or_else(|| malformed("unbalanced closing element"))?;
                parser.close(&name)?;
            }
            Event::Text(t) => {
                let text = t.unescape()?;
                parser.text(&stack, &text)?;
            }
            Event::CData(t) => {
                let text = std::str::from_utf8(&t)?.to_string();
                parser.text(&stack, &text)?;
            }
            Event::Eof => break,
            _ => {}
        }
    }
    if !stack.is_empty() {
        return Err(malformed(format!("unclosed element <{}>", stack.join("><"))));
    }
    if !parser.saw_root {
        return Err(malformed(format!("missing <{ROOT}> root element")));
    }
    Ok(parser.builder.build())
}

// ============================================================================
// Writer
// ============================================================================

struct PolicyWriter {
    writer: Writer<Vec<u8>>,
}

impl PolicyWriter {
    fn start(&mut self, element: BytesStart) -> Result<(), DVError> {
        self.writer.write_event(Event::Start(element))?;
        Ok(())
    }

    fn end(&mut self, name: &str) -> Result<(), DVError> {
        self.writer.write_event(Event::End(BytesEnd::new(name)))?;
        Ok(())
    }

    fn empty(&mut self, element: BytesStart) -> Result<(), DVError> {
        self.writer.write_event(Event::Empty(element))?;
        Ok(())
    }

    fn text_element(&mut self, name: &str, text: &str) -> Result<(), DVError> {
        self.start(BytesStart::new(name))?;
        self.writer.write_event(Event::Text(BytesText::new(text)))?;
        self.end(name)
    }

    fn scope_attributes(element: &mut BytesStart, scope: &TrustScope) {
        for (attr, value) in [
            ("group", &scope.group),
            ("name", &scope.name),
            ("version", &scope.version),
            ("file", &scope.file),
        ] {
            if let Some(value) = value {
                element.push_attribute((attr, value.as_str()));
            }
        }
        if scope.regex {
            element.push_attribute(("regex", "true"));
        }
    }

    fn ignored_keys(&mut self, keys: &[IgnoredKey]) -> Result<(), DVError> {
        if keys.is_empty() {
            return Ok(());
        }
        self.start(BytesStart::new("ignored-keys"))?;
        for ignored in keys {
            let mut element = BytesStart::new("ignored-key");
            element.push_attribute(("id", ignored.key.to_string().as_str()));
            if let Some(reason) = &ignored.reason {
                element.push_attribute(("reason", reason.as_str()));
            }
            self.empty(element)?;
        }
        self.end("ignored-keys")
    }

    fn configuration(&mut self, policy: &TrustPolicy) -> Result<(), DVError> {
        self.start(BytesStart::new("configuration"))?;
        self.text_element("verify-metadata", &policy.verify_metadata().to_string())?;
        self.text_element("verify-signatures", &policy.verify_signatures().to_string())?;
        if let Some(format) = policy.declared_keyring_format() {
            self.text_element("keyring-format", format.name())?;
        }

        if !policy.key_servers_enabled() || !policy.key_servers().is_empty() {
            let mut element = BytesStart::new("key-servers");
            if !policy.key_servers_enabled() {
                element.push_attribute(("enabled", "false"));
            }
            if policy.key_servers().is_empty() {
                self.empty(element)?;
            } else {
                self.start(element)?;
                for uri in policy.key_servers() {
                    let mut server = BytesStart::new("key-server");
                    server.push_attribute(("uri", uri.as_str()));
                    self.empty(server)?;
                }
                self.end("key-servers")?;
            }
        }

        if !policy.trusted_keys().is_empty() {
            self.start(BytesStart::new("trusted-keys"))?;
            for trusted in policy.trusted_keys() {
                let mut element = BytesStart::new("trusted-key");
                element.push_attribute(("id", trusted.key.to_string().as_str()));
                match trusted.scopes.as_slice() {
                    [] => self.empty(element)?,
                    [scope] => {
                        Self::scope_attributes(&mut element, scope);
                        self.empty(element)?;
                    }
                    scopes => {
                        self.start(element)?;
                        for scope in scopes {
                            let mut trusting = BytesStart::new("trusting");
                            Self::scope_attributes(&mut trusting, scope);
                            self.empty(trusting)?;
                        }
                        self.end("trusted-key")?;
                    }
                }
            }
            self.end("trusted-keys")?;
        }

        self.ignored_keys(policy.ignored_keys())?;
        self.end("configuration")
    }

    fn checksum(&mut self, checksum: &Checksum) -> Result<(), DVError> {
        let name = checksum.kind.name();
        let mut element = BytesStart::new(name);
        element.push_attribute(("value", checksum.value.as_str()));
        if let Some(origin) = &checksum.origin {
            element.push_attribute(("origin", origin.as_str()));
        }
        if let Some(reason) = &checksum.reason {
            element.push_attribute(("reason", reason.as_str()));
        }
        if checksum.also_trust.is_empty() {
            return self.empty(element);
        }
        self.start(element)?;
        for value in &checksum.also_trust {
            let mut also = BytesStart::new("also-trust");
            also.push_attribute(("value", value.as_str()));
            self.empty(also)?;
        }
        self.end(name)
    }

    fn artifact(&mut self, file: &str, entry: &ArtifactVerification) -> Result<(), DVError> {
        let mut element = BytesStart::new("artifact");
        element.push_attribute(("name", file));
        if entry.is_empty() {
            return self.empty(element);
        }
        self.start(element)?;
        self.ignored_keys(&entry.ignored_keys)?;
        for checksum in &entry.checksums {
            self.checksum(checksum)?;
        }
        for key in &entry.trusted_pgp_keys {
            let mut pgp = BytesStart::new("pgp");
            pgp.push_attribute(("value", key.to_string().as_str()));
            self.empty(pgp)?;
        }
        self.end("artifact")
    }

    fn components(&mut self, policy: &TrustPolicy) -> Result<(), DVError> {
        let mut components = policy.components().peekable();
        if components.peek().is_none() {
            return self.empty(BytesStart::new("components"));
        }
        self.start(BytesStart::new("components"))?;
        for component in components {
            let mut element = BytesStart::new("component");
            element.push_attribute(("group", component.module.group.as_str()));
            element.push_attribute(("name", component.module.name.as_str()));
            element.push_attribute(("version", component.module.version.as_str()));
            if component.artifacts.is_empty() {
                self.empty(element)?;
                continue;
            }
            self.start(element)?;
            for (file, entry) in &component.artifacts {
                self.artifact(file, entry)?;
            }
            self.end("component")?;
        }
        self.end("components")
    }
}

pub(super) fn write(policy: &TrustPolicy) -> Result<String, DVError> {
    let mut out = PolicyWriter {
        writer: Writer::new_with_indent(Vec::new(), b' ', INDENT),
    };
    out.writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    out.start(BytesStart::new(ROOT))?;
    out.configuration(policy)?;
    out.components(policy)?;
    out.end(ROOT)?;

    let mut xml = String::from_utf8(out.writer.into_inner())
        .map_err(|e| DVError::InternalError(e.to_string()))?;
    xml.push('\n');
    Ok(xml)
}
