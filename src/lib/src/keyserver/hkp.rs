use std::time::Duration;

use super::{KeyServer, LookupOutcome};
use crate::error::*;
use crate::keyring::Keyring;
use crate::pgp::KeyId;

const HKP_DEFAULT_PORT: u16 = 11371;

/// Maps a key server URI to the HTTP base URL it is reached at.
///
/// `hkp://` uses plain HTTP on port 11371 unless a port is given,
/// `hkps://` uses HTTPS. `http://` and `https://` URIs are used as is.
pub fn http_base_url(uri: &str) -> Result<String, DVError> {
    let uri = uri.trim().trim_end_matches('/');
    if let Some(rest) = uri.strip_prefix("hkp://") {
        let (authority, path) = rest.split_once('/').unwrap_or((rest, ""));
        let has_port = authority
            .rsplit_once(':')
            .is_some_and(|(_, port)| port.parse::<u16>().is_ok());
        let authority = if has_port {
            authority.to_string()
        } else {
            format!("{authority}:{HKP_DEFAULT_PORT}")
        };
        return Ok(if path.is_empty() {
            format!("http://{authority}")
        } else {
            format!("http://{authority}/{path}")
        });
    }
    if let Some(rest) = uri.strip_prefix("hkps://") {
        return Ok(format!("https://{rest}"));
    }
    if uri.starts_with("http://") || uri.starts_with("https://") {
        return Ok(uri.to_string());
    }
    Err(DVError::KeyServerError(format!(
        "unsupported key server URI '{uri}'"
    )))
}

/// An HKP key server queried with machine-readable `op=get` requests.
pub struct HkpKeyServer {
    uri: String,
    base_url: String,
    client: ureq::Agent,
}

impl HkpKeyServer {
    pub fn new(uri: &str, timeout: Duration) -> Result<Self, DVError> {
        let base_url = http_base_url(uri)?;
        // Status codes are inspected to tell "not found" apart from failures.
        let client = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(timeout))
            .build()
            .into();
        Ok(HkpKeyServer {
            uri: uri.to_string(),
            base_url,
            client,
        })
    }

    pub fn lookup_url(&self, key_id: KeyId) -> String {
        format!(
            "{}/pks/lookup?op=get&options=mr&search=0x{}",
            self.base_url, key_id
        )
    }

    fn fetch(&self, key_id: KeyId) -> Result<Option<String>, DVError> {
        let url = self.lookup_url(key_id);
        log::debug!("Fetching {url}");
        let response = self
            .client
            .get(&url)
            .call()
            .map_err(|e| DVError::KeyServerError(format!("request failed: {e}")))?;

        let status = response.status().as_u16();
        if status == 404 {
            return Ok(None);
        }
        if status != 200 {
            return Err(DVError::KeyServerError(format!(
                "lookup failed with status {status}"
            )));
        }
        let body = response.into_body().read_to_string().map_err(|e| {
            DVError::KeyServerError(format!("Failed to read response body: {e}"))
        })?;
        Ok(Some(body))
    }
}

impl KeyServer for HkpKeyServer {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn lookup(&self, key_id: KeyId) -> LookupOutcome {
        let body = match self.fetch(key_id) {
            Ok(Some(body)) => body,
            Ok(None) => return LookupOutcome::NotFound,
            Err(e) => return LookupOutcome::TransientError(e.to_string()),
        };
        let keyring = match Keyring::from_bytes(body.as_bytes()) {
            Ok(keyring) => keyring,
            Err(e) => {
                return LookupOutcome::TransientError(format!("unreadable key data: {e}"))
            }
        };
        match keyring.find(key_id) {
            Some(key) => LookupOutcome::Found(key.clone()),
            None => LookupOutcome::NotFound,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_base_url() {
        assert_eq!(
            http_base_url("hkp://keyserver.example.org").unwrap(),
            "http://keyserver.example.org:11371"
        );
        assert_eq!(
            http_base_url("hkp://keyserver.example.org:8080/").unwrap(),
            "http://keyserver.example.org:8080"
        );
        assert_eq!(
            http_base_url("hkps://keys.openpgp.org").unwrap(),
            "https://keys.openpgp.org"
        );
        assert_eq!(
            http_base_url("http://127.0.0.1:1").unwrap(),
            "http://127.0.0.1:1"
        );
        assert!(http_base_url("ldap://keys.example.org").is_err());
    }

    #[test]
    fn test_lookup_url() {
        let server = HkpKeyServer::new("hkps://keys.openpgp.org", Duration::from_secs(1)).unwrap();
        assert_eq!(
            server.lookup_url(KeyId::new(0xADC1B3B30173922E)),
            "https://keys.openpgp.org/pks/lookup?op=get&options=mr&search=0xADC1B3B30173922E"
        );
        assert_eq!(server.uri(), "hkps://keys.openpgp.org");
    }

    #[test]
    fn test_unreachable_server_is_transient() {
        let server = HkpKeyServer::new("http://127.0.0.1:1", Duration::from_secs(2)).unwrap();
        assert!(matches!(
            server.lookup(KeyId::new(1)),
            LookupOutcome::TransientError(_)
        ));
    }
}
