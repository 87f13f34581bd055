// ABOUTME: Channel and call credentials handed to the connector.
// ABOUTME: Credentials carry the fingerprint that becomes part of the cache key.

use std::fmt;
use std::sync::Arc;

use sha2::{Digest, Sha256};

/// Per-call metadata plugin. Receives the service URL, returns headers.
pub type MetadataPlugin = dyn Fn(&str) -> Vec<(String, String)> + Send + Sync;

/// Call-level credentials, applied to every call made over a channel.
#[derive(Clone)]
pub struct CallCredentials {
    plugin: Arc<MetadataPlugin>,
}

impl CallCredentials {
    pub fn from_plugin<F>(plugin: F) -> Self
    where
        F: Fn(&str) -> Vec<(String, String)> + Send + Sync + 'static,
    {
        Self {
            plugin: Arc::new(plugin),
        }
    }

    /// Metadata to attach to a call against `service_url`.
    pub fn metadata_for(&self, service_url: &str) -> Vec<(String, String)> {
        (self.plugin)(service_url)
    }
}

impl fmt::Debug for CallCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallCredentials").finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct Inner {
    root_certs: Option<String>,
    private_key: Option<String>,
    cert_chain: Option<String>,
    fingerprint: String,
    call: Option<CallCredentials>,
}

/// TLS channel credentials, optionally composed with call credentials.
///
/// Cloning is cheap; clones share the same material and fingerprint.
#[derive(Debug, Clone)]
pub struct ChannelCredentials {
    inner: Arc<Inner>,
}

impl ChannelCredentials {
    /// SSL credentials from PEM material. `None` roots means the system roots.
    pub fn ssl(
        root_certs: Option<String>,
        private_key: Option<String>,
        cert_chain: Option<String>,
    ) -> Self {
        let fingerprint = fingerprint_of(&[&root_certs, &private_key, &cert_chain]);
        Self {
            inner: Arc::new(Inner {
                root_certs,
                private_key,
                cert_chain,
                fingerprint,
                call: None,
            }),
        }
    }

    /// SSL credentials using the system trust roots and no client identity.
    pub fn default_ssl() -> Self {
        Self::ssl(None, None, None)
    }

    /// Compose these channel credentials with call credentials.
    ///
    /// Channels built from composite credentials are never shared.
    pub fn composite(&self, call: CallCredentials) -> Self {
        Self {
            inner: Arc::new(Inner {
                root_certs: self.inner.root_certs.clone(),
                private_key: self.inner.private_key.clone(),
                cert_chain: self.inner.cert_chain.clone(),
                fingerprint: self.inner.fingerprint.clone(),
                call: Some(call),
            }),
        }
    }

    pub fn has_call_level_credentials(&self) -> bool {
        self.inner.call.is_some()
    }

    /// Digest of the PEM material. Default credentials get a fixed,
    /// non-empty digest, so they never key like an insecure channel.
    pub fn fingerprint(&self) -> &str {
        &self.inner.fingerprint
    }

    pub fn root_certs(&self) -> Option<&str> {
        self.inner.root_certs.as_deref()
    }

    /// Client identity as `(cert_chain, private_key)`, when both are present.
    pub fn identity(&self) -> Option<(&str, &str)> {
        match (&self.inner.cert_chain, &self.inner.private_key) {
            (Some(chain), Some(key)) => Some((chain.as_str(), key.as_str())),
            _ => None,
        }
    }

    pub fn call_credentials(&self) -> Option<&CallCredentials> {
        self.inner.call.as_ref()
    }
}

const FINGERPRINT_TAG: &[u8] = b"tether-ssl-credentials";

fn fingerprint_of(parts: &[&Option<String>]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(FINGERPRINT_TAG);
    for part in parts {
        // Absent and empty parts hash differently; each part is length-prefixed.
        match part {
            Some(text) => {
                hasher.update([1u8]);
                hasher.update((text.len() as u64).to_be_bytes());
                hasher.update(text.as_bytes());
            }
            None => hasher.update([0u8]),
        }
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOTS: &str = "-----BEGIN CERTIFICATE-----\nroots\n-----END CERTIFICATE-----\n";

    #[test]
    fn test_default_ssl_has_fixed_fingerprint() {
        let creds = ChannelCredentials::default_ssl();
        assert_eq!(creds.fingerprint().len(), 64);
        assert_eq!(creds.fingerprint(), ChannelCredentials::default_ssl().fingerprint());
        assert!(!creds.has_call_level_credentials());
        assert!(creds.identity().is_none());
    }

    #[test]
    fn test_same_material_same_fingerprint() {
        let a = ChannelCredentials::ssl(Some(ROOTS.to_string()), None, None);
        let b = ChannelCredentials::ssl(Some(ROOTS.to_string()), None, None);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }

    #[test]
    fn test_fingerprint_separates_parts() {
        let a = ChannelCredentials::ssl(Some("ab".to_string()), Some("c".to_string()), None);
        let b = ChannelCredentials::ssl(Some("a".to_string()), Some("bc".to_string()), None);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_empty_material_differs_from_default() {
        let empty = ChannelCredentials::ssl(Some(String::new()), None, None);
        assert_ne!(empty.fingerprint(), ChannelCredentials::default_ssl().fingerprint());
    }

    #[test]
    fn test_composite_marks_call_credentials() {
        let base = ChannelCredentials::ssl(Some(ROOTS.to_string()), None, None);
        let call = CallCredentials::from_plugin(|url| {
            vec![("authorization".to_string(), format!("Bearer for {url}"))]
        });
        let composite = base.composite(call);

        assert!(composite.has_call_level_credentials());
        assert!(!base.has_call_level_credentials());
        assert_eq!(composite.fingerprint(), base.fingerprint());

        let md = composite
            .call_credentials()
            .unwrap()
            .metadata_for("https://host/pkg.Service");
        assert_eq!(md[0].1, "Bearer for https://host/pkg.Service");
    }

    #[test]
    fn test_identity_requires_both_parts() {
        let only_key = ChannelCredentials::ssl(None, Some("key".to_string()), None);
        assert!(only_key.identity().is_none());

        let both = ChannelCredentials::ssl(None, Some("key".to_string()), Some("chain".to_string()));
        assert_eq!(both.identity(), Some(("chain", "key")));
    }
}
