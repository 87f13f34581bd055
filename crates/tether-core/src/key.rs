// ABOUTME: Cache keys identifying a shareable channel.
// ABOUTME: A key is target + argument digest + optional credentials fingerprint.

use std::fmt;
use std::sync::Arc;

use crate::args::ParsedArgs;
use crate::digest::{ArgsDigest, Sha256Digest};
use crate::error::ChannelError;

/// Identity of a channel: who it talks to and how it was configured.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    target: String,
    args_digest: String,
    creds_digest: Option<String>,
    rendered: String,
}

impl CacheKey {
    pub fn new(
        target: impl Into<String>,
        args_digest: impl Into<String>,
        creds_digest: Option<String>,
    ) -> Self {
        let target = target.into();
        let args_digest = args_digest.into();
        let mut rendered = String::with_capacity(
            target.len() + args_digest.len() + creds_digest.as_ref().map_or(0, String::len),
        );
        rendered.push_str(&target);
        rendered.push_str(&args_digest);
        if let Some(creds) = &creds_digest {
            rendered.push_str(creds);
        }
        Self {
            target,
            args_digest,
            creds_digest,
            rendered,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn args_digest(&self) -> &str {
        &self.args_digest
    }

    pub fn creds_digest(&self) -> Option<&str> {
        self.creds_digest.as_deref()
    }

    /// The single string used as the registry map key.
    pub fn as_str(&self) -> &str {
        &self.rendered
    }

    /// True when every component matches, not just the rendered string.
    pub fn same_identity(&self, other: &CacheKey) -> bool {
        self.target == other.target
            && self.args_digest == other.args_digest
            && self.creds_digest == other.creds_digest
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rendered)
    }
}

/// Derives cache keys with a pluggable digest.
#[derive(Clone)]
pub struct KeyBuilder {
    digest: Arc<dyn ArgsDigest>,
}

impl KeyBuilder {
    pub fn new(digest: Arc<dyn ArgsDigest>) -> Self {
        Self { digest }
    }

    pub fn build(&self, target: &str, parsed: &ParsedArgs) -> Result<CacheKey, ChannelError> {
        let args_digest = self.digest.canonicalize_and_hash(&parsed.args)?;
        let creds_digest = parsed
            .credentials
            .as_ref()
            .map(|c| c.fingerprint().to_string());
        Ok(CacheKey::new(target, args_digest, creds_digest))
    }
}

impl Default for KeyBuilder {
    fn default() -> Self {
        Self::new(Arc::new(Sha256Digest))
    }
}

impl fmt::Debug for KeyBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyBuilder").finish_non_exhaustive()
    }
}
