// ABOUTME: Canonical serialization and hashing of channel arguments.
// ABOUTME: Equal argument sets hash equal regardless of insertion order.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use crate::args::ChannelArg;
use crate::error::ChannelError;

/// Fingerprints a validated argument set.
pub trait ArgsDigest: Send + Sync {
    /// Serialize `args` canonically and return a fixed-length hex digest.
    fn canonicalize_and_hash(
        &self,
        args: &BTreeMap<String, ChannelArg>,
    ) -> Result<String, ChannelError>;
}

/// Sorted-key JSON hashed with SHA-256.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Digest;

impl ArgsDigest for Sha256Digest {
    fn canonicalize_and_hash(
        &self,
        args: &BTreeMap<String, ChannelArg>,
    ) -> Result<String, ChannelError> {
        // BTreeMap iterates in key order, which makes the JSON canonical.
        let bytes = serde_json::to_vec(args)
            .map_err(|e| ChannelError::Internal(format!("failed to serialize args: {e}")))?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }
}
