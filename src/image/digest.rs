//! SHA256 digest utilities
//!
//! Centralized functionality for computing, validating, and formatting content digests,
//! and for translating a digest into the registry's on-disk storage path.

use crate::error::{MirrorError, Result};
use sha2::Digest;

/// Utilities for working with SHA256 digests
pub struct DigestUtils;

impl DigestUtils {
    /// Compute SHA256 hex digest from byte data
    pub fn compute_sha256(data: &[u8]) -> String {
        let mut hasher = sha2::Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }

    /// Compute full digest (with sha256: prefix) from byte data
    pub fn compute_docker_digest(data: &[u8]) -> String {
        format!("sha256:{}", Self::compute_sha256(data))
    }

    /// Validate SHA256 hex string (64 characters, all lowercase hex)
    pub fn is_valid_sha256_hex(digest: &str) -> bool {
        digest.len() == 64
            && digest
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
    }

    /// Validate a full `algorithm:hex` digest
    pub fn is_valid_docker_digest(digest: &str) -> bool {
        match digest.split_once(':') {
            Some(("sha256", hex_part)) => Self::is_valid_sha256_hex(hex_part),
            Some(("sha512", hex_part)) => {
                hex_part.len() == 128 && hex_part.chars().all(|c| c.is_ascii_hexdigit())
            }
            _ => false,
        }
    }

    /// Split a digest into algorithm and encoded parts
    pub fn split(digest: &str) -> Result<(&str, &str)> {
        if !Self::is_valid_docker_digest(digest) {
            return Err(MirrorError::Parse(format!("invalid digest: {}", digest)));
        }
        digest
            .split_once(':')
            .ok_or_else(|| MirrorError::Parse(format!("invalid digest: {}", digest)))
    }

    /// Path of a blob inside the registry's filesystem storage layout,
    /// relative to the storage root: `<algorithm>/<first two hex>/<hex>/data`
    pub fn storage_path(digest: &str) -> Result<String> {
        let (algorithm, encoded) = Self::split(digest)?;
        Ok(format!("{}/{}/{}/data", algorithm, &encoded[..2], encoded))
    }

    /// Verify data matches expected digest
    pub fn verify_data_integrity(data: &[u8], expected_digest: &str) -> Result<()> {
        let computed = Self::compute_docker_digest(data);
        if computed != expected_digest {
            return Err(MirrorError::DigestMismatch {
                expected: expected_digest.to_string(),
                actual: computed,
            });
        }
        Ok(())
    }
}
