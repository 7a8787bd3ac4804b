// flagforge-core/src/hashing.rs
// ============================================================================
// Module: Flagforge Canonical Hashing
// Description: RFC 8785 JSON canonicalization and fingerprint computation.
// Purpose: Produce stable Hub Response Cache keys from flag + context pairs.
// Dependencies: serde, serde_jcs, sha2
// ============================================================================

//! ## Overview
//! The Hub Response Cache (C5) is keyed by a fingerprint: a stable hash of
//! `(projectId, envKey, flagKey, context-attributes-canonicalized)`.
//! Attribute maps are canonicalized (sorted keys, normalized numbers) via
//! RFC 8785 (JCS) before hashing, so logically equivalent contexts never
//! produce distinct cache keys.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while computing a canonical hash or fingerprint.
#[derive(Debug, Error)]
pub enum HashError {
    /// JSON canonicalization failed.
    #[error("failed to canonicalize json: {0}")]
    Canonicalization(String),
}

// ============================================================================
// SECTION: Canonical Hashing
// ============================================================================

/// Returns the RFC 8785 canonical JSON bytes for a serializable value.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when serialization fails.
pub fn canonical_json_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, HashError> {
    serde_jcs::to_vec(value).map_err(|err| HashError::Canonicalization(err.to_string()))
}

/// Hashes a value's canonical JSON form with SHA-256, returning a
/// lowercase hex digest.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when serialization fails.
pub fn hash_canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<String, HashError> {
    let bytes = canonical_json_bytes(value)?;
    Ok(hash_bytes(&bytes))
}

/// Hashes raw bytes with SHA-256, returning a lowercase hex digest.
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_encode(&hasher.finalize())
}

/// Salt distinguishing an API key's hash from a bare `hash_bytes` digest of
/// the same plaintext, so the two hashing uses can never collide.
const API_KEY_HASH_SALT: &str = "flagforge-api-key-v1";

/// Hashes an API key's plaintext the same way on write
/// (`flagforge-store-sqlite::ApiKeyStore::create_api_key`) and on read
/// (`flagforge-hub::auth::authenticate`), so both sides agree on the
/// stored/looked-up hash without either depending on the other's crate.
#[must_use]
pub fn hash_api_key_plaintext(plaintext: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(API_KEY_HASH_SALT.as_bytes());
    hasher.update(plaintext.as_bytes());
    hex_encode(&hasher.finalize())
}

/// Computes the Hub Response Cache fingerprint for a
/// `(project, environment, flag, context)` tuple.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when the context fails to
/// canonicalize (this can only happen for non-finite floats, which
/// `serde_json` itself rejects earlier in the pipeline).
pub fn fingerprint(
    project_id: &str,
    environment_key: &str,
    flag_key: &str,
    context: &crate::model::EvaluationContext,
) -> Result<String, HashError> {
    let canonical_context = canonical_json_bytes(context)?;
    let mut hasher = Sha256::new();
    hasher.update(project_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(environment_key.as_bytes());
    hasher.update(b"\0");
    hasher.update(flag_key.as_bytes());
    hasher.update(b"\0");
    hasher.update(&canonical_context);
    Ok(hex_encode(&hasher.finalize()))
}

/// Encodes bytes as a lowercase hex string.
fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EvaluationContext;

    #[test]
    fn fingerprint_is_stable_for_equivalent_contexts() {
        let mut a = EvaluationContext::new("u1");
        a.attributes.insert("plan".to_string(), serde_json::json!("premium"));
        a.attributes.insert("region".to_string(), serde_json::json!("us"));

        let mut b = EvaluationContext::new("u1");
        b.attributes.insert("region".to_string(), serde_json::json!("us"));
        b.attributes.insert("plan".to_string(), serde_json::json!("premium"));

        let fp_a = fingerprint("p1", "prod", "beta-ui", &a).expect("fingerprint a");
        let fp_b = fingerprint("p1", "prod", "beta-ui", &b).expect("fingerprint b");
        assert_eq!(fp_a, fp_b, "insertion order must not affect the fingerprint");
    }

    #[test]
    fn fingerprint_differs_across_flags() {
        let ctx = EvaluationContext::new("u1");
        let fp_a = fingerprint("p1", "prod", "flag-a", &ctx).expect("fingerprint a");
        let fp_b = fingerprint("p1", "prod", "flag-b", &ctx).expect("fingerprint b");
        assert_ne!(fp_a, fp_b);
    }
}
