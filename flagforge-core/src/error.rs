// flagforge-core/src/error.rs
// ============================================================================
// Module: Flagforge API Error Kinds
// Description: The error-kind taxonomy shared across every RPC boundary.
// Purpose: Give Hub and Edge a single, serializable error vocabulary.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Every crate in this workspace defines its own `thiserror` error enum for
//! the failures specific to its layer. At the RPC boundary, those errors are
//! mapped losslessly onto this shared, serializable kind so HTTP clients see
//! one consistent error vocabulary regardless of which internal error
//! produced it.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: API Error Kind
// ============================================================================

/// The error kinds named in the specification's error-handling design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiErrorKind {
    /// The flag, segment, or rollout does not exist.
    NotFound,
    /// The API key's scope does not cover the requested resource, or it
    /// lacks the required permission.
    Forbidden,
    /// The API key or bearer token is missing, invalid, or expired.
    Unauthenticated,
    /// A type mismatch or unknown variation id was found at evaluation
    /// time.
    MalformedFlag,
    /// The cache has not been primed yet.
    NotReady,
    /// A concurrent update raced a stale version.
    Conflict,
    /// The caller exceeded its rate limit.
    RateLimited,
    /// An Edge could not reach the Hub and has no usable cache.
    UpstreamUnavailable,
    /// An unexpected internal error.
    Internal,
}

impl ApiErrorKind {
    /// Returns the conventional HTTP status code for this error kind.
    #[must_use]
    pub const fn http_status(self) -> u16 {
        match self {
            Self::NotFound => 404,
            Self::Forbidden => 403,
            Self::Unauthenticated => 401,
            Self::MalformedFlag => 422,
            Self::NotReady => 503,
            Self::Conflict => 409,
            Self::RateLimited => 429,
            Self::UpstreamUnavailable => 502,
            Self::Internal => 500,
        }
    }
}
