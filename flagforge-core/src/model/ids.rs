// flagforge-core/src/model/ids.rs
// ============================================================================
// Module: Flagforge Identifiers
// Description: Canonical opaque identifiers used throughout Flagforge.
// Purpose: Provide strongly typed, serializable IDs with stable string forms.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Identifiers are opaque newtypes over `String` and serialize transparently
//! as plain strings. Validation (e.g. the flag-key charset invariant) is
//! enforced at the boundary that constructs the identifier, not here.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Macro
// ============================================================================

macro_rules! string_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }
    };
}

// ============================================================================
// SECTION: Identifier Types
// ============================================================================

string_id!(ProjectId, "Project identifier, unique within the Hub.");
string_id!(EnvironmentKey, "Environment key, unique within a project.");
string_id!(FlagKey, "Flag key; must match `[a-z0-9][a-z0-9_-]*`.");
string_id!(VariationId, "Variation identifier, stable within the lifetime of a flag.");
string_id!(SegmentId, "Segment identifier, unique within a project.");
string_id!(RolloutId, "Rollout identifier, unique within a flag+environment.");
string_id!(ApiKeyId, "API key identifier (not the secret itself).");

/// Returns `true` if `key` matches the flag-key invariant
/// `[a-z0-9][a-z0-9_-]*`.
#[must_use]
pub fn is_valid_flag_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) if first.is_ascii_lowercase() || first.is_ascii_digit() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_key_validation_accepts_expected_shapes() {
        assert!(is_valid_flag_key("beta-ui"));
        assert!(is_valid_flag_key("new_checkout"));
        assert!(is_valid_flag_key("a1"));
    }

    #[test]
    fn flag_key_validation_rejects_bad_shapes() {
        assert!(!is_valid_flag_key(""));
        assert!(!is_valid_flag_key("Beta-UI"));
        assert!(!is_valid_flag_key("-leading-dash"));
        assert!(!is_valid_flag_key("has space"));
    }
}
