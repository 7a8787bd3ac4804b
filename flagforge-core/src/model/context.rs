// flagforge-core/src/model/context.rs
// ============================================================================
// Module: Flagforge Evaluation Context
// Description: The user/request context an evaluation is performed against.
// Purpose: Carry the attributes targeting rules and the bucketer read.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! `EvaluationContext` is the only input to evaluation besides the flag and
//! its rollout. The bucketing key is `attributes[bucketBy]` if present,
//! else `userKey`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value as Json;

// ============================================================================
// SECTION: Evaluation Context
// ============================================================================

/// The evaluation-time context: a user key plus arbitrary attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationContext {
    /// Required stable user key.
    pub user_key: String,
    /// Optional application-level user id, carried through for audit but
    /// not consulted by evaluation.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Arbitrary attributes; values may be scalars or lists.
    #[serde(default)]
    pub attributes: BTreeMap<String, Json>,
}

impl EvaluationContext {
    /// Creates a context with no attributes.
    #[must_use]
    pub fn new(user_key: impl Into<String>) -> Self {
        Self {
            user_key: user_key.into(),
            user_id: None,
            attributes: BTreeMap::new(),
        }
    }

    /// Returns the raw attribute value for `name`, or `None` if absent.
    /// Targeting rules test only `attributes`, never `user_key` itself; a
    /// missing attribute is never an error — callers treat it as a
    /// non-match.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&Json> {
        self.attributes.get(name)
    }

    /// Returns the bucketing key for `bucket_by`: `attributes[bucket_by]`
    /// if present (coerced to its string/number textual form), else
    /// `user_key`.
    #[must_use]
    pub fn bucketing_key(&self, bucket_by: &str) -> String {
        if bucket_by == "user_key" {
            return self.user_key.clone();
        }
        match self.attributes.get(bucket_by) {
            Some(Json::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => self.user_key.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucketing_key_falls_back_to_user_key() {
        let ctx = EvaluationContext::new("u1");
        assert_eq!(ctx.bucketing_key("device_id"), "u1");
    }

    #[test]
    fn bucketing_key_reads_override_attribute() {
        let mut ctx = EvaluationContext::new("u1");
        ctx.attributes.insert("device_id".to_string(), Json::String("d42".to_string()));
        assert_eq!(ctx.bucketing_key("device_id"), "d42");
    }
}
