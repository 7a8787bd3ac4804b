// flagforge-core/src/model/value.rs
// ============================================================================
// Module: Flagforge Typed Flag Values
// Description: Tagged-variant flag value with a discriminated wire form.
// Purpose: Make the evaluation hot path type-safe by construction.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! A flag's value is dynamically typed at rest (`bool`, `string`, `number`,
//! or `json`) but runtime type checks happen once, at flag-load time
//! (`FlagValue::matches_type`), not on every evaluation. This follows the
//! design note in the specification: "Runtime type checks happen once at
//! flag-load time... so the evaluation hot path is type-safe by
//! construction."

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value as Json;

// ============================================================================
// SECTION: Value Type
// ============================================================================

/// The declared value type of a flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    /// Boolean flag value.
    Bool,
    /// String flag value.
    String,
    /// Numeric flag value.
    Number,
    /// Arbitrary JSON flag value.
    Json,
}

// ============================================================================
// SECTION: Flag Value
// ============================================================================

/// A typed flag or variation value, serialized in discriminated form
/// (`{"type": ..., "value": ...}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FlagValue {
    /// Boolean value.
    Bool(bool),
    /// String value.
    String(String),
    /// Numeric value. Stored as `f64`; integral flag values round-trip
    /// exactly up to 2^53.
    Number(f64),
    /// Arbitrary JSON value (objects, arrays, or scalars).
    Json(Json),
}

impl FlagValue {
    /// Returns the [`ValueType`] this value is tagged as.
    #[must_use]
    pub const fn value_type(&self) -> ValueType {
        match self {
            Self::Bool(_) => ValueType::Bool,
            Self::String(_) => ValueType::String,
            Self::Number(_) => ValueType::Number,
            Self::Json(_) => ValueType::Json,
        }
    }

    /// Returns `true` if this value's type matches `expected`.
    #[must_use]
    pub fn matches_type(&self, expected: ValueType) -> bool {
        self.value_type() == expected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discriminated_serialization_round_trips() {
        let value = FlagValue::String("premium".to_string());
        let json = serde_json::to_value(&value).expect("serialize");
        assert_eq!(json["type"], "string");
        assert_eq!(json["value"], "premium");
        let back: FlagValue = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, value);
    }

    #[test]
    fn type_mismatch_is_detectable() {
        let value = FlagValue::Bool(true);
        assert!(value.matches_type(ValueType::Bool));
        assert!(!value.matches_type(ValueType::String));
    }
}
