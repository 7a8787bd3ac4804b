// flagforge-core/src/model/flag.rs
// ============================================================================
// Module: Flagforge Flags
// Description: Flag, variation, and targeting rule definitions.
// Purpose: Define the unit of evaluation and its ordered targeting rules.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A `Flag` is identified by `(project, environment, key)` and carries an
//! ordered list of `Variation`s plus a `TargetingBlock`. Invariants from the
//! specification are enforced by the store at write time, not here:
//! (i) `key` matches `[a-z0-9][a-z0-9_-]*`; (ii) each variation's value is
//! type-compatible with the flag's value type; (iii) a disabled flag always
//! evaluates to `default`; (iv) an attached rollout's weights sum to 10000
//! basis points after normalization.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::model::ids::EnvironmentKey;
use crate::model::ids::FlagKey;
use crate::model::ids::ProjectId;
use crate::model::ids::VariationId;
use crate::model::time::Timestamp;
use crate::model::value::FlagValue;
use crate::model::value::ValueType;

// ============================================================================
// SECTION: Variation
// ============================================================================

/// One of the named values a flag may take.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variation {
    /// Opaque identifier, unique within the flag and stable for its
    /// lifetime.
    pub id: VariationId,
    /// Display name; may be renamed without affecting `id`.
    pub name: String,
    /// The typed value returned when this variation is selected.
    pub value: FlagValue,
    /// Optional human-readable description.
    pub description: Option<String>,
    /// Optional weight, used only by experiment rollouts that reference
    /// this variation by id rather than carrying their own weight list.
    pub weight: Option<u32>,
}

// ============================================================================
// SECTION: Targeting
// ============================================================================

/// Comparison operator for a targeting rule or segment predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operator {
    /// Equality (case-sensitive for strings).
    Eq,
    /// Inequality.
    Ne,
    /// Membership in the operand list.
    In,
    /// Non-membership in the operand list.
    Nin,
    /// Substring containment.
    Contains,
    /// Prefix match.
    StartsWith,
    /// Suffix match.
    EndsWith,
    /// Numeric greater-than.
    Gt,
    /// Numeric greater-than-or-equal.
    Gte,
    /// Numeric less-than.
    Lt,
    /// Numeric less-than-or-equal.
    Lte,
    /// Segment membership test; `values` names the segment id.
    InSegment,
}

/// A single ordered targeting rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetingRule {
    /// Context attribute to test. Ignored for `InSegment`, where the
    /// membership test is against the whole context.
    pub attribute: String,
    /// Comparison operator.
    pub operator: Operator,
    /// Operand values. For `InSegment`, exactly one value naming a segment
    /// id.
    pub values: Vec<String>,
    /// Variation returned when this rule matches.
    pub result_variation: VariationId,
}

/// The targeting configuration attached to a flag.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TargetingBlock {
    /// Ordered targeting rules; the first match wins.
    #[serde(default)]
    pub rules: Vec<TargetingRule>,
    /// Variation returned when no rule matches and no rollout is active.
    pub default_rule: Option<VariationId>,
}

// ============================================================================
// SECTION: Flag
// ============================================================================

/// A feature flag, identified by `(project, environment, key)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flag {
    /// Owning project.
    pub project_id: ProjectId,
    /// Owning environment.
    pub environment_key: EnvironmentKey,
    /// Flag key, unique within `(project, environment)`.
    pub key: FlagKey,
    /// Human-readable name.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
    /// Declared value type; every variation's value must match.
    pub value_type: ValueType,
    /// Whether the flag is enabled. A disabled flag always evaluates to
    /// `default`, regardless of targeting or rollout.
    pub enabled: bool,
    /// Value returned when disabled, or as the ultimate fallthrough.
    pub default: FlagValue,
    /// Ordered variations; referenced by id from targeting rules and
    /// rollouts.
    pub variations: Vec<Variation>,
    /// Targeting configuration.
    pub targeting: TargetingBlock,
    /// Creation timestamp.
    pub created_at: Timestamp,
    /// Last update timestamp.
    pub updated_at: Timestamp,
}

impl Flag {
    /// Looks up a variation by id.
    #[must_use]
    pub fn variation(&self, id: &VariationId) -> Option<&Variation> {
        self.variations.iter().find(|variation| &variation.id == id)
    }
}
