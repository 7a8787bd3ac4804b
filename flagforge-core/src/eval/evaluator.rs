// flagforge-core/src/eval/evaluator.rs
// ============================================================================
// Module: Flagforge Evaluator
// Description: Pure, deterministic flag evaluation against a context.
// Purpose: Implement the targeting -> rollout -> default decision chain.
// Dependencies: crate::{model, eval::bucketer, eval::segments}
// ============================================================================

//! ## Overview
//! `evaluate` is the single canonical evaluation path for Flagforge: the
//! Hub's tiered path (C6 -> C5 -> C3) and every Edge's local path both
//! terminate here. The function takes no references to mutable state and
//! performs no I/O; it is the component the specification's testable
//! properties (determinism, disabled-flag dominance) are stated against.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value as Json;
use thiserror::Error;

use crate::eval::bucketer;
use crate::eval::segments::segment_matches;
use crate::model::EvaluationContext;
use crate::model::Flag;
use crate::model::FlagValue;
use crate::model::Operator;
use crate::model::Rollout;
use crate::model::RolloutKind;
use crate::model::Segment;
use crate::model::SegmentId;
use crate::model::VariationId;

// ============================================================================
// SECTION: Reason
// ============================================================================

/// Why an evaluation produced the value it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Reason {
    /// The flag is disabled; `default` is always returned.
    Disabled,
    /// No rule, rollout, or default rule applied; `flag.default` was
    /// returned.
    Default,
    /// A targeting rule matched.
    TargetingMatch,
    /// A percentage rollout exposed this context.
    RolloutPercentage,
    /// An experiment rollout assigned this context a variation.
    RolloutExperiment,
    /// A segment-routed rollout matched.
    RolloutSegment,
    /// Nothing matched; the flag's own `default` was returned.
    RuleFallthrough,
}

// ============================================================================
// SECTION: Outcome
// ============================================================================

/// The result of evaluating a flag against a context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalOutcome {
    /// The resolved value.
    pub value: FlagValue,
    /// The variation id that produced `value`, if any (absent for
    /// `Disabled`/`Default`/`RuleFallthrough`, which return the flag's
    /// bare default rather than a variation).
    pub variation_id: Option<VariationId>,
    /// Why this value was returned.
    pub reason: Reason,
    /// Whether a targeting rule or rollout actively matched this context,
    /// as opposed to falling through to a configured or bare default.
    pub matched: bool,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised during evaluation. These never propagate as a server
/// crash; the caller's fallback is always the flag's `default`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EvalError {
    /// A variation value's type does not match the flag's declared value
    /// type.
    #[error("variation {variation_id} has a value type incompatible with flag {flag_key}")]
    TypeMismatch {
        /// Offending flag key.
        flag_key: String,
        /// Offending variation id.
        variation_id: String,
    },
    /// A rule, rollout, or default-rule referenced a variation id that
    /// does not exist on the flag.
    #[error("flag {flag_key} has no variation {variation_id}")]
    UnknownVariation {
        /// Offending flag key.
        flag_key: String,
        /// The missing variation id.
        variation_id: String,
    },
}

// ============================================================================
// SECTION: Evaluation
// ============================================================================

/// Evaluates `flag` against `context`, consulting `rollout` (if attached
/// and active) and `segments` (the pre-resolved, indexed set of segments
/// the flag's rules or rollout may reference).
///
/// # Errors
///
/// Returns [`EvalError`] on a type mismatch or unknown variation
/// reference — surfaced to the caller as `MALFORMED_FLAG`; the caller's
/// own fallback is the flag's `default`, never a panic.
pub fn evaluate(
    flag: &Flag,
    context: &EvaluationContext,
    rollout: Option<&Rollout>,
    segments: &BTreeMap<SegmentId, Segment>,
) -> Result<EvalOutcome, EvalError> {
    check_variation_types(flag)?;

    if !flag.enabled {
        return Ok(EvalOutcome {
            value: flag.default.clone(),
            variation_id: None,
            reason: Reason::Disabled,
            matched: false,
        });
    }

    for rule in &flag.targeting.rules {
        if rule_matches(rule_predicate(rule), context, segments) {
            let variation = lookup_variation(flag, &rule.result_variation)?;
            return Ok(EvalOutcome {
                value: variation.value.clone(),
                variation_id: Some(variation.id.clone()),
                reason: Reason::TargetingMatch,
                matched: true,
            });
        }
    }

    if let Some(rollout) = rollout {
        if rollout.is_active() {
            if let Some(outcome) = evaluate_rollout(flag, context, rollout, segments)? {
                return Ok(outcome);
            }
        }
    }

    if let Some(default_id) = &flag.targeting.default_rule {
        let variation = lookup_variation(flag, default_id)?;
        return Ok(EvalOutcome {
            value: variation.value.clone(),
            variation_id: Some(variation.id.clone()),
            reason: Reason::Default,
            matched: false,
        });
    }

    Ok(EvalOutcome {
        value: flag.default.clone(),
        variation_id: None,
        reason: Reason::RuleFallthrough,
        matched: false,
    })
}

/// Applies an active rollout. Returns `Ok(None)` when the rollout does
/// not expose/assign this context (it should fall through to the
/// flag-level default), or `Ok(Some(outcome))` when it does.
fn evaluate_rollout(
    flag: &Flag,
    context: &EvaluationContext,
    rollout: &Rollout,
    segments: &BTreeMap<SegmentId, Segment>,
) -> Result<Option<EvalOutcome>, EvalError> {
    let bucketing_key = context.bucketing_key(rollout.bucket_by.as_str());

    match &rollout.kind {
        RolloutKind::Percentage(variant) => {
            if !bucketer::participates(flag.key.as_str(), &bucketing_key, rollout.traffic_allocation) {
                return Ok(None);
            }
            let Some(variation_id) =
                bucketer::evaluate_percentage(variant, flag.key.as_str(), &bucketing_key)
            else {
                return Ok(None);
            };
            let variation = lookup_variation(flag, &variation_id)?;
            Ok(Some(EvalOutcome {
                value: variation.value.clone(),
                variation_id: Some(variation.id.clone()),
                reason: Reason::RolloutPercentage,
                matched: true,
            }))
        }
        RolloutKind::Experiment(variant) => {
            if !bucketer::participates(flag.key.as_str(), &bucketing_key, rollout.traffic_allocation) {
                return Ok(None);
            }
            let Some(variation_id) =
                bucketer::evaluate_experiment(variant, rollout.id.as_str(), &bucketing_key)
            else {
                return Ok(None);
            };
            let variation = lookup_variation(flag, &variation_id)?;
            Ok(Some(EvalOutcome {
                value: variation.value.clone(),
                variation_id: Some(variation.id.clone()),
                reason: Reason::RolloutExperiment,
                matched: true,
            }))
        }
        RolloutKind::Segment(variant) => {
            for route in &variant.routes {
                if segment_matches(&route.segment_id, context, segments) {
                    let variation = lookup_variation(flag, &route.variation)?;
                    return Ok(Some(EvalOutcome {
                        value: variation.value.clone(),
                        variation_id: Some(variation.id.clone()),
                        reason: Reason::RolloutSegment,
                        matched: true,
                    }));
                }
            }
            Ok(None)
        }
    }
}

// ============================================================================
// SECTION: Predicate Matching
// ============================================================================

/// The normalized shape `rule_matches` tests, shared with segment
/// predicates so both evaluate the same comparison operators.
pub(crate) struct Predicate<'a> {
    pub attribute: &'a str,
    pub operator: Operator,
    pub values: &'a [String],
}

fn rule_predicate(rule: &crate::model::TargetingRule) -> Predicate<'_> {
    Predicate {
        attribute: &rule.attribute,
        operator: rule.operator,
        values: &rule.values,
    }
}

/// Evaluates a single predicate against `context`. A missing attribute is
/// never an error — it is simply a non-match.
pub(crate) fn rule_matches(
    predicate: Predicate<'_>,
    context: &EvaluationContext,
    segments: &BTreeMap<SegmentId, Segment>,
) -> bool {
    if predicate.operator == Operator::InSegment {
        let Some(segment_id) = predicate.values.first() else {
            return false;
        };
        return segment_matches(&SegmentId::new(segment_id.clone()), context, segments);
    }

    let Some(attribute_value) = context.attribute(predicate.attribute) else {
        return false;
    };

    compare(predicate.operator, attribute_value, predicate.values)
}

/// Compares a context attribute's JSON value against a rule's string
/// operands using `operator`. Strings compare case-sensitively.
fn compare(operator: Operator, attribute_value: &Json, values: &[String]) -> bool {
    match operator {
        Operator::Eq => values.first().is_some_and(|v| json_as_string(attribute_value) == *v),
        Operator::Ne => values.first().is_some_and(|v| json_as_string(attribute_value) != *v),
        Operator::In => values.iter().any(|v| *v == json_as_string(attribute_value)),
        Operator::Nin => values.iter().all(|v| *v != json_as_string(attribute_value)),
        Operator::Contains => {
            let haystack = json_as_string(attribute_value);
            values.iter().any(|v| haystack.contains(v.as_str()))
        }
        Operator::StartsWith => {
            let haystack = json_as_string(attribute_value);
            values.iter().any(|v| haystack.starts_with(v.as_str()))
        }
        Operator::EndsWith => {
            let haystack = json_as_string(attribute_value);
            values.iter().any(|v| haystack.ends_with(v.as_str()))
        }
        Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
            numeric_compare(operator, attribute_value, values)
        }
        Operator::InSegment => false, // handled in rule_matches before reaching here
    }
}

fn numeric_compare(operator: Operator, attribute_value: &Json, values: &[String]) -> bool {
    let Some(lhs) = json_as_f64(attribute_value) else {
        return false;
    };
    let Some(rhs) = values.first().and_then(|v| v.parse::<f64>().ok()) else {
        return false;
    };
    match operator {
        Operator::Gt => lhs > rhs,
        Operator::Gte => lhs >= rhs,
        Operator::Lt => lhs < rhs,
        Operator::Lte => lhs <= rhs,
        _ => false,
    }
}

fn json_as_string(value: &Json) -> String {
    match value {
        Json::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn json_as_f64(value: &Json) -> Option<f64> {
    match value {
        Json::Number(n) => n.as_f64(),
        Json::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn lookup_variation<'a>(
    flag: &'a Flag,
    variation_id: &VariationId,
) -> Result<&'a crate::model::Variation, EvalError> {
    flag.variation(variation_id).ok_or_else(|| EvalError::UnknownVariation {
        flag_key: flag.key.to_string(),
        variation_id: variation_id.to_string(),
    })
}

fn check_variation_types(flag: &Flag) -> Result<(), EvalError> {
    for variation in &flag.variations {
        if !variation.value.matches_type(flag.value_type) {
            return Err(EvalError::TypeMismatch {
                flag_key: flag.key.to_string(),
                variation_id: variation.id.to_string(),
            });
        }
    }
    if !flag.default.matches_type(flag.value_type) {
        return Err(EvalError::TypeMismatch {
            flag_key: flag.key.to_string(),
            variation_id: "default".to_string(),
        });
    }
    Ok(())
}
