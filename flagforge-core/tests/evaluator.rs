// flagforge-core/tests/evaluator.rs
// ============================================================================
// Module: Evaluator Integration Tests
// Description: End-to-end scenarios against the pure evaluation function.
// Purpose: Exercise S1/S2 and the disabled-flag-dominance property.
// Dependencies: flagforge_core
// ============================================================================

#![allow(clippy::expect_used, reason = "Integration tests use expect for setup clarity.")]

use std::collections::BTreeMap;

use flagforge_core::evaluate;
use flagforge_core::EnvironmentKey;
use flagforge_core::EvaluationContext;
use flagforge_core::Flag;
use flagforge_core::FlagKey;
use flagforge_core::FlagValue;
use flagforge_core::Operator;
use flagforge_core::ProjectId;
use flagforge_core::Reason;
use flagforge_core::TargetingBlock;
use flagforge_core::TargetingRule;
use flagforge_core::Timestamp;
use flagforge_core::ValueType;
use flagforge_core::Variation;
use flagforge_core::VariationId;

fn base_flag(key: &str, enabled: bool, default: FlagValue) -> Flag {
    let now = Timestamp::now();
    Flag {
        project_id: ProjectId::new("proj-1"),
        environment_key: EnvironmentKey::new("production"),
        key: FlagKey::new(key),
        name: key.to_string(),
        description: None,
        value_type: default.value_type(),
        enabled,
        default,
        variations: Vec::new(),
        targeting: TargetingBlock::default(),
        created_at: now,
        updated_at: now,
    }
}

#[test]
fn s1_disabled_flag_always_returns_default() {
    let on = Variation {
        id: VariationId::new("on"),
        name: "on".to_string(),
        value: FlagValue::Bool(true),
        description: None,
        weight: None,
    };
    let mut flag = base_flag("billing-v2", false, FlagValue::Bool(false));
    flag.variations.push(on.clone());
    flag.targeting.rules.push(TargetingRule {
        attribute: "plan".to_string(),
        operator: Operator::Eq,
        values: vec!["premium".to_string()],
        result_variation: on.id.clone(),
    });

    let mut ctx = EvaluationContext::new("u1");
    ctx.attributes.insert("plan".to_string(), serde_json::json!("premium"));

    let outcome = evaluate(&flag, &ctx, None, &BTreeMap::new()).expect("evaluates");
    assert_eq!(outcome.value, FlagValue::Bool(false));
    assert_eq!(outcome.reason, Reason::Disabled);
    assert!(!outcome.matched);
}

#[test]
fn s2_targeting_match_and_fallthrough() {
    let on = Variation {
        id: VariationId::new("on"),
        name: "on".to_string(),
        value: FlagValue::Bool(true),
        description: None,
        weight: None,
    };
    let mut flag = base_flag("beta-ui", true, FlagValue::Bool(false));
    flag.variations.push(on.clone());
    flag.targeting.rules.push(TargetingRule {
        attribute: "plan".to_string(),
        operator: Operator::Eq,
        values: vec!["premium".to_string()],
        result_variation: on.id.clone(),
    });

    let mut premium_ctx = EvaluationContext::new("u42");
    premium_ctx.attributes.insert("plan".to_string(), serde_json::json!("premium"));
    let outcome = evaluate(&flag, &premium_ctx, None, &BTreeMap::new()).expect("evaluates");
    assert_eq!(outcome.value, FlagValue::Bool(true));
    assert_eq!(outcome.variation_id, Some(on.id));
    assert_eq!(outcome.reason, Reason::TargetingMatch);
    assert!(outcome.matched);

    let mut free_ctx = EvaluationContext::new("u42");
    free_ctx.attributes.insert("plan".to_string(), serde_json::json!("free"));
    let outcome = evaluate(&flag, &free_ctx, None, &BTreeMap::new()).expect("evaluates");
    assert_eq!(outcome.value, FlagValue::Bool(false));
    assert_eq!(outcome.reason, Reason::RuleFallthrough);
    assert!(!outcome.matched);
}

#[test]
fn disabled_flag_dominates_regardless_of_context() {
    let on = Variation {
        id: VariationId::new("on"),
        name: "on".to_string(),
        value: FlagValue::Bool(true),
        description: None,
        weight: None,
    };
    let mut flag = base_flag("always-off", false, FlagValue::Bool(false));
    flag.variations.push(on.clone());
    flag.targeting.default_rule = Some(on.id.clone());
    flag.targeting.rules.push(TargetingRule {
        attribute: "anything".to_string(),
        operator: Operator::Eq,
        values: vec!["anything".to_string()],
        result_variation: on.id,
    });

    for key in ["u1", "u2", "admin", ""] {
        let mut ctx = EvaluationContext::new(key);
        ctx.attributes.insert("anything".to_string(), serde_json::json!("anything"));
        let outcome = evaluate(&flag, &ctx, None, &BTreeMap::new()).expect("evaluates");
        assert_eq!(outcome.value, FlagValue::Bool(false));
        assert_eq!(outcome.reason, Reason::Disabled);
    }
}

#[test]
fn missing_attribute_is_a_non_match_not_an_error() {
    let on = Variation {
        id: VariationId::new("on"),
        name: "on".to_string(),
        value: FlagValue::Bool(true),
        description: None,
        weight: None,
    };
    let mut flag = base_flag("no-attr", true, FlagValue::Bool(false));
    flag.variations.push(on.clone());
    flag.targeting.rules.push(TargetingRule {
        attribute: "plan".to_string(),
        operator: Operator::Eq,
        values: vec!["premium".to_string()],
        result_variation: on.id,
    });

    let ctx = EvaluationContext::new("u1");
    let outcome = evaluate(&flag, &ctx, None, &BTreeMap::new()).expect("evaluates");
    assert_eq!(outcome.reason, Reason::RuleFallthrough);
    assert_eq!(outcome.value, FlagValue::Bool(false));
}

#[test]
fn unknown_variation_reference_is_malformed_flag() {
    let mut flag = base_flag("bad-ref", true, FlagValue::Bool(false));
    flag.targeting.default_rule = Some(VariationId::new("does-not-exist"));

    let ctx = EvaluationContext::new("u1");
    let err = evaluate(&flag, &ctx, None, &BTreeMap::new()).expect_err("should error");
    assert!(matches!(err, flagforge_core::EvalError::UnknownVariation { .. }));
}

#[test]
fn determinism_repeated_calls_agree() {
    let on = Variation {
        id: VariationId::new("on"),
        name: "on".to_string(),
        value: FlagValue::Bool(true),
        description: None,
        weight: None,
    };
    let mut flag = base_flag("repeatable", true, FlagValue::Bool(false));
    flag.variations.push(on.clone());
    flag.targeting.rules.push(TargetingRule {
        attribute: "plan".to_string(),
        operator: Operator::Eq,
        values: vec!["premium".to_string()],
        result_variation: on.id,
    });

    let mut ctx = EvaluationContext::new("u7");
    ctx.attributes.insert("plan".to_string(), serde_json::json!("premium"));

    let first = evaluate(&flag, &ctx, None, &BTreeMap::new()).expect("evaluates");
    let second = evaluate(&flag, &ctx, None, &BTreeMap::new()).expect("evaluates");
    assert_eq!(first, second);
}
