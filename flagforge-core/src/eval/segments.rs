// flagforge-core/src/eval/segments.rs
// ============================================================================
// Module: Flagforge Segment Resolver
// Description: Segment membership testing against an evaluation context.
// Purpose: Back `Operator::InSegment` targeting rules and segment rollouts.
// Dependencies: crate::{model, eval::evaluator}
// ============================================================================

//! ## Overview
//! Segments are resolved against an already-acyclic, pre-indexed map
//! (`BTreeMap<SegmentId, Segment>`) rather than walked as a live graph;
//! the store rejects cyclic `InSegment` references at write time, so a
//! lookup miss here means a dangling reference, not an error — a segment
//! that cannot be found simply does not match.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use crate::eval::evaluator::Predicate;
use crate::eval::evaluator::rule_matches;
use crate::model::EvaluationContext;
use crate::model::Segment;
use crate::model::SegmentId;
use crate::model::SegmentPredicate;

// ============================================================================
// SECTION: Membership
// ============================================================================

/// Returns `true` if `context` is a member of the segment named
/// `segment_id`, per the pre-resolved `segments` index. All of a
/// segment's predicates must match (logical AND). A segment id with no
/// entry in `segments` never matches.
#[must_use]
pub fn segment_matches(
    segment_id: &SegmentId,
    context: &EvaluationContext,
    segments: &BTreeMap<SegmentId, Segment>,
) -> bool {
    let Some(segment) = segments.get(segment_id) else {
        return false;
    };
    segment
        .predicates
        .iter()
        .all(|predicate| predicate_matches(predicate, context, segments))
}

fn predicate_matches(
    predicate: &SegmentPredicate,
    context: &EvaluationContext,
    segments: &BTreeMap<SegmentId, Segment>,
) -> bool {
    match predicate {
        SegmentPredicate::Attribute { attribute, operator, values } => rule_matches(
            Predicate { attribute, operator: *operator, values },
            context,
            segments,
        ),
        SegmentPredicate::InSegment(referenced) => segment_matches(referenced, context, segments),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Operator;

    fn segment(id: &str, predicates: Vec<SegmentPredicate>) -> Segment {
        Segment { id: SegmentId::new(id), name: id.to_string(), predicates }
    }

    #[test]
    fn missing_segment_does_not_match() {
        let segments = BTreeMap::new();
        let ctx = EvaluationContext::new("u1");
        assert!(!segment_matches(&SegmentId::new("ghost"), &ctx, &segments));
    }

    #[test]
    fn attribute_predicate_matches_context() {
        let mut ctx = EvaluationContext::new("u1");
        ctx.attributes.insert("plan".to_string(), serde_json::json!("enterprise"));
        let mut segments = BTreeMap::new();
        segments.insert(
            SegmentId::new("enterprise-users"),
            segment(
                "enterprise-users",
                vec![SegmentPredicate::Attribute {
                    attribute: "plan".to_string(),
                    operator: Operator::Eq,
                    values: vec!["enterprise".to_string()],
                }],
            ),
        );
        assert!(segment_matches(&SegmentId::new("enterprise-users"), &ctx, &segments));
    }

    #[test]
    fn nested_segment_reference_resolves_transitively() {
        let mut ctx = EvaluationContext::new("u1");
        ctx.attributes.insert("country".to_string(), serde_json::json!("FR"));
        let mut segments = BTreeMap::new();
        segments.insert(
            SegmentId::new("eu"),
            segment(
                "eu",
                vec![SegmentPredicate::Attribute {
                    attribute: "country".to_string(),
                    operator: Operator::In,
                    values: vec!["FR".to_string(), "DE".to_string()],
                }],
            ),
        );
        segments.insert(
            SegmentId::new("eu-beta"),
            segment("eu-beta", vec![SegmentPredicate::InSegment(SegmentId::new("eu"))]),
        );
        assert!(segment_matches(&SegmentId::new("eu-beta"), &ctx, &segments));
    }
}
