// flagforge-core/src/model/segment.rs
// ============================================================================
// Module: Flagforge Segments
// Description: Named, project-scoped predicate sets used by targeting rules.
// Purpose: Define segment membership as a boolean test over user attributes.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A segment is a project-scoped, named set of predicates evaluated as a
//! boolean membership test. Segments may reference other segments through
//! `SegmentPredicate::InSegment`; cycles are rejected at write time by the
//! store (see `flagforge-store-sqlite`), so evaluation never walks a graph
//! at runtime — only an already-acyclic, pre-resolved set of predicates.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::model::flag::Operator;
use crate::model::ids::SegmentId;

// ============================================================================
// SECTION: Segment
// ============================================================================

/// A named, project-scoped set of predicates over user attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Segment identifier.
    pub id: SegmentId,
    /// Human-readable name.
    pub name: String,
    /// Predicates combined with logical AND; the segment matches a
    /// context iff every predicate matches.
    pub predicates: Vec<SegmentPredicate>,
}

impl Segment {
    /// Returns the segment ids this segment directly references via
    /// `SegmentPredicate::InSegment` predicates. Used by the store's
    /// cycle check at write time.
    #[must_use]
    pub fn referenced_segment_ids(&self) -> Vec<&SegmentId> {
        self.predicates
            .iter()
            .filter_map(|predicate| match predicate {
                SegmentPredicate::InSegment(id) => Some(id),
            })
            .collect()
    }
}

/// A single segment predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum SegmentPredicate {
    /// An attribute-comparison predicate, reusing the same operator set as
    /// targeting rules.
    Attribute {
        /// Attribute name to test.
        attribute: String,
        /// Comparison operator.
        operator: Operator,
        /// Operand values.
        values: Vec<String>,
    },
    /// A reference to another segment; matches iff the referenced segment
    /// matches.
    InSegment(SegmentId),
}
