// flagforge-core/src/eval/mod.rs
// ============================================================================
// Module: Flagforge Evaluation
// Description: The deterministic evaluator, bucketer, and segment resolver.
// Purpose: Group the components of the evaluation + distribution fabric.
// Dependencies: crate::model
// ============================================================================

//! ## Overview
//! This module groups the Evaluator (C1), Bucketer (C2), and the segment
//! membership resolver they both depend on. Every function here is pure:
//! no I/O, no global state, and (outside of the returned `FlagValue`
//! clones) no heap allocation on the steady-state path.

pub mod bucketer;
pub mod evaluator;
pub mod segments;
