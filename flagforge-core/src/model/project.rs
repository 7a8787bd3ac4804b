// flagforge-core/src/model/project.rs
// ============================================================================
// Module: Flagforge Projects and Environments
// Description: Minimal scoping rows referenced by flags and API keys.
// Purpose: Provide the (project, environment) namespace flags live under.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Projects and environments carry no targeting or rollout behavior of
//! their own; they are plain rows used purely to scope flags and API keys.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::model::ids::EnvironmentKey;
use crate::model::ids::ProjectId;

// ============================================================================
// SECTION: Project / Environment
// ============================================================================

/// A project: the top-level namespace for flags, segments, and API keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Project identifier.
    pub id: ProjectId,
    /// Human-readable name.
    pub name: String,
}

/// An environment within a project (e.g. `"production"`, `"staging"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    /// Owning project.
    pub project_id: ProjectId,
    /// Environment key, unique within the project.
    pub key: EnvironmentKey,
    /// Human-readable name.
    pub name: String,
}
