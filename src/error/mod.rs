//! Error handling for the skill-graph engine.
//!
//! This module provides:
//! - [`EngineError`]: The main error enum for all engine operations
//! - [`ErrorCode`]: Standardized error codes for machine parsing
//!
//! The taxonomy distinguishes structural faults (a malformed prerequisite
//! graph, fatal at load), caller errors (not-found, conflict, stale data,
//! surfaced and never retried), and storage faults from the persistence
//! collaborators. No error is retried inside the engine; retry policy
//! belongs to the caller.

mod codes;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

pub use codes::ErrorCode;

use crate::graph::SkillId;
use crate::progression::{PathId, StepId, UnitId};
use crate::session::SessionId;

/// Main error type for skill-graph engine operations.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Prerequisite graph contains a cycle: {}", .cycle.iter().map(ToString::to_string).collect::<Vec<_>>().join(" -> "))]
    GraphCycle { cycle: Vec<SkillId> },

    #[error("Prerequisite edge {from} -> {to} references an unknown skill")]
    GraphUnknownEndpoint { from: SkillId, to: SkillId },

    #[error("Duplicate skill id in graph input: {0}")]
    GraphDuplicateNode(SkillId),

    #[error("Skill not found: {0}")]
    SkillNotFound(SkillId),

    #[error("Path unit not found: {0}")]
    UnitNotFound(UnitId),

    #[error("Path step not found: {0}")]
    StepNotFound(StepId),

    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("Path not found: {0}")]
    PathNotFound(PathId),

    #[error("A non-terminal session already exists for user {user_id} on skill {skill_id}")]
    SessionAlreadyOpen { user_id: i64, skill_id: SkillId },

    #[error("Session {session_id} cannot transition from {state}: {reason}")]
    SessionInvalidTransition {
        session_id: SessionId,
        state: String,
        reason: String,
    },

    #[error("Step {step_id} cannot advance while {status}: {reason}")]
    StepOutOfOrder {
        step_id: StepId,
        status: String,
        reason: String,
    },

    #[error("Evidence {evidence_id} references skill {skill_id} which is not in the loaded graph")]
    EvidenceSkillMissing {
        evidence_id: i64,
        skill_id: SkillId,
    },

    #[error("Evidence {evidence_id} is malformed: {reason}")]
    EvidenceMalformed { evidence_id: i64, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Missing required config: {0}")]
    MissingConfig(String),
}

/// Result type alias used throughout the engine.
pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Get the error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::GraphCycle { .. } => ErrorCode::GraphCycle,
            Self::GraphUnknownEndpoint { .. } => ErrorCode::GraphUnknownEndpoint,
            Self::GraphDuplicateNode(_) => ErrorCode::GraphDuplicateNode,
            Self::SkillNotFound(_) => ErrorCode::SkillNotFound,
            Self::UnitNotFound(_) => ErrorCode::UnitNotFound,
            Self::StepNotFound(_) => ErrorCode::StepNotFound,
            Self::SessionNotFound(_) => ErrorCode::SessionNotFound,
            Self::PathNotFound(_) => ErrorCode::PathNotFound,
            Self::SessionAlreadyOpen { .. } => ErrorCode::SessionAlreadyOpen,
            Self::SessionInvalidTransition { .. } => ErrorCode::SessionInvalidTransition,
            Self::StepOutOfOrder { .. } => ErrorCode::StepOutOfOrder,
            Self::EvidenceSkillMissing { .. } => ErrorCode::EvidenceSkillMissing,
            Self::EvidenceMalformed { .. } => ErrorCode::EvidenceMalformed,
            Self::Database(_) | Self::Io(_) => ErrorCode::DatabaseError,
            Self::Json(_) => ErrorCode::SerializationError,
            Self::Config(_) => ErrorCode::ConfigInvalid,
            Self::MissingConfig(_) => ErrorCode::ConfigMissingRequired,
        }
    }

    /// Get context information for this error as JSON.
    #[must_use]
    pub fn context(&self) -> Option<Value> {
        match self {
            Self::GraphCycle { cycle } => Some(serde_json::json!({ "cycle": cycle })),
            Self::GraphUnknownEndpoint { from, to } => {
                Some(serde_json::json!({ "from": from, "to": to }))
            }
            Self::SkillNotFound(id) | Self::GraphDuplicateNode(id) => {
                Some(serde_json::json!({ "skill_id": id }))
            }
            Self::SessionAlreadyOpen { user_id, skill_id } => {
                Some(serde_json::json!({ "user_id": user_id, "skill_id": skill_id }))
            }
            Self::SessionInvalidTransition {
                session_id, state, ..
            } => Some(serde_json::json!({ "session_id": session_id, "state": state })),
            Self::StepOutOfOrder {
                step_id, status, ..
            } => Some(serde_json::json!({ "step_id": step_id, "status": status })),
            Self::EvidenceSkillMissing {
                evidence_id,
                skill_id,
            } => Some(serde_json::json!({ "evidence_id": evidence_id, "skill_id": skill_id })),
            Self::MissingConfig(key) => Some(serde_json::json!({ "config_key": key })),
            _ => None,
        }
    }
}

/// A per-skill failure captured during batch recomputation.
///
/// One malformed skill must not abort computation for the rest, so
/// [`compute_states`](crate::state::StateEngine::compute_states) collects
/// these instead of returning early.
#[derive(Debug, Clone, Serialize)]
pub struct SkillFault {
    /// The skill whose recomputation failed
    pub skill_id: SkillId,
    /// Machine-readable code for the failure
    pub code: ErrorCode,
    /// Human-readable description
    pub detail: String,
}

impl SkillFault {
    pub(crate) fn from_error(skill_id: SkillId, err: &EngineError) -> Self {
        Self {
            skill_id,
            code: err.code(),
            detail: err.to_string(),
        }
    }
}
