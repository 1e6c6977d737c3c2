//! Standardized error codes for machine-parseable output.
//!
//! Error codes follow a numeric taxonomy:
//! - 1xx: Structural errors (graph construction)
//! - 2xx: Not-found errors
//! - 3xx: Conflict errors (rejected transitions)
//! - 4xx: Stale-data errors
//! - 5xx: Storage errors
//! - 6xx: Config errors

use serde::{Deserialize, Serialize};

/// Standardized error codes surfaced alongside engine errors.
///
/// Each variant maps to a numeric code (e.g., `GraphCycle` -> E101).
/// Codes are grouped by category for easy identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================
    // Structural errors (1xx)
    // ========================================
    /// E101: Prerequisite graph contains a directed cycle
    GraphCycle,
    /// E102: Prerequisite edge references a skill that doesn't exist
    GraphUnknownEndpoint,
    /// E103: Duplicate skill id in graph input
    GraphDuplicateNode,

    // ========================================
    // Not-found errors (2xx)
    // ========================================
    /// E201: Requested skill is not in the loaded graph
    SkillNotFound,
    /// E202: Requested path unit was not found
    UnitNotFound,
    /// E203: Requested path step was not found
    StepNotFound,
    /// E204: Requested session was not found
    SessionNotFound,
    /// E205: Requested path was not found
    PathNotFound,

    // ========================================
    // Conflict errors (3xx)
    // ========================================
    /// E301: A non-terminal session already exists for this (user, skill)
    SessionAlreadyOpen,
    /// E302: Session is not in a state that permits this transition
    SessionInvalidTransition,
    /// E303: Step transition attempted out of order
    StepOutOfOrder,

    // ========================================
    // Stale-data errors (4xx)
    // ========================================
    /// E401: Evidence references a skill no longer present in the graph
    EvidenceSkillMissing,
    /// E402: Evidence payload could not be interpreted
    EvidenceMalformed,

    // ========================================
    // Storage errors (5xx)
    // ========================================
    /// E501: Underlying database operation failed
    DatabaseError,
    /// E502: Record serialization/deserialization failed
    SerializationError,

    // ========================================
    // Config errors (6xx)
    // ========================================
    /// E601: Config file has invalid syntax or values
    ConfigInvalid,
    /// E602: Required config value is missing
    ConfigMissingRequired,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    #[must_use]
    pub const fn numeric(self) -> u16 {
        match self {
            Self::GraphCycle => 101,
            Self::GraphUnknownEndpoint => 102,
            Self::GraphDuplicateNode => 103,
            Self::SkillNotFound => 201,
            Self::UnitNotFound => 202,
            Self::StepNotFound => 203,
            Self::SessionNotFound => 204,
            Self::PathNotFound => 205,
            Self::SessionAlreadyOpen => 301,
            Self::SessionInvalidTransition => 302,
            Self::StepOutOfOrder => 303,
            Self::EvidenceSkillMissing => 401,
            Self::EvidenceMalformed => 402,
            Self::DatabaseError => 501,
            Self::SerializationError => 502,
            Self::ConfigInvalid => 601,
            Self::ConfigMissingRequired => 602,
        }
    }

    /// True for errors the caller caused and can correct (not-found,
    /// conflicts, stale data); false for structural/storage faults.
    #[must_use]
    pub const fn is_caller_error(self) -> bool {
        let n = self.numeric();
        n >= 200 && n < 500
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "E{}", self.numeric())
    }
}
