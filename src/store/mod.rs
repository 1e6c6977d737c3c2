//! Persistence collaborator interfaces.
//!
//! The engine performs no I/O of its own; everything it reads or writes
//! goes through these traits. The caller is responsible for serializing
//! writes per user (a per-user transaction boundary in the implementation);
//! the engine does not provide cross-request locking. Two implementations
//! ship with the crate: [`MemoryStore`] and the rusqlite-backed
//! [`Database`].

mod memory;
mod migrations;
mod sqlite;

use std::collections::HashMap;

use crate::error::Result;
use crate::graph::{PrereqEdge, SkillId, SkillNode};
use crate::progression::{PathId, PathProgress, PathState};
use crate::session::{Session, SessionId, SessionState};
use crate::state::{Evidence, UserSkillState};

pub use memory::MemoryStore;
pub use sqlite::Database;

/// Source of the full node/edge set the graph is built from.
pub trait GraphSource: Send + Sync {
    fn load_nodes(&self) -> Result<Vec<SkillNode>>;
    fn load_edges(&self) -> Result<Vec<PrereqEdge>>;
}

/// Per-user skill state rows and evidence history.
pub trait StateStore: Send + Sync {
    fn states_for_user(&self, user_id: i64) -> Result<Vec<UserSkillState>>;
    /// Upsert the given rows; rows are never hard-deleted.
    fn save_states(&self, user_id: i64, states: &[UserSkillState]) -> Result<()>;
    /// This user's full evidence history, oldest first.
    fn evidence_for_user(&self, user_id: i64) -> Result<Vec<Evidence>>;
    /// Append one evidence item; returns the assigned id.
    fn append_evidence(&self, evidence: &Evidence) -> Result<i64>;
}

/// Unit/step trees and progress aggregates per (user, path).
pub trait PathStore: Send + Sync {
    fn load_path(&self, user_id: i64, path_id: PathId) -> Result<Option<PathState>>;
    fn save_path(&self, path: &PathState) -> Result<()>;
    fn load_progress(&self, user_id: i64, path_id: PathId) -> Result<Option<PathProgress>>;
    fn save_progress(&self, progress: &PathProgress) -> Result<()>;
}

/// Session rows, including the enumeration the expiry sweep needs.
pub trait SessionStore: Send + Sync {
    fn session(&self, id: SessionId) -> Result<Option<Session>>;
    /// The non-terminal (proposed or active) session for a (user, skill)
    /// pair, if any. At most one can exist.
    fn open_session_for(&self, user_id: i64, skill_id: SkillId) -> Result<Option<Session>>;
    /// Every proposed or active session, across all users.
    fn non_terminal_sessions(&self) -> Result<Vec<Session>>;
    /// Insert a new session; returns the assigned id.
    fn insert_session(&self, session: &Session) -> Result<SessionId>;
    /// Write `updated` only if the stored row is still in `expected`
    /// state. Returns false when the guard fails, which callers treat as
    /// having lost a benign race, not as an error.
    fn transition_session(&self, updated: &Session, expected: SessionState) -> Result<bool>;
}

/// Market-demand scalars per skill, refreshed out-of-band.
pub trait DemandWeightSource: Send + Sync {
    fn demand_weights(&self) -> Result<HashMap<SkillId, f64>>;
}
