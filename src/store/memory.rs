//! In-memory store implementation.
//!
//! Backs all five collaborator traits with `parking_lot` locked maps.
//! Used throughout the test suite and suitable for embedders that manage
//! durability themselves.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::Result;
use crate::graph::{PrereqEdge, SkillId, SkillNode};
use crate::progression::{PathId, PathProgress, PathState};
use crate::session::{Session, SessionId, SessionState};
use crate::state::{Evidence, UserSkillState};

use super::{DemandWeightSource, GraphSource, PathStore, SessionStore, StateStore};

#[derive(Debug, Default)]
struct Inner {
    nodes: Vec<SkillNode>,
    edges: Vec<PrereqEdge>,
    states: HashMap<(i64, SkillId), UserSkillState>,
    evidence: Vec<Evidence>,
    next_evidence_id: i64,
    paths: HashMap<(i64, PathId), PathState>,
    progress: HashMap<(i64, PathId), PathProgress>,
    sessions: HashMap<SessionId, Session>,
    next_session_id: i64,
    demand: HashMap<SkillId, f64>,
}

/// Thread-safe in-memory implementation of every store trait.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the graph definition.
    pub fn set_graph(&self, nodes: Vec<SkillNode>, edges: Vec<PrereqEdge>) {
        let mut inner = self.inner.write();
        inner.nodes = nodes;
        inner.edges = edges;
    }

    /// Replace the demand-weight mapping.
    pub fn set_demand_weights(&self, demand: HashMap<SkillId, f64>) {
        self.inner.write().demand = demand;
    }

    /// Seed a path tree for a user.
    pub fn put_path(&self, path: PathState) {
        self.inner
            .write()
            .paths
            .insert((path.user_id, path.path_id), path);
    }
}

impl GraphSource for MemoryStore {
    fn load_nodes(&self) -> Result<Vec<SkillNode>> {
        Ok(self.inner.read().nodes.clone())
    }

    fn load_edges(&self) -> Result<Vec<PrereqEdge>> {
        Ok(self.inner.read().edges.clone())
    }
}

impl StateStore for MemoryStore {
    fn states_for_user(&self, user_id: i64) -> Result<Vec<UserSkillState>> {
        let inner = self.inner.read();
        let mut states: Vec<UserSkillState> = inner
            .states
            .iter()
            .filter(|((uid, _), _)| *uid == user_id)
            .map(|(_, s)| s.clone())
            .collect();
        states.sort_by_key(|s| s.skill_id);
        Ok(states)
    }

    fn save_states(&self, user_id: i64, states: &[UserSkillState]) -> Result<()> {
        let mut inner = self.inner.write();
        for state in states {
            inner
                .states
                .insert((user_id, state.skill_id), state.clone());
        }
        Ok(())
    }

    fn evidence_for_user(&self, user_id: i64) -> Result<Vec<Evidence>> {
        let inner = self.inner.read();
        Ok(inner
            .evidence
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect())
    }

    fn append_evidence(&self, evidence: &Evidence) -> Result<i64> {
        let mut inner = self.inner.write();
        inner.next_evidence_id += 1;
        let id = inner.next_evidence_id;
        inner.evidence.push(Evidence {
            id,
            ..evidence.clone()
        });
        Ok(id)
    }
}

impl PathStore for MemoryStore {
    fn load_path(&self, user_id: i64, path_id: PathId) -> Result<Option<PathState>> {
        Ok(self.inner.read().paths.get(&(user_id, path_id)).cloned())
    }

    fn save_path(&self, path: &PathState) -> Result<()> {
        self.inner
            .write()
            .paths
            .insert((path.user_id, path.path_id), path.clone());
        Ok(())
    }

    fn load_progress(&self, user_id: i64, path_id: PathId) -> Result<Option<PathProgress>> {
        Ok(self.inner.read().progress.get(&(user_id, path_id)).cloned())
    }

    fn save_progress(&self, progress: &PathProgress) -> Result<()> {
        self.inner
            .write()
            .progress
            .insert((progress.user_id, progress.path_id), progress.clone());
        Ok(())
    }
}

impl SessionStore for MemoryStore {
    fn session(&self, id: SessionId) -> Result<Option<Session>> {
        Ok(self.inner.read().sessions.get(&id).cloned())
    }

    fn open_session_for(&self, user_id: i64, skill_id: SkillId) -> Result<Option<Session>> {
        Ok(self
            .inner
            .read()
            .sessions
            .values()
            .filter(|s| {
                s.user_id == user_id && s.skill_id == skill_id && !s.state.is_terminal()
            })
            .min_by_key(|s| s.id)
            .cloned())
    }

    fn non_terminal_sessions(&self) -> Result<Vec<Session>> {
        let inner = self.inner.read();
        let mut sessions: Vec<Session> = inner
            .sessions
            .values()
            .filter(|s| !s.state.is_terminal())
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.id);
        Ok(sessions)
    }

    fn insert_session(&self, session: &Session) -> Result<SessionId> {
        let mut inner = self.inner.write();
        inner.next_session_id += 1;
        let id = SessionId(inner.next_session_id);
        inner.sessions.insert(
            id,
            Session {
                id,
                ..session.clone()
            },
        );
        Ok(id)
    }

    fn transition_session(&self, updated: &Session, expected: SessionState) -> Result<bool> {
        let mut inner = self.inner.write();
        match inner.sessions.get_mut(&updated.id) {
            Some(existing) if existing.state == expected => {
                *existing = updated.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

impl DemandWeightSource for MemoryStore {
    fn demand_weights(&self) -> Result<HashMap<SkillId, f64>> {
        Ok(self.inner.read().demand.clone())
    }
}
