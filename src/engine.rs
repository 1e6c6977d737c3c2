//! Engine facade.
//!
//! [`Engine`] ties the pure computation modules (state, frontier,
//! progression, session) to the store collaborators and the loaded
//! [`SkillGraph`]. It owns no clock: every time-sensitive operation takes
//! `now` from the caller, which keeps recomputation deterministic and
//! makes the whole facade testable without sleeping.
//!
//! The engine never retries and never caches derived results; each call
//! recomputes from stored evidence so upstream changes are always
//! reflected.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::frontier::{FrontierNode, FrontierScorer};
use crate::graph::{SkillGraph, SkillId};
use crate::progression::{PathId, PathProgress, PathState, ProgressionEngine, StepId};
use crate::session::{Session, SessionId, SessionKind, SessionLifecycle};
use crate::state::{Evidence, EvidenceKind, StateEngine, StateReport, UserSkillState};
use crate::store::{DemandWeightSource, GraphSource, PathStore, SessionStore, StateStore};

/// Everything the engine needs from persistence, as one bound.
pub trait EngineStore:
    GraphSource + StateStore + PathStore + SessionStore + DemandWeightSource
{
}

impl<S> EngineStore for S where
    S: GraphSource + StateStore + PathStore + SessionStore + DemandWeightSource
{
}

/// Facade over the skill-graph engine: state derivation, frontier
/// ranking, path progression, and the session lifecycle, all against one
/// store.
pub struct Engine<S: EngineStore> {
    graph: Arc<SkillGraph>,
    config: EngineConfig,
    states: StateEngine,
    scorer: FrontierScorer,
    progression: ProgressionEngine,
    store: Arc<S>,
}

impl<S: EngineStore> std::fmt::Debug for Engine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("skills", &self.graph.len())
            .finish_non_exhaustive()
    }
}

impl<S: EngineStore> Engine<S> {
    /// Load the graph from the store and build the engine. Fails if the
    /// stored node/edge set is structurally invalid (unknown endpoints or
    /// a cycle).
    pub fn new(store: Arc<S>, config: EngineConfig) -> Result<Self> {
        let nodes = store.load_nodes()?;
        let edges = store.load_edges()?;
        let graph = Arc::new(SkillGraph::build(nodes, &edges)?);
        info!(skills = graph.len(), edges = edges.len(), "skill graph loaded");

        Ok(Self {
            states: StateEngine::new(config.state.clone()),
            scorer: FrontierScorer::new(config.scoring.clone()),
            progression: ProgressionEngine::new(config.progression.clone()),
            graph,
            config,
            store,
        })
    }

    #[must_use]
    pub fn graph(&self) -> &SkillGraph {
        &self.graph
    }

    /// Recompute and persist every skill state for one user.
    ///
    /// Rows are created lazily on first computation and upserted on every
    /// subsequent one. Per-skill faults (bad evidence) are reported in the
    /// returned [`StateReport`], never silently dropped.
    pub fn skill_states(&self, user_id: i64, now: DateTime<Utc>) -> Result<StateReport> {
        let evidence = self.store.evidence_for_user(user_id)?;
        let existing = self.existing_states(user_id)?;
        let report = self
            .states
            .compute_states(user_id, &self.graph, &evidence, &existing, now);

        if !report.failed.is_empty() {
            warn!(
                user_id,
                failed = report.failed.len(),
                "skill state recomputation had per-skill faults"
            );
        }

        let rows: Vec<UserSkillState> = report.states.values().cloned().collect();
        self.store.save_states(user_id, &rows)?;
        Ok(report)
    }

    /// Append one evidence item and recompute the owner's states.
    pub fn submit_evidence(&self, evidence: &Evidence, now: DateTime<Utc>) -> Result<StateReport> {
        let id = self.store.append_evidence(evidence)?;
        info!(
            user_id = evidence.user_id,
            evidence_id = id,
            kind = %evidence.kind,
            skills = evidence.skill_ids.len(),
            "evidence recorded"
        );
        self.skill_states(evidence.user_id, now)
    }

    /// Rank the user's frontier skills. Recomputed on every call.
    pub fn frontier(
        &self,
        user_id: i64,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<FrontierNode>> {
        let report = self.skill_states(user_id, now)?;
        let demand = self.store.demand_weights()?;
        Ok(self.scorer.rank(&report.states, &self.graph, &demand, limit))
    }

    /// Unlock the first step of a stored path. Idempotent.
    pub fn initialize_path(
        &self,
        user_id: i64,
        path_id: PathId,
        now: DateTime<Utc>,
    ) -> Result<PathProgress> {
        let mut path = self.load_path(user_id, path_id)?;
        self.progression.initialize(&mut path, now);
        self.persist_path(&path, now)
    }

    /// Record activity against a step and return the refreshed aggregate.
    pub fn advance_step(
        &self,
        user_id: i64,
        path_id: PathId,
        step_id: StepId,
        evidence_delta: u32,
        now: DateTime<Utc>,
    ) -> Result<PathProgress> {
        let mut path = self.load_path(user_id, path_id)?;
        self.progression
            .advance_step(&mut path, step_id, evidence_delta, now)?;
        self.persist_path(&path, now)
    }

    /// Explicitly complete a step, bypassing the evidence threshold.
    pub fn complete_step(
        &self,
        user_id: i64,
        path_id: PathId,
        step_id: StepId,
        now: DateTime<Utc>,
    ) -> Result<PathProgress> {
        let mut path = self.load_path(user_id, path_id)?;
        self.progression.complete_step(&mut path, step_id, now)?;
        self.persist_path(&path, now)
    }

    pub fn path_progress(&self, user_id: i64, path_id: PathId) -> Result<Option<PathProgress>> {
        self.store.load_progress(user_id, path_id)
    }

    /// Propose a practice session for (user, skill).
    pub fn propose_session(
        &self,
        user_id: i64,
        skill_id: SkillId,
        kind: SessionKind,
        now: DateTime<Utc>,
    ) -> Result<Session> {
        if !self.graph.contains(skill_id) {
            return Err(EngineError::SkillNotFound(skill_id));
        }
        let confidence_before = self
            .existing_states(user_id)?
            .get(&skill_id)
            .map_or(0.0, |s| s.confidence);
        self.sessions()
            .propose(user_id, skill_id, kind, confidence_before, now)
    }

    pub fn activate_session(&self, session_id: SessionId, now: DateTime<Utc>) -> Result<Session> {
        self.sessions().activate(session_id, now)
    }

    /// Complete an active session with an outcome score in [0, 1].
    ///
    /// The outcome is also recorded as an evidence item against the
    /// session's skill, so the next state recomputation sees it.
    pub fn complete_session(
        &self,
        session_id: SessionId,
        score: f64,
        now: DateTime<Utc>,
    ) -> Result<Session> {
        let session = self.sessions().complete(session_id, score, now)?;

        let evidence = Evidence {
            id: 0,
            user_id: session.user_id,
            kind: outcome_evidence_kind(session.kind),
            support: session.score.unwrap_or(0.0),
            created_at: now,
            skill_ids: vec![session.skill_id],
            source_uri: None,
        };
        self.submit_evidence(&evidence, now)?;
        Ok(session)
    }

    /// Expire every session past its deadline; returns how many this call
    /// expired.
    pub fn sweep_expired_sessions(&self, now: DateTime<Utc>) -> Result<usize> {
        self.sessions().sweep(now)
    }

    fn sessions(&self) -> SessionLifecycle<'_> {
        SessionLifecycle::new(&*self.store, self.config.session.clone())
    }

    fn existing_states(&self, user_id: i64) -> Result<HashMap<SkillId, UserSkillState>> {
        Ok(self
            .store
            .states_for_user(user_id)?
            .into_iter()
            .map(|s| (s.skill_id, s))
            .collect())
    }

    fn load_path(&self, user_id: i64, path_id: PathId) -> Result<PathState> {
        self.store
            .load_path(user_id, path_id)?
            .ok_or(EngineError::PathNotFound(path_id))
    }

    fn persist_path(&self, path: &PathState, now: DateTime<Utc>) -> Result<PathProgress> {
        self.store.save_path(path)?;
        let previous = self.store.load_progress(path.user_id, path.path_id)?;
        let progress = self
            .progression
            .recompute_progress(path, previous.as_ref(), now);
        self.store.save_progress(&progress)?;
        Ok(progress)
    }
}

/// How a session outcome enters the evidence history.
const fn outcome_evidence_kind(kind: SessionKind) -> EvidenceKind {
    match kind {
        SessionKind::Probe => EvidenceKind::Quiz,
        SessionKind::Build => EvidenceKind::Project,
        SessionKind::Prove | SessionKind::Apply => EvidenceKind::WorkSample,
    }
}
