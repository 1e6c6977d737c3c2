//! Practice-session lifecycle.
//!
//! A session is a short-lived proposal to practice one skill:
//! PROPOSED -> ACTIVE -> COMPLETED, with EXPIRED reachable from either
//! non-terminal state once the deadline passes. The invariant the whole
//! module enforces: at most one non-terminal session per (user, skill).
//!
//! The expiry sweep is the only background-initiated mutation in the
//! engine. Every state write goes through the store's compare-and-swap
//! [`transition_session`](crate::store::SessionStore::transition_session),
//! so a sweep racing a user-initiated transition on the same session
//! resolves to whichever write lands first; the loser is a no-op.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::error::{EngineError, Result};
use crate::graph::SkillId;
use crate::store::SessionStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub i64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Proposed,
    Active,
    Completed,
    Expired,
}

impl SessionState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Expired)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Proposed => "PROPOSED",
            Self::Active => "ACTIVE",
            Self::Completed => "COMPLETED",
            Self::Expired => "EXPIRED",
        };
        f.write_str(s)
    }
}

/// What kind of practice the session proposes. Determines how strongly a
/// completion score moves confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionKind {
    /// Assessment (quiz)
    Probe,
    /// Mini-project
    Build,
    /// Evidence submission
    Prove,
    /// Real-world application
    Apply,
}

impl SessionKind {
    /// Weight of a completion score in the confidence update.
    #[must_use]
    pub const fn confidence_weight(self) -> f64 {
        match self {
            Self::Probe => 0.4,
            Self::Build => 0.3,
            Self::Prove => 0.2,
            Self::Apply => 0.5,
        }
    }
}

impl std::fmt::Display for SessionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Probe => "PROBE",
            Self::Build => "BUILD",
            Self::Prove => "PROVE",
            Self::Apply => "APPLY",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub user_id: i64,
    pub skill_id: SkillId,
    pub kind: SessionKind,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub confidence_before: f64,
    pub confidence_after: Option<f64>,
    pub score: Option<f64>,
}

impl Session {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Drives session transitions against a [`SessionStore`].
pub struct SessionLifecycle<'a> {
    store: &'a dyn SessionStore,
    config: SessionConfig,
}

impl<'a> SessionLifecycle<'a> {
    #[must_use]
    pub const fn new(store: &'a dyn SessionStore, config: SessionConfig) -> Self {
        Self { store, config }
    }

    /// Propose a new session for (user, skill).
    ///
    /// Fails with a conflict if a non-terminal session for the pair exists.
    /// A session that is already past its deadline is lazily expired here
    /// and does not block the new proposal.
    pub fn propose(
        &self,
        user_id: i64,
        skill_id: SkillId,
        kind: SessionKind,
        confidence_before: f64,
        now: DateTime<Utc>,
    ) -> Result<Session> {
        if let Some(open) = self.store.open_session_for(user_id, skill_id)? {
            if open.is_expired(now) {
                // Dead proposal discovered in passing: sweep it, then allow
                // the fresh one. Losing the race to the sweeper is fine.
                self.expire_one(&open, now)?;
            } else {
                return Err(EngineError::SessionAlreadyOpen { user_id, skill_id });
            }
        }

        let session = Session {
            id: SessionId(0), // assigned by the store
            user_id,
            skill_id,
            kind,
            state: SessionState::Proposed,
            created_at: now,
            expires_at: now + Duration::hours(i64::from(self.config.ttl_hours)),
            started_at: None,
            completed_at: None,
            confidence_before,
            confidence_after: None,
            score: None,
        };
        let id = self.store.insert_session(&session)?;

        info!(user_id, skill_id = %skill_id, session_id = %id, "session proposed");
        Ok(Session { id, ..session })
    }

    /// Move a proposed session to active. Activating past the deadline
    /// expires the session instead and reports a conflict. Activating an
    /// already-active session is idempotent.
    pub fn activate(&self, session_id: SessionId, now: DateTime<Utc>) -> Result<Session> {
        let session = self
            .store
            .session(session_id)?
            .ok_or(EngineError::SessionNotFound(session_id))?;

        match session.state {
            SessionState::Active => Ok(session),
            SessionState::Proposed if session.is_expired(now) => {
                self.expire_one(&session, now)?;
                Err(EngineError::SessionInvalidTransition {
                    session_id,
                    state: session.state.to_string(),
                    reason: "session expired before activation".to_string(),
                })
            }
            SessionState::Proposed => {
                let updated = Session {
                    state: SessionState::Active,
                    started_at: Some(now),
                    ..session
                };
                if self.store.transition_session(&updated, SessionState::Proposed)? {
                    info!(session_id = %session_id, "session activated");
                    Ok(updated)
                } else {
                    // The sweep got there first
                    Err(EngineError::SessionInvalidTransition {
                        session_id,
                        state: SessionState::Expired.to_string(),
                        reason: "session expired concurrently".to_string(),
                    })
                }
            }
            state => Err(EngineError::SessionInvalidTransition {
                session_id,
                state: state.to_string(),
                reason: "only proposed sessions can be activated".to_string(),
            }),
        }
    }

    /// Complete an active session with an outcome score in [0, 1].
    ///
    /// The updated confidence moves toward the score with a weight set by
    /// the session kind: `new = old + weight * (score - old)`.
    pub fn complete(
        &self,
        session_id: SessionId,
        score: f64,
        now: DateTime<Utc>,
    ) -> Result<Session> {
        let session = self
            .store
            .session(session_id)?
            .ok_or(EngineError::SessionNotFound(session_id))?;

        if session.state != SessionState::Active {
            return Err(EngineError::SessionInvalidTransition {
                session_id,
                state: session.state.to_string(),
                reason: "only active sessions can be completed".to_string(),
            });
        }

        let score = score.clamp(0.0, 1.0);
        let weight = session.kind.confidence_weight();
        let confidence_after =
            (session.confidence_before + weight * (score - session.confidence_before))
                .clamp(0.0, 1.0);

        let updated = Session {
            state: SessionState::Completed,
            completed_at: Some(now),
            score: Some(score),
            confidence_after: Some(confidence_after),
            ..session
        };
        if self.store.transition_session(&updated, SessionState::Active)? {
            info!(
                session_id = %session_id,
                score,
                confidence_after,
                "session completed"
            );
            Ok(updated)
        } else {
            Err(EngineError::SessionInvalidTransition {
                session_id,
                state: SessionState::Expired.to_string(),
                reason: "session expired concurrently".to_string(),
            })
        }
    }

    /// Expire every non-terminal session whose deadline has passed.
    /// Returns the number of sessions this call actually expired; a
    /// session expired by a concurrent writer is skipped, so a second
    /// sweep over the same set is a no-op.
    pub fn sweep(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut expired = 0;
        for session in self.store.non_terminal_sessions()? {
            if !session.is_expired(now) {
                continue;
            }
            if self.expire_one(&session, now)? {
                expired += 1;
            }
        }
        if expired > 0 {
            info!(count = expired, "expired stale sessions");
        }
        Ok(expired)
    }

    fn expire_one(&self, session: &Session, now: DateTime<Utc>) -> Result<bool> {
        let updated = Session {
            state: SessionState::Expired,
            ..session.clone()
        };
        let won = self.store.transition_session(&updated, session.state)?;
        if won {
            debug!(session_id = %session.id, expired_at = %now, "session expired");
        }
        Ok(won)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn lifecycle(store: &MemoryStore) -> SessionLifecycle<'_> {
        SessionLifecycle::new(store, SessionConfig::default())
    }

    #[test]
    fn test_propose_then_duplicate_is_conflict() {
        let store = MemoryStore::new();
        let lc = lifecycle(&store);
        let now = Utc::now();

        let first = lc
            .propose(7, SkillId(3), SessionKind::Probe, 0.2, now)
            .unwrap();
        assert_eq!(first.state, SessionState::Proposed);

        let err = lc
            .propose(7, SkillId(3), SessionKind::Probe, 0.2, now)
            .unwrap_err();
        assert!(matches!(err, EngineError::SessionAlreadyOpen { user_id: 7, .. }));
    }

    #[test]
    fn test_propose_allowed_for_other_skill_or_user() {
        let store = MemoryStore::new();
        let lc = lifecycle(&store);
        let now = Utc::now();

        lc.propose(7, SkillId(3), SessionKind::Probe, 0.0, now).unwrap();
        lc.propose(7, SkillId(4), SessionKind::Probe, 0.0, now).unwrap();
        lc.propose(8, SkillId(3), SessionKind::Probe, 0.0, now).unwrap();
    }

    #[test]
    fn test_expired_proposal_does_not_block_new_one() {
        let store = MemoryStore::new();
        let lc = lifecycle(&store);
        let t0 = Utc::now();

        let first = lc
            .propose(7, SkillId(3), SessionKind::Probe, 0.0, t0)
            .unwrap();

        let later = t0 + Duration::hours(25);
        let second = lc
            .propose(7, SkillId(3), SessionKind::Probe, 0.0, later)
            .unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(
            store.session(first.id).unwrap().unwrap().state,
            SessionState::Expired
        );
    }

    #[test]
    fn test_activate_and_complete() {
        let store = MemoryStore::new();
        let lc = lifecycle(&store);
        let now = Utc::now();

        let session = lc
            .propose(7, SkillId(3), SessionKind::Probe, 0.2, now)
            .unwrap();
        let active = lc.activate(session.id, now).unwrap();
        assert_eq!(active.state, SessionState::Active);

        // activation is idempotent
        let again = lc.activate(session.id, now).unwrap();
        assert_eq!(again.state, SessionState::Active);

        let done = lc.complete(session.id, 0.9, now).unwrap();
        assert_eq!(done.state, SessionState::Completed);
        // probe weight 0.4: 0.2 + 0.4 * (0.9 - 0.2)
        assert!((done.confidence_after.unwrap() - 0.48).abs() < 1e-9);
    }

    #[test]
    fn test_activate_expired_session_is_conflict() {
        let store = MemoryStore::new();
        let lc = lifecycle(&store);
        let t0 = Utc::now();

        let session = lc
            .propose(7, SkillId(3), SessionKind::Probe, 0.0, t0)
            .unwrap();
        let err = lc.activate(session.id, t0 + Duration::hours(25)).unwrap_err();
        assert!(matches!(err, EngineError::SessionInvalidTransition { .. }));
        assert_eq!(
            store.session(session.id).unwrap().unwrap().state,
            SessionState::Expired
        );
    }

    #[test]
    fn test_complete_requires_active() {
        let store = MemoryStore::new();
        let lc = lifecycle(&store);
        let now = Utc::now();

        let session = lc
            .propose(7, SkillId(3), SessionKind::Build, 0.0, now)
            .unwrap();
        let err = lc.complete(session.id, 0.8, now).unwrap_err();
        assert!(matches!(err, EngineError::SessionInvalidTransition { .. }));
    }

    #[test]
    fn test_sweep_expires_once() {
        let store = MemoryStore::new();
        let lc = lifecycle(&store);
        let t0 = Utc::now();

        lc.propose(7, SkillId(1), SessionKind::Probe, 0.0, t0).unwrap();
        let active = lc.propose(7, SkillId(2), SessionKind::Probe, 0.0, t0).unwrap();
        lc.activate(active.id, t0).unwrap();
        lc.propose(7, SkillId(3), SessionKind::Probe, 0.0, t0 + Duration::hours(3))
            .unwrap();

        // first two are past the 24h deadline, the third is not
        let sweep_at = t0 + Duration::hours(25);
        assert_eq!(lc.sweep(sweep_at).unwrap(), 2);
        // second sweep finds nothing left to do
        assert_eq!(lc.sweep(sweep_at).unwrap(), 0);
    }

    #[test]
    fn test_unknown_session_not_found() {
        let store = MemoryStore::new();
        let lc = lifecycle(&store);
        let err = lc.activate(SessionId(99), Utc::now()).unwrap_err();
        assert!(matches!(err, EngineError::SessionNotFound(SessionId(99))));
    }
}
