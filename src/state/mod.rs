//! Per-user skill state computation.
//!
//! [`StateEngine::compute_states`] derives the status of every skill in the
//! graph for one user from submitted evidence, previously stored states,
//! and the clock. The computation is pure: same graph, evidence, existing
//! states, and `now` always produce the same output, so callers can rerun
//! it freely. Skills are visited in topological order, which means a
//! prerequisite's status for this pass is always known before any of its
//! dependents are considered.
//!
//! Unlocking uses strict AND semantics: a skill with prerequisites is
//! locked until every direct prerequisite is proficient (or stale, which
//! still satisfies downstream requirements). Proficiency is monotonic; the
//! only visible demotion is the stale flag, applied when confidence has
//! decayed below the configured floor after the stale window elapsed
//! without reinforcing evidence.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::StateConfig;
use crate::error::{EngineError, SkillFault};
use crate::graph::{SkillGraph, SkillId};

/// Status of one skill for one user. Closed set; transitions are decided
/// exhaustively in [`StateEngine::compute_states`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkillStatus {
    /// At least one direct prerequisite is not yet satisfied
    Locked,
    /// All prerequisites satisfied, no work recorded yet (frontier)
    Available,
    /// Evidence submitted but confidence below the proficiency threshold
    InProgress,
    /// Confidence reached the proficiency threshold
    Proficient,
    /// Previously proficient; confidence decayed, re-validation suggested
    Stale,
}

impl SkillStatus {
    /// Whether this status satisfies downstream prerequisites.
    #[must_use]
    pub const fn satisfies_prereq(self) -> bool {
        matches!(self, Self::Proficient | Self::Stale)
    }

    /// Whether the skill belongs to the recommendation frontier.
    #[must_use]
    pub const fn is_frontier(self) -> bool {
        matches!(self, Self::Available | Self::InProgress)
    }
}

impl std::fmt::Display for SkillStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Locked => "LOCKED",
            Self::Available => "AVAILABLE",
            Self::InProgress => "IN_PROGRESS",
            Self::Proficient => "PROFICIENT",
            Self::Stale => "STALE",
        };
        f.write_str(s)
    }
}

/// Kind of evidence submitted for a skill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvidenceKind {
    Quiz,
    Project,
    Repo,
    Cert,
    WorkSample,
}

impl EvidenceKind {
    /// Graded/verified sources count at face value; self-reported ones are
    /// damped.
    #[must_use]
    pub const fn trust_factor(self) -> f64 {
        match self {
            Self::Quiz | Self::Cert => 1.0,
            Self::Project | Self::Repo | Self::WorkSample => 0.7,
        }
    }
}

impl std::fmt::Display for EvidenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Quiz => "QUIZ",
            Self::Project => "PROJECT",
            Self::Repo => "REPO",
            Self::Cert => "CERT",
            Self::WorkSample => "WORK_SAMPLE",
        };
        f.write_str(s)
    }
}

/// One append-only evidence item, linked to the skills it supports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub id: i64,
    pub user_id: i64,
    pub kind: EvidenceKind,
    /// How strongly this item supports the linked skills, in [0, 1]
    pub support: f64,
    pub created_at: DateTime<Utc>,
    /// Skills this item is evidence for (many-to-many link)
    pub skill_ids: Vec<SkillId>,
    #[serde(default)]
    pub source_uri: Option<String>,
}

/// Stored per-(user, skill) state row. Created lazily the first time a
/// skill is computed for a user; never hard-deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSkillState {
    pub user_id: i64,
    pub skill_id: SkillId,
    pub status: SkillStatus,
    pub confidence: f64,
    /// When the proficiency claim goes stale absent new evidence
    pub stale_at: Option<DateTime<Utc>>,
    pub last_evidence_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Output of a batch recomputation: the full state mapping plus any
/// per-skill faults that were isolated instead of aborting the batch.
#[derive(Debug, Clone, Serialize)]
pub struct StateReport {
    pub states: BTreeMap<SkillId, UserSkillState>,
    pub failed: Vec<SkillFault>,
}

/// Computes per-skill statuses for one user.
#[derive(Debug, Clone)]
pub struct StateEngine {
    config: StateConfig,
}

impl StateEngine {
    #[must_use]
    pub const fn new(config: StateConfig) -> Self {
        Self { config }
    }

    /// Derive the status of every skill in `graph` for `user_id`.
    ///
    /// `evidence` is this user's full evidence history; `existing` the
    /// previously stored rows (may be empty on first contact). Faulty
    /// evidence is isolated per skill and reported in
    /// [`StateReport::failed`] without affecting the other skills.
    #[must_use]
    pub fn compute_states(
        &self,
        user_id: i64,
        graph: &SkillGraph,
        evidence: &[Evidence],
        existing: &HashMap<SkillId, UserSkillState>,
        now: DateTime<Utc>,
    ) -> StateReport {
        let (by_skill, failed) = self.partition_evidence(graph, evidence);

        let mut states: BTreeMap<SkillId, UserSkillState> = BTreeMap::new();
        for node in graph.nodes_topological() {
            let prereqs_met = graph
                .prerequisites_of(node.id)
                .all(|p| states.get(&p).is_some_and(|s| s.status.satisfies_prereq()));

            let skill_evidence = by_skill.get(&node.id).map_or(&[][..], Vec::as_slice);
            let half_life = node
                .decay_half_life_days
                .unwrap_or(self.config.default_half_life_days);

            let state = self.compute_one(
                user_id,
                node.id,
                prereqs_met,
                skill_evidence,
                half_life,
                existing.get(&node.id),
                now,
            );

            if existing.get(&node.id).map(|e| e.status) != Some(state.status) {
                debug!(
                    user_id,
                    skill_id = %node.id,
                    status = %state.status,
                    confidence = state.confidence,
                    "skill state transition"
                );
            }
            states.insert(node.id, state);
        }

        StateReport { states, failed }
    }

    /// Group evidence by linked skill, isolating faults: links to skills
    /// absent from the graph and out-of-range support values are reported
    /// instead of aborting the batch.
    fn partition_evidence<'a>(
        &self,
        graph: &SkillGraph,
        evidence: &'a [Evidence],
    ) -> (HashMap<SkillId, Vec<&'a Evidence>>, Vec<SkillFault>) {
        let mut by_skill: HashMap<SkillId, Vec<&Evidence>> = HashMap::new();
        let mut failed = Vec::new();

        for item in evidence {
            if !item.support.is_finite() || !(0.0..=1.0).contains(&item.support) {
                for &skill_id in &item.skill_ids {
                    failed.push(SkillFault::from_error(
                        skill_id,
                        &EngineError::EvidenceMalformed {
                            evidence_id: item.id,
                            reason: format!("support {} outside [0, 1]", item.support),
                        },
                    ));
                }
                continue;
            }

            for &skill_id in &item.skill_ids {
                if graph.contains(skill_id) {
                    by_skill.entry(skill_id).or_default().push(item);
                } else {
                    failed.push(SkillFault::from_error(
                        skill_id,
                        &EngineError::EvidenceSkillMissing {
                            evidence_id: item.id,
                            skill_id,
                        },
                    ));
                }
            }
        }

        (by_skill, failed)
    }

    #[allow(clippy::too_many_arguments)]
    fn compute_one(
        &self,
        user_id: i64,
        skill_id: SkillId,
        prereqs_met: bool,
        evidence: &[&Evidence],
        half_life_days: u32,
        existing: Option<&UserSkillState>,
        now: DateTime<Utc>,
    ) -> UserSkillState {
        let (confidence, last_evidence_at) = if evidence.is_empty() {
            (
                existing.map_or(0.0, |e| e.confidence),
                existing.and_then(|e| e.last_evidence_at),
            )
        } else {
            (
                combine_confidence(evidence, half_life_days, now),
                evidence.iter().map(|e| e.created_at).max(),
            )
        };

        let window_days = i64::from(
            self.config
                .stale_window_days
                .unwrap_or(half_life_days),
        );
        let was_satisfied = existing.is_some_and(|e| e.status.satisfies_prereq());
        let proficient_now = confidence >= self.config.proficiency_threshold;

        let (status, confidence) = if was_satisfied || proficient_now && prereqs_met {
            if proficient_now {
                (SkillStatus::Proficient, confidence)
            } else if self.stale_eligible(confidence, last_evidence_at, window_days, now)
                || existing.is_some_and(|e| e.status == SkillStatus::Stale)
            {
                // The demotion factor applies to the evidence-derived value
                // (recomputed fresh each pass) or once on the transition into
                // Stale. An already-Stale row with no new evidence carries
                // its stored confidence, which was demoted when it turned.
                let already_stale = existing.is_some_and(|e| e.status == SkillStatus::Stale);
                let demoted = if evidence.is_empty() && already_stale {
                    confidence
                } else {
                    confidence * self.config.stale_demotion_factor
                };
                (SkillStatus::Stale, demoted)
            } else {
                // Proficient with sub-threshold decayed confidence but the
                // stale window has not elapsed: the claim stands.
                (SkillStatus::Proficient, confidence)
            }
        } else if !prereqs_met {
            (SkillStatus::Locked, confidence)
        } else if evidence.is_empty() && existing.map_or(true, |e| e.status != SkillStatus::InProgress)
        {
            (SkillStatus::Available, confidence)
        } else if proficient_now {
            (SkillStatus::Proficient, confidence)
        } else {
            (SkillStatus::InProgress, confidence)
        };

        let stale_at = match (status, last_evidence_at) {
            (SkillStatus::Proficient, Some(anchor)) => Some(anchor + Duration::days(window_days)),
            (SkillStatus::Proficient, None) => existing.and_then(|e| e.stale_at),
            _ => None,
        };

        UserSkillState {
            user_id,
            skill_id,
            status,
            confidence: confidence.clamp(0.0, 1.0),
            stale_at,
            last_evidence_at,
            updated_at: now,
        }
    }

    fn stale_eligible(
        &self,
        confidence: f64,
        last_evidence_at: Option<DateTime<Utc>>,
        window_days: i64,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(anchor) = last_evidence_at else {
            return false;
        };
        confidence < self.config.stale_floor && now - anchor >= Duration::days(window_days)
    }
}

/// Combine evidence items into one confidence value.
///
/// Each item contributes `support * trust * 0.5^(age / half_life)`; the
/// contributions are folded as `1 - prod(1 - c_i)` so repeated evidence has
/// diminishing returns and the result stays inside [0, 1].
#[must_use]
pub fn combine_confidence(
    evidence: &[&Evidence],
    half_life_days: u32,
    now: DateTime<Utc>,
) -> f64 {
    let mut remainder = 1.0_f64;
    for item in evidence {
        let age_days = (now - item.created_at).num_seconds().max(0) as f64 / 86_400.0;
        let decay = 0.5_f64.powf(age_days / f64::from(half_life_days.max(1)));
        let contribution = (item.support * item.kind.trust_factor() * decay).clamp(0.0, 1.0);
        remainder *= 1.0 - contribution;
    }
    (1.0 - remainder).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{PrereqEdge, SkillNode};

    fn graph_java_spring_docker() -> SkillGraph {
        let nodes = vec![
            SkillNode {
                id: SkillId(1),
                canonical_name: "java".to_string(),
                domain: None,
                aliases: Vec::new(),
                decay_half_life_days: None,
            },
            SkillNode {
                id: SkillId(2),
                canonical_name: "spring".to_string(),
                domain: None,
                aliases: Vec::new(),
                decay_half_life_days: None,
            },
            SkillNode {
                id: SkillId(3),
                canonical_name: "docker".to_string(),
                domain: None,
                aliases: Vec::new(),
                decay_half_life_days: None,
            },
        ];
        let edges = [PrereqEdge {
            from: SkillId(1),
            to: SkillId(2),
        }];
        SkillGraph::build(nodes, &edges).unwrap()
    }

    fn engine() -> StateEngine {
        StateEngine::new(StateConfig::default())
    }

    fn quiz(id: i64, skill: i64, support: f64, at: DateTime<Utc>) -> Evidence {
        Evidence {
            id,
            user_id: 7,
            kind: EvidenceKind::Quiz,
            support,
            created_at: at,
            skill_ids: vec![SkillId(skill)],
            source_uri: None,
        }
    }

    fn proficient_state(skill: i64, confidence: f64, now: DateTime<Utc>) -> UserSkillState {
        UserSkillState {
            user_id: 7,
            skill_id: SkillId(skill),
            status: SkillStatus::Proficient,
            confidence,
            stale_at: None,
            last_evidence_at: Some(now),
            updated_at: now,
        }
    }

    #[test]
    fn test_spec_example_java_proficient_unlocks_spring() {
        let graph = graph_java_spring_docker();
        let now = Utc::now();
        let existing: HashMap<_, _> =
            [(SkillId(1), proficient_state(1, 0.9, now))].into_iter().collect();

        let report = engine().compute_states(7, &graph, &[], &existing, now);

        assert_eq!(report.states[&SkillId(1)].status, SkillStatus::Proficient);
        assert_eq!(report.states[&SkillId(2)].status, SkillStatus::Available);
        assert_eq!(report.states[&SkillId(3)].status, SkillStatus::Available);
        assert!(report.failed.is_empty());
    }

    #[test]
    fn test_locked_until_all_prereqs_satisfied() {
        let graph = graph_java_spring_docker();
        let now = Utc::now();

        let report = engine().compute_states(7, &graph, &[], &HashMap::new(), now);

        // java and docker have no prereqs; spring requires java
        assert_eq!(report.states[&SkillId(1)].status, SkillStatus::Available);
        assert_eq!(report.states[&SkillId(2)].status, SkillStatus::Locked);
        assert_eq!(report.states[&SkillId(3)].status, SkillStatus::Available);
    }

    #[test]
    fn test_evidence_below_threshold_is_in_progress() {
        let graph = graph_java_spring_docker();
        let now = Utc::now();
        let evidence = vec![quiz(1, 1, 0.4, now)];

        let report = engine().compute_states(7, &graph, &evidence, &HashMap::new(), now);

        let java = &report.states[&SkillId(1)];
        assert_eq!(java.status, SkillStatus::InProgress);
        assert!(java.confidence > 0.0 && java.confidence < 0.70);
    }

    #[test]
    fn test_strong_evidence_reaches_proficient() {
        let graph = graph_java_spring_docker();
        let now = Utc::now();
        let evidence = vec![quiz(1, 1, 0.9, now), quiz(2, 1, 0.8, now)];

        let report = engine().compute_states(7, &graph, &evidence, &HashMap::new(), now);

        assert_eq!(report.states[&SkillId(1)].status, SkillStatus::Proficient);
        assert!(report.states[&SkillId(1)].stale_at.is_some());
        // spring unlocks in the same pass (topological order)
        assert_eq!(report.states[&SkillId(2)].status, SkillStatus::Available);
    }

    #[test]
    fn test_evidence_on_locked_skill_does_not_unlock_it() {
        let graph = graph_java_spring_docker();
        let now = Utc::now();
        let evidence = vec![quiz(1, 2, 0.5, now)];

        let report = engine().compute_states(7, &graph, &evidence, &HashMap::new(), now);

        assert_eq!(report.states[&SkillId(2)].status, SkillStatus::Locked);
    }

    #[test]
    fn test_proficient_decays_to_stale_after_window() {
        let graph = graph_java_spring_docker();
        let then = Utc::now() - Duration::days(400);
        let evidence = vec![quiz(1, 1, 0.9, then)];

        // 400 days at a 180-day half-life: decayed well below the floor
        let now = Utc::now();
        let existing: HashMap<_, _> = [(
            SkillId(1),
            UserSkillState {
                last_evidence_at: Some(then),
                ..proficient_state(1, 0.9, then)
            },
        )]
        .into_iter()
        .collect();

        let report = engine().compute_states(7, &graph, &evidence, &existing, now);

        let java = &report.states[&SkillId(1)];
        assert_eq!(java.status, SkillStatus::Stale);
        assert!(java.confidence < 0.60);
        // stale still satisfies the downstream prerequisite
        assert_eq!(report.states[&SkillId(2)].status, SkillStatus::Available);
    }

    #[test]
    fn test_stale_demotion_applies_once() {
        let graph = graph_java_spring_docker();
        let now = Utc::now();
        let then = now - Duration::days(400);
        // proficient row whose confidence already sits below the stale
        // floor, with no evidence on file
        let existing: HashMap<_, _> = [(
            SkillId(1),
            UserSkillState {
                last_evidence_at: Some(then),
                ..proficient_state(1, 0.5, then)
            },
        )]
        .into_iter()
        .collect();

        let first = engine().compute_states(7, &graph, &[], &existing, now);
        let java = &first.states[&SkillId(1)];
        assert_eq!(java.status, SkillStatus::Stale);
        assert!((java.confidence - 0.4).abs() < 1e-9);

        // recomputing from the demoted row must not demote again
        let second = engine().compute_states(
            7,
            &graph,
            &[],
            &first.states.clone().into_iter().collect(),
            now,
        );
        assert_eq!(first.states, second.states);
        assert!((second.states[&SkillId(1)].confidence - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_stale_revalidates_with_fresh_evidence() {
        let graph = graph_java_spring_docker();
        let now = Utc::now();
        let existing: HashMap<_, _> = [(
            SkillId(1),
            UserSkillState {
                status: SkillStatus::Stale,
                ..proficient_state(1, 0.4, now)
            },
        )]
        .into_iter()
        .collect();
        let evidence = vec![quiz(9, 1, 0.95, now)];

        let report = engine().compute_states(7, &graph, &evidence, &existing, now);
        assert_eq!(report.states[&SkillId(1)].status, SkillStatus::Proficient);
    }

    #[test]
    fn test_proficient_never_relocks() {
        let graph = graph_java_spring_docker();
        let now = Utc::now();
        // spring proficient even though java never was
        let existing: HashMap<_, _> =
            [(SkillId(2), proficient_state(2, 0.9, now))].into_iter().collect();

        let report = engine().compute_states(7, &graph, &[], &existing, now);
        assert_eq!(report.states[&SkillId(2)].status, SkillStatus::Proficient);
    }

    #[test]
    fn test_idempotent_for_fixed_now() {
        let graph = graph_java_spring_docker();
        let now = Utc::now();
        let evidence = vec![
            quiz(1, 1, 0.9, now - Duration::days(10)),
            quiz(2, 3, 0.5, now - Duration::days(3)),
        ];

        let first = engine().compute_states(7, &graph, &evidence, &HashMap::new(), now);
        let second = engine().compute_states(7, &graph, &evidence, &first.states.clone().into_iter().collect(), now);

        assert_eq!(first.states, second.states);
    }

    #[test]
    fn test_unknown_skill_link_isolated_as_fault() {
        let graph = graph_java_spring_docker();
        let now = Utc::now();
        let mut item = quiz(1, 1, 0.9, now);
        item.skill_ids.push(SkillId(99));

        let report = engine().compute_states(7, &graph, &[item], &HashMap::new(), now);

        // the valid link still computes
        assert_eq!(report.states[&SkillId(1)].status, SkillStatus::Proficient);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].skill_id, SkillId(99));
    }

    #[test]
    fn test_malformed_support_isolated_as_fault() {
        let graph = graph_java_spring_docker();
        let now = Utc::now();
        let evidence = vec![quiz(1, 1, 1.7, now), quiz(2, 3, 0.9, now)];

        let report = engine().compute_states(7, &graph, &evidence, &HashMap::new(), now);

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].skill_id, SkillId(1));
        // the bad item is excluded, the skill itself still computes
        assert_eq!(report.states[&SkillId(1)].status, SkillStatus::Available);
        assert_eq!(report.states[&SkillId(3)].status, SkillStatus::Proficient);
    }

    #[test]
    fn test_decay_halves_contribution_at_half_life() {
        let now = Utc::now();
        let fresh = quiz(1, 1, 0.8, now);
        let aged = quiz(2, 1, 0.8, now - Duration::days(180));

        let fresh_conf = combine_confidence(&[&fresh], 180, now);
        let aged_conf = combine_confidence(&[&aged], 180, now);

        assert!((fresh_conf - 0.8).abs() < 1e-9);
        assert!((aged_conf - 0.4).abs() < 1e-6);
    }
}
