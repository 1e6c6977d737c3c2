//! Frontier ranking.
//!
//! The frontier is the set of skills whose prerequisites are satisfied but
//! which are not yet proficient. [`FrontierScorer::rank`] orders it by a
//! composite of current confidence, unlock potential (how many locked
//! dependents proficiency here would open up), and external market demand.
//! Ranking is advisory: it has no side effects, is recomputed on every
//! request, and never cached, because upstream evidence can change between
//! calls.

use std::collections::{BTreeMap, HashMap};

use itertools::Itertools as _;
use serde::Serialize;

use crate::config::ScoringConfig;
use crate::graph::{SkillGraph, SkillId};
use crate::state::{SkillStatus, UserSkillState};

/// One ranked recommendation. Derived, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct FrontierNode {
    pub skill_id: SkillId,
    pub skill_name: String,
    pub status: SkillStatus,
    pub confidence: f64,
    /// Locked direct dependents that would become available if this skill
    /// reached proficiency (one-hop lookahead)
    pub unlock_potential: u32,
    pub demand_weight: f64,
    pub score: f64,
    /// Which factor dominated the score, for display
    pub rationale: String,
}

/// Ranks frontier skills by composite score.
#[derive(Debug, Clone)]
pub struct FrontierScorer {
    config: ScoringConfig,
}

impl FrontierScorer {
    #[must_use]
    pub const fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    /// Rank the available/in-progress skills for recommendation.
    ///
    /// `demand_weights` maps skill ids to a market-demand scalar in [0, 1];
    /// missing entries count as zero demand. Ties break by ascending skill
    /// id so the ordering is fully deterministic.
    #[must_use]
    pub fn rank(
        &self,
        states: &BTreeMap<SkillId, UserSkillState>,
        graph: &SkillGraph,
        demand_weights: &HashMap<SkillId, f64>,
        limit: usize,
    ) -> Vec<FrontierNode> {
        states
            .values()
            .filter(|state| state.status.is_frontier())
            .map(|state| self.score_one(state, states, graph, demand_weights))
            .sorted_by(|a, b| {
                b.score
                    .total_cmp(&a.score)
                    .then_with(|| a.skill_id.cmp(&b.skill_id))
            })
            .take(limit)
            .collect()
    }

    fn score_one(
        &self,
        state: &UserSkillState,
        states: &BTreeMap<SkillId, UserSkillState>,
        graph: &SkillGraph,
        demand_weights: &HashMap<SkillId, f64>,
    ) -> FrontierNode {
        let unlock_potential = unlock_potential(state.skill_id, states, graph);
        let demand = demand_weights.get(&state.skill_id).copied().unwrap_or(0.0);

        let confidence_term = self.config.confidence_weight * state.confidence;
        let unlock_term =
            self.config.unlock_weight * (f64::from(unlock_potential) / self.config.unlock_scale);
        let demand_term = self.config.demand_weight * demand;
        let score = confidence_term + unlock_term + demand_term;

        let rationale = if unlock_term >= confidence_term && unlock_term >= demand_term {
            match unlock_potential {
                0 => "leaf skill, nothing further gated on it".to_string(),
                1 => "unlocks 1 skill".to_string(),
                n => format!("unlocks {n} skills"),
            }
        } else if demand_term >= confidence_term {
            format!("high market demand ({demand:.2})")
        } else {
            format!("momentum: already at {:.0}% confidence", state.confidence * 100.0)
        };

        FrontierNode {
            skill_id: state.skill_id,
            skill_name: graph
                .node(state.skill_id)
                .map(|n| n.canonical_name.clone())
                .unwrap_or_default(),
            status: state.status,
            confidence: state.confidence,
            unlock_potential,
            demand_weight: demand,
            score,
            rationale,
        }
    }
}

/// Count the locked direct dependents that would become available if
/// `skill_id` reached proficiency: every other prerequisite of the
/// dependent must already be satisfied. One hop only, so the whole ranking
/// stays O(edges).
fn unlock_potential(
    skill_id: SkillId,
    states: &BTreeMap<SkillId, UserSkillState>,
    graph: &SkillGraph,
) -> u32 {
    let mut count = 0;
    for dependent in graph.dependents_of(skill_id) {
        let locked = states
            .get(&dependent)
            .is_none_or(|s| s.status == SkillStatus::Locked);
        if !locked {
            continue;
        }
        let others_satisfied = graph.prerequisites_of(dependent).all(|p| {
            p == skill_id
                || states
                    .get(&p)
                    .is_some_and(|s| s.status.satisfies_prereq())
        });
        if others_satisfied {
            count += 1;
        }
    }
    count
}
