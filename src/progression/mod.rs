//! Unit/step learning-path progression.
//!
//! A path is an ordered list of units, each an ordered list of steps. Steps
//! move LOCKED -> AVAILABLE -> IN_PROGRESS -> COMPLETED and never backward.
//! A unit's status is always derived from its steps, and completing a unit
//! unlocks the first step of the next one. The [`PathProgress`] aggregate
//! is recomputed from the unit/step states after every transition, never
//! mutated directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ProgressionConfig;
use crate::error::{EngineError, Result};
use crate::graph::SkillId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PathId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(pub i64);

impl std::fmt::Display for PathId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Locked,
    Available,
    InProgress,
    Completed,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Locked => "LOCKED",
            Self::Available => "AVAILABLE",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
        };
        f.write_str(s)
    }
}

/// Unit status mirrors step status but is always derived, never set
/// independently.
pub type UnitStatus = StepStatus;

/// One step within a unit, tied to the skill it practices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathStep {
    pub id: StepId,
    pub unit_id: UnitId,
    pub skill_id: SkillId,
    pub step_number: u32,
    pub title: String,
    pub status: StepStatus,
    pub evidence_count: u32,
    pub attempts: u32,
    pub unlocked_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PathStep {
    #[must_use]
    pub fn new(id: StepId, unit_id: UnitId, skill_id: SkillId, step_number: u32, title: &str) -> Self {
        Self {
            id,
            unit_id,
            skill_id,
            step_number,
            title: title.to_string(),
            status: StepStatus::Locked,
            evidence_count: 0,
            attempts: 0,
            unlocked_at: None,
            started_at: None,
            completed_at: None,
        }
    }
}

/// One unit within a path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathUnit {
    pub id: UnitId,
    pub path_id: PathId,
    pub unit_number: u32,
    pub title: String,
    pub status: UnitStatus,
    pub unlocked_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PathUnit {
    #[must_use]
    pub fn new(id: UnitId, path_id: PathId, unit_number: u32, title: &str) -> Self {
        Self {
            id,
            path_id,
            unit_number,
            title: title.to_string(),
            status: UnitStatus::Locked,
            unlocked_at: None,
            started_at: None,
            completed_at: None,
        }
    }
}

/// Per-(user, path) aggregate, recomputed after every transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathProgress {
    pub path_id: PathId,
    pub user_id: i64,
    pub current_unit_id: Option<UnitId>,
    pub current_step_id: Option<StepId>,
    pub total_units: u32,
    pub completed_units: u32,
    pub total_steps: u32,
    pub completed_steps: u32,
    pub evidence_submitted: u32,
    pub total_time_minutes: u32,
    /// Completed-step percentage in [0, 100]; monotonically non-decreasing
    pub overall_progress: f64,
    pub last_activity_at: Option<DateTime<Utc>>,
}

/// The full unit/step tree of one path for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathState {
    pub path_id: PathId,
    pub user_id: i64,
    pub units: Vec<PathUnit>,
    pub steps: Vec<PathStep>,
}

impl PathState {
    /// Steps of one unit, ordered by step number.
    fn unit_steps(&self, unit_id: UnitId) -> Vec<usize> {
        let mut indices: Vec<usize> = self
            .steps
            .iter()
            .enumerate()
            .filter(|(_, s)| s.unit_id == unit_id)
            .map(|(i, _)| i)
            .collect();
        indices.sort_by_key(|&i| self.steps[i].step_number);
        indices
    }

    /// Units ordered by unit number.
    fn ordered_units(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..self.units.len()).collect();
        indices.sort_by_key(|&i| self.units[i].unit_number);
        indices
    }
}

/// Drives step/unit transitions and progress aggregation.
#[derive(Debug, Clone)]
pub struct ProgressionEngine {
    config: ProgressionConfig,
}

impl ProgressionEngine {
    #[must_use]
    pub const fn new(config: ProgressionConfig) -> Self {
        Self { config }
    }

    /// Unlock the first step of a freshly created path and derive unit
    /// statuses. Idempotent: already-unlocked paths are left alone.
    pub fn initialize(&self, path: &mut PathState, now: DateTime<Utc>) {
        let first_step = path
            .ordered_units()
            .first()
            .map(|&u| path.units[u].id)
            .map(|unit_id| path.unit_steps(unit_id))
            .and_then(|steps| steps.first().copied());

        if let Some(i) = first_step
            && path.steps[i].status == StepStatus::Locked
        {
            unlock_step(&mut path.steps[i], now);
        }
        self.derive_units(path, now);
    }

    /// Record learner activity against a step.
    ///
    /// `evidence_delta` new evidence items are attributed to the step; the
    /// step completes once its evidence count reaches the configured
    /// threshold. Completing cascades: the next step unlocks, unit
    /// statuses are re-derived, and a finished unit unlocks the next
    /// unit's first step. Advancing a locked step is a conflict; advancing
    /// a completed step is a no-op (completion is monotonic), and so is a
    /// zero `evidence_delta` on any advanceable step.
    pub fn advance_step(
        &self,
        path: &mut PathState,
        step_id: StepId,
        evidence_delta: u32,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let i = path
            .steps
            .iter()
            .position(|s| s.id == step_id)
            .ok_or(EngineError::StepNotFound(step_id))?;

        match path.steps[i].status {
            StepStatus::Locked => {
                return Err(EngineError::StepOutOfOrder {
                    step_id,
                    status: path.steps[i].status.to_string(),
                    reason: "previous step not completed".to_string(),
                });
            }
            StepStatus::Completed => {
                debug!(step_id = %step_id, "advance on completed step ignored");
                return Ok(());
            }
            StepStatus::Available | StepStatus::InProgress => {}
        }

        // No evidence means no activity: the step neither starts nor
        // counts an attempt.
        if evidence_delta == 0 {
            debug!(step_id = %step_id, "advance without evidence ignored");
            return Ok(());
        }

        if path.steps[i].status == StepStatus::Available {
            path.steps[i].status = StepStatus::InProgress;
            path.steps[i].started_at = Some(now);
        }

        path.steps[i].attempts += 1;
        path.steps[i].evidence_count += evidence_delta;

        if path.steps[i].evidence_count >= self.config.step_evidence_threshold {
            self.complete_unlocked_step(path, i, now);
        } else {
            self.derive_units(path, now);
        }
        Ok(())
    }

    /// Explicit completion signal, bypassing the evidence threshold.
    /// Only an available or in-progress step may complete; a locked step
    /// is out of order.
    pub fn complete_step(
        &self,
        path: &mut PathState,
        step_id: StepId,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let i = path
            .steps
            .iter()
            .position(|s| s.id == step_id)
            .ok_or(EngineError::StepNotFound(step_id))?;

        match path.steps[i].status {
            StepStatus::Locked => Err(EngineError::StepOutOfOrder {
                step_id,
                status: path.steps[i].status.to_string(),
                reason: "cannot complete a locked step".to_string(),
            }),
            StepStatus::Completed => Ok(()),
            StepStatus::Available | StepStatus::InProgress => {
                if path.steps[i].started_at.is_none() {
                    path.steps[i].started_at = Some(now);
                }
                self.complete_unlocked_step(path, i, now);
                Ok(())
            }
        }
    }

    /// Recompute the aggregate from current unit/step states. `previous`
    /// carries forward the monotonic floor and cumulative counters.
    #[must_use]
    pub fn recompute_progress(
        &self,
        path: &PathState,
        previous: Option<&PathProgress>,
        now: DateTime<Utc>,
    ) -> PathProgress {
        let total_units = path.units.len() as u32;
        let completed_units = path
            .units
            .iter()
            .filter(|u| u.status == UnitStatus::Completed)
            .count() as u32;
        let total_steps = path.steps.len() as u32;
        let completed_steps = path
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count() as u32;
        let evidence_submitted = path.steps.iter().map(|s| s.evidence_count).sum();

        let ratio = if total_steps == 0 {
            0.0
        } else {
            f64::from(completed_steps) / f64::from(total_steps) * 100.0
        };
        // Progress never moves backwards even if the tree shrinks
        let overall_progress = previous.map_or(ratio, |p| p.overall_progress.max(ratio));

        let current_unit_id = path
            .ordered_units()
            .into_iter()
            .map(|i| &path.units[i])
            .find(|u| u.status != UnitStatus::Completed)
            .map(|u| u.id);
        let current_step_id = current_unit_id.and_then(|unit_id| {
            path.unit_steps(unit_id)
                .into_iter()
                .map(|i| &path.steps[i])
                .find(|s| s.status != StepStatus::Completed)
                .map(|s| s.id)
        });

        PathProgress {
            path_id: path.path_id,
            user_id: path.user_id,
            current_unit_id,
            current_step_id,
            total_units,
            completed_units,
            total_steps,
            completed_steps,
            evidence_submitted,
            total_time_minutes: previous.map_or(0, |p| p.total_time_minutes),
            overall_progress,
            last_activity_at: Some(now),
        }
    }

    /// Mark step `i` completed and propagate: unlock the successor step,
    /// re-derive unit statuses, and open the next unit when this one is
    /// done.
    fn complete_unlocked_step(&self, path: &mut PathState, i: usize, now: DateTime<Utc>) {
        path.steps[i].status = StepStatus::Completed;
        path.steps[i].completed_at = Some(now);
        debug!(step_id = %path.steps[i].id, unit_id = %path.steps[i].unit_id, "step completed");

        let unit_id = path.steps[i].unit_id;
        let siblings = path.unit_steps(unit_id);
        if let Some(pos) = siblings.iter().position(|&s| s == i)
            && let Some(&next) = siblings.get(pos + 1)
            && path.steps[next].status == StepStatus::Locked
        {
            unlock_step(&mut path.steps[next], now);
        }

        self.derive_units(path, now);
    }

    /// Derive every unit's status from its steps and apply cross-unit
    /// unlock propagation.
    fn derive_units(&self, path: &mut PathState, now: DateTime<Utc>) {
        let order = path.ordered_units();

        for &u in &order {
            let unit_id = path.units[u].id;
            let statuses: Vec<StepStatus> = path
                .unit_steps(unit_id)
                .into_iter()
                .map(|i| path.steps[i].status)
                .collect();
            let derived = derive_unit_status(&statuses);
            apply_unit_status(&mut path.units[u], derived, now);
        }

        // A completed unit opens the first step of the next one
        for pair in order.windows(2) {
            let (done, next) = (pair[0], pair[1]);
            if path.units[done].status != UnitStatus::Completed {
                continue;
            }
            let next_id = path.units[next].id;
            if let Some(&first) = path.unit_steps(next_id).first()
                && path.steps[first].status == StepStatus::Locked
            {
                unlock_step(&mut path.steps[first], now);
                let statuses: Vec<StepStatus> = path
                    .unit_steps(next_id)
                    .into_iter()
                    .map(|i| path.steps[i].status)
                    .collect();
                let derived = derive_unit_status(&statuses);
                apply_unit_status(&mut path.units[next], derived, now);
                debug!(unit_id = %next_id, "next unit unlocked");
            }
        }
    }
}

fn unlock_step(step: &mut PathStep, now: DateTime<Utc>) {
    step.status = StepStatus::Available;
    step.unlocked_at = Some(now);
}

/// Unit status from its steps: completed only when all steps are, in
/// progress once any step has started, available once the first step is.
fn derive_unit_status(steps: &[StepStatus]) -> UnitStatus {
    if steps.is_empty() {
        return UnitStatus::Locked;
    }
    if steps.iter().all(|&s| s == StepStatus::Completed) {
        return UnitStatus::Completed;
    }
    if steps
        .iter()
        .any(|&s| matches!(s, StepStatus::InProgress | StepStatus::Completed))
    {
        return UnitStatus::InProgress;
    }
    if steps[0] == StepStatus::Available {
        return UnitStatus::Available;
    }
    UnitStatus::Locked
}

/// Unit transitions are monotonic too; timestamps record the first entry
/// into each stage.
fn apply_unit_status(unit: &mut PathUnit, derived: UnitStatus, now: DateTime<Utc>) {
    if unit.status == derived {
        return;
    }
    match derived {
        UnitStatus::Available if unit.unlocked_at.is_none() => unit.unlocked_at = Some(now),
        UnitStatus::InProgress if unit.started_at.is_none() => {
            if unit.unlocked_at.is_none() {
                unit.unlocked_at = Some(now);
            }
            unit.started_at = Some(now);
        }
        UnitStatus::Completed if unit.completed_at.is_none() => unit.completed_at = Some(now),
        _ => {}
    }
    unit.status = derived;
}
