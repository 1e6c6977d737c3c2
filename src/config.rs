//! Engine configuration.
//!
//! Every tunable the engine consults lives here: proficiency and staleness
//! thresholds, decay half-life, frontier scoring weights, step completion
//! thresholds, and session expiry. Values come from defaults, an optional
//! TOML file, and `SKILLGRAPH_*` environment overrides, merged in that
//! order. Nothing in the engine reads a hardcoded constant.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub progression: ProgressionConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

impl EngineConfig {
    /// Load config from an optional TOML file, then apply env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = path
            && let Some(patch) = Self::load_patch(path)?
        {
            config.merge_patch(patch);
        }

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    fn load_patch(path: &Path) -> Result<Option<ConfigPatch>> {
        if !path.exists() {
            return Ok(None);
        }

        let raw = std::fs::read_to_string(path)
            .map_err(|err| EngineError::Config(format!("read config {}: {err}", path.display())))?;
        let patch = toml::from_str(&raw)
            .map_err(|err| EngineError::Config(format!("parse config {}: {err}", path.display())))?;
        Ok(Some(patch))
    }

    fn merge_patch(&mut self, patch: ConfigPatch) {
        if let Some(patch) = patch.state {
            self.state.merge(patch);
        }
        if let Some(patch) = patch.scoring {
            self.scoring.merge(patch);
        }
        if let Some(patch) = patch.progression {
            self.progression.merge(patch);
        }
        if let Some(patch) = patch.session {
            self.session.merge(patch);
        }
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(value) = env_f64("SKILLGRAPH_PROFICIENCY_THRESHOLD")? {
            self.state.proficiency_threshold = value;
        }
        if let Some(value) = env_f64("SKILLGRAPH_STALE_FLOOR")? {
            self.state.stale_floor = value;
        }
        if let Some(value) = env_u32("SKILLGRAPH_HALF_LIFE_DAYS")? {
            self.state.default_half_life_days = value;
        }
        if let Some(value) = env_f64("SKILLGRAPH_WEIGHT_CONFIDENCE")? {
            self.scoring.confidence_weight = value;
        }
        if let Some(value) = env_f64("SKILLGRAPH_WEIGHT_UNLOCK")? {
            self.scoring.unlock_weight = value;
        }
        if let Some(value) = env_f64("SKILLGRAPH_WEIGHT_DEMAND")? {
            self.scoring.demand_weight = value;
        }
        if let Some(value) = env_u32("SKILLGRAPH_STEP_EVIDENCE_THRESHOLD")? {
            self.progression.step_evidence_threshold = value;
        }
        if let Some(value) = env_u32("SKILLGRAPH_SESSION_TTL_HOURS")? {
            self.session.ttl_hours = value;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("state.proficiency_threshold", self.state.proficiency_threshold),
            ("state.stale_floor", self.state.stale_floor),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(EngineError::Config(format!(
                    "{name} must be in [0, 1], got {value}"
                )));
            }
        }
        for (name, value) in [
            ("scoring.confidence_weight", self.scoring.confidence_weight),
            ("scoring.unlock_weight", self.scoring.unlock_weight),
            ("scoring.demand_weight", self.scoring.demand_weight),
        ] {
            if value < 0.0 {
                return Err(EngineError::Config(format!(
                    "{name} must be non-negative, got {value}"
                )));
            }
        }
        if self.scoring.unlock_scale <= 0.0 {
            return Err(EngineError::Config(format!(
                "scoring.unlock_scale must be positive, got {}",
                self.scoring.unlock_scale
            )));
        }
        if self.progression.step_evidence_threshold == 0 {
            return Err(EngineError::Config(
                "progression.step_evidence_threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Thresholds and timers for per-skill state computation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Confidence at or above which a skill counts as proficient
    pub proficiency_threshold: f64,
    /// Decayed confidence below which a proficient skill can go stale
    pub stale_floor: f64,
    /// Half-life applied when a skill node does not declare its own
    pub default_half_life_days: u32,
    /// Days without reinforcing evidence before staleness is considered;
    /// `None` means "use the skill's decay half-life"
    pub stale_window_days: Option<u32>,
    /// Multiplier applied to confidence on the proficient -> stale demotion
    pub stale_demotion_factor: f64,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            proficiency_threshold: 0.70,
            stale_floor: 0.60,
            default_half_life_days: 180,
            stale_window_days: None,
            stale_demotion_factor: 0.8,
        }
    }
}

impl StateConfig {
    fn merge(&mut self, patch: StatePatch) {
        if let Some(value) = patch.proficiency_threshold {
            self.proficiency_threshold = value;
        }
        if let Some(value) = patch.stale_floor {
            self.stale_floor = value;
        }
        if let Some(value) = patch.default_half_life_days {
            self.default_half_life_days = value;
        }
        if let Some(value) = patch.stale_window_days {
            self.stale_window_days = Some(value);
        }
        if let Some(value) = patch.stale_demotion_factor {
            self.stale_demotion_factor = value;
        }
    }
}

/// Weights for the frontier composite score.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub confidence_weight: f64,
    pub unlock_weight: f64,
    pub demand_weight: f64,
    /// Divisor that brings the raw unlock count into the same range as the
    /// other two terms before weighting
    pub unlock_scale: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            confidence_weight: 0.25,
            unlock_weight: 0.45,
            demand_weight: 0.30,
            unlock_scale: 4.0,
        }
    }
}

impl ScoringConfig {
    fn merge(&mut self, patch: ScoringPatch) {
        if let Some(value) = patch.confidence_weight {
            self.confidence_weight = value;
        }
        if let Some(value) = patch.unlock_weight {
            self.unlock_weight = value;
        }
        if let Some(value) = patch.demand_weight {
            self.demand_weight = value;
        }
        if let Some(value) = patch.unlock_scale {
            self.unlock_scale = value;
        }
    }
}

/// Unit/step progression thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressionConfig {
    /// Evidence items required before a step auto-completes
    pub step_evidence_threshold: u32,
}

impl Default for ProgressionConfig {
    fn default() -> Self {
        Self {
            step_evidence_threshold: 3,
        }
    }
}

impl ProgressionConfig {
    fn merge(&mut self, patch: ProgressionPatch) {
        if let Some(value) = patch.step_evidence_threshold {
            self.step_evidence_threshold = value;
        }
    }
}

/// Session proposal expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Hours until a proposed session expires
    pub ttl_hours: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { ttl_hours: 24 }
    }
}

impl SessionConfig {
    fn merge(&mut self, patch: SessionPatch) {
        if let Some(value) = patch.ttl_hours {
            self.ttl_hours = value;
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    state: Option<StatePatch>,
    scoring: Option<ScoringPatch>,
    progression: Option<ProgressionPatch>,
    session: Option<SessionPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct StatePatch {
    proficiency_threshold: Option<f64>,
    stale_floor: Option<f64>,
    default_half_life_days: Option<u32>,
    stale_window_days: Option<u32>,
    stale_demotion_factor: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct ScoringPatch {
    confidence_weight: Option<f64>,
    unlock_weight: Option<f64>,
    demand_weight: Option<f64>,
    unlock_scale: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct ProgressionPatch {
    step_evidence_threshold: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct SessionPatch {
    ttl_hours: Option<u32>,
}

fn env_u32(key: &str) -> Result<Option<u32>> {
    match std::env::var(key) {
        Ok(value) => value
            .parse::<u32>()
            .map(Some)
            .map_err(|err| EngineError::Config(format!("invalid {key} value {value}: {err}"))),
        Err(_) => Ok(None),
    }
}

fn env_f64(key: &str) -> Result<Option<f64>> {
    match std::env::var(key) {
        Ok(value) => value
            .parse::<f64>()
            .map(Some)
            .map_err(|err| EngineError::Config(format!("invalid {key} value {value}: {err}"))),
        Err(_) => Ok(None),
    }
}
