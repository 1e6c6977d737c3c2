//! SQLite persistence layer.
//!
//! A thin wrapper over one `rusqlite` connection, guarded by a mutex so
//! the store can be shared across threads. Timestamps are stored as
//! RFC 3339 text, enums as their SCREAMING_SNAKE_CASE display form.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, Row};

use crate::error::Result;
use crate::graph::{PrereqEdge, SkillId, SkillNode};
use crate::progression::{
    PathId, PathProgress, PathState, PathStep, PathUnit, StepId, StepStatus, UnitId,
};
use crate::session::{Session, SessionId, SessionKind, SessionState};
use crate::state::{Evidence, EvidenceKind, SkillStatus, UserSkillState};
use crate::store::migrations;

use super::{DemandWeightSource, GraphSource, PathStore, SessionStore, StateStore};

/// SQLite-backed implementation of every store trait.
pub struct Database {
    conn: Mutex<Connection>,
    schema_version: u32,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("schema_version", &self.schema_version)
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Open (creating if necessary) the database at the given path and
    /// bring its schema up to date.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::from_connection(Connection::open(path)?)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        configure_pragmas(&conn)?;
        let schema_version = migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            schema_version,
        })
    }

    #[must_use]
    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    /// Upsert one skill node definition.
    pub fn upsert_skill_node(&self, node: &SkillNode) -> Result<()> {
        let aliases_json = serde_json::to_string(&node.aliases)?;
        self.conn.lock().execute(
            "INSERT INTO skill_nodes (id, canonical_name, domain, aliases_json, decay_half_life_days)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                canonical_name = excluded.canonical_name,
                domain = excluded.domain,
                aliases_json = excluded.aliases_json,
                decay_half_life_days = excluded.decay_half_life_days",
            params![
                node.id.0,
                node.canonical_name,
                node.domain,
                aliases_json,
                node.decay_half_life_days,
            ],
        )?;
        Ok(())
    }

    /// Insert one prerequisite edge; duplicate edges are ignored.
    pub fn insert_prereq_edge(&self, edge: &PrereqEdge) -> Result<()> {
        self.conn.lock().execute(
            "INSERT OR IGNORE INTO prereq_edges (from_skill_id, to_skill_id) VALUES (?, ?)",
            params![edge.from.0, edge.to.0],
        )?;
        Ok(())
    }

    /// Replace the demand weight for one skill.
    pub fn set_demand_weight(&self, skill_id: SkillId, weight: f64) -> Result<()> {
        self.conn.lock().execute(
            "INSERT INTO demand_weights (skill_id, weight) VALUES (?, ?)
             ON CONFLICT(skill_id) DO UPDATE SET weight = excluded.weight",
            params![skill_id.0, weight],
        )?;
        Ok(())
    }
}

fn configure_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA temp_store = MEMORY;
         PRAGMA foreign_keys = ON;",
    )?;
    Ok(())
}

impl GraphSource for Database {
    fn load_nodes(&self) -> Result<Vec<SkillNode>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, canonical_name, domain, aliases_json, decay_half_life_days
             FROM skill_nodes ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<u32>>(4)?,
            ))
        })?;

        let mut nodes = Vec::new();
        for row in rows {
            let (id, canonical_name, domain, aliases_json, decay_half_life_days) = row?;
            nodes.push(SkillNode {
                id: SkillId(id),
                canonical_name,
                domain,
                aliases: serde_json::from_str(&aliases_json)?,
                decay_half_life_days,
            });
        }
        Ok(nodes)
    }

    fn load_edges(&self) -> Result<Vec<PrereqEdge>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT from_skill_id, to_skill_id FROM prereq_edges ORDER BY from_skill_id, to_skill_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(PrereqEdge {
                from: SkillId(row.get(0)?),
                to: SkillId(row.get(1)?),
            })
        })?;
        let mut edges = Vec::new();
        for row in rows {
            edges.push(row?);
        }
        Ok(edges)
    }
}

impl StateStore for Database {
    fn states_for_user(&self, user_id: i64) -> Result<Vec<UserSkillState>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT user_id, skill_id, status, confidence, stale_at, last_evidence_at, updated_at
             FROM user_skill_states WHERE user_id = ? ORDER BY skill_id",
        )?;
        let rows = stmt.query_map([user_id], state_from_row)?;
        let mut states = Vec::new();
        for row in rows {
            states.push(row?);
        }
        Ok(states)
    }

    fn save_states(&self, user_id: i64, states: &[UserSkillState]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO user_skill_states
                    (user_id, skill_id, status, confidence, stale_at, last_evidence_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(user_id, skill_id) DO UPDATE SET
                    status = excluded.status,
                    confidence = excluded.confidence,
                    stale_at = excluded.stale_at,
                    last_evidence_at = excluded.last_evidence_at,
                    updated_at = excluded.updated_at",
            )?;
            for state in states {
                stmt.execute(params![
                    user_id,
                    state.skill_id.0,
                    state.status.to_string(),
                    state.confidence,
                    state.stale_at.map(|t| t.to_rfc3339()),
                    state.last_evidence_at.map(|t| t.to_rfc3339()),
                    state.updated_at.to_rfc3339(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn evidence_for_user(&self, user_id: i64) -> Result<Vec<Evidence>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT e.id, e.user_id, e.kind, e.support, e.created_at, e.source_uri, l.skill_id
             FROM evidence e
             LEFT JOIN evidence_skill_links l ON l.evidence_id = e.id
             WHERE e.user_id = ?
             ORDER BY e.created_at, e.id, l.skill_id",
        )?;
        let rows = stmt.query_map([user_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<i64>>(6)?,
            ))
        })?;

        // One row per (evidence, link); fold links into the preceding item.
        let mut items: Vec<Evidence> = Vec::new();
        for row in rows {
            let (id, user_id, kind, support, created_at, source_uri, skill_id) = row?;
            if items.last().is_none_or(|e| e.id != id) {
                items.push(Evidence {
                    id,
                    user_id,
                    kind: evidence_kind(&kind)
                        .ok_or_else(|| text_err(2, "evidence kind", &kind))?,
                    support,
                    created_at: parse_ts(4, &created_at)?,
                    skill_ids: Vec::new(),
                    source_uri,
                });
            }
            if let (Some(last), Some(skill_id)) = (items.last_mut(), skill_id) {
                last.skill_ids.push(SkillId(skill_id));
            }
        }
        Ok(items)
    }

    fn append_evidence(&self, evidence: &Evidence) -> Result<i64> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO evidence (user_id, kind, support, created_at, source_uri)
             VALUES (?, ?, ?, ?, ?)",
            params![
                evidence.user_id,
                evidence.kind.to_string(),
                evidence.support,
                evidence.created_at.to_rfc3339(),
                evidence.source_uri,
            ],
        )?;
        let id = tx.last_insert_rowid();
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO evidence_skill_links (evidence_id, skill_id) VALUES (?, ?)",
            )?;
            for skill_id in &evidence.skill_ids {
                stmt.execute(params![id, skill_id.0])?;
            }
        }
        tx.commit()?;
        Ok(id)
    }
}

impl PathStore for Database {
    fn load_path(&self, user_id: i64, path_id: PathId) -> Result<Option<PathState>> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare(
            "SELECT id, unit_number, title, status, unlocked_at, started_at, completed_at
             FROM path_units WHERE user_id = ? AND path_id = ? ORDER BY unit_number",
        )?;
        let unit_rows = stmt.query_map(params![user_id, path_id.0], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, u32>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
            ))
        })?;
        let mut units = Vec::new();
        for row in unit_rows {
            let (id, unit_number, title, status, unlocked_at, started_at, completed_at) = row?;
            units.push(PathUnit {
                id: UnitId(id),
                path_id,
                unit_number,
                title,
                status: step_status(&status).ok_or_else(|| text_err(3, "unit status", &status))?,
                unlocked_at: parse_opt_ts(4, unlocked_at.as_deref())?,
                started_at: parse_opt_ts(5, started_at.as_deref())?,
                completed_at: parse_opt_ts(6, completed_at.as_deref())?,
            });
        }
        if units.is_empty() {
            return Ok(None);
        }

        let mut stmt = conn.prepare(
            "SELECT id, unit_id, skill_id, step_number, title, status, evidence_count, attempts,
                    unlocked_at, started_at, completed_at
             FROM path_steps WHERE user_id = ? AND path_id = ? ORDER BY unit_id, step_number",
        )?;
        let step_rows = stmt.query_map(params![user_id, path_id.0], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, u32>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, u32>(6)?,
                row.get::<_, u32>(7)?,
                row.get::<_, Option<String>>(8)?,
                row.get::<_, Option<String>>(9)?,
                row.get::<_, Option<String>>(10)?,
            ))
        })?;
        let mut steps = Vec::new();
        for row in step_rows {
            let (
                id,
                unit_id,
                skill_id,
                step_number,
                title,
                status,
                evidence_count,
                attempts,
                unlocked_at,
                started_at,
                completed_at,
            ) = row?;
            steps.push(PathStep {
                id: StepId(id),
                unit_id: UnitId(unit_id),
                skill_id: SkillId(skill_id),
                step_number,
                title,
                status: step_status(&status).ok_or_else(|| text_err(5, "step status", &status))?,
                evidence_count,
                attempts,
                unlocked_at: parse_opt_ts(8, unlocked_at.as_deref())?,
                started_at: parse_opt_ts(9, started_at.as_deref())?,
                completed_at: parse_opt_ts(10, completed_at.as_deref())?,
            });
        }

        Ok(Some(PathState {
            path_id,
            user_id,
            units,
            steps,
        }))
    }

    fn save_path(&self, path: &PathState) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM path_units WHERE user_id = ? AND path_id = ?",
            params![path.user_id, path.path_id.0],
        )?;
        tx.execute(
            "DELETE FROM path_steps WHERE user_id = ? AND path_id = ?",
            params![path.user_id, path.path_id.0],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO path_units
                    (user_id, path_id, id, unit_number, title, status,
                     unlocked_at, started_at, completed_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )?;
            for unit in &path.units {
                stmt.execute(params![
                    path.user_id,
                    path.path_id.0,
                    unit.id.0,
                    unit.unit_number,
                    unit.title,
                    unit.status.to_string(),
                    unit.unlocked_at.map(|t| t.to_rfc3339()),
                    unit.started_at.map(|t| t.to_rfc3339()),
                    unit.completed_at.map(|t| t.to_rfc3339()),
                ])?;
            }
            let mut stmt = tx.prepare(
                "INSERT INTO path_steps
                    (user_id, path_id, id, unit_id, skill_id, step_number, title, status,
                     evidence_count, attempts, unlocked_at, started_at, completed_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )?;
            for step in &path.steps {
                stmt.execute(params![
                    path.user_id,
                    path.path_id.0,
                    step.id.0,
                    step.unit_id.0,
                    step.skill_id.0,
                    step.step_number,
                    step.title,
                    step.status.to_string(),
                    step.evidence_count,
                    step.attempts,
                    step.unlocked_at.map(|t| t.to_rfc3339()),
                    step.started_at.map(|t| t.to_rfc3339()),
                    step.completed_at.map(|t| t.to_rfc3339()),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn load_progress(&self, user_id: i64, path_id: PathId) -> Result<Option<PathProgress>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT current_unit_id, current_step_id, total_units, completed_units,
                    total_steps, completed_steps, evidence_submitted, total_time_minutes,
                    overall_progress, last_activity_at
             FROM path_progress WHERE user_id = ? AND path_id = ?",
        )?;
        let mut rows = stmt.query(params![user_id, path_id.0])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        let last_activity_at: Option<String> = row.get(9)?;
        Ok(Some(PathProgress {
            path_id,
            user_id,
            current_unit_id: row.get::<_, Option<i64>>(0)?.map(UnitId),
            current_step_id: row.get::<_, Option<i64>>(1)?.map(StepId),
            total_units: row.get(2)?,
            completed_units: row.get(3)?,
            total_steps: row.get(4)?,
            completed_steps: row.get(5)?,
            evidence_submitted: row.get(6)?,
            total_time_minutes: row.get(7)?,
            overall_progress: row.get(8)?,
            last_activity_at: parse_opt_ts(9, last_activity_at.as_deref())?,
        }))
    }

    fn save_progress(&self, progress: &PathProgress) -> Result<()> {
        self.conn.lock().execute(
            "INSERT INTO path_progress
                (user_id, path_id, current_unit_id, current_step_id, total_units,
                 completed_units, total_steps, completed_steps, evidence_submitted,
                 total_time_minutes, overall_progress, last_activity_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(user_id, path_id) DO UPDATE SET
                current_unit_id = excluded.current_unit_id,
                current_step_id = excluded.current_step_id,
                total_units = excluded.total_units,
                completed_units = excluded.completed_units,
                total_steps = excluded.total_steps,
                completed_steps = excluded.completed_steps,
                evidence_submitted = excluded.evidence_submitted,
                total_time_minutes = excluded.total_time_minutes,
                overall_progress = excluded.overall_progress,
                last_activity_at = excluded.last_activity_at",
            params![
                progress.user_id,
                progress.path_id.0,
                progress.current_unit_id.map(|u| u.0),
                progress.current_step_id.map(|s| s.0),
                progress.total_units,
                progress.completed_units,
                progress.total_steps,
                progress.completed_steps,
                progress.evidence_submitted,
                progress.total_time_minutes,
                progress.overall_progress,
                progress.last_activity_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }
}

const SESSION_COLUMNS: &str = "id, user_id, skill_id, kind, state, created_at, expires_at, \
                               started_at, completed_at, confidence_before, confidence_after, score";

impl SessionStore for Database {
    fn session(&self, id: SessionId) -> Result<Option<Session>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare(&format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?"))?;
        let mut rows = stmt.query([id.0])?;
        match rows.next()? {
            Some(row) => Ok(Some(session_from_row(row)?)),
            None => Ok(None),
        }
    }

    fn open_session_for(&self, user_id: i64, skill_id: SkillId) -> Result<Option<Session>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions
             WHERE user_id = ? AND skill_id = ? AND state IN ('PROPOSED', 'ACTIVE')
             ORDER BY id LIMIT 1"
        ))?;
        let mut rows = stmt.query(params![user_id, skill_id.0])?;
        match rows.next()? {
            Some(row) => Ok(Some(session_from_row(row)?)),
            None => Ok(None),
        }
    }

    fn non_terminal_sessions(&self) -> Result<Vec<Session>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions
             WHERE state IN ('PROPOSED', 'ACTIVE') ORDER BY id"
        ))?;
        let rows = stmt.query_map([], session_from_row)?;
        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?);
        }
        Ok(sessions)
    }

    fn insert_session(&self, session: &Session) -> Result<SessionId> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sessions
                (user_id, skill_id, kind, state, created_at, expires_at, started_at,
                 completed_at, confidence_before, confidence_after, score)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                session.user_id,
                session.skill_id.0,
                session.kind.to_string(),
                session.state.to_string(),
                session.created_at.to_rfc3339(),
                session.expires_at.to_rfc3339(),
                session.started_at.map(|t| t.to_rfc3339()),
                session.completed_at.map(|t| t.to_rfc3339()),
                session.confidence_before,
                session.confidence_after,
                session.score,
            ],
        )?;
        Ok(SessionId(conn.last_insert_rowid()))
    }

    fn transition_session(&self, updated: &Session, expected: SessionState) -> Result<bool> {
        // The state guard in the WHERE clause is the compare-and-swap.
        let changed = self.conn.lock().execute(
            "UPDATE sessions SET
                state = ?, started_at = ?, completed_at = ?,
                confidence_after = ?, score = ?
             WHERE id = ? AND state = ?",
            params![
                updated.state.to_string(),
                updated.started_at.map(|t| t.to_rfc3339()),
                updated.completed_at.map(|t| t.to_rfc3339()),
                updated.confidence_after,
                updated.score,
                updated.id.0,
                expected.to_string(),
            ],
        )?;
        Ok(changed > 0)
    }
}

impl DemandWeightSource for Database {
    fn demand_weights(&self) -> Result<HashMap<SkillId, f64>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT skill_id, weight FROM demand_weights")?;
        let rows = stmt.query_map([], |row| {
            Ok((SkillId(row.get(0)?), row.get::<_, f64>(1)?))
        })?;
        let mut weights = HashMap::new();
        for row in rows {
            let (skill_id, weight) = row?;
            weights.insert(skill_id, weight);
        }
        Ok(weights)
    }
}

fn state_from_row(row: &Row<'_>) -> rusqlite::Result<UserSkillState> {
    let status: String = row.get(2)?;
    let stale_at: Option<String> = row.get(4)?;
    let last_evidence_at: Option<String> = row.get(5)?;
    let updated_at: String = row.get(6)?;
    Ok(UserSkillState {
        user_id: row.get(0)?,
        skill_id: SkillId(row.get(1)?),
        status: skill_status(&status).ok_or_else(|| text_err(2, "skill status", &status))?,
        confidence: row.get(3)?,
        stale_at: parse_opt_ts(4, stale_at.as_deref())?,
        last_evidence_at: parse_opt_ts(5, last_evidence_at.as_deref())?,
        updated_at: parse_ts(6, &updated_at)?,
    })
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    let kind: String = row.get(3)?;
    let state: String = row.get(4)?;
    let created_at: String = row.get(5)?;
    let expires_at: String = row.get(6)?;
    let started_at: Option<String> = row.get(7)?;
    let completed_at: Option<String> = row.get(8)?;
    Ok(Session {
        id: SessionId(row.get(0)?),
        user_id: row.get(1)?,
        skill_id: SkillId(row.get(2)?),
        kind: session_kind(&kind).ok_or_else(|| text_err(3, "session kind", &kind))?,
        state: session_state(&state).ok_or_else(|| text_err(4, "session state", &state))?,
        created_at: parse_ts(5, &created_at)?,
        expires_at: parse_ts(6, &expires_at)?,
        started_at: parse_opt_ts(7, started_at.as_deref())?,
        completed_at: parse_opt_ts(8, completed_at.as_deref())?,
        confidence_before: row.get(9)?,
        confidence_after: row.get(10)?,
        score: row.get(11)?,
    })
}

fn skill_status(raw: &str) -> Option<SkillStatus> {
    match raw {
        "LOCKED" => Some(SkillStatus::Locked),
        "AVAILABLE" => Some(SkillStatus::Available),
        "IN_PROGRESS" => Some(SkillStatus::InProgress),
        "PROFICIENT" => Some(SkillStatus::Proficient),
        "STALE" => Some(SkillStatus::Stale),
        _ => None,
    }
}

fn step_status(raw: &str) -> Option<StepStatus> {
    match raw {
        "LOCKED" => Some(StepStatus::Locked),
        "AVAILABLE" => Some(StepStatus::Available),
        "IN_PROGRESS" => Some(StepStatus::InProgress),
        "COMPLETED" => Some(StepStatus::Completed),
        _ => None,
    }
}

fn evidence_kind(raw: &str) -> Option<EvidenceKind> {
    match raw {
        "QUIZ" => Some(EvidenceKind::Quiz),
        "PROJECT" => Some(EvidenceKind::Project),
        "REPO" => Some(EvidenceKind::Repo),
        "CERT" => Some(EvidenceKind::Cert),
        "WORK_SAMPLE" => Some(EvidenceKind::WorkSample),
        _ => None,
    }
}

fn session_kind(raw: &str) -> Option<SessionKind> {
    match raw {
        "PROBE" => Some(SessionKind::Probe),
        "BUILD" => Some(SessionKind::Build),
        "PROVE" => Some(SessionKind::Prove),
        "APPLY" => Some(SessionKind::Apply),
        _ => None,
    }
}

fn session_state(raw: &str) -> Option<SessionState> {
    match raw {
        "PROPOSED" => Some(SessionState::Proposed),
        "ACTIVE" => Some(SessionState::Active),
        "COMPLETED" => Some(SessionState::Completed),
        "EXPIRED" => Some(SessionState::Expired),
        _ => None,
    }
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                Box::new(err),
            )
        })
}

fn parse_opt_ts(idx: usize, raw: Option<&str>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|r| parse_ts(idx, r)).transpose()
}

fn text_err(idx: usize, what: &str, raw: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        format!("unrecognized {what}: {raw}").into(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: i64, name: &str) -> SkillNode {
        SkillNode {
            id: SkillId(id),
            canonical_name: name.to_string(),
            domain: Some("data".to_string()),
            aliases: vec![format!("{name}-alias")],
            decay_half_life_days: None,
        }
    }

    #[test]
    fn test_graph_round_trip() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_skill_node(&node(1, "sql")).unwrap();
        db.upsert_skill_node(&node(2, "etl")).unwrap();
        db.insert_prereq_edge(&PrereqEdge {
            from: SkillId(1),
            to: SkillId(2),
        })
        .unwrap();

        let nodes = db.load_nodes().unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].canonical_name, "sql");
        assert_eq!(nodes[0].aliases, vec!["sql-alias".to_string()]);

        let edges = db.load_edges().unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].from, SkillId(1));
    }

    #[test]
    fn test_state_upsert_round_trip() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_skill_node(&node(1, "sql")).unwrap();

        let now = Utc::now();
        let state = UserSkillState {
            user_id: 7,
            skill_id: SkillId(1),
            status: SkillStatus::Proficient,
            confidence: 0.82,
            stale_at: Some(now),
            last_evidence_at: Some(now),
            updated_at: now,
        };
        db.save_states(7, std::slice::from_ref(&state)).unwrap();

        let loaded = db.states_for_user(7).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].status, SkillStatus::Proficient);
        assert!((loaded[0].confidence - 0.82).abs() < 1e-9);

        // second save overwrites in place
        let demoted = UserSkillState {
            status: SkillStatus::Stale,
            ..state
        };
        db.save_states(7, &[demoted]).unwrap();
        let loaded = db.states_for_user(7).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].status, SkillStatus::Stale);
    }

    #[test]
    fn test_evidence_links_preserved() {
        let db = Database::open_in_memory().unwrap();
        let item = Evidence {
            id: 0,
            user_id: 7,
            kind: EvidenceKind::Cert,
            support: 0.9,
            created_at: Utc::now(),
            skill_ids: vec![SkillId(1), SkillId(2)],
            source_uri: Some("https://example.com/cert/1".to_string()),
        };
        let id = db.append_evidence(&item).unwrap();
        assert!(id > 0);

        let loaded = db.evidence_for_user(7).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].kind, EvidenceKind::Cert);
        assert_eq!(loaded[0].skill_ids, vec![SkillId(1), SkillId(2)]);
        assert!(db.evidence_for_user(8).unwrap().is_empty());
    }

    #[test]
    fn test_path_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let path = PathState {
            path_id: PathId(1),
            user_id: 7,
            units: vec![PathUnit::new(UnitId(1), PathId(1), 1, "Foundations")],
            steps: vec![
                PathStep::new(StepId(1), UnitId(1), SkillId(10), 1, "Select basics"),
                PathStep::new(StepId(2), UnitId(1), SkillId(11), 2, "Joins"),
            ],
        };
        db.save_path(&path).unwrap();

        let loaded = db.load_path(7, PathId(1)).unwrap().unwrap();
        assert_eq!(loaded, path);
        assert!(db.load_path(7, PathId(2)).unwrap().is_none());
        assert!(db.load_path(8, PathId(1)).unwrap().is_none());
    }

    #[test]
    fn test_progress_upsert() {
        let db = Database::open_in_memory().unwrap();
        let mut progress = PathProgress {
            path_id: PathId(1),
            user_id: 7,
            current_unit_id: Some(UnitId(1)),
            current_step_id: Some(StepId(2)),
            total_units: 2,
            completed_units: 0,
            total_steps: 4,
            completed_steps: 1,
            evidence_submitted: 3,
            total_time_minutes: 45,
            overall_progress: 25.0,
            last_activity_at: Some(Utc::now()),
        };
        db.save_progress(&progress).unwrap();
        progress.completed_steps = 2;
        progress.overall_progress = 50.0;
        db.save_progress(&progress).unwrap();

        let loaded = db.load_progress(7, PathId(1)).unwrap().unwrap();
        assert_eq!(loaded.completed_steps, 2);
        assert!((loaded.overall_progress - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_session_cas_guard() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let session = Session {
            id: SessionId(0),
            user_id: 7,
            skill_id: SkillId(1),
            kind: SessionKind::Probe,
            state: SessionState::Proposed,
            created_at: now,
            expires_at: now,
            started_at: None,
            completed_at: None,
            confidence_before: 0.2,
            confidence_after: None,
            score: None,
        };
        let id = db.insert_session(&session).unwrap();

        let mut updated = db.session(id).unwrap().unwrap();
        updated.state = SessionState::Active;
        updated.started_at = Some(now);
        assert!(db
            .transition_session(&updated, SessionState::Proposed)
            .unwrap());
        // guard now fails: the row is no longer PROPOSED
        assert!(!db
            .transition_session(&updated, SessionState::Proposed)
            .unwrap());

        let loaded = db.session(id).unwrap().unwrap();
        assert_eq!(loaded.state, SessionState::Active);
        assert!(loaded.started_at.is_some());
    }

    #[test]
    fn test_open_session_ignores_terminal() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let session = Session {
            id: SessionId(0),
            user_id: 7,
            skill_id: SkillId(1),
            kind: SessionKind::Build,
            state: SessionState::Proposed,
            created_at: now,
            expires_at: now,
            started_at: None,
            completed_at: None,
            confidence_before: 0.0,
            confidence_after: None,
            score: None,
        };
        let id = db.insert_session(&session).unwrap();
        assert!(db.open_session_for(7, SkillId(1)).unwrap().is_some());

        let mut expired = db.session(id).unwrap().unwrap();
        expired.state = SessionState::Expired;
        db.transition_session(&expired, SessionState::Proposed)
            .unwrap();
        assert!(db.open_session_for(7, SkillId(1)).unwrap().is_none());
        assert!(db.non_terminal_sessions().unwrap().is_empty());
    }

    #[test]
    fn test_demand_weights_round_trip() {
        let db = Database::open_in_memory().unwrap();
        db.set_demand_weight(SkillId(1), 0.8).unwrap();
        db.set_demand_weight(SkillId(1), 0.9).unwrap();
        db.set_demand_weight(SkillId(2), 0.3).unwrap();

        let weights = db.demand_weights().unwrap();
        assert_eq!(weights.len(), 2);
        assert!((weights[&SkillId(1)] - 0.9).abs() < f64::EPSILON);
    }
}
