//! SQLite store integration: file-backed persistence across reopen and
//! the engine running end-to-end over `Database`.

use std::sync::Arc;

use chrono::Utc;
use tempfile::TempDir;

use skillgraph::config::EngineConfig;
use skillgraph::engine::Engine;
use skillgraph::graph::{PrereqEdge, SkillId, SkillNode};
use skillgraph::session::{SessionKind, SessionState};
use skillgraph::state::{Evidence, EvidenceKind, SkillStatus};
use skillgraph::store::{Database, GraphSource, StateStore};

mod common;

const USER: i64 = 7;

fn node(id: i64, name: &str) -> SkillNode {
    SkillNode {
        id: SkillId(id),
        canonical_name: name.to_string(),
        domain: None,
        aliases: Vec::new(),
        decay_half_life_days: None,
    }
}

fn seed_chain(db: &Database) {
    db.upsert_skill_node(&node(1, "sql")).unwrap();
    db.upsert_skill_node(&node(2, "etl")).unwrap();
    db.insert_prereq_edge(&PrereqEdge {
        from: SkillId(1),
        to: SkillId(2),
    })
    .unwrap();
}

#[test]
fn test_data_survives_reopen() {
    common::init_tracing();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("skillgraph.db");
    let now = Utc::now();

    {
        let db = Database::open(&path).unwrap();
        seed_chain(&db);
        db.append_evidence(&Evidence {
            id: 0,
            user_id: USER,
            kind: EvidenceKind::Quiz,
            support: 0.9,
            created_at: now,
            skill_ids: vec![SkillId(1)],
            source_uri: None,
        })
        .unwrap();
    }

    let db = Database::open(&path).unwrap();
    assert_eq!(db.load_nodes().unwrap().len(), 2);
    assert_eq!(db.load_edges().unwrap().len(), 1);
    let evidence = db.evidence_for_user(USER).unwrap();
    assert_eq!(evidence.len(), 1);
    assert_eq!(evidence[0].skill_ids, vec![SkillId(1)]);
}

#[test]
fn test_open_creates_parent_directories() {
    common::init_tracing();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("deeper").join("skillgraph.db");
    let db = Database::open(&path).unwrap();
    assert!(path.exists());
    assert!(db.schema_version() >= 1);
}

#[test]
fn test_engine_over_sqlite_end_to_end() {
    common::init_tracing();
    let dir = TempDir::new().unwrap();
    let db = Arc::new(Database::open(dir.path().join("skillgraph.db")).unwrap());
    seed_chain(&db);
    let engine = Engine::new(Arc::clone(&db), EngineConfig::default()).unwrap();
    let now = Utc::now();

    let report = engine
        .submit_evidence(
            &Evidence {
                id: 0,
                user_id: USER,
                kind: EvidenceKind::Quiz,
                support: 0.85,
                created_at: now,
                skill_ids: vec![SkillId(1)],
                source_uri: None,
            },
            now,
        )
        .unwrap();
    assert_eq!(report.states[&SkillId(1)].status, SkillStatus::Proficient);
    assert_eq!(report.states[&SkillId(2)].status, SkillStatus::Available);

    // the rows were persisted, not just derived
    let stored = db.states_for_user(USER).unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].status, SkillStatus::Proficient);

    let session = engine
        .propose_session(USER, SkillId(2), SessionKind::Probe, now)
        .unwrap();
    let active = engine.activate_session(session.id, now).unwrap();
    assert_eq!(active.state, SessionState::Active);
    let done = engine.complete_session(session.id, 1.0, now).unwrap();
    assert_eq!(done.state, SessionState::Completed);

    let report = engine.skill_states(USER, now).unwrap();
    assert_eq!(report.states[&SkillId(2)].status, SkillStatus::Proficient);
}
