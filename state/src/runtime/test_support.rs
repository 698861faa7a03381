use std::sync::Arc;

use chrono::DateTime;
use chrono::Utc;
use deespec_protocol::Epic;
use deespec_protocol::EpicId;
use deespec_protocol::Pbi;
use deespec_protocol::PbiId;
use deespec_protocol::Sbi;
use deespec_protocol::SbiId;
use sqlx::SqlitePool;
use tempfile::TempDir;

use crate::model::LockFamily;
use crate::model::to_rfc3339;
use crate::runtime::StateStore;

pub(crate) async fn open_test_store() -> (Arc<StateStore>, TempDir) {
    let dir = TempDir::new().expect("temp dir");
    let store = StateStore::init(&dir.path().join("deespec.db"))
        .await
        .expect("init store");
    (store, dir)
}

pub(crate) async fn open_test_pool() -> (SqlitePool, TempDir) {
    let (store, dir) = open_test_store().await;
    (store.pool().clone(), dir)
}

pub(crate) fn fixed_now() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(1_700_000_000, 0).expect("timestamp")
}

pub(crate) fn test_sbi(id: &str, sequence: i64) -> Sbi {
    let mut sbi = Sbi::new(
        SbiId::from_string(id),
        Some(PbiId::from_string("pbi-test")),
        format!("task {id}"),
        fixed_now(),
    );
    sbi.sequence = sequence;
    sbi
}

pub(crate) fn test_epic(id: &str) -> Epic {
    Epic {
        id: EpicId::from_string(id),
        title: format!("epic {id}"),
        description: String::new(),
        status: "PENDING".to_string(),
        story_points: Some(8),
        priority: 0,
        labels: Vec::new(),
        assigned_agent: None,
        created_at: fixed_now(),
        updated_at: fixed_now(),
        pbi_ids: Vec::new(),
    }
}

pub(crate) fn test_pbi(id: &str) -> Pbi {
    Pbi {
        id: PbiId::from_string(id),
        parent_epic_id: None,
        title: format!("pbi {id}"),
        description: String::new(),
        status: "PENDING".to_string(),
        story_points: Some(3),
        acceptance_criteria: Vec::new(),
        created_at: fixed_now(),
        updated_at: fixed_now(),
        sbi_ids: Vec::new(),
    }
}

/// Plant a lock row directly, bypassing the acquire path, to simulate a
/// foreign or crashed owner.
pub(crate) async fn insert_lock_row(
    store: &StateStore,
    family: LockFamily,
    lock_id: &str,
    pid: i64,
    hostname: &str,
    expires_at: DateTime<Utc>,
) {
    let now = to_rfc3339(Utc::now());
    sqlx::query(&format!(
        r#"
INSERT INTO {} (lock_id, pid, hostname, acquired_at, expires_at, heartbeat_at, lock_type)
VALUES (?, ?, ?, ?, ?, ?, 'run')
        "#,
        family.table()
    ))
    .bind(lock_id)
    .bind(pid)
    .bind(hostname)
    .bind(now.as_str())
    .bind(to_rfc3339(expires_at))
    .bind(now.as_str())
    .execute(store.pool())
    .await
    .expect("insert lock row");
}
