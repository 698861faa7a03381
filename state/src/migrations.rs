//! Versioned, idempotent schema migrations.
//!
//! Startup applies the initial schema on an empty database and then every
//! numbered migration whose version exceeds the recorded maximum. Each
//! migration runs in its own transaction; a failed statement rolls the whole
//! migration back. Version rows are inserted with `INSERT OR IGNORE`, so
//! re-applying an already-applied migration is a no-op.

use chrono::SecondsFormat;
use chrono::Utc;
use sqlx::SqlitePool;

/// Highest migration version this build knows about.
pub const SCHEMA_VERSION: i64 = 2;

struct Migration {
    version: i64,
    description: &'static str,
    statements: &'static [&'static str],
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "initial schema",
        statements: &[
            r#"
CREATE TABLE IF NOT EXISTS epics (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL,
    story_points INTEGER,
    priority INTEGER NOT NULL DEFAULT 0,
    labels TEXT,
    assigned_agent TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
            "#,
            r#"
CREATE TABLE IF NOT EXISTS pbis (
    id TEXT PRIMARY KEY,
    parent_epic_id TEXT,
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL,
    story_points INTEGER,
    acceptance_criteria TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
            "#,
            r#"
CREATE TABLE IF NOT EXISTS sbis (
    id TEXT PRIMARY KEY,
    parent_pbi_id TEXT,
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL,
    estimated_hours REAL,
    priority INTEGER NOT NULL DEFAULT 0,
    sequence INTEGER NOT NULL,
    labels TEXT,
    file_paths TEXT,
    registered_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    current_turn INTEGER NOT NULL DEFAULT 1,
    current_attempt INTEGER NOT NULL DEFAULT 1,
    max_turns INTEGER NOT NULL DEFAULT 8,
    max_attempts INTEGER NOT NULL DEFAULT 3,
    last_error TEXT,
    artifact_paths TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
            "#,
            r#"
CREATE TABLE IF NOT EXISTS epic_pbis (
    epic_id TEXT NOT NULL,
    pbi_id TEXT NOT NULL,
    position INTEGER NOT NULL,
    PRIMARY KEY (epic_id, pbi_id)
)
            "#,
            r#"
CREATE TABLE IF NOT EXISTS pbi_sbis (
    pbi_id TEXT NOT NULL,
    sbi_id TEXT NOT NULL,
    position INTEGER NOT NULL,
    PRIMARY KEY (pbi_id, sbi_id)
)
            "#,
            r#"
CREATE TABLE IF NOT EXISTS sbi_dependencies (
    sbi_id TEXT NOT NULL,
    depends_on_sbi_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (sbi_id, depends_on_sbi_id)
)
            "#,
            r#"
CREATE TABLE IF NOT EXISTS run_locks (
    lock_id TEXT PRIMARY KEY,
    pid INTEGER NOT NULL,
    hostname TEXT NOT NULL,
    acquired_at TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    heartbeat_at TEXT NOT NULL,
    lock_type TEXT NOT NULL
)
            "#,
            r#"
CREATE TABLE IF NOT EXISTS state_locks (
    lock_id TEXT PRIMARY KEY,
    pid INTEGER NOT NULL,
    hostname TEXT NOT NULL,
    acquired_at TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    heartbeat_at TEXT NOT NULL,
    lock_type TEXT NOT NULL
)
            "#,
        ],
    },
    Migration {
        version: 2,
        description: "ready-queue and dependency indexes",
        statements: &[
            r#"
CREATE INDEX IF NOT EXISTS idx_sbis_ready
ON sbis (status, priority DESC, registered_at ASC, sequence ASC)
            "#,
            r#"
CREATE INDEX IF NOT EXISTS idx_sbi_dependencies_depends_on
ON sbi_dependencies (depends_on_sbi_id)
            "#,
            r#"
CREATE INDEX IF NOT EXISTS idx_pbi_sbis_sbi
ON pbi_sbis (sbi_id)
            "#,
        ],
    },
];

pub(crate) async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL,
    description TEXT NOT NULL
)
        "#,
    )
    .execute(pool)
    .await?;

    let applied: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_migrations")
        .fetch_one(pool)
        .await?;
    let applied = applied.unwrap_or(0);

    for migration in MIGRATIONS {
        if migration.version <= applied {
            continue;
        }
        let mut tx = pool.begin().await?;
        for statement in migration.statements {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        sqlx::query(
            "INSERT OR IGNORE INTO schema_migrations (version, applied_at, description) VALUES (?, ?, ?)",
        )
        .bind(migration.version)
        .bind(Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true))
        .bind(migration.description)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        tracing::info!(
            version = migration.version,
            description = migration.description,
            "applied schema migration"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::test_support::open_test_pool;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn migrations_are_idempotent_by_version() {
        let (pool, _dir) = open_test_pool().await;

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_migrations")
            .fetch_one(&pool)
            .await
            .expect("count");
        assert_eq!(count, MIGRATIONS.len() as i64);

        // Second run must not add rows or fail on existing objects.
        run_migrations(&pool).await.expect("re-run");
        let count_again: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_migrations")
            .fetch_one(&pool)
            .await
            .expect("count");
        assert_eq!(count_again, count);
    }

    #[tokio::test]
    async fn max_recorded_version_matches_schema_version() {
        let (pool, _dir) = open_test_pool().await;
        let max: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_migrations")
            .fetch_one(&pool)
            .await
            .expect("max");
        assert_eq!(max, Some(SCHEMA_VERSION));
    }
}
