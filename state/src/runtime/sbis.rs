use chrono::Utc;
use deespec_protocol::Sbi;
use deespec_protocol::SbiId;
use deespec_protocol::SbiStatus;
use sqlx::QueryBuilder;
use sqlx::Sqlite;
use sqlx::SqliteConnection;

use super::StateStore;
use crate::model::SbiFilter;
use crate::model::SbiRow;
use crate::model::encode_list;
use crate::model::to_rfc3339;

const SBI_COLUMNS: &str = r#"
    id,
    parent_pbi_id,
    title,
    description,
    status,
    estimated_hours,
    priority,
    sequence,
    labels,
    file_paths,
    registered_at,
    started_at,
    completed_at,
    current_turn,
    current_attempt,
    max_turns,
    max_attempts,
    last_error,
    artifact_paths,
    created_at,
    updated_at
"#;

impl StateStore {
    pub async fn find_sbi(&self, id: &SbiId) -> anyhow::Result<Option<Sbi>> {
        let mut conn = self.pool().acquire().await?;
        find_sbi(&mut conn, id).await
    }

    /// Upsert. `updated_at` is stamped here; every other field is written as
    /// given, so callers own the turn/attempt bookkeeping.
    pub async fn save_sbi(&self, sbi: &Sbi) -> anyhow::Result<()> {
        let mut conn = self.pool().acquire().await?;
        save_sbi(&mut conn, sbi).await
    }

    pub async fn delete_sbi(&self, id: &SbiId) -> anyhow::Result<()> {
        let mut conn = self.pool().acquire().await?;
        sqlx::query("DELETE FROM sbi_dependencies WHERE sbi_id = ? OR depends_on_sbi_id = ?")
            .bind(id.as_str())
            .bind(id.as_str())
            .execute(&mut *conn)
            .await?;
        sqlx::query("DELETE FROM pbi_sbis WHERE sbi_id = ?")
            .bind(id.as_str())
            .execute(&mut *conn)
            .await?;
        sqlx::query("DELETE FROM sbis WHERE id = ?")
            .bind(id.as_str())
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    pub async fn list_sbis(&self, filter: &SbiFilter) -> anyhow::Result<Vec<Sbi>> {
        let mut conn = self.pool().acquire().await?;
        list_sbis(&mut conn, filter).await
    }

    pub async fn find_sbis_by_pbi(&self, pbi_id: &str) -> anyhow::Result<Vec<Sbi>> {
        self.list_sbis(&SbiFilter {
            statuses: None,
            parent_pbi_id: Some(pbi_id.to_string()),
            limit: None,
        })
        .await
    }

    /// `MAX(sequence) + 1`. Safe under the store's single-writer commit
    /// semantics; callers wanting assignment + insert atomicity run both on
    /// one ambient transaction.
    pub async fn next_sequence(&self) -> anyhow::Result<i64> {
        let mut conn = self.pool().acquire().await?;
        next_sequence(&mut conn).await
    }

    /// Operator escape hatch: put an SBI back to `to_status` with fresh
    /// counters and no recorded error.
    pub async fn reset_sbi_state(&self, id: &SbiId, to_status: SbiStatus) -> anyhow::Result<()> {
        sqlx::query(
            r#"
UPDATE sbis
SET status = ?,
    current_turn = 1,
    current_attempt = 1,
    last_error = NULL,
    started_at = NULL,
    completed_at = NULL,
    updated_at = ?
WHERE id = ?
            "#,
        )
        .bind(to_status.as_str())
        .bind(to_rfc3339(Utc::now()))
        .bind(id.as_str())
        .execute(self.pool())
        .await?;
        Ok(())
    }
}

pub async fn find_sbi(conn: &mut SqliteConnection, id: &SbiId) -> anyhow::Result<Option<Sbi>> {
    let row = sqlx::query_as::<_, SbiRow>(&format!("SELECT {SBI_COLUMNS} FROM sbis WHERE id = ?"))
        .bind(id.as_str())
        .fetch_optional(&mut *conn)
        .await?;
    row.map(Sbi::try_from).transpose()
}

pub async fn save_sbi(conn: &mut SqliteConnection, sbi: &Sbi) -> anyhow::Result<()> {
    let labels = encode_list(&sbi.labels)?;
    let file_paths = encode_list(&sbi.file_paths)?;
    let artifact_paths = encode_list(&sbi.artifact_paths)?;
    sqlx::query(
        r#"
INSERT INTO sbis (
    id,
    parent_pbi_id,
    title,
    description,
    status,
    estimated_hours,
    priority,
    sequence,
    labels,
    file_paths,
    registered_at,
    started_at,
    completed_at,
    current_turn,
    current_attempt,
    max_turns,
    max_attempts,
    last_error,
    artifact_paths,
    created_at,
    updated_at
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
ON CONFLICT(id) DO UPDATE SET
    parent_pbi_id = excluded.parent_pbi_id,
    title = excluded.title,
    description = excluded.description,
    status = excluded.status,
    estimated_hours = excluded.estimated_hours,
    priority = excluded.priority,
    sequence = excluded.sequence,
    labels = excluded.labels,
    file_paths = excluded.file_paths,
    registered_at = excluded.registered_at,
    started_at = excluded.started_at,
    completed_at = excluded.completed_at,
    current_turn = excluded.current_turn,
    current_attempt = excluded.current_attempt,
    max_turns = excluded.max_turns,
    max_attempts = excluded.max_attempts,
    last_error = excluded.last_error,
    artifact_paths = excluded.artifact_paths,
    updated_at = excluded.updated_at
        "#,
    )
    .bind(sbi.id.as_str())
    .bind(sbi.parent_pbi_id.as_ref().map(|id| id.as_str().to_string()))
    .bind(sbi.title.as_str())
    .bind(sbi.description.as_str())
    .bind(sbi.status.as_str())
    .bind(sbi.estimated_hours)
    .bind(sbi.priority)
    .bind(sbi.sequence)
    .bind(labels)
    .bind(file_paths)
    .bind(to_rfc3339(sbi.registered_at))
    .bind(sbi.started_at.map(to_rfc3339))
    .bind(sbi.completed_at.map(to_rfc3339))
    .bind(sbi.current_turn)
    .bind(sbi.current_attempt)
    .bind(sbi.max_turns)
    .bind(sbi.max_attempts)
    .bind(sbi.last_error.as_deref())
    .bind(artifact_paths)
    .bind(to_rfc3339(sbi.created_at))
    .bind(to_rfc3339(Utc::now()))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn list_sbis(
    conn: &mut SqliteConnection,
    filter: &SbiFilter,
) -> anyhow::Result<Vec<Sbi>> {
    let mut builder =
        QueryBuilder::<Sqlite>::new(format!("SELECT {SBI_COLUMNS} FROM sbis WHERE 1 = 1"));
    if let Some(statuses) = filter.statuses.as_ref() {
        builder.push(" AND status IN (");
        let mut separated = builder.separated(", ");
        for status in statuses {
            separated.push_bind(status.as_str());
        }
        builder.push(")");
    }
    if let Some(parent) = filter.parent_pbi_id.as_deref() {
        builder.push(" AND parent_pbi_id = ");
        builder.push_bind(parent);
    }
    builder.push(" ORDER BY priority DESC, registered_at ASC, sequence ASC");
    if let Some(limit) = filter.limit {
        builder.push(" LIMIT ");
        builder.push_bind(limit);
    }
    let rows = builder
        .build_query_as::<SbiRow>()
        .fetch_all(&mut *conn)
        .await?;
    rows.into_iter().map(Sbi::try_from).collect()
}

pub async fn next_sequence(conn: &mut SqliteConnection) -> anyhow::Result<i64> {
    let max: Option<i64> = sqlx::query_scalar("SELECT MAX(sequence) FROM sbis")
        .fetch_one(&mut *conn)
        .await?;
    Ok(max.unwrap_or(0) + 1)
}

/// Append an SBI to its parent PBI's positional child list.
pub async fn attach_sbi_to_pbi(
    conn: &mut SqliteConnection,
    pbi_id: &str,
    sbi_id: &SbiId,
) -> anyhow::Result<()> {
    let max: Option<i64> =
        sqlx::query_scalar("SELECT MAX(position) FROM pbi_sbis WHERE pbi_id = ?")
            .bind(pbi_id)
            .fetch_one(&mut *conn)
            .await?;
    sqlx::query("INSERT OR IGNORE INTO pbi_sbis (pbi_id, sbi_id, position) VALUES (?, ?, ?)")
        .bind(pbi_id)
        .bind(sbi_id.as_str())
        .bind(max.unwrap_or(0) + 1)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::test_support::open_test_store;
    use crate::runtime::test_support::test_sbi;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn save_then_find_round_trips_every_field() {
        let (store, _dir) = open_test_store().await;
        let mut sbi = test_sbi("sbi-rt", 1);
        sbi.labels = vec!["backend".to_string()];
        sbi.file_paths = vec!["specs/a.md".to_string()];
        sbi.artifact_paths = vec![".deespec/reports/sbi/sbi-rt/implement_1.md".to_string()];
        sbi.estimated_hours = Some(2.5);
        sbi.last_error = Some("boom".to_string());
        store.save_sbi(&sbi).await.expect("save");

        let loaded = store
            .find_sbi(&sbi.id)
            .await
            .expect("find")
            .expect("present");
        // updated_at is stamped on save; everything else must survive.
        let mut expected = sbi.clone();
        expected.updated_at = loaded.updated_at;
        assert_eq!(loaded, expected);
    }

    #[tokio::test]
    async fn find_missing_returns_none() {
        let (store, _dir) = open_test_store().await;
        let found = store
            .find_sbi(&SbiId::from_string("sbi-missing"))
            .await
            .expect("find");
        assert_eq!(found, None);
    }

    #[tokio::test]
    async fn list_applies_ready_queue_order() {
        let (store, _dir) = open_test_store().await;
        let mut low = test_sbi("sbi-low", 1);
        low.priority = 0;
        let mut high = test_sbi("sbi-high", 2);
        high.priority = 5;
        let mut tie_later = test_sbi("sbi-tie-later", 4);
        tie_later.priority = 5;
        tie_later.registered_at = high.registered_at + chrono::Duration::seconds(10);
        for sbi in [&low, &high, &tie_later] {
            store.save_sbi(sbi).await.expect("save");
        }

        let listed = store
            .list_sbis(&SbiFilter::default())
            .await
            .expect("list");
        let ids: Vec<&str> = listed.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["sbi-high", "sbi-tie-later", "sbi-low"]);
    }

    #[tokio::test]
    async fn next_sequence_is_strictly_increasing() {
        let (store, _dir) = open_test_store().await;
        assert_eq!(store.next_sequence().await.expect("first"), 1);
        let mut sbi = test_sbi("sbi-seq", 7);
        sbi.sequence = 7;
        store.save_sbi(&sbi).await.expect("save");
        assert_eq!(store.next_sequence().await.expect("after"), 8);
    }

    #[tokio::test]
    async fn in_transaction_rolls_back_on_error() {
        let (store, _dir) = open_test_store().await;
        let sbi = test_sbi("sbi-tx", 1);
        let result: anyhow::Result<()> = store
            .in_transaction(async |conn| {
                save_sbi(conn, &sbi).await?;
                Err(anyhow::anyhow!("abort"))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(store.find_sbi(&sbi.id).await.expect("find"), None);
    }

    #[tokio::test]
    async fn reset_state_clears_counters_and_error() {
        let (store, _dir) = open_test_store().await;
        let mut sbi = test_sbi("sbi-reset", 1);
        sbi.status = SbiStatus::Reviewing;
        sbi.current_turn = 5;
        sbi.current_attempt = 3;
        sbi.last_error = Some("stuck".to_string());
        sbi.started_at = Some(sbi.registered_at);
        store.save_sbi(&sbi).await.expect("save");

        store
            .reset_sbi_state(&sbi.id, SbiStatus::Pending)
            .await
            .expect("reset");
        let loaded = store
            .find_sbi(&sbi.id)
            .await
            .expect("find")
            .expect("present");
        assert_eq!(loaded.status, SbiStatus::Pending);
        assert_eq!(loaded.current_turn, 1);
        assert_eq!(loaded.current_attempt, 1);
        assert_eq!(loaded.last_error, None);
        assert_eq!(loaded.started_at, None);
    }
}
