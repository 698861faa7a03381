use chrono::Utc;
use deespec_protocol::SbiId;
use sqlx::SqliteConnection;

use super::StateStore;
use crate::model::to_rfc3339;

impl StateStore {
    /// Ids this SBI depends on. Every one must be DONE before the scheduler
    /// may lease the SBI.
    pub async fn get_dependencies(&self, sbi_id: &SbiId) -> anyhow::Result<Vec<SbiId>> {
        let ids: Vec<String> = sqlx::query_scalar(
            r#"
SELECT depends_on_sbi_id FROM sbi_dependencies
WHERE sbi_id = ?
ORDER BY depends_on_sbi_id ASC
            "#,
        )
        .bind(sbi_id.as_str())
        .fetch_all(self.pool())
        .await?;
        Ok(ids.into_iter().map(SbiId::from_string).collect())
    }

    /// Ids blocked on this SBI.
    pub async fn get_dependents(&self, sbi_id: &SbiId) -> anyhow::Result<Vec<SbiId>> {
        let ids: Vec<String> = sqlx::query_scalar(
            r#"
SELECT sbi_id FROM sbi_dependencies
WHERE depends_on_sbi_id = ?
ORDER BY sbi_id ASC
            "#,
        )
        .bind(sbi_id.as_str())
        .fetch_all(self.pool())
        .await?;
        Ok(ids.into_iter().map(SbiId::from_string).collect())
    }

    /// Replace the full dependency set of `sbi_id`.
    pub async fn save_dependencies(
        &self,
        sbi_id: &SbiId,
        depends_on: &[SbiId],
    ) -> anyhow::Result<()> {
        let mut tx = self.begin().await?;
        save_dependencies(&mut tx, sbi_id, depends_on).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Number of predecessors of `sbi_id` that have not reached DONE. Zero
    /// means the pick gate is open.
    pub async fn unsatisfied_dependency_count(&self, sbi_id: &SbiId) -> anyhow::Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
SELECT COUNT(*)
FROM sbi_dependencies d
LEFT JOIN sbis s ON s.id = d.depends_on_sbi_id
WHERE d.sbi_id = ?
  AND (s.id IS NULL OR s.status != 'DONE')
            "#,
        )
        .bind(sbi_id.as_str())
        .fetch_one(self.pool())
        .await?;
        Ok(count)
    }
}

pub async fn save_dependencies(
    conn: &mut SqliteConnection,
    sbi_id: &SbiId,
    depends_on: &[SbiId],
) -> anyhow::Result<()> {
    sqlx::query("DELETE FROM sbi_dependencies WHERE sbi_id = ?")
        .bind(sbi_id.as_str())
        .execute(&mut *conn)
        .await?;
    let now = to_rfc3339(Utc::now());
    for dep in depends_on {
        sqlx::query(
            "INSERT INTO sbi_dependencies (sbi_id, depends_on_sbi_id, created_at) VALUES (?, ?, ?)",
        )
        .bind(sbi_id.as_str())
        .bind(dep.as_str())
        .bind(now.as_str())
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}
