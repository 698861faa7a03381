use chrono::Utc;
use deespec_protocol::Pbi;
use deespec_protocol::PbiId;
use deespec_protocol::SbiId;

use super::StateStore;
use crate::model::PbiRow;
use crate::model::encode_list;
use crate::model::to_rfc3339;

const PBI_COLUMNS: &str = r#"
    id,
    parent_epic_id,
    title,
    description,
    status,
    story_points,
    acceptance_criteria,
    created_at,
    updated_at
"#;

impl StateStore {
    pub async fn find_pbi(&self, id: &PbiId) -> anyhow::Result<Option<Pbi>> {
        let row =
            sqlx::query_as::<_, PbiRow>(&format!("SELECT {PBI_COLUMNS} FROM pbis WHERE id = ?"))
                .bind(id.as_str())
                .fetch_optional(self.pool())
                .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let sbi_ids = self.pbi_child_ids(id.as_str()).await?;
        Ok(Some(row.into_pbi(sbi_ids)?))
    }

    pub async fn save_pbi(&self, pbi: &Pbi) -> anyhow::Result<()> {
        let acceptance = encode_list(&pbi.acceptance_criteria)?;
        let mut tx = self.begin().await?;
        sqlx::query(
            r#"
INSERT INTO pbis (
    id, parent_epic_id, title, description, status, story_points, acceptance_criteria,
    created_at, updated_at
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
ON CONFLICT(id) DO UPDATE SET
    parent_epic_id = excluded.parent_epic_id,
    title = excluded.title,
    description = excluded.description,
    status = excluded.status,
    story_points = excluded.story_points,
    acceptance_criteria = excluded.acceptance_criteria,
    updated_at = excluded.updated_at
            "#,
        )
        .bind(pbi.id.as_str())
        .bind(pbi.parent_epic_id.as_ref().map(|id| id.as_str().to_string()))
        .bind(pbi.title.as_str())
        .bind(pbi.description.as_str())
        .bind(pbi.status.as_str())
        .bind(pbi.story_points)
        .bind(acceptance)
        .bind(to_rfc3339(pbi.created_at))
        .bind(to_rfc3339(Utc::now()))
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM pbi_sbis WHERE pbi_id = ?")
            .bind(pbi.id.as_str())
            .execute(&mut *tx)
            .await?;
        for (position, sbi_id) in pbi.sbi_ids.iter().enumerate() {
            sqlx::query("INSERT INTO pbi_sbis (pbi_id, sbi_id, position) VALUES (?, ?, ?)")
                .bind(pbi.id.as_str())
                .bind(sbi_id.as_str())
                .bind(position as i64 + 1)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Deletion is forbidden while children exist.
    pub async fn delete_pbi(&self, id: &PbiId) -> anyhow::Result<()> {
        let children: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pbi_sbis WHERE pbi_id = ?")
            .bind(id.as_str())
            .fetch_one(self.pool())
            .await?;
        if children > 0 {
            return Err(anyhow::anyhow!(
                "cannot delete pbi {id}: {children} child sbi(s) still attached"
            ));
        }
        let mut tx = self.begin().await?;
        sqlx::query("DELETE FROM epic_pbis WHERE pbi_id = ?")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM pbis WHERE id = ?")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn find_pbis_by_epic(&self, epic_id: &str) -> anyhow::Result<Vec<Pbi>> {
        let rows = sqlx::query_as::<_, PbiRow>(&format!(
            r#"
SELECT {PBI_COLUMNS} FROM pbis
WHERE id IN (SELECT pbi_id FROM epic_pbis WHERE epic_id = ?)
ORDER BY (SELECT position FROM epic_pbis WHERE epic_id = ? AND pbi_id = pbis.id) ASC
            "#
        ))
        .bind(epic_id)
        .bind(epic_id)
        .fetch_all(self.pool())
        .await?;
        let mut pbis = Vec::with_capacity(rows.len());
        for row in rows {
            let sbi_ids = self.pbi_child_ids(row.id.as_str()).await?;
            pbis.push(row.into_pbi(sbi_ids)?);
        }
        Ok(pbis)
    }

    async fn pbi_child_ids(&self, pbi_id: &str) -> anyhow::Result<Vec<SbiId>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT sbi_id FROM pbi_sbis WHERE pbi_id = ? ORDER BY position ASC",
        )
        .bind(pbi_id)
        .fetch_all(self.pool())
        .await?;
        Ok(ids.into_iter().map(SbiId::from_string).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::test_support::open_test_store;
    use crate::runtime::test_support::test_pbi;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn pbi_round_trips_with_acceptance_criteria() {
        let (store, _dir) = open_test_store().await;
        let mut pbi = test_pbi("pbi-1");
        pbi.acceptance_criteria = vec!["compiles".to_string(), "tests pass".to_string()];
        pbi.sbi_ids = vec![SbiId::from_string("sbi-1"), SbiId::from_string("sbi-2")];
        store.save_pbi(&pbi).await.expect("save");

        let loaded = store
            .find_pbi(&pbi.id)
            .await
            .expect("find")
            .expect("present");
        assert_eq!(loaded.acceptance_criteria, pbi.acceptance_criteria);
        assert_eq!(loaded.sbi_ids, pbi.sbi_ids);
    }

    #[tokio::test]
    async fn delete_is_refused_while_children_exist() {
        let (store, _dir) = open_test_store().await;
        let mut pbi = test_pbi("pbi-guard");
        pbi.sbi_ids = vec![SbiId::from_string("sbi-child")];
        store.save_pbi(&pbi).await.expect("save");

        assert!(store.delete_pbi(&pbi.id).await.is_err());

        pbi.sbi_ids.clear();
        store.save_pbi(&pbi).await.expect("clear children");
        store.delete_pbi(&pbi.id).await.expect("delete");
        assert_eq!(store.find_pbi(&pbi.id).await.expect("find"), None);
    }
}
