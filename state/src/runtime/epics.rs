use chrono::Utc;
use deespec_protocol::Epic;
use deespec_protocol::EpicId;
use deespec_protocol::PbiId;

use super::StateStore;
use crate::model::EpicRow;
use crate::model::encode_list;
use crate::model::to_rfc3339;

const EPIC_COLUMNS: &str = r#"
    id,
    title,
    description,
    status,
    story_points,
    priority,
    labels,
    assigned_agent,
    created_at,
    updated_at
"#;

impl StateStore {
    pub async fn find_epic(&self, id: &EpicId) -> anyhow::Result<Option<Epic>> {
        let row =
            sqlx::query_as::<_, EpicRow>(&format!("SELECT {EPIC_COLUMNS} FROM epics WHERE id = ?"))
                .bind(id.as_str())
                .fetch_optional(self.pool())
                .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let pbi_ids: Vec<String> = sqlx::query_scalar(
            "SELECT pbi_id FROM epic_pbis WHERE epic_id = ? ORDER BY position ASC",
        )
        .bind(id.as_str())
        .fetch_all(self.pool())
        .await?;
        Ok(Some(row.into_epic(
            pbi_ids.into_iter().map(PbiId::from_string).collect(),
        )?))
    }

    pub async fn save_epic(&self, epic: &Epic) -> anyhow::Result<()> {
        let labels = encode_list(&epic.labels)?;
        let mut tx = self.begin().await?;
        sqlx::query(
            r#"
INSERT INTO epics (
    id, title, description, status, story_points, priority, labels, assigned_agent,
    created_at, updated_at
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
ON CONFLICT(id) DO UPDATE SET
    title = excluded.title,
    description = excluded.description,
    status = excluded.status,
    story_points = excluded.story_points,
    priority = excluded.priority,
    labels = excluded.labels,
    assigned_agent = excluded.assigned_agent,
    updated_at = excluded.updated_at
            "#,
        )
        .bind(epic.id.as_str())
        .bind(epic.title.as_str())
        .bind(epic.description.as_str())
        .bind(epic.status.as_str())
        .bind(epic.story_points)
        .bind(epic.priority)
        .bind(labels)
        .bind(epic.assigned_agent.as_deref())
        .bind(to_rfc3339(epic.created_at))
        .bind(to_rfc3339(Utc::now()))
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM epic_pbis WHERE epic_id = ?")
            .bind(epic.id.as_str())
            .execute(&mut *tx)
            .await?;
        for (position, pbi_id) in epic.pbi_ids.iter().enumerate() {
            sqlx::query("INSERT INTO epic_pbis (epic_id, pbi_id, position) VALUES (?, ?, ?)")
                .bind(epic.id.as_str())
                .bind(pbi_id.as_str())
                .bind(position as i64 + 1)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Deletion is forbidden while children exist.
    pub async fn delete_epic(&self, id: &EpicId) -> anyhow::Result<()> {
        let children: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM epic_pbis WHERE epic_id = ?")
            .bind(id.as_str())
            .fetch_one(self.pool())
            .await?;
        if children > 0 {
            return Err(anyhow::anyhow!(
                "cannot delete epic {id}: {children} child pbi(s) still attached"
            ));
        }
        sqlx::query("DELETE FROM epics WHERE id = ?")
            .bind(id.as_str())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn list_epics(&self) -> anyhow::Result<Vec<Epic>> {
        let rows = sqlx::query_as::<_, EpicRow>(&format!(
            "SELECT {EPIC_COLUMNS} FROM epics ORDER BY priority DESC, created_at ASC"
        ))
        .fetch_all(self.pool())
        .await?;
        let mut epics = Vec::with_capacity(rows.len());
        for row in rows {
            let pbi_ids: Vec<String> = sqlx::query_scalar(
                "SELECT pbi_id FROM epic_pbis WHERE epic_id = ? ORDER BY position ASC",
            )
            .bind(row.id.as_str())
            .fetch_all(self.pool())
            .await?;
            epics.push(row.into_epic(pbi_ids.into_iter().map(PbiId::from_string).collect())?);
        }
        Ok(epics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::test_support::open_test_store;
    use crate::runtime::test_support::test_epic;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn epic_children_keep_positional_order() {
        let (store, _dir) = open_test_store().await;
        let mut epic = test_epic("epic-1");
        epic.pbi_ids = vec![
            PbiId::from_string("pbi-b"),
            PbiId::from_string("pbi-a"),
            PbiId::from_string("pbi-c"),
        ];
        store.save_epic(&epic).await.expect("save");

        let loaded = store
            .find_epic(&epic.id)
            .await
            .expect("find")
            .expect("present");
        assert_eq!(loaded.pbi_ids, epic.pbi_ids);
    }

    #[tokio::test]
    async fn delete_is_refused_while_children_exist() {
        let (store, _dir) = open_test_store().await;
        let mut epic = test_epic("epic-guard");
        epic.pbi_ids = vec![PbiId::from_string("pbi-child")];
        store.save_epic(&epic).await.expect("save");

        let err = store.delete_epic(&epic.id).await.expect_err("guarded");
        assert!(err.to_string().contains("child"));

        epic.pbi_ids.clear();
        store.save_epic(&epic).await.expect("clear children");
        store.delete_epic(&epic.id).await.expect("delete");
        assert_eq!(store.find_epic(&epic.id).await.expect("find"), None);
    }
}
