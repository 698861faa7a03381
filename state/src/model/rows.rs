use anyhow::Result;
use deespec_protocol::Epic;
use deespec_protocol::EpicId;
use deespec_protocol::Pbi;
use deespec_protocol::PbiId;
use deespec_protocol::Sbi;
use deespec_protocol::SbiId;
use deespec_protocol::SbiStatus;

use super::decode_list;
use super::parse_rfc3339;
use super::parse_rfc3339_opt;

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct EpicRow {
    pub(crate) id: String,
    pub(crate) title: String,
    pub(crate) description: String,
    pub(crate) status: String,
    pub(crate) story_points: Option<i64>,
    pub(crate) priority: i64,
    pub(crate) labels: Option<String>,
    pub(crate) assigned_agent: Option<String>,
    pub(crate) created_at: String,
    pub(crate) updated_at: String,
}

impl EpicRow {
    /// Child ids are attached separately from the `epic_pbis` relation.
    pub(crate) fn into_epic(self, pbi_ids: Vec<PbiId>) -> Result<Epic> {
        Ok(Epic {
            id: EpicId::from_string(self.id),
            title: self.title,
            description: self.description,
            status: self.status,
            story_points: self.story_points,
            priority: self.priority,
            labels: decode_list(self.labels.as_deref())?,
            assigned_agent: self.assigned_agent,
            created_at: parse_rfc3339(self.created_at.as_str())?,
            updated_at: parse_rfc3339(self.updated_at.as_str())?,
            pbi_ids,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PbiRow {
    pub(crate) id: String,
    pub(crate) parent_epic_id: Option<String>,
    pub(crate) title: String,
    pub(crate) description: String,
    pub(crate) status: String,
    pub(crate) story_points: Option<i64>,
    pub(crate) acceptance_criteria: Option<String>,
    pub(crate) created_at: String,
    pub(crate) updated_at: String,
}

impl PbiRow {
    pub(crate) fn into_pbi(self, sbi_ids: Vec<SbiId>) -> Result<Pbi> {
        Ok(Pbi {
            id: PbiId::from_string(self.id),
            parent_epic_id: self.parent_epic_id.map(EpicId::from_string),
            title: self.title,
            description: self.description,
            status: self.status,
            story_points: self.story_points,
            acceptance_criteria: decode_list(self.acceptance_criteria.as_deref())?,
            created_at: parse_rfc3339(self.created_at.as_str())?,
            updated_at: parse_rfc3339(self.updated_at.as_str())?,
            sbi_ids,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SbiRow {
    pub(crate) id: String,
    pub(crate) parent_pbi_id: Option<String>,
    pub(crate) title: String,
    pub(crate) description: String,
    pub(crate) status: String,
    pub(crate) estimated_hours: Option<f64>,
    pub(crate) priority: i64,
    pub(crate) sequence: i64,
    pub(crate) labels: Option<String>,
    pub(crate) file_paths: Option<String>,
    pub(crate) registered_at: String,
    pub(crate) started_at: Option<String>,
    pub(crate) completed_at: Option<String>,
    pub(crate) current_turn: i64,
    pub(crate) current_attempt: i64,
    pub(crate) max_turns: i64,
    pub(crate) max_attempts: i64,
    pub(crate) last_error: Option<String>,
    pub(crate) artifact_paths: Option<String>,
    pub(crate) created_at: String,
    pub(crate) updated_at: String,
}

impl TryFrom<SbiRow> for Sbi {
    type Error = anyhow::Error;

    fn try_from(value: SbiRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: SbiId::from_string(value.id),
            parent_pbi_id: value.parent_pbi_id.map(PbiId::from_string),
            title: value.title,
            description: value.description,
            status: SbiStatus::parse(value.status.as_str())?,
            estimated_hours: value.estimated_hours,
            priority: value.priority,
            sequence: value.sequence,
            labels: decode_list(value.labels.as_deref())?,
            file_paths: decode_list(value.file_paths.as_deref())?,
            registered_at: parse_rfc3339(value.registered_at.as_str())?,
            started_at: parse_rfc3339_opt(value.started_at.as_deref())?,
            completed_at: parse_rfc3339_opt(value.completed_at.as_deref())?,
            current_turn: value.current_turn,
            current_attempt: value.current_attempt,
            max_turns: value.max_turns,
            max_attempts: value.max_attempts,
            last_error: value.last_error,
            artifact_paths: decode_list(value.artifact_paths.as_deref())?,
            created_at: parse_rfc3339(value.created_at.as_str())?,
            updated_at: parse_rfc3339(value.updated_at.as_str())?,
        })
    }
}
