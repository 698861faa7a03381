use chrono::DateTime;
use chrono::Utc;

use crate::DEFAULT_MAX_ATTEMPTS;
use crate::DEFAULT_MAX_TURNS;
use crate::EpicId;
use crate::PbiId;
use crate::SbiId;
use crate::SbiStatus;

/// Backlog granularity. Only SBIs are executed by the engine; EPICs and PBIs
/// are read-only aggregates created by the planning CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Epic,
    Pbi,
    Sbi,
}

impl TaskKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            TaskKind::Epic => "EPIC",
            TaskKind::Pbi => "PBI",
            TaskKind::Sbi => "SBI",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Epic {
    pub id: EpicId,
    pub title: String,
    pub description: String,
    pub status: String,
    pub story_points: Option<i64>,
    pub priority: i64,
    pub labels: Vec<String>,
    pub assigned_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Child PBIs in explicit positional order.
    pub pbi_ids: Vec<PbiId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pbi {
    pub id: PbiId,
    pub parent_epic_id: Option<EpicId>,
    pub title: String,
    pub description: String,
    pub status: String,
    pub story_points: Option<i64>,
    pub acceptance_criteria: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Child SBIs in explicit positional order.
    pub sbi_ids: Vec<SbiId>,
}

/// The execution unit. The engine exclusively owns status, turn/attempt
/// counters, started/completed stamps, and last_error once an SBI is
/// registered.
#[derive(Debug, Clone, PartialEq)]
pub struct Sbi {
    pub id: SbiId,
    pub parent_pbi_id: Option<PbiId>,
    pub title: String,
    pub description: String,
    pub status: SbiStatus,
    pub estimated_hours: Option<f64>,
    /// Higher runs sooner.
    pub priority: i64,
    /// Monotonically assigned at registration; ties in priority and
    /// registered_at fall back to this.
    pub sequence: i64,
    pub labels: Vec<String>,
    /// Source files this SBI was registered from.
    pub file_paths: Vec<String>,
    pub registered_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub current_turn: i64,
    pub current_attempt: i64,
    pub max_turns: i64,
    pub max_attempts: i64,
    pub last_error: Option<String>,
    pub artifact_paths: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Sbi {
    /// A freshly registered SBI: PENDING, turn and attempt at 1, default caps.
    pub fn new(id: SbiId, parent_pbi_id: Option<PbiId>, title: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            parent_pbi_id,
            title,
            description: String::new(),
            status: SbiStatus::Pending,
            estimated_hours: None,
            priority: 0,
            sequence: 0,
            labels: Vec::new(),
            file_paths: Vec::new(),
            registered_at: now,
            started_at: None,
            completed_at: None,
            current_turn: 1,
            current_attempt: 1,
            max_turns: DEFAULT_MAX_TURNS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            last_error: None,
            artifact_paths: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn new_sbi_starts_pending_with_default_caps() {
        let now = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).expect("timestamp");
        let sbi = Sbi::new(SbiId::from_string("sbi-1"), None, "title".to_string(), now);
        assert_eq!(sbi.status, SbiStatus::Pending);
        assert_eq!(sbi.current_turn, 1);
        assert_eq!(sbi.current_attempt, 1);
        assert_eq!(sbi.max_turns, DEFAULT_MAX_TURNS);
        assert_eq!(sbi.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(sbi.started_at, None);
        assert_eq!(sbi.completed_at, None);
    }
}
