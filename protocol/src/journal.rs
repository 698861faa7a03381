use chrono::DateTime;
use chrono::SecondsFormat;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use crate::JournalDecision;
use crate::SbiId;
use crate::SbiStatus;

/// One line of `var/journal.ndjson`. Append-only and authoritative for audit:
/// records never mutate after being written.
///
/// `step` is usually `Step::for_status(next_status)`, but status-only turns
/// record their own markers (`pick`, `status_init`, `force_terminated`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalRecord {
    /// RFC3339 with nanoseconds, UTC.
    pub ts: String,
    pub sbi_id: String,
    pub turn: i64,
    pub step: String,
    pub status: String,
    pub attempt: i64,
    pub decision: String,
    pub elapsed_ms: i64,
    /// Empty on success.
    pub error: String,
    /// May contain an empty-string placeholder when a turn produced no file.
    pub artifacts: Vec<String>,
}

impl JournalRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ts: DateTime<Utc>,
        sbi_id: &SbiId,
        turn: i64,
        step: &str,
        status: SbiStatus,
        attempt: i64,
        decision: JournalDecision,
        elapsed_ms: i64,
        error: Option<&str>,
        artifacts: Vec<String>,
    ) -> Self {
        Self {
            ts: ts.to_rfc3339_opts(SecondsFormat::Nanos, true),
            sbi_id: sbi_id.to_string(),
            turn,
            step: step.to_string(),
            status: status.as_str().to_string(),
            attempt,
            decision: decision.as_str().to_string(),
            elapsed_ms,
            error: error.unwrap_or_default().to_string(),
            artifacts,
        }
    }
}
