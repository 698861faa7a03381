mod lock;
mod rows;

use anyhow::Result;
use chrono::DateTime;
use chrono::SecondsFormat;
use chrono::Utc;
use deespec_protocol::SbiStatus;

pub use lock::Lock;
pub use lock::LockFamily;
pub use lock::LockType;
pub(crate) use lock::LockRow;
pub(crate) use rows::EpicRow;
pub(crate) use rows::PbiRow;
pub(crate) use rows::SbiRow;

/// RFC3339 with nanoseconds, UTC, fixed width. The fixed width matters: the
/// lock queries compare these TEXT columns lexically against a bound `now`.
pub(crate) fn to_rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn parse_rfc3339(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .map_err(|e| anyhow::anyhow!("invalid timestamp {raw:?}: {e}"))?
        .with_timezone(&Utc))
}

pub(crate) fn parse_rfc3339_opt(raw: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    raw.map(parse_rfc3339).transpose()
}

/// Encode a list-of-strings column as JSON.
pub fn encode_list(values: &[String]) -> Result<String> {
    Ok(serde_json::to_string(values)?)
}

/// Decode a JSON list column. NULL and empty-string rows decode to the empty
/// list, never fail.
pub fn decode_list(raw: Option<&str>) -> Result<Vec<String>> {
    match raw {
        None => Ok(Vec::new()),
        Some(s) if s.trim().is_empty() => Ok(Vec::new()),
        Some(s) => Ok(serde_json::from_str(s)?),
    }
}

/// Filter for SBI listing. Results always come back in ready-queue order:
/// priority DESC, registered_at ASC, sequence ASC.
#[derive(Debug, Clone, Default)]
pub struct SbiFilter {
    pub statuses: Option<Vec<SbiStatus>>,
    pub parent_pbi_id: Option<String>,
    pub limit: Option<i64>,
}

impl SbiFilter {
    /// The statuses the scheduler considers executable.
    pub fn executable() -> Self {
        Self {
            statuses: Some(vec![
                SbiStatus::Pending,
                SbiStatus::Picked,
                SbiStatus::Implementing,
                SbiStatus::Reviewing,
                SbiStatus::ReviewAndWip,
            ]),
            parent_pbi_id: None,
            limit: None,
        }
    }
}
