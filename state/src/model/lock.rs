use anyhow::Result;
use chrono::DateTime;
use chrono::Utc;

use super::parse_rfc3339;

/// The two lock tables share one row shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockFamily {
    /// One per SBI, held for the duration of a turn.
    Run,
    /// Serialises non-turn mutations of shared state keys.
    State,
}

impl LockFamily {
    pub(crate) const fn table(self) -> &'static str {
        match self {
            LockFamily::Run => "run_locks",
            LockFamily::State => "state_locks",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockType {
    Run,
    Read,
    Write,
}

impl LockType {
    pub const fn as_str(self) -> &'static str {
        match self {
            LockType::Run => "run",
            LockType::Read => "read",
            LockType::Write => "write",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "run" => Ok(Self::Run),
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            _ => Err(anyhow::anyhow!("invalid lock type: {value}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lock {
    pub lock_id: String,
    pub pid: i64,
    pub hostname: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub heartbeat_at: DateTime<Utc>,
    pub lock_type: LockType,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct LockRow {
    pub(crate) lock_id: String,
    pub(crate) pid: i64,
    pub(crate) hostname: String,
    pub(crate) acquired_at: String,
    pub(crate) expires_at: String,
    pub(crate) heartbeat_at: String,
    pub(crate) lock_type: String,
}

impl TryFrom<LockRow> for Lock {
    type Error = anyhow::Error;

    fn try_from(value: LockRow) -> Result<Self, Self::Error> {
        Ok(Self {
            lock_id: value.lock_id,
            pid: value.pid,
            hostname: value.hostname,
            acquired_at: parse_rfc3339(value.acquired_at.as_str())?,
            expires_at: parse_rfc3339(value.expires_at.as_str())?,
            heartbeat_at: parse_rfc3339(value.heartbeat_at.as_str())?,
            lock_type: LockType::parse(value.lock_type.as_str())?,
        })
    }
}
