use std::time::Duration;

use chrono::Utc;

use super::StateStore;
use crate::liveness::local_hostname;
use crate::liveness::process_is_alive;
use crate::model::Lock;
use crate::model::LockFamily;
use crate::model::LockRow;
use crate::model::LockType;
use crate::model::to_rfc3339;

const LOCK_COLUMNS: &str =
    "lock_id, pid, hostname, acquired_at, expires_at, heartbeat_at, lock_type";

impl StateStore {
    /// Try to take the lock named `lock_id` in `family`.
    ///
    /// Returns `Ok(None)` when a live owner holds it — contention is not an
    /// error. A row whose TTL expired or whose owner process is gone is
    /// reclaimed inline; no sweeper has to run first.
    pub async fn acquire_lock(
        &self,
        family: LockFamily,
        lock_id: &str,
        lock_type: LockType,
        ttl: Duration,
    ) -> anyhow::Result<Option<Lock>> {
        let table = family.table();
        let now = Utc::now();
        let now_str = to_rfc3339(now);

        if let Some(existing) = self.find_lock(family, lock_id).await? {
            let live = now < existing.expires_at
                && process_is_alive(existing.pid, existing.hostname.as_str());
            if live {
                return Ok(None);
            }
            // Guarded delete: only remove the row we classified as stale. If
            // a competitor already replaced it, rows_affected is 0 and we
            // re-check before racing the insert.
            let deleted = sqlx::query(&format!(
                "DELETE FROM {table} WHERE lock_id = ? AND (expires_at < ? OR pid = ?)"
            ))
            .bind(lock_id)
            .bind(now_str.as_str())
            .bind(existing.pid)
            .execute(self.pool())
            .await?
            .rows_affected();
            if deleted == 0
                && let Some(current) = self.find_lock(family, lock_id).await?
                && Utc::now() < current.expires_at
                && process_is_alive(current.pid, current.hostname.as_str())
            {
                return Ok(None);
            }
        }

        let lock = Lock {
            lock_id: lock_id.to_string(),
            pid: i64::from(std::process::id()),
            hostname: local_hostname(),
            acquired_at: now,
            expires_at: now + ttl,
            heartbeat_at: now,
            lock_type,
        };
        let inserted = sqlx::query(&format!(
            "INSERT INTO {table} ({LOCK_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(lock.lock_id.as_str())
        .bind(lock.pid)
        .bind(lock.hostname.as_str())
        .bind(to_rfc3339(lock.acquired_at))
        .bind(to_rfc3339(lock.expires_at))
        .bind(to_rfc3339(lock.heartbeat_at))
        .bind(lock.lock_type.as_str())
        .execute(self.pool())
        .await;
        match inserted {
            Ok(_) => Ok(Some(lock)),
            // A concurrent acquirer won the race.
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn release_lock(&self, family: LockFamily, lock_id: &str) -> anyhow::Result<()> {
        sqlx::query(&format!("DELETE FROM {} WHERE lock_id = ?", family.table()))
            .bind(lock_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn update_heartbeat(&self, family: LockFamily, lock_id: &str) -> anyhow::Result<()> {
        sqlx::query(&format!(
            "UPDATE {} SET heartbeat_at = ? WHERE lock_id = ?",
            family.table()
        ))
        .bind(to_rfc3339(Utc::now()))
        .bind(lock_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Advance `expires_at` by `delta` added to the *current* expiry, so
    /// repeated extensions are strictly monotonic.
    pub async fn extend_lock(
        &self,
        family: LockFamily,
        lock_id: &str,
        delta: Duration,
    ) -> anyhow::Result<()> {
        let Some(existing) = self.find_lock(family, lock_id).await? else {
            return Err(anyhow::anyhow!("cannot extend missing lock {lock_id}"));
        };
        sqlx::query(&format!(
            "UPDATE {} SET expires_at = ? WHERE lock_id = ?",
            family.table()
        ))
        .bind(to_rfc3339(existing.expires_at + delta))
        .bind(lock_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Sweep TTL-expired rows from both lock tables. Purely an optimization:
    /// acquire reclaims stale rows inline regardless.
    pub async fn cleanup_expired_locks(&self) -> anyhow::Result<u64> {
        let now = to_rfc3339(Utc::now());
        let mut removed = 0;
        for family in [LockFamily::Run, LockFamily::State] {
            removed += sqlx::query(&format!(
                "DELETE FROM {} WHERE expires_at < ?",
                family.table()
            ))
            .bind(now.as_str())
            .execute(self.pool())
            .await?
            .rows_affected();
        }
        Ok(removed)
    }

    pub async fn find_lock(
        &self,
        family: LockFamily,
        lock_id: &str,
    ) -> anyhow::Result<Option<Lock>> {
        let row = sqlx::query_as::<_, LockRow>(&format!(
            "SELECT {LOCK_COLUMNS} FROM {} WHERE lock_id = ?",
            family.table()
        ))
        .bind(lock_id)
        .fetch_optional(self.pool())
        .await?;
        row.map(Lock::try_from).transpose()
    }

    pub async fn list_locks(&self, family: LockFamily) -> anyhow::Result<Vec<Lock>> {
        let rows = sqlx::query_as::<_, LockRow>(&format!(
            "SELECT {LOCK_COLUMNS} FROM {} ORDER BY lock_id ASC",
            family.table()
        ))
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(Lock::try_from).collect()
    }
}
