use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::LevelFilter;
use sqlx::ConnectOptions;
use sqlx::Sqlite;
use sqlx::SqliteConnection;
use sqlx::SqlitePool;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::sqlite::SqliteJournalMode;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::sqlite::SqliteSynchronous;
use tracing::warn;

use crate::STATE_DB_FILENAME;
use crate::migrations::run_migrations;

mod dependencies;
mod epics;
mod locks;
mod pbis;
mod sbis;
#[cfg(test)]
pub(crate) mod test_support;

/// Connection-level repository cores. Called with a transaction's connection
/// they join the ambient transaction; the same-named [`StateStore`] methods
/// run them on auto-commit.
pub use dependencies::save_dependencies;
pub use sbis::attach_sbi_to_pbi;
pub use sbis::find_sbi;
pub use sbis::list_sbis;
pub use sbis::next_sequence;
pub use sbis::save_sbi;

/// Handle over the relational store. Cheap to clone; all methods are safe to
/// call concurrently — SQLite serialises commits under the hood.
#[derive(Clone)]
pub struct StateStore {
    pool: Arc<SqlitePool>,
}

impl StateStore {
    /// Open (and migrate) the database at `db_path`, creating it and its
    /// parent directory when missing.
    pub async fn init(db_path: &Path) -> anyhow::Result<Arc<Self>> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let pool = match open_sqlite(db_path).await {
            Ok(pool) => Arc::new(pool),
            Err(err) => {
                warn!("failed to open state db at {}: {err}", db_path.display());
                return Err(err);
            }
        };
        Ok(Arc::new(Self { pool }))
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        self.pool.as_ref()
    }

    /// Run `f` on a single transaction; commit on `Ok`, roll back on `Err`.
    ///
    /// Repository methods called with the yielded connection join this
    /// transaction; methods called on the store directly run on their own
    /// auto-commit connection.
    pub async fn in_transaction<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        F: AsyncFnOnce(&mut SqliteConnection) -> anyhow::Result<T>,
    {
        let mut tx = self.pool.begin().await?;
        let out = f(&mut *tx).await?;
        tx.commit().await?;
        Ok(out)
    }

    /// Explicit ambient transaction for callers that need to interleave
    /// non-repository work between statements.
    pub async fn begin(&self) -> anyhow::Result<sqlx::Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }
}

/// Turn commits from parallel workers queue behind SQLite's single writer;
/// the busy handler has to outlast a burst of fsync-heavy commits.
const DB_BUSY_TIMEOUT: Duration = Duration::from_secs(10);
/// One connection per worker loop plus headroom for heartbeat and
/// maintenance tasks.
const DB_MAX_CONNECTIONS: u32 = 8;

fn connect_options(path: &Path) -> SqliteConnectOptions {
    // WAL keeps readers (scheduler candidate scans) off the writer's lock;
    // NORMAL sync is safe under WAL and the journal carries its own fsyncs.
    SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .busy_timeout(DB_BUSY_TIMEOUT)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .log_statements(LevelFilter::Off)
}

async fn open_sqlite(path: &Path) -> anyhow::Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(DB_MAX_CONNECTIONS)
        .connect_with(connect_options(path))
        .await?;
    run_migrations(&pool).await?;
    Ok(pool)
}

pub fn state_db_path(deespec_home: &Path) -> PathBuf {
    deespec_home.join(STATE_DB_FILENAME)
}
