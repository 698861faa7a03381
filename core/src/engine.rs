use std::sync::Arc;
use std::time::Duration;

use deespec_fs_txn::Journal;
use deespec_fs_txn::TxnManager;
use deespec_protocol::JournalRecord;
use deespec_state::LockFamily;
use deespec_state::StateStore;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;

use crate::executor::TurnOutcome;
use crate::gateway::AgentGateway;
use crate::heartbeat::LeaseHeartbeat;
use crate::prompts::PromptRepository;
use crate::scheduler::pick_and_lock_next_sbi;
use crate::workspace::Workspace;

/// NoOp reason when nothing is pickable. The caller decides whether to sleep
/// and retry or exit zero.
pub const NO_TASKS: &str = "no_tasks";

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Run-lease TTL attached to a picked SBI.
    pub run_lease_ttl: Duration,
    /// Per-call budget for one agent invocation.
    pub agent_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            run_lease_ttl: Duration::from_secs(600),
            agent_timeout: Duration::from_secs(600),
        }
    }
}

#[derive(Debug)]
pub enum ExecuteOutcome {
    /// Nothing pickable this tick.
    NoOp { reason: &'static str },
    Turn(TurnOutcome),
}

/// The runtime engine: one instance per process, shared by all workers.
#[derive(Clone)]
pub struct Engine {
    store: Arc<StateStore>,
    workspace: Workspace,
    txn: TxnManager,
    journal: Journal,
    gateway: Arc<dyn AgentGateway>,
    prompts: Arc<dyn PromptRepository>,
    config: EngineConfig,
}

impl Engine {
    /// Open the workspace and run startup recovery: replay intent-marked
    /// filesystem transactions, then sweep TTL-expired lock rows.
    pub async fn new(
        workspace: Workspace,
        gateway: Arc<dyn AgentGateway>,
        prompts: Arc<dyn PromptRepository>,
        config: EngineConfig,
    ) -> anyhow::Result<Self> {
        workspace.init()?;
        let store = StateStore::init(&workspace.db_path()).await?;
        let txn = TxnManager::new(workspace.txn_root());
        let report = txn.recover()?;
        if report.replayed > 0 || report.discarded > 0 {
            info!(
                replayed = report.replayed,
                discarded = report.discarded,
                "transaction recovery complete"
            );
        }
        let swept = store.cleanup_expired_locks().await?;
        if swept > 0 {
            info!(swept, "removed expired lock rows");
        }
        let journal = Journal::new(workspace.journal_path());
        Ok(Self {
            store,
            workspace,
            txn,
            journal,
            gateway,
            prompts,
            config,
        })
    }

    /// One tick of the outer loop: pick a ready SBI, lease it, run one turn,
    /// release the lease.
    pub async fn execute_one_turn(
        &self,
        cancel: &CancellationToken,
    ) -> anyhow::Result<ExecuteOutcome> {
        let Some((sbi, lease)) =
            pick_and_lock_next_sbi(&self.store, self.config.run_lease_ttl, cancel).await?
        else {
            return Ok(ExecuteOutcome::NoOp { reason: NO_TASKS });
        };
        let heartbeat = LeaseHeartbeat::spawn(
            self.store.clone(),
            LockFamily::Run,
            lease.lock_id.clone(),
            self.config.run_lease_ttl,
        );
        let result = self.execute_for_sbi(&sbi.id).await;
        heartbeat.stop().await;
        if let Err(err) = self
            .store
            .release_lock(LockFamily::Run, lease.lock_id.as_str())
            .await
        {
            // TTL expiry will reclaim it.
            warn!(lock_id = lease.lock_id.as_str(), "lease release failed: {err}");
        }
        match result {
            Ok(outcome) => Ok(ExecuteOutcome::Turn(outcome)),
            Err(err) => Err(err),
        }
    }

    /// Worker loop: execute turns until cancelled, sleeping `idle_interval`
    /// whenever nothing is pickable. Errors are reported and the loop keeps
    /// going; the SBI state machine is the authoritative failure record.
    pub async fn run_loop(
        &self,
        idle_interval: Duration,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }
            match self.execute_one_turn(cancel).await {
                Ok(ExecuteOutcome::Turn(outcome)) => {
                    if outcome.task_completed {
                        info!(sbi_id = outcome.sbi_id.as_str(), "sbi completed");
                    }
                }
                Ok(ExecuteOutcome::NoOp { .. }) => {
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(idle_interval) => {}
                    }
                }
                Err(err) => {
                    warn!("turn failed: {err:#}");
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(idle_interval) => {}
                    }
                }
            }
        }
    }

    /// Append a journal record, downgrading failures to warnings: auditing
    /// never blocks forward progress.
    pub(crate) fn append_journal(&self, record: &JournalRecord) {
        if let Err(err) = self.journal.append(record) {
            warn!(
                sbi_id = record.sbi_id.as_str(),
                turn = record.turn,
                "journal append failed (continuing): {err}"
            );
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub(crate) fn txn(&self) -> &TxnManager {
        &self.txn
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub(crate) fn gateway(&self) -> &dyn AgentGateway {
        self.gateway.as_ref()
    }

    pub(crate) fn prompts(&self) -> &dyn PromptRepository {
        self.prompts.as_ref()
    }

    pub(crate) fn config(&self) -> &EngineConfig {
        &self.config
    }
}
