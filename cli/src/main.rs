//! Entry-point for the `deespec` binary: workspace init, SBI registration,
//! and the outer run loop driving the turn executor.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use clap::Subcommand;
use deespec_core::CliAgentGateway;
use deespec_core::Engine;
use deespec_core::EngineConfig;
use deespec_core::ExecuteOutcome;
use deespec_core::FsPromptRepository;
use deespec_core::RegisterSpec;
use deespec_core::Workspace;
use deespec_core::register_sbis;
use deespec_protocol::PbiId;
use deespec_protocol::SbiStatus;
use deespec_state::SbiFilter;
use deespec_state::StateStore;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "deespec", version, about = "AI-agent backlog orchestrator")]
struct Cli {
    /// Project root holding (or receiving) the .deespec workspace.
    #[arg(long = "root", short = 'C', value_name = "DIR", global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the .deespec workspace tree. Idempotent.
    Init,
    /// Register markdown files as SBIs chained under a parent PBI.
    Register {
        /// Parent PBI id; omit for stand-alone SBIs.
        #[arg(long = "pbi")]
        pbi: Option<String>,
        /// Priority for the whole batch; higher runs sooner.
        #[arg(long, default_value_t = 0)]
        priority: i64,
        /// Markdown files, one SBI each, in execution order.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Run the turn executor until interrupted.
    Run {
        /// Number of parallel workers.
        #[arg(long, default_value_t = 1)]
        workers: usize,
        /// Seconds to sleep when no SBI is pickable.
        #[arg(long, default_value_t = 10)]
        interval: u64,
        /// Execute at most one turn, then exit (exit 0 on no_tasks).
        #[arg(long, default_value_t = false)]
        once: bool,
        /// External agent command receiving the prompt on stdin.
        #[arg(long = "agent-cmd", default_value = "claude")]
        agent_cmd: String,
        /// Extra arguments passed to the agent command.
        #[arg(long = "agent-arg")]
        agent_args: Vec<String>,
        /// Seconds before an agent call is abandoned.
        #[arg(long = "agent-timeout", default_value_t = 600)]
        agent_timeout: u64,
        /// Run-lease TTL in seconds.
        #[arg(long = "lease-ttl", default_value_t = 600)]
        lease_ttl: u64,
    },
    /// Archive the journal and report trees into .deespec/archive/.
    Clear,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let root = match cli.root {
        Some(root) => root,
        None => std::env::current_dir()?,
    };
    let workspace = Workspace::new(root);

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(cli.command, workspace))
}

async fn run(command: Command, workspace: Workspace) -> anyhow::Result<()> {
    match command {
        Command::Init => {
            workspace.init()?;
            deespec_state::StateStore::init(&workspace.db_path()).await?;
            info!("workspace initialised at {}", workspace.home().display());
            Ok(())
        }
        Command::Register {
            pbi,
            priority,
            files,
        } => {
            workspace.init()?;
            let store = deespec_state::StateStore::init(&workspace.db_path()).await?;
            let mut specs = Vec::with_capacity(files.len());
            for file in &files {
                let body = std::fs::read_to_string(file)?;
                let title = file
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "untitled".to_string());
                specs.push(RegisterSpec {
                    title,
                    body,
                    source_path: Some(file.display().to_string()),
                    priority,
                    estimated_hours: None,
                    labels: Vec::new(),
                });
            }
            let registered = register_sbis(
                &store,
                &workspace,
                pbi.map(PbiId::from_string),
                specs,
            )
            .await?;
            for sbi in &registered {
                println!("{}\t{}", sbi.id, sbi.title);
            }
            Ok(())
        }
        Command::Run {
            workers,
            interval,
            once,
            agent_cmd,
            agent_args,
            agent_timeout,
            lease_ttl,
        } => {
            let gateway = Arc::new(CliAgentGateway::new(agent_cmd, agent_args));
            let prompts = Arc::new(FsPromptRepository::new(workspace.prompts_dir()));
            let config = EngineConfig {
                run_lease_ttl: Duration::from_secs(lease_ttl),
                agent_timeout: Duration::from_secs(agent_timeout),
            };
            let engine = Engine::new(workspace, gateway, prompts, config).await?;
            let cancel = CancellationToken::new();
            log_backlog_summary(engine.store()).await?;

            if once {
                match engine.execute_one_turn(&cancel).await? {
                    ExecuteOutcome::NoOp { reason } => {
                        info!(reason, "nothing to do");
                    }
                    ExecuteOutcome::Turn(outcome) => {
                        info!(
                            sbi_id = outcome.sbi_id.as_str(),
                            turn = outcome.turn,
                            from = outcome.prev_status.as_str(),
                            to = outcome.next_status.as_str(),
                            "executed one turn"
                        );
                    }
                }
                return Ok(());
            }

            let shutdown = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("shutting down");
                    shutdown.cancel();
                }
            });

            let idle = Duration::from_secs(interval);
            let mut handles = Vec::with_capacity(workers);
            for worker in 0..workers {
                let engine = engine.clone();
                let cancel = cancel.clone();
                handles.push(tokio::spawn(async move {
                    info!(worker, "worker started");
                    engine.run_loop(idle, &cancel).await
                }));
            }
            for handle in handles {
                handle.await??;
            }
            log_backlog_summary(engine.store()).await?;
            Ok(())
        }
        Command::Clear => {
            let store = deespec_state::StateStore::init(&workspace.db_path()).await?;
            let report = deespec_core::archive_workspace(&store, &workspace).await?;
            match report.archive_dir {
                Some(dir) => info!("archived workspace state to {}", dir.display()),
                None => info!("nothing to archive"),
            }
            Ok(())
        }
    }
}

/// One-line backlog overview for operators, in status-machine order.
async fn log_backlog_summary(store: &StateStore) -> anyhow::Result<()> {
    let sbis = store.list_sbis(&SbiFilter::default()).await?;
    if sbis.is_empty() {
        info!("backlog empty");
        return Ok(());
    }
    let order = [
        SbiStatus::Pending,
        SbiStatus::Picked,
        SbiStatus::Implementing,
        SbiStatus::Reviewing,
        SbiStatus::ReviewAndWip,
        SbiStatus::Done,
        SbiStatus::Failed,
    ];
    let mut parts = Vec::new();
    for status in order {
        let count = sbis.iter().filter(|sbi| sbi.status == status).count();
        if count > 0 {
            parts.push(format!("{count} {}", status.as_str()));
        }
    }
    info!("backlog: {} ({} total)", parts.join(", "), sbis.len());
    Ok(())
}
