use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::trace;

#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub prompt: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct AgentResponse {
    pub output: String,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("agent call timed out after {0:?}")]
    Timeout(Duration),
    #[error("failed to spawn agent process: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("agent exited with {status}: {stderr}")]
    NonZeroExit { status: String, stderr: String },
    #[error("agent gateway unavailable: {0}")]
    Unavailable(String),
}

/// The engine's only view of the external language-model CLI. Invocation is
/// at-least-once; status transitions are idempotent, so a duplicate call
/// after a crash is harmless.
#[async_trait]
pub trait AgentGateway: Send + Sync {
    async fn execute(&self, request: AgentRequest) -> Result<AgentResponse, GatewayError>;

    /// Cheap availability probe; callers may degrade to prompt-only mode on
    /// failure.
    async fn health_check(&self) -> Result<(), GatewayError> {
        Ok(())
    }
}

/// Drives an external agent binary: the prompt goes to stdin, the reply comes
/// back on stdout. The child is killed when the call future is dropped, so an
/// abandoned timeout cannot leak processes (the external process may still
/// finish its own side effects; that is accepted).
pub struct CliAgentGateway {
    program: PathBuf,
    args: Vec<String>,
}

impl CliAgentGateway {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl AgentGateway for CliAgentGateway {
    async fn execute(&self, request: AgentRequest) -> Result<AgentResponse, GatewayError> {
        trace!(
            "spawning agent: {} {:?} (timeout {:?})",
            self.program.display(),
            self.args,
            request.timeout
        );
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let run = async {
            let mut child = cmd.spawn()?;
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(request.prompt.as_bytes()).await?;
                stdin.shutdown().await?;
            }
            let output = child.wait_with_output().await?;
            if !output.status.success() {
                return Err(GatewayError::NonZeroExit {
                    status: output.status.to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                });
            }
            Ok(AgentResponse {
                output: String::from_utf8_lossy(&output.stdout).into_owned(),
            })
        };
        match tokio::time::timeout(request.timeout, run).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout(request.timeout)),
        }
    }

    async fn health_check(&self) -> Result<(), GatewayError> {
        let status = Command::new(&self.program)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;
        if status.success() {
            Ok(())
        } else {
            Err(GatewayError::Unavailable(format!(
                "health check exited with {status}"
            )))
        }
    }
}
