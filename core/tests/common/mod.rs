//! Shared scaffolding for the end-to-end executor scenarios.
#![allow(dead_code)] // each test binary uses a different slice of this module

use std::sync::Arc;

use async_trait::async_trait;
use deespec_core::AgentGateway;
use deespec_core::AgentRequest;
use deespec_core::AgentResponse;
use deespec_core::Engine;
use deespec_core::EngineConfig;
use deespec_core::FsPromptRepository;
use deespec_core::GatewayError;
use deespec_core::RegisterSpec;
use deespec_core::Workspace;
use deespec_core::register_sbis;
use deespec_protocol::PbiId;
use deespec_protocol::Sbi;
use tempfile::TempDir;

enum StubMode {
    /// Same stdout for every call.
    Always(String),
    /// Every call fails at the transport.
    Fail(String),
}

/// Scriptable agent double. It never writes artifact files itself, which
/// exercises the executor's fallback-artifact path on every agent turn.
pub struct StubGateway {
    mode: StubMode,
}

impl StubGateway {
    pub fn always(output: &str) -> Arc<Self> {
        Arc::new(Self {
            mode: StubMode::Always(output.to_string()),
        })
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            mode: StubMode::Fail(message.to_string()),
        })
    }
}

#[async_trait]
impl AgentGateway for StubGateway {
    async fn execute(&self, _request: AgentRequest) -> Result<AgentResponse, GatewayError> {
        match &self.mode {
            StubMode::Always(output) => Ok(AgentResponse {
                output: output.clone(),
            }),
            StubMode::Fail(message) => Err(GatewayError::Unavailable(message.clone())),
        }
    }
}

/// Engine over a fresh temp workspace wired to the given gateway.
pub async fn engine_with(gateway: Arc<dyn AgentGateway>) -> (Engine, TempDir) {
    let dir = TempDir::new().expect("temp dir");
    let workspace = Workspace::new(dir.path());
    let prompts = Arc::new(FsPromptRepository::new(workspace.prompts_dir()));
    let engine = Engine::new(workspace, gateway, prompts, EngineConfig::default())
        .await
        .expect("engine");
    (engine, dir)
}

/// Register `count` chained SBIs under one PBI and return them in order.
pub async fn register_chain(engine: &Engine, count: usize) -> Vec<Sbi> {
    let specs = (0..count)
        .map(|index| RegisterSpec {
            title: format!("step {index}"),
            body: format!("do step {index}"),
            source_path: None,
            priority: 0,
            estimated_hours: None,
            labels: Vec::new(),
        })
        .collect();
    register_sbis(
        engine.store(),
        engine.workspace(),
        Some(PbiId::from_string("pbi-test")),
        specs,
    )
    .await
    .expect("register chain")
}
