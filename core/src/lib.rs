//! The deespec runtime engine: pick-and-lease scheduling, the turn executor,
//! decision extraction, SBI registration, and the agent/prompt seams.
//!
//! The operator's outer loop calls [`Engine::execute_one_turn`] repeatedly;
//! parallelism is achieved by running several workers, each driving a
//! distinct leased SBI.

mod decision;
mod engine;
mod executor;
mod gateway;
mod heartbeat;
mod maintenance;
mod prompts;
mod register;
mod scheduler;
mod workspace;

pub use decision::DecisionSource;
pub use decision::ExtractedDecision;
pub use decision::extract_decision;
pub use engine::Engine;
pub use engine::EngineConfig;
pub use engine::ExecuteOutcome;
pub use engine::NO_TASKS;
pub use executor::TurnOutcome;
pub use gateway::AgentGateway;
pub use gateway::AgentRequest;
pub use gateway::AgentResponse;
pub use gateway::CliAgentGateway;
pub use gateway::GatewayError;
pub use heartbeat::LeaseHeartbeat;
pub use maintenance::ArchiveReport;
pub use maintenance::archive_workspace;
pub use prompts::FsPromptRepository;
pub use prompts::PromptRepository;
pub use prompts::render_template;
pub use register::RegisterSpec;
pub use register::register_sbis;
pub use scheduler::pick_and_lock_next_sbi;
pub use workspace::Workspace;
