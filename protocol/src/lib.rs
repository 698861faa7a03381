//! Domain model for the deespec backlog: task identities, the EPIC/PBI/SBI
//! hierarchy, the SBI status machine, and the journal record shape.
//!
//! This crate is deliberately free of I/O. Storage lives in `deespec-state`,
//! durable file handling in `deespec-fs-txn`, and the turn loop in
//! `deespec-core`.

mod ids;
mod journal;
mod status;
mod task;

pub use ids::EpicId;
pub use ids::PbiId;
pub use ids::SbiId;
pub use journal::JournalRecord;
pub use status::Decision;
pub use status::JournalDecision;
pub use status::SbiStatus;
pub use status::Step;
pub use status::Transition;
pub use status::TransitionError;
pub use status::next_status;
pub use task::Epic;
pub use task::Pbi;
pub use task::Sbi;
pub use task::TaskKind;

/// Default cap on executor invocations per SBI.
pub const DEFAULT_MAX_TURNS: i64 = 8;
/// Default cap on review retries per SBI.
pub const DEFAULT_MAX_ATTEMPTS: i64 = 3;
