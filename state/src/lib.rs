//! SQLite-backed persistence for the deespec backlog.
//!
//! This crate owns the relational store: task tables for the EPIC/PBI/SBI
//! hierarchy, the dependency edge set, the two lock families, and schema
//! migrations. Turn orchestration lives in `deespec-core`; durable markdown
//! artifacts live in `deespec-fs-txn`.

mod liveness;
mod migrations;
mod model;
mod runtime;

pub use migrations::SCHEMA_VERSION;
pub use model::Lock;
pub use model::LockFamily;
pub use model::LockType;
pub use model::SbiFilter;
pub use model::decode_list;
pub use model::encode_list;
/// Preferred entrypoint: owns the pool and the migration lifecycle.
pub use runtime::StateStore;
pub use runtime::attach_sbi_to_pbi;
pub use runtime::find_sbi;
pub use runtime::list_sbis;
pub use runtime::next_sequence;
pub use runtime::save_dependencies;
pub use runtime::save_sbi;
pub use runtime::state_db_path;

/// Filename of the relational store inside the `.deespec` workspace.
pub const STATE_DB_FILENAME: &str = "deespec.db";
