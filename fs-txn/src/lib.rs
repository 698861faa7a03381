//! Crash-safe filesystem writes for the deespec working tree.
//!
//! Two cooperating pieces live here. [`TxnManager`] stages multi-file updates
//! in a temp directory and renames them into place so a crash leaves either
//! the pre- or the post-state, never a partial file. [`Journal`] appends one
//! JSON object per line to the audit log with `O_APPEND` and a single write,
//! fsyncing the file and its parent directory before reporting success.

mod journal;
mod txn;

pub use journal::Journal;
pub use txn::FsTransaction;
pub use txn::INTENT_MARKER;
pub use txn::RecoveryReport;
pub use txn::TxnManager;
