use std::fs::File;
use std::io::Error as IoError;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;
use walkdir::WalkDir;

/// Marker file inside a staging directory. Its presence means "staging is
/// complete; commit may proceed or be replayed on recovery".
pub const INTENT_MARKER: &str = "intent";

#[derive(Debug, Serialize, Deserialize)]
struct IntentMarker {
    target_root: PathBuf,
}

/// Owns the transaction root (`.deespec/var/txn`) and hands out staged
/// transactions. The root is append-only during steady state and swept once
/// at startup via [`TxnManager::recover`].
#[derive(Debug, Clone)]
pub struct TxnManager {
    root: PathBuf,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Intent-marked transactions whose renames were replayed to completion.
    pub replayed: usize,
    /// Staging directories abandoned before their intent marker was written.
    pub discarded: usize,
}

impl TxnManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    /// Begin a transaction: a fresh staging directory under the root.
    pub fn begin(&self) -> std::io::Result<FsTransaction> {
        let dir = self.root.join(format!("txn-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir)?;
        Ok(FsTransaction {
            dir,
            intent: None,
        })
    }

    /// Startup sweep. Every staging directory carrying an intent marker is
    /// replayed (the journal already reflects it); directories without the
    /// marker never reached commit and are removed.
    pub fn recover(&self) -> std::io::Result<RecoveryReport> {
        let mut report = RecoveryReport::default();
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(report),
            Err(err) => return Err(err),
        };
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let dir = entry.path();
            let marker_path = dir.join(INTENT_MARKER);
            if marker_path.exists() {
                let raw = std::fs::read_to_string(&marker_path)?;
                let marker: IntentMarker = serde_json::from_str(&raw)
                    .map_err(|e| IoError::other(format!("corrupt intent marker: {e}")))?;
                link_staged_files(&dir, &marker.target_root)?;
                std::fs::remove_file(&marker_path)?;
                std::fs::remove_dir_all(&dir)?;
                report.replayed += 1;
            } else {
                std::fs::remove_dir_all(&dir)?;
                report.discarded += 1;
            }
        }
        Ok(report)
    }
}

/// One staged multi-file update.
///
/// Lifecycle: `stage_file` any number of times, `mark_intent` once, then
/// `commit`. Any failure before the intent marker leaves the target tree
/// untouched; after the marker, recovery completes the commit.
#[derive(Debug)]
pub struct FsTransaction {
    dir: PathBuf,
    intent: Option<PathBuf>,
}

impl FsTransaction {
    pub fn dir(&self) -> &Path {
        self.dir.as_path()
    }

    /// Write `bytes` to `<staging>/<rel>`, fsyncing the file and its parent
    /// directory.
    pub fn stage_file(&mut self, rel: impl AsRef<Path>, bytes: &[u8]) -> std::io::Result<()> {
        let rel = rel.as_ref();
        if rel.is_absolute() {
            return Err(IoError::other(format!(
                "staged paths must be relative, got {}",
                rel.display()
            )));
        }
        let path = self.dir.join(rel);
        let Some(parent) = path.parent() else {
            return Err(IoError::other("staged path has no parent"));
        };
        std::fs::create_dir_all(parent)?;
        let mut file = File::create(&path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        File::open(parent)?.sync_all()?;
        Ok(())
    }

    /// Durably record that staging is complete and where the staged set will
    /// land. Commit (or crash recovery) may proceed once this returns.
    pub fn mark_intent(&mut self, target_root: impl Into<PathBuf>) -> std::io::Result<()> {
        let marker = IntentMarker {
            target_root: target_root.into(),
        };
        let json = serde_json::to_string(&marker)
            .map_err(|e| IoError::other(format!("failed to serialise intent marker: {e}")))?;
        let path = self.dir.join(INTENT_MARKER);
        let mut file = File::create(&path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        File::open(&self.dir)?.sync_all()?;
        self.intent = Some(marker.target_root);
        Ok(())
    }

    /// Commit the transaction.
    ///
    /// `with_journal` runs first: journal durability precedes file-link
    /// durability, so recovery after a crash mid-commit never produces files
    /// the journal does not know about. Then every staged file is renamed
    /// into the target root and the staging directory is dropped.
    pub fn commit(
        self,
        with_journal: impl FnOnce() -> std::io::Result<()>,
    ) -> std::io::Result<()> {
        let Some(target_root) = self.intent.as_ref() else {
            return Err(IoError::other("commit called before mark_intent"));
        };
        with_journal()?;
        link_staged_files(&self.dir, target_root)?;
        std::fs::remove_file(self.dir.join(INTENT_MARKER))?;
        std::fs::remove_dir_all(&self.dir)?;
        Ok(())
    }

    /// Best-effort abort; failures to clean the staging directory are
    /// non-fatal.
    pub fn cleanup(self) {
        if let Err(err) = std::fs::remove_dir_all(&self.dir) {
            warn!(
                "failed to remove staging directory {}: {err}",
                self.dir.display()
            );
        }
    }
}

/// Rename every staged file under `staging` into `target_root`, fsyncing each
/// destination parent. Renaming over an identical already-linked payload is a
/// no-op, which is what makes crash replay idempotent.
fn link_staged_files(staging: &Path, target_root: &Path) -> std::io::Result<()> {
    for entry in WalkDir::new(staging) {
        let entry = entry.map_err(IoError::other)?;
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.file_name() == INTENT_MARKER && entry.path().parent() == Some(staging) {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(staging)
            .map_err(|e| IoError::other(format!("staged path outside staging dir: {e}")))?;
        let target = target_root.join(rel);
        let Some(parent) = target.parent() else {
            return Err(IoError::other("target path has no parent"));
        };
        std::fs::create_dir_all(parent)?;
        std::fs::rename(entry.path(), &target)?;
        File::open(parent)?.sync_all()?;
    }
    Ok(())
}
