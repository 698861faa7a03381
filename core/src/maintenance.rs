use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use deespec_state::LockFamily;
use deespec_state::LockType;
use deespec_state::StateStore;
use tracing::info;

use crate::workspace::Workspace;

/// State-lock key serialising workspace-wide maintenance.
const ARCHIVE_LOCK_ID: &str = "workspace_archive";
const ARCHIVE_LOCK_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ArchiveReport {
    /// Where the archived journal and reports landed.
    pub archive_dir: Option<PathBuf>,
    pub archived_journal: bool,
    pub archived_report_dirs: usize,
}

/// Move the audit journal and all report trees into
/// `.deespec/archive/<timestamp>/`, leaving live state (the store, specs,
/// prompts) untouched.
///
/// This is a non-turn mutation of shared paths, so it runs under the state
/// write-lock; concurrent workers keep executing turns and simply start a
/// fresh journal.
pub async fn archive_workspace(
    store: &StateStore,
    workspace: &Workspace,
) -> anyhow::Result<ArchiveReport> {
    let lock = store
        .acquire_lock(
            LockFamily::State,
            ARCHIVE_LOCK_ID,
            LockType::Write,
            ARCHIVE_LOCK_TTL,
        )
        .await?;
    if lock.is_none() {
        return Err(anyhow::anyhow!(
            "another process is archiving this workspace"
        ));
    }
    let result = archive_locked(workspace);
    store
        .release_lock(LockFamily::State, ARCHIVE_LOCK_ID)
        .await?;
    result
}

fn archive_locked(workspace: &Workspace) -> anyhow::Result<ArchiveReport> {
    let home = workspace.home();
    let journal_path = workspace.journal_path();
    let reports_root = home.join("reports/sbi");

    let mut report = ArchiveReport::default();
    let have_journal = journal_path.is_file();
    let report_dirs: Vec<PathBuf> = match std::fs::read_dir(&reports_root) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect(),
        Err(_) => Vec::new(),
    };
    if !have_journal && report_dirs.is_empty() {
        return Ok(report);
    }

    let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
    let archive_dir = home.join("archive").join(stamp.to_string());
    std::fs::create_dir_all(&archive_dir)?;

    if have_journal {
        std::fs::rename(&journal_path, archive_dir.join("journal.ndjson"))?;
        report.archived_journal = true;
    }
    if !report_dirs.is_empty() {
        let target_root = archive_dir.join("reports/sbi");
        std::fs::create_dir_all(&target_root)?;
        for dir in report_dirs {
            let Some(name) = dir.file_name() else {
                continue;
            };
            std::fs::rename(&dir, target_root.join(name))?;
            report.archived_report_dirs += 1;
        }
    }
    info!(
        archive = %archive_dir.display(),
        journal = report.archived_journal,
        report_dirs = report.archived_report_dirs,
        "workspace archived"
    );
    report.archive_dir = Some(archive_dir);
    Ok(report)
}
