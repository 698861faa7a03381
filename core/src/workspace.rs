use std::path::Path;
use std::path::PathBuf;

use deespec_protocol::SbiId;
use deespec_protocol::Step;

/// Name of the state directory created under the project root.
pub const DEESPEC_DIR: &str = ".deespec";

/// On-disk layout of a deespec workspace:
///
/// ```text
/// .deespec/
///   deespec.db                       relational store
///   var/
///     journal.ndjson                 append-only audit log
///     txn/<txn-id>/                  staged files + intent marker
///   specs/sbi/<sbi_id>/              original spec.md
///   reports/sbi/<sbi_id>/            implement_<turn>.md, review_<turn>.md
///   prompts/                         step templates
/// ```
#[derive(Debug, Clone)]
pub struct Workspace {
    home: PathBuf,
}

impl Workspace {
    /// Workspace rooted at `project_root/.deespec`.
    pub fn new(project_root: impl AsRef<Path>) -> Self {
        Self {
            home: project_root.as_ref().join(DEESPEC_DIR),
        }
    }

    pub fn home(&self) -> &Path {
        self.home.as_path()
    }

    pub fn db_path(&self) -> PathBuf {
        deespec_state::state_db_path(&self.home)
    }

    pub fn journal_path(&self) -> PathBuf {
        self.home.join("var/journal.ndjson")
    }

    pub fn txn_root(&self) -> PathBuf {
        self.home.join("var/txn")
    }

    pub fn prompts_dir(&self) -> PathBuf {
        self.home.join("prompts")
    }

    pub fn spec_dir(&self, sbi_id: &SbiId) -> PathBuf {
        self.home.join("specs/sbi").join(sbi_id.as_str())
    }

    pub fn reports_dir(&self, sbi_id: &SbiId) -> PathBuf {
        self.home.join("reports/sbi").join(sbi_id.as_str())
    }

    /// Artifact path for `(sbi, step, turn)`, relative to the workspace home.
    /// Later turns always land on new paths; artifacts are never overwritten.
    pub fn artifact_rel(&self, sbi_id: &SbiId, step: Step, turn: i64) -> String {
        format!(
            "reports/sbi/{}/{}_{turn}.md",
            sbi_id.as_str(),
            step.as_str()
        )
    }

    pub fn artifact_abs(&self, sbi_id: &SbiId, step: Step, turn: i64) -> PathBuf {
        self.home.join(self.artifact_rel(sbi_id, step, turn))
    }

    /// Candidate locations for an artifact, probed in order by the decision
    /// extractor: the reports layout first, then the legacy specs layout.
    pub fn artifact_candidates(&self, sbi_id: &SbiId, step: Step, turn: i64) -> Vec<PathBuf> {
        let file = format!("{}_{turn}.md", step.as_str());
        vec![
            self.reports_dir(sbi_id).join(&file),
            self.spec_dir(sbi_id).join(&file),
        ]
    }

    /// Artifacts written by earlier turns, in turn order. Fed into prompts as
    /// context.
    pub fn prior_artifacts(&self, sbi_id: &SbiId) -> Vec<PathBuf> {
        let dir = self.reports_dir(sbi_id);
        let Ok(entries) = std::fs::read_dir(&dir) else {
            return Vec::new();
        };
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "md"))
            .collect();
        paths.sort();
        paths
    }

    /// Create the workspace tree. Idempotent.
    pub fn init(&self) -> std::io::Result<()> {
        for dir in [
            self.home.clone(),
            self.home.join("var"),
            self.txn_root(),
            self.home.join("specs/sbi"),
            self.home.join("reports/sbi"),
            self.prompts_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}
