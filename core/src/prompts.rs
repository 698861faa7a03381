use std::path::PathBuf;

use deespec_protocol::SbiId;
use deespec_protocol::Step;

/// Source of rendered prompt templates. The engine supplies the variables;
/// template storage and syntax stay behind this seam.
pub trait PromptRepository: Send + Sync {
    /// Template for a workflow step.
    fn load(&self, step: Step) -> anyhow::Result<String>;

    /// Free-form label snippet spliced into prompts when an SBI carries the
    /// label.
    fn load_label_content(&self, name: &str) -> anyhow::Result<String>;

    /// Label names attached to an SBI's prompt context.
    fn load_meta_labels(&self, sbi_id: &SbiId) -> anyhow::Result<Vec<String>>;
}

/// Substitute `{name}` placeholders. Unknown placeholders are left alone so a
/// template typo shows up in the prompt instead of vanishing silently.
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut rendered = template.to_string();
    for (name, value) in vars {
        rendered = rendered.replace(&format!("{{{name}}}"), value);
    }
    rendered
}

const DEFAULT_IMPLEMENT: &str = r#"# Implement

You are working on SBI {sbi_id} (turn {turn}, attempt {attempt}).

## Task
{title}

{description}

## Prior artifacts
{artifacts}

Implement the task. Write your report to {artifact_path} and end it with a
`## Summary` section containing a line `DECISION: SUCCEEDED|NEEDS_CHANGES|FAILED`.
"#;

const DEFAULT_REVIEW: &str = r#"# Review

You are reviewing SBI {sbi_id} (turn {turn}, attempt {attempt}).

## Task
{title}

{description}

## Prior artifacts
{artifacts}

Review the latest implementation. Write your report to {artifact_path} with a
`## Summary` section containing `DECISION: SUCCEEDED|NEEDS_CHANGES|FAILED`.
"#;

const DEFAULT_FORCE_IMPLEMENT: &str = r#"# Final implementation pass

SBI {sbi_id} has exhausted its review attempts (turn {turn}). Apply the
outstanding review feedback as best you can; this is the last turn and the
task will be closed afterwards.

## Task
{title}

{description}

## Prior artifacts
{artifacts}

Write your report to {artifact_path}.
"#;

const DEFAULT_DONE: &str = r#"# Done

SBI {sbi_id} is complete. No action required.
"#;

const DEFAULT_PICK: &str = r#"# Pick

SBI {sbi_id} has been selected for execution.
"#;

/// Filesystem-backed templates under `.deespec/prompts/`, with built-in
/// fallbacks so a bare workspace still produces usable prompts.
pub struct FsPromptRepository {
    dir: PathBuf,
}

impl FsPromptRepository {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn read_or(&self, file: &str, fallback: &str) -> String {
        std::fs::read_to_string(self.dir.join(file)).unwrap_or_else(|_| fallback.to_string())
    }
}

impl PromptRepository for FsPromptRepository {
    fn load(&self, step: Step) -> anyhow::Result<String> {
        let (file, fallback) = match step {
            Step::Pick => ("pick.md", DEFAULT_PICK),
            Step::Implement => ("implement.md", DEFAULT_IMPLEMENT),
            Step::Review => ("review.md", DEFAULT_REVIEW),
            Step::ForceImplement => ("force_implement.md", DEFAULT_FORCE_IMPLEMENT),
            Step::Done => ("done.md", DEFAULT_DONE),
        };
        Ok(self.read_or(file, fallback))
    }

    fn load_label_content(&self, name: &str) -> anyhow::Result<String> {
        let path = self.dir.join("labels").join(format!("{name}.md"));
        Ok(std::fs::read_to_string(path).unwrap_or_default())
    }

    fn load_meta_labels(&self, _sbi_id: &SbiId) -> anyhow::Result<Vec<String>> {
        Ok(Vec::new())
    }
}
