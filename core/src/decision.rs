use std::path::Path;
use std::path::PathBuf;

use deespec_protocol::Decision;
use serde_json::Value;

/// Where the extractor found its answer. Recorded for observability; the
/// engine only acts on the decision itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionSource {
    /// Head and tail of the artifact agreed.
    MetadataMatch,
    HeadScan,
    TailScan,
    StdoutScan,
    MockOutput,
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractedDecision {
    pub decision: Decision,
    pub source: DecisionSource,
}

/// Stdout prefixes emitted by stub agents in test harnesses. Their output
/// defaults to SUCCEEDED when nothing more specific is found.
const MOCK_OUTPUT_PREFIXES: &[&str] = &["mock-agent:", "[mock-agent]"];

const HEAD_SCAN_LINES: usize = 20;
const TAIL_SCAN_LINES: usize = 5;

/// Extract the agent's decision from its artifact and raw stdout.
///
/// `artifact_candidates` are probed in order (reports layout first, then the
/// legacy specs layout); the first readable file wins. The artifact's head
/// (`## Summary` section) and tail (trailing JSON object) are cross-checked;
/// stdout is the fallback. The default is NEEDS_CHANGES — fail closed toward
/// another attempt, never toward DONE.
pub fn extract_decision(artifact_candidates: &[PathBuf], stdout: &str) -> ExtractedDecision {
    let artifact = artifact_candidates
        .iter()
        .find_map(|path| read_artifact(path));

    if let Some(text) = artifact.as_deref() {
        let head = scan_head(text);
        let tail = scan_tail(text);
        match (head, tail) {
            (Some(h), Some(t)) if h == t => {
                return ExtractedDecision {
                    decision: h,
                    source: DecisionSource::MetadataMatch,
                };
            }
            (Some(h), None) => {
                return ExtractedDecision {
                    decision: h,
                    source: DecisionSource::HeadScan,
                };
            }
            (None, Some(t)) => {
                return ExtractedDecision {
                    decision: t,
                    source: DecisionSource::TailScan,
                };
            }
            // Disagreement (or nothing): fall through to stdout.
            _ => {}
        }
    }

    if let Some(decision) = scan_stdout(stdout) {
        return ExtractedDecision {
            decision,
            source: DecisionSource::StdoutScan,
        };
    }
    if MOCK_OUTPUT_PREFIXES
        .iter()
        .any(|prefix| stdout.trim_start().starts_with(prefix))
    {
        return ExtractedDecision {
            decision: Decision::Succeeded,
            source: DecisionSource::MockOutput,
        };
    }
    ExtractedDecision {
        decision: Decision::NeedsChanges,
        source: DecisionSource::Default,
    }
}

fn read_artifact(path: &Path) -> Option<String> {
    std::fs::read_to_string(path).ok()
}

/// Within the first 20 lines, find a `## Summary` section and a literal
/// `DECISION: X` inside it.
fn scan_head(text: &str) -> Option<Decision> {
    let mut in_summary = false;
    for line in text.lines().take(HEAD_SCAN_LINES) {
        let trimmed = line.trim();
        if trimmed.starts_with("##") {
            in_summary = trimmed
                .trim_start_matches('#')
                .trim()
                .eq_ignore_ascii_case("summary");
            continue;
        }
        if in_summary && let Some(decision) = parse_decision_line(trimmed) {
            return Some(decision);
        }
    }
    None
}

/// Within the last 5 non-empty lines, look for a JSON object carrying a
/// `decision` field.
fn scan_tail(text: &str) -> Option<Decision> {
    text.lines()
        .rev()
        .filter(|line| !line.trim().is_empty())
        .take(TAIL_SCAN_LINES)
        .find_map(|line| {
            let value: Value = serde_json::from_str(line.trim()).ok()?;
            let decision = value.get("decision")?.as_str()?;
            Decision::parse(decision.to_ascii_uppercase().as_str())
        })
}

fn parse_decision_line(line: &str) -> Option<Decision> {
    let rest = line.strip_prefix("DECISION:")?.trim();
    Decision::parse(rest)
}

/// Substring scan for `DECISION: X` or bracketed `[X]` tokens.
fn scan_stdout(stdout: &str) -> Option<Decision> {
    if let Some(idx) = stdout.find("DECISION:") {
        let rest = stdout[idx + "DECISION:".len()..].trim_start();
        for candidate in ["SUCCEEDED", "NEEDS_CHANGES", "FAILED"] {
            if rest.starts_with(candidate) {
                return Decision::parse(candidate);
            }
        }
    }
    for (token, decision) in [
        ("[SUCCEEDED]", Decision::Succeeded),
        ("[NEEDS_CHANGES]", Decision::NeedsChanges),
        ("[FAILED]", Decision::Failed),
    ] {
        if stdout.contains(token) {
            return Some(decision);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn write_artifact(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).expect("write artifact");
        path
    }

    #[test]
    fn agreeing_head_and_tail_yield_metadata_match() {
        let dir = TempDir::new().expect("temp dir");
        let artifact = write_artifact(
            &dir,
            "review_1.md",
            "# Report\n\n## Summary\nDECISION: SUCCEEDED\n\nbody\n\n{\"decision\":\"succeeded\"}\n",
        );
        let extracted = extract_decision(&[artifact], "");
        assert_eq!(extracted.decision, Decision::Succeeded);
        assert_eq!(extracted.source, DecisionSource::MetadataMatch);
    }

    #[test]
    fn head_alone_is_used() {
        let dir = TempDir::new().expect("temp dir");
        let artifact = write_artifact(
            &dir,
            "review_1.md",
            "## Summary\nDECISION: NEEDS_CHANGES\n\nlong body follows\n",
        );
        let extracted = extract_decision(&[artifact], "");
        assert_eq!(extracted.decision, Decision::NeedsChanges);
        assert_eq!(extracted.source, DecisionSource::HeadScan);
    }

    #[test]
    fn tail_json_alone_is_used_and_uppercased() {
        let dir = TempDir::new().expect("temp dir");
        let artifact = write_artifact(
            &dir,
            "review_1.md",
            "# Report\nno summary here\n\n{\"decision\":\"failed\",\"turn\":3}\n",
        );
        let extracted = extract_decision(&[artifact], "");
        assert_eq!(extracted.decision, Decision::Failed);
        assert_eq!(extracted.source, DecisionSource::TailScan);
    }

    #[test]
    fn disagreement_falls_back_to_stdout() {
        let dir = TempDir::new().expect("temp dir");
        let artifact = write_artifact(
            &dir,
            "review_1.md",
            "## Summary\nDECISION: SUCCEEDED\n\n{\"decision\":\"failed\"}\n",
        );
        let extracted = extract_decision(&[artifact], "agent says DECISION: NEEDS_CHANGES");
        assert_eq!(extracted.decision, Decision::NeedsChanges);
        assert_eq!(extracted.source, DecisionSource::StdoutScan);
    }

    #[test]
    fn summary_outside_first_twenty_lines_is_ignored() {
        let dir = TempDir::new().expect("temp dir");
        let mut content = "filler\n".repeat(25);
        content.push_str("## Summary\nDECISION: SUCCEEDED\n");
        let artifact = write_artifact(&dir, "review_1.md", &content);
        let extracted = extract_decision(&[artifact], "");
        assert_eq!(extracted.source, DecisionSource::Default);
        assert_eq!(extracted.decision, Decision::NeedsChanges);
    }

    #[test]
    fn first_existing_candidate_wins() {
        let dir = TempDir::new().expect("temp dir");
        let missing = dir.path().join("reports/review_1.md");
        let legacy = write_artifact(&dir, "legacy.md", "## Summary\nDECISION: FAILED\n");
        let extracted = extract_decision(&[missing, legacy], "");
        assert_eq!(extracted.decision, Decision::Failed);
    }

    #[test]
    fn stdout_bracket_tokens_are_recognised() {
        let extracted = extract_decision(&[], "review finished [SUCCEEDED]");
        assert_eq!(extracted.decision, Decision::Succeeded);
        assert_eq!(extracted.source, DecisionSource::StdoutScan);
    }

    #[test]
    fn mock_agent_output_defaults_to_succeeded() {
        let extracted = extract_decision(&[], "mock-agent: did the thing");
        assert_eq!(extracted.decision, Decision::Succeeded);
        assert_eq!(extracted.source, DecisionSource::MockOutput);
    }

    #[test]
    fn empty_everything_defaults_to_needs_changes() {
        let extracted = extract_decision(&[], "");
        assert_eq!(extracted.decision, Decision::NeedsChanges);
        assert_eq!(extracted.source, DecisionSource::Default);
    }
}
