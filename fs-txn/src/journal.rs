use std::fs::File;
use std::fs::OpenOptions;
use std::io::Error as IoError;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use deespec_protocol::JournalRecord;

/// Append-only NDJSON audit log (`var/journal.ndjson`).
///
/// The full line (record + trailing newline) is written with a single
/// `write(2)` call on a descriptor opened with `O_APPEND`, so concurrent
/// appenders do not interleave. Durability order matters to the transaction
/// protocol: the record is fsynced before any staged file is linked into the
/// target tree.
#[derive(Debug, Clone)]
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    pub fn append(&self, record: &JournalRecord) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut line = serde_json::to_string(record)
            .map_err(|e| IoError::other(format!("failed to serialise journal record: {e}")))?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.sync_all()?;
        if let Some(parent) = self.path.parent() {
            File::open(parent)?.sync_all()?;
        }
        Ok(())
    }

    /// Read every record back, skipping lines that fail to parse. Used by
    /// audits and tests; the engine itself never reads the journal.
    pub fn read_all(&self) -> std::io::Result<Vec<JournalRecord>> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };
        let mut records = Vec::new();
        for line in text.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<JournalRecord>(line) {
                Ok(record) => records.push(record),
                Err(err) => {
                    tracing::warn!("skipping malformed journal line: {err}");
                }
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deespec_protocol::JournalDecision;
    use deespec_protocol::SbiId;
    use deespec_protocol::SbiStatus;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn record(turn: i64) -> JournalRecord {
        JournalRecord::new(
            chrono::DateTime::from_timestamp(1_700_000_000 + turn, 0).expect("timestamp"),
            &SbiId::from_string("sbi-j"),
            turn,
            "implement",
            SbiStatus::Implementing,
            1,
            JournalDecision::Pending,
            12,
            None,
            vec![String::new()],
        )
    }

    #[test]
    fn append_then_read_preserves_order_and_content() {
        let dir = TempDir::new().expect("temp dir");
        let journal = Journal::new(dir.path().join("var/journal.ndjson"));
        journal.append(&record(1)).expect("append 1");
        journal.append(&record(2)).expect("append 2");

        let records = journal.read_all().expect("read");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].turn, 1);
        assert_eq!(records[1].turn, 2);
    }

    #[test]
    fn read_all_on_missing_file_is_empty() {
        let dir = TempDir::new().expect("temp dir");
        let journal = Journal::new(dir.path().join("nope.ndjson"));
        assert_eq!(journal.read_all().expect("read"), Vec::new());
    }

    #[test]
    fn malformed_lines_are_skipped_not_fatal() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("journal.ndjson");
        let journal = Journal::new(path.clone());
        journal.append(&record(1)).expect("append");
        std::fs::write(
            &path,
            format!(
                "{}not json\n",
                std::fs::read_to_string(&path).expect("read back")
            ),
        )
        .expect("corrupt");

        let records = journal.read_all().expect("read");
        assert_eq!(records.len(), 1);
    }
}
