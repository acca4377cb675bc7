//! Snapshot journal: inbound snapshots as JSON Lines.
//!
//! Transports append each received message; replay reads them back in order.
//! A line that does not parse as a snapshot is skipped, which leaves the
//! dataset exactly as it was for that cycle.

use crate::{Result, Snapshot};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Default journal location under a data directory.
pub fn journal_path(data_dir: &Path) -> PathBuf {
    data_dir.join("journal").join("snapshots.jsonl")
}

/// Destination for received snapshots
pub trait SnapshotSink {
    fn append(&mut self, snapshot: &Snapshot) -> Result<()>;
}

/// JSONL-based snapshot sink with file locking
pub struct JsonlJournal {
    path: PathBuf,
}

impl JsonlJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_parent_dir(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

impl SnapshotSink for JsonlJournal {
    fn append(&mut self, snapshot: &Snapshot) -> Result<()> {
        self.ensure_parent_dir()?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.lock_exclusive()?;

        let mut writer = std::io::BufWriter::new(&file);
        let line = serde_json::to_string(snapshot)?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        drop(writer);

        file.unlock()?;
        tracing::debug!(
            "Appended {} snapshot to {:?}",
            if snapshot.delta { "delta" } else { "full" },
            self.path
        );
        Ok(())
    }
}

/// Read all snapshots from a journal file, in order
pub fn read_snapshots(path: &Path) -> Result<Vec<Snapshot>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)?;
    file.lock_shared()?;

    let reader = BufReader::new(&file);
    let mut snapshots = Vec::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<Snapshot>(&line) {
            Ok(snapshot) => snapshots.push(snapshot),
            Err(e) => {
                tracing::warn!("Skipping malformed snapshot at line {}: {}", line_num + 1, e);
            }
        }
    }

    file.unlock()?;
    tracing::debug!("Read {} snapshots from {:?}", snapshots.len(), path);
    Ok(snapshots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Reading;

    fn snapshot(delta: bool, mills: i64) -> Snapshot {
        Snapshot {
            delta,
            sgvs: Some(vec![Reading {
                mills,
                mgdl: 100.0,
                ..Default::default()
            }]),
            ..Default::default()
        }
    }

    #[test]
    fn test_append_and_read_in_order() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("journal").join("snapshots.jsonl");

        let mut journal = JsonlJournal::new(&path);
        journal.append(&snapshot(false, 1)).unwrap();
        journal.append(&snapshot(true, 2)).unwrap();

        let snapshots = read_snapshots(&path).unwrap();
        assert_eq!(snapshots.len(), 2);
        assert!(!snapshots[0].delta);
        assert!(snapshots[1].delta);
        assert_eq!(snapshots[1].sgvs.as_ref().unwrap()[0].mills, 2);
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("snapshots.jsonl");
        std::fs::write(
            &path,
            concat!(
                "{\"delta\": false, \"sgvs\": []}\n",
                "not json\n",
                "\n",
                "{\"delta\": true, \"sgvs\": [{\"mgdl\": 5}]}\n",
                "{\"delta\": true}\n",
            ),
        )
        .unwrap();

        let snapshots = read_snapshots(&path).unwrap();
        assert_eq!(snapshots.len(), 3);
        assert_eq!(snapshots[1].sgvs.as_ref().unwrap()[0].mills, 0);
    }

    #[test]
    fn test_read_missing_journal() {
        let temp_dir = tempfile::tempdir().unwrap();
        let snapshots = read_snapshots(&temp_dir.path().join("missing.jsonl")).unwrap();
        assert!(snapshots.is_empty());
    }
}
