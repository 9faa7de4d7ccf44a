//! Hash-chained activity journal.
//!
//! One JSON record per line. Each record carries the hash of its predecessor
//! so that edits to a written journal are detectable with [`ActivityJournal::verify`].
//! The chain and the sequence numbers carry on across rotations, including
//! when a journal is reopened after its live file was rotated away.
//!
//! Components log from inside input hooks, so the [`ActivityLogger`] side is
//! [`JournalSink`]: records are queued on a channel and a single writer thread
//! appends them in order.

use crate::activity::ActivityLogger;
use crate::error::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

const MAX_ROTATIONS: usize = 5;
const CHAIN_START: &str = "CHAIN_START";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActivityRecord {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: String,
    pub details: String,
    pub blocked: bool,
    pub prev_hash: String,
    pub hash: String,
}

impl ActivityRecord {
    fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.seq.to_be_bytes());
        hasher.update(
            self.timestamp
                .to_rfc3339_opts(SecondsFormat::Nanos, true)
                .as_bytes(),
        );
        for field in [&self.kind, &self.details, &self.prev_hash] {
            hasher.update((field.len() as u64).to_be_bytes());
            hasher.update(field.as_bytes());
        }
        hasher.update([self.blocked as u8]);
        hex::encode(hasher.finalize())
    }
}

/// Outcome of walking the live journal file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainStatus {
    Intact { records: usize },
    Broken { seq: u64, reason: String },
}

pub struct ActivityJournal {
    path: PathBuf,
    inner: Mutex<ChainState>,
    max_bytes: u64,
}

#[derive(Debug)]
struct ChainState {
    last_seq: u64,
    last_hash: String,
}

impl ActivityJournal {
    pub fn open<P: AsRef<Path>>(path: P, max_bytes: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let (last_seq, last_hash) = Self::load_state(&path)?;
        Ok(Self {
            path,
            inner: Mutex::new(ChainState {
                last_seq,
                last_hash,
            }),
            max_bytes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Picks up from the live file, or from the newest rotated file when the
    /// live one is missing or empty.
    fn load_state(path: &Path) -> Result<(u64, String)> {
        for candidate in [path.to_path_buf(), suffixed(path, 1)] {
            if !candidate.exists() {
                continue;
            }
            if let Some(last) = Self::read_file(&candidate)?.pop() {
                return Ok((last.seq, last.hash));
            }
        }
        Ok((0, CHAIN_START.to_string()))
    }

    fn read_file(path: &Path) -> Result<Vec<ActivityRecord>> {
        let reader = BufReader::new(File::open(path)?);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line)?);
        }
        Ok(records)
    }

    pub fn append(&self, kind: &str, details: &str, blocked: bool) -> Result<ActivityRecord> {
        self.append_at(Utc::now(), kind, details, blocked)
    }

    fn append_at(
        &self,
        timestamp: DateTime<Utc>,
        kind: &str,
        details: &str,
        blocked: bool,
    ) -> Result<ActivityRecord> {
        let mut state = self.inner.lock();
        self.rotate_if_needed()?;

        let mut record = ActivityRecord {
            seq: state.last_seq + 1,
            timestamp,
            kind: kind.to_string(),
            details: details.to_string(),
            blocked,
            prev_hash: state.last_hash.clone(),
            hash: String::new(),
        };
        record.hash = record.digest();

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", serde_json::to_string(&record)?)?;
        file.flush()?;

        state.last_seq = record.seq;
        state.last_hash = record.hash.clone();
        Ok(record)
    }

    fn rotate_if_needed(&self) -> Result<()> {
        match fs::metadata(&self.path) {
            Ok(metadata) if metadata.len() >= self.max_bytes => {}
            _ => return Ok(()),
        }
        for i in (1..=MAX_ROTATIONS).rev() {
            let rotated = self.path_with_suffix(i);
            if rotated.exists() {
                if i == MAX_ROTATIONS {
                    fs::remove_file(&rotated)?;
                } else {
                    fs::rename(&rotated, self.path_with_suffix(i + 1))?;
                }
            }
        }
        fs::rename(&self.path, self.path_with_suffix(1))?;
        Ok(())
    }

    /// Newest first. `blocked_only` keeps just the suppressed actions.
    pub fn recent(&self, limit: usize, blocked_only: bool) -> Result<Vec<ActivityRecord>> {
        if !self.path.exists() {
            return Ok(vec![]);
        }
        let _state = self.inner.lock();
        let mut records: Vec<ActivityRecord> = Self::read_file(&self.path)?
            .into_iter()
            .filter(|r| !blocked_only || r.blocked)
            .collect();
        records.reverse();
        records.truncate(limit);
        Ok(records)
    }

    pub fn verify(&self) -> Result<ChainStatus> {
        if !self.path.exists() {
            return Ok(ChainStatus::Intact { records: 0 });
        }
        let _state = self.inner.lock();
        let records = Self::read_file(&self.path)?;
        let mut expected_prev = records
            .first()
            .map(|r| r.prev_hash.clone())
            .unwrap_or_else(|| CHAIN_START.to_string());
        for record in &records {
            if record.prev_hash != expected_prev {
                return Ok(ChainStatus::Broken {
                    seq: record.seq,
                    reason: "previous hash mismatch".into(),
                });
            }
            if record.digest() != record.hash {
                return Ok(ChainStatus::Broken {
                    seq: record.seq,
                    reason: "record hash mismatch".into(),
                });
            }
            expected_prev = record.hash.clone();
        }
        Ok(ChainStatus::Intact {
            records: records.len(),
        })
    }

    fn path_with_suffix(&self, index: usize) -> PathBuf {
        suffixed(&self.path, index)
    }
}

fn suffixed(path: &Path, index: usize) -> PathBuf {
    let mut p = path.to_path_buf();
    let filename = p
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "activity.log".to_string());
    p.set_file_name(format!("{}.{}", filename, index));
    p
}

struct Pending {
    timestamp: DateTime<Utc>,
    kind: String,
    details: String,
    blocked: bool,
}

/// Queues records for a background writer that owns the journal file.
///
/// `log` only timestamps the record and sends it; it never touches the
/// filesystem. [`JournalSink::close`] drains the queue and joins the writer.
pub struct JournalSink {
    tx: Mutex<Option<Sender<Pending>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl JournalSink {
    pub fn spawn(journal: Arc<ActivityJournal>) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel::<Pending>();
        let writer = thread::Builder::new()
            .name("activity-journal".to_string())
            .spawn(move || {
                for pending in rx {
                    let written = journal.append_at(
                        pending.timestamp,
                        &pending.kind,
                        &pending.details,
                        pending.blocked,
                    );
                    if let Err(err) = written {
                        warn!(kind = %pending.kind, error = %err, "activity journal append failed");
                    }
                }
                debug!(path = %journal.path().display(), "activity journal writer exited");
            })?;
        Ok(Self {
            tx: Mutex::new(Some(tx)),
            writer: Mutex::new(Some(writer)),
        })
    }

    /// Writes out everything queued so far. Later records are dropped.
    pub fn close(&self) {
        drop(self.tx.lock().take());
        if let Some(writer) = self.writer.lock().take() {
            if writer.join().is_err() {
                warn!("activity journal writer panicked");
            }
        }
    }
}

impl ActivityLogger for JournalSink {
    fn log(&self, kind: &str, details: &str, blocked: bool) {
        let pending = Pending {
            timestamp: Utc::now(),
            kind: kind.to_string(),
            details: details.to_string(),
            blocked,
        };
        if let Some(tx) = self.tx.lock().as_ref() {
            if tx.send(pending).is_err() {
                warn!(kind, "activity journal writer is gone; record dropped");
            }
        }
    }
}

impl Drop for JournalSink {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn chain_links_and_rotates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("activity.log");
        let journal = ActivityJournal::open(&path, 512).unwrap();
        for i in 0..40 {
            let r = journal
                .append("BLOCKED_KEY_ATTEMPT", &format!("alt+f4 #{i}"), true)
                .unwrap();
            assert_eq!(r.seq as usize, i + 1);
            assert!(!r.hash.is_empty());
        }
        assert!(path.with_file_name("activity.log.1").exists());
        assert!(matches!(journal.verify().unwrap(), ChainStatus::Intact { .. }));
    }

    #[test]
    fn reopen_continues_sequence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("activity.log");
        {
            let journal = ActivityJournal::open(&path, 1 << 20).unwrap();
            journal.append("A", "one", false).unwrap();
            journal.append("B", "two", false).unwrap();
        }
        let journal = ActivityJournal::open(&path, 1 << 20).unwrap();
        let third = journal.append("C", "three", false).unwrap();
        assert_eq!(third.seq, 3);
        assert_eq!(journal.verify().unwrap(), ChainStatus::Intact { records: 3 });
    }

    #[test]
    fn reopen_after_rotation_continues_from_rotated_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("activity.log");
        let last = {
            let journal = ActivityJournal::open(&path, 1 << 20).unwrap();
            journal.append("A", "one", false).unwrap();
            journal.append("B", "two", false).unwrap()
        };
        fs::rename(&path, path.with_file_name("activity.log.1")).unwrap();

        let journal = ActivityJournal::open(&path, 1 << 20).unwrap();
        let next = journal.append("C", "three", false).unwrap();
        assert_eq!(next.seq, 3);
        assert_eq!(next.prev_hash, last.hash);
    }

    #[test]
    fn sink_log_leaves_file_to_writer() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("activity.log");
        let journal = Arc::new(ActivityJournal::open(&path, 1 << 20).unwrap());

        // Stall the writer on the chain lock; log must still return at once.
        let stalled = journal.inner.lock();
        let sink = JournalSink::spawn(journal.clone()).unwrap();
        sink.log("MOUSE_BLOCKED", "middle at (10, 20)", true);
        sink.log("BLOCKED_KEY_ATTEMPT", "alt+tab", true);
        assert!(!path.exists());

        drop(stalled);
        sink.close();
        let records = journal.recent(10, false).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].details, "alt+tab");
        assert_eq!(records[1].seq, 1);
        assert_eq!(journal.verify().unwrap(), ChainStatus::Intact { records: 2 });

        sink.log("LATE", "after close", false);
        assert_eq!(journal.recent(10, false).unwrap().len(), 2);
    }

    #[test]
    fn recent_filters_blocked_newest_first() {
        let dir = tempdir().unwrap();
        let journal = ActivityJournal::open(dir.path().join("a.log"), 1 << 20).unwrap();
        journal.append("LOCKDOWN_START", "keyboard", false).unwrap();
        journal.append("MOUSE_BLOCKED", "middle", true).unwrap();
        journal.append("BLOCKED_KEY_ATTEMPT", "alt+tab", true).unwrap();

        let blocked = journal.recent(10, true).unwrap();
        assert_eq!(blocked.len(), 2);
        assert_eq!(blocked[0].details, "alt+tab");

        let last = journal.recent(1, false).unwrap();
        assert_eq!(last[0].seq, 3);
    }

    #[test]
    fn tampered_line_breaks_chain() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("activity.log");
        let journal = ActivityJournal::open(&path, 1 << 20).unwrap();
        journal.append("MOUSE_BLOCKED", "middle", true).unwrap();
        journal.append("MOUSE_BLOCKED", "x1", true).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        fs::write(&path, text.replace("\"x1\"", "\"left\"")).unwrap();

        assert_eq!(
            journal.verify().unwrap(),
            ChainStatus::Broken {
                seq: 2,
                reason: "record hash mismatch".into()
            }
        );
    }
}
