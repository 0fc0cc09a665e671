//! Hash-chained JSON Lines audit file.
//!
//! Every line is a [`ChainEntry`]: the record, its sequence number, the hash
//! of the previous entry and its own hash. The hash covers
//! `{seq, prev_hash, record}`, so editing, dropping or reordering a line
//! breaks the chain at that point. The first entry links to an all-zero hash.
//!
//! A failed append is truncated away before the error is returned, so the file
//! only ever holds whole entries. An unterminated last line left by a crash is
//! dropped when the sink is reopened.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info, warn};

use super::{AuditError, AuditRecord, AuditSink};

pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("audit file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed audit entry at line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("audit chain broken at entry {seq}")]
    Broken { seq: u64 },

    #[error("audit file {} could not be rolled back after a failed write", .0.display())]
    Poisoned(PathBuf),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEntry {
    pub seq: u64,
    pub prev_hash: String,
    pub record: AuditRecord,
    pub hash: String,
}

#[derive(Serialize)]
struct ChainLink<'a> {
    seq: u64,
    prev_hash: &'a str,
    record: &'a AuditRecord,
}

/// Result of a successful chain verification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainSummary {
    pub entries: u64,
    pub head: String,
}

fn link_hash(seq: u64, prev_hash: &str, record: &AuditRecord) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(&ChainLink {
        seq,
        prev_hash,
        record,
    })?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Walk an audit file and check every link.
///
/// A missing file is an empty chain.
///
/// # Errors
/// Returns `ChainError::Malformed` for unparsable lines and
/// `ChainError::Broken` at the first entry whose link does not hold.
pub fn verify_chain(path: impl AsRef<Path>) -> Result<ChainSummary, ChainError> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(ChainSummary {
            entries: 0,
            head: GENESIS_HASH.to_string(),
        });
    }

    let reader = BufReader::new(File::open(path)?);
    let mut expected_seq = 0u64;
    let mut head = GENESIS_HASH.to_string();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: ChainEntry =
            serde_json::from_str(&line).map_err(|e| ChainError::Malformed {
                line: index + 1,
                reason: e.to_string(),
            })?;

        if entry.seq != expected_seq || entry.prev_hash != head {
            return Err(ChainError::Broken { seq: expected_seq });
        }
        let recomputed = link_hash(entry.seq, &entry.prev_hash, &entry.record).map_err(|e| {
            ChainError::Malformed {
                line: index + 1,
                reason: e.to_string(),
            }
        })?;
        if recomputed != entry.hash {
            return Err(ChainError::Broken { seq: entry.seq });
        }

        head = entry.hash;
        expected_seq += 1;
    }

    Ok(ChainSummary {
        entries: expected_seq,
        head,
    })
}

/// Append-only file sink that extends an existing chain.
#[derive(Debug)]
pub struct ChainedFileSink {
    path: PathBuf,
    file: File,
    next_seq: u64,
    head: String,
    poisoned: bool,
}

impl ChainedFileSink {
    /// Open or create the audit file, verifying what is already there.
    ///
    /// # Errors
    /// Refuses to extend a file whose chain does not verify.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ChainError> {
        let path = path.as_ref().to_path_buf();
        repair_torn_tail(&path)?;
        let summary = verify_chain(&path)?;
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        info!(
            path = %path.display(),
            entries = summary.entries,
            "audit chain opened"
        );
        Ok(Self {
            path,
            file,
            next_seq: summary.entries,
            head: summary.head,
            poisoned: false,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn head(&self) -> &str {
        &self.head
    }

    fn append_entry(&mut self, record: &AuditRecord) -> Result<u64, ChainError> {
        if self.poisoned {
            return Err(ChainError::Poisoned(self.path.clone()));
        }
        let seq = self.next_seq;
        let hash = link_hash(seq, &self.head, record).map_err(|e| ChainError::Malformed {
            line: usize::try_from(seq).unwrap_or(usize::MAX).saturating_add(1),
            reason: e.to_string(),
        })?;
        let entry = ChainEntry {
            seq,
            prev_hash: self.head.clone(),
            record: record.clone(),
            hash,
        };
        let mut line = serde_json::to_vec(&entry).map_err(|e| ChainError::Malformed {
            line: usize::try_from(seq).unwrap_or(usize::MAX).saturating_add(1),
            reason: e.to_string(),
        })?;
        line.push(b'\n');

        let start = self.file.metadata()?.len();
        if let Err(err) = self
            .file
            .write_all(&line)
            .and_then(|()| self.file.sync_data())
        {
            self.rollback(start);
            return Err(err.into());
        }

        self.head = entry.hash;
        self.next_seq += 1;
        Ok(seq)
    }
}

impl ChainedFileSink {
    /// Cut the file back to `len` after a failed append. If that fails too,
    /// the sink refuses further writes.
    fn rollback(&mut self, len: u64) {
        let restored = self
            .file
            .set_len(len)
            .and_then(|()| self.file.sync_data());
        if let Err(err) = restored {
            error!(
                alert = true,
                path = %self.path.display(),
                "audit file left with a partial entry: {err}"
            );
            self.poisoned = true;
        }
    }
}

/// Drop an unterminated last line that does not parse as an entry. A complete
/// entry missing only its newline gets the newline back.
fn repair_torn_tail(path: &Path) -> Result<(), ChainError> {
    if !path.exists() {
        return Ok(());
    }
    let bytes = fs::read(path)?;
    if bytes.is_empty() || bytes.ends_with(b"\n") {
        return Ok(());
    }

    let keep = bytes
        .iter()
        .rposition(|byte| *byte == b'\n')
        .map_or(0, |index| index + 1);
    let mut file = OpenOptions::new().append(true).open(path)?;
    if serde_json::from_slice::<ChainEntry>(&bytes[keep..]).is_ok() {
        file.write_all(b"\n")?;
    } else {
        warn!(
            path = %path.display(),
            dropped_bytes = bytes.len() - keep,
            "dropping torn audit entry"
        );
        file.set_len(u64::try_from(keep).unwrap_or(u64::MAX))?;
    }
    file.sync_data()?;
    Ok(())
}

impl AuditSink for ChainedFileSink {
    fn write(&mut self, record: &AuditRecord) -> Result<u64, AuditError> {
        self.append_entry(record)
            .map_err(|e| AuditError::WriteFailed(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::gate::credentials::Role;
    use std::fs;

    fn write_records(path: &Path, count: usize) {
        let mut sink = ChainedFileSink::open(path).unwrap();
        for n in 0..count {
            sink.write(&AuditRecord::failure("guest", Some(Role::Guest), format!("attempt {n}")))
                .unwrap();
        }
    }

    #[test]
    fn missing_file_is_an_empty_chain() {
        let dir = tempfile::tempdir().unwrap();
        let summary = verify_chain(dir.path().join("audit_log.jsonl")).unwrap();
        assert_eq!(summary.entries, 0);
        assert_eq!(summary.head, GENESIS_HASH);
    }

    #[test]
    fn appended_entries_verify() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit_log.jsonl");
        write_records(&path, 4);

        let summary = verify_chain(&path).unwrap();
        assert_eq!(summary.entries, 4);
        assert_ne!(summary.head, GENESIS_HASH);
    }

    #[test]
    fn reopening_extends_the_chain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit_log.jsonl");
        write_records(&path, 2);
        write_records(&path, 3);

        let summary = verify_chain(&path).unwrap();
        assert_eq!(summary.entries, 5);

        let sink = ChainedFileSink::open(&path).unwrap();
        assert_eq!(sink.head(), summary.head);
    }

    #[test]
    fn edited_entry_breaks_the_chain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit_log.jsonl");
        write_records(&path, 3);

        let contents = fs::read_to_string(&path).unwrap();
        let tampered = contents.replacen("attempt 1", "attempt 9", 1);
        fs::write(&path, tampered).unwrap();

        let err = verify_chain(&path).unwrap_err();
        assert!(matches!(err, ChainError::Broken { seq: 1 }), "{err}");
        assert!(ChainedFileSink::open(&path).is_err());
    }

    #[test]
    fn dropped_entry_breaks_the_chain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit_log.jsonl");
        write_records(&path, 3);

        let contents = fs::read_to_string(&path).unwrap();
        let kept: Vec<&str> = contents
            .lines()
            .enumerate()
            .filter(|(index, _)| *index != 1)
            .map(|(_, line)| line)
            .collect();
        fs::write(&path, kept.join("\n")).unwrap();

        assert!(matches!(
            verify_chain(&path).unwrap_err(),
            ChainError::Broken { seq: 1 }
        ));
    }

    #[test]
    fn failed_append_is_rolled_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit_log.jsonl");
        let mut sink = ChainedFileSink::open(&path).unwrap();
        sink.write(&AuditRecord::failure("guest", Some(Role::Guest), "attempt 0"))
            .unwrap();
        let start = fs::metadata(&path).unwrap().len();

        // Half an entry, as left behind by a write that ran out of space.
        sink.file.write_all(br#"{"seq":1,"prev_hash":"00"#).unwrap();
        sink.rollback(start);
        assert!(!sink.poisoned);
        assert_eq!(fs::metadata(&path).unwrap().len(), start);

        assert_eq!(
            sink.write(&AuditRecord::failure("guest", Some(Role::Guest), "attempt 1"))
                .unwrap(),
            1
        );
        assert_eq!(verify_chain(&path).unwrap().entries, 2);
    }

    #[test]
    fn unrecoverable_write_poisons_the_sink() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit_log.jsonl");
        let mut sink = ChainedFileSink::open(&path).unwrap();
        sink.write(&AuditRecord::failure("guest", Some(Role::Guest), "attempt 0"))
            .unwrap();

        // A read-only handle fails both the write and the truncation.
        sink.file = File::open(&path).unwrap();
        let record = AuditRecord::failure("guest", Some(Role::Guest), "attempt 1");
        assert!(sink.write(&record).is_err());
        assert!(sink.poisoned);
        let err = sink.append_entry(&record).unwrap_err();
        assert!(matches!(err, ChainError::Poisoned(_)), "{err}");

        // Nothing partial reached the file.
        drop(sink);
        let mut reopened = ChainedFileSink::open(&path).unwrap();
        assert_eq!(reopened.write(&record).unwrap(), 1);
    }

    #[test]
    fn reopen_drops_a_torn_last_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit_log.jsonl");
        write_records(&path, 2);
        let mut contents = fs::read_to_string(&path).unwrap();
        contents.push_str(r#"{"seq":2,"prev_hash":"ab"#);
        fs::write(&path, contents).unwrap();
        assert!(matches!(
            verify_chain(&path).unwrap_err(),
            ChainError::Malformed { line: 3, .. }
        ));

        write_records(&path, 1);
        assert_eq!(verify_chain(&path).unwrap().entries, 3);
    }

    #[test]
    fn reopen_keeps_a_whole_entry_missing_its_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit_log.jsonl");
        write_records(&path, 2);
        let contents = fs::read_to_string(&path).unwrap();
        fs::write(&path, contents.trim_end()).unwrap();

        write_records(&path, 1);
        assert_eq!(verify_chain(&path).unwrap().entries, 3);
    }

    #[test]
    fn garbage_line_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit_log.jsonl");
        write_records(&path, 1);
        let mut contents = fs::read_to_string(&path).unwrap();
        contents.push_str("not json\n");
        fs::write(&path, contents).unwrap();

        assert!(matches!(
            verify_chain(&path).unwrap_err(),
            ChainError::Malformed { line: 2, .. }
        ));
    }
}
