//! Append-only JSON-lines record log
//!
//! Each record is serialized to one line and written with a single
//! `write_all` followed by `sync_data`, so after a crash the file holds
//! complete lines plus at most one torn tail. Opening the log truncates that
//! tail; a record is either fully present or absent.
//!
//! A failed append cuts the file back to its length before the write and
//! marks the log unusable. Later appends fail straight away instead of
//! landing after torn bytes.

use crate::extract::{ExtractedRecord, Fingerprint, QR_PAYLOAD_FIELD};
use crate::output::DurabilityError;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// What was found when reading the log back
#[derive(Debug, Clone, Default)]
pub struct Replay {
    /// Fingerprints of every intact record, in log order
    pub fingerprints: Vec<Fingerprint>,
    /// Intact records that carried a decoded QR payload
    pub records_with_payload: usize,
    /// Complete lines that did not parse as a record
    pub skipped_lines: usize,
    /// Bytes of a partial trailing line
    pub torn_bytes: u64,
}

impl Replay {
    pub fn records(&self) -> usize {
        self.fingerprints.len()
    }
}

/// The record log file, opened for appending
pub struct RecordLog {
    path: PathBuf,
    state: Mutex<LogFile>,
}

struct LogFile {
    file: File,
    /// Set once an append has failed
    poisoned: bool,
}

impl RecordLog {
    /// Opens (or creates) the log, repairs a torn tail and replays it
    ///
    /// # Returns
    ///
    /// * `Ok((RecordLog, Replay))` - The open log and what it already holds
    /// * `Err(DurabilityError)` - The log could not be opened or repaired
    pub fn open(path: &Path) -> Result<(Self, Replay), DurabilityError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| DurabilityError::io(parent, e))?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)
            .map_err(|e| DurabilityError::io(path, e))?;

        let mut contents = Vec::new();
        file.read_to_end(&mut contents)
            .map_err(|e| DurabilityError::io(path, e))?;

        let (replay, intact_len) = scan(&contents, path);

        if replay.torn_bytes > 0 {
            tracing::warn!(
                "Record log {} ends with a partial line ({} bytes); truncating",
                path.display(),
                replay.torn_bytes
            );
            file.set_len(intact_len as u64)
                .and_then(|_| file.sync_all())
                .map_err(|e| DurabilityError::io(path, e))?;
        }

        tracing::info!(
            "Record log {} holds {} records",
            path.display(),
            replay.records()
        );

        Ok((
            Self {
                path: path.to_path_buf(),
                state: Mutex::new(LogFile {
                    file,
                    poisoned: false,
                }),
            },
            replay,
        ))
    }

    /// Reads a log without opening it for writing or repairing it
    pub fn replay(path: &Path) -> Result<Replay, DurabilityError> {
        match std::fs::read(path) {
            Ok(contents) => Ok(scan(&contents, path).0),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Replay::default()),
            Err(e) => Err(DurabilityError::io(path, e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record as a single line and syncs it to disk
    ///
    /// Blocks the calling worker thread for the write and sync. Admission and
    /// append must not be split by an await.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The line is on disk
    /// * `Err(DurabilityError)` - The write failed, or an earlier one did
    pub fn append(&self, record: &ExtractedRecord) -> Result<(), DurabilityError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let LogFile { file, poisoned } = &mut *guard;
        if *poisoned {
            return Err(DurabilityError::Poisoned(self.path.clone()));
        }

        let start = file
            .metadata()
            .map_err(|e| DurabilityError::io(&self.path, e))?
            .len();

        if let Err(e) = file.write_all(&line).and_then(|_| file.sync_data()) {
            *poisoned = true;
            if let Err(rollback) = file.set_len(start).and_then(|_| file.sync_data()) {
                tracing::error!(
                    "Could not cut {} back to {} bytes after a failed append: {}",
                    self.path.display(),
                    start,
                    rollback
                );
            }
            return Err(DurabilityError::io(&self.path, e));
        }
        Ok(())
    }
}

/// Parses every complete line; returns the replay and the intact length
fn scan(contents: &[u8], path: &Path) -> (Replay, usize) {
    let intact_len = contents
        .iter()
        .rposition(|&b| b == b'\n')
        .map(|i| i + 1)
        .unwrap_or(0);

    let mut replay = Replay {
        torn_bytes: (contents.len() - intact_len) as u64,
        ..Replay::default()
    };

    for (index, line) in contents[..intact_len].split(|&b| b == b'\n').enumerate() {
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice::<ExtractedRecord>(line) {
            Ok(record) => {
                if record.fields.contains_key(QR_PAYLOAD_FIELD) {
                    replay.records_with_payload += 1;
                }
                replay.fingerprints.push(record.fingerprint);
            }
            Err(e) => {
                tracing::warn!(
                    "Skipping unreadable line {} in {}: {}",
                    index + 1,
                    path.display(),
                    e
                );
                replay.skipped_lines += 1;
            }
        }
    }

    (replay, intact_len)
}
