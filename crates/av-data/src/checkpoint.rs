//! Append-only checkpoint log of completed configurations.
//!
//! The log is a sequence of newline-terminated JSON records with no header
//! or index. A reader reconstructs the completed-set with one forward scan:
//!
//! * a complete line that does not decode is skipped with a warning;
//! * a complete line naming an unknown model family is fatal;
//! * a trailing fragment with no terminator is a torn write and ends the scan;
//! * a key seen twice keeps its last record.
//!
//! Existing bytes are never rewritten. If the file ends in a torn fragment,
//! the first append writes a terminator before its record so the fragment
//! becomes an ordinary skipped line on the next scan.

use av_types::{AvError, AvResult, CheckpointError, EvaluationResult, ModelConfig, ModelFamily, SweepRecord};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const TERMINATOR: u8 = b'\n';

/// How hard each append pushes data towards the disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPolicy {
    /// Hand each record to the OS in a single write.
    #[default]
    Flush,
    /// Additionally `fsync` after every record.
    FsyncEach,
}

/// Outcome of a full forward scan of the log.
#[derive(Debug, Clone, Default)]
pub struct CheckpointScan {
    /// Last record seen for every key.
    pub records: HashMap<ModelConfig, SweepRecord>,
    /// Complete lines that decoded to a record.
    pub decoded: usize,
    /// Decoded records whose key had already been seen.
    pub duplicates: usize,
    /// Complete lines that could not be decoded.
    pub skipped: usize,
    /// Whether the scan stopped at an unterminated, undecodable fragment.
    pub truncated_tail: bool,
}

impl CheckpointScan {
    pub fn completed(&self) -> HashSet<ModelConfig> {
        self.records.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn insert(&mut self, record: SweepRecord) {
        self.decoded += 1;
        if self.records.insert(record.config, record).is_some() {
            self.duplicates += 1;
        }
    }
}

/// Borrowed mirror of [`SweepRecord`] so appends need not clone results.
#[derive(Serialize)]
struct RecordRef<'a> {
    config: &'a ModelConfig,
    result: &'a EvaluationResult,
}

/// Open handle on one checkpoint log file.
///
/// The handle stays open for the whole sweep and is the only writer.
#[derive(Debug)]
pub struct CheckpointLog {
    path: PathBuf,
    file: File,
    sync: SyncPolicy,
    needs_terminator: bool,
    appended: usize,
}

impl CheckpointLog {
    /// Open `path`, creating it (and its parent directories) empty if absent.
    pub fn open<P: AsRef<Path>>(path: P) -> AvResult<Self> {
        Self::open_with(path, SyncPolicy::default())
    }

    pub fn open_with<P: AsRef<Path>>(path: P, sync: SyncPolicy) -> AvResult<Self> {
        let path = path.as_ref().to_path_buf();
        let unavailable = |e: std::io::Error| CheckpointError::StorageUnavailable {
            path: path.display().to_string(),
            message: e.to_string(),
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(unavailable)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)
            .map_err(unavailable)?;

        let len = file.metadata().map_err(unavailable)?.len();
        let needs_terminator = if len == 0 {
            false
        } else {
            let mut last = [0u8; 1];
            file.seek(SeekFrom::Start(len - 1)).map_err(unavailable)?;
            file.read_exact(&mut last).map_err(unavailable)?;
            last[0] != TERMINATOR
        };

        if needs_terminator {
            warn!(
                "Checkpoint log {} ends without a record terminator; the next append will seal it",
                path.display()
            );
        }
        debug!("Opened checkpoint log {} ({} bytes)", path.display(), len);

        Ok(Self {
            path,
            file,
            sync,
            needs_terminator,
            appended: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sync_policy(&self) -> SyncPolicy {
        self.sync
    }

    /// Records appended through this handle.
    pub fn appended(&self) -> usize {
        self.appended
    }

    /// Decode the whole log from byte zero, one line at a time.
    pub fn scan(&self) -> AvResult<CheckpointScan> {
        let unavailable = |e: std::io::Error| CheckpointError::StorageUnavailable {
            path: self.path.display().to_string(),
            message: e.to_string(),
        };
        let file = File::open(&self.path).map_err(unavailable)?;
        let scan = scan_lines(BufReader::new(file)).map_err(|e| match e {
            ScanError::Io(e) => unavailable(e).into(),
            ScanError::Fatal(e) => e,
        })?;

        info!(
            "Checkpoint log {}: {} keys ({} records, {} duplicates, {} skipped{})",
            self.path.display(),
            scan.len(),
            scan.decoded,
            scan.duplicates,
            scan.skipped,
            if scan.truncated_tail { ", torn tail" } else { "" }
        );
        Ok(scan)
    }

    /// Keys of every configuration already recorded.
    pub fn load_completed(&self) -> AvResult<HashSet<ModelConfig>> {
        Ok(self.scan()?.completed())
    }

    /// Last-write-wins map of every recorded configuration to its record.
    pub fn load_records(&self) -> AvResult<HashMap<ModelConfig, SweepRecord>> {
        Ok(self.scan()?.records)
    }

    /// Serialize one record and append it as a single write.
    pub fn append(&mut self, config: &ModelConfig, result: &EvaluationResult) -> AvResult<()> {
        let mut buf = Vec::with_capacity(512);
        if self.needs_terminator {
            buf.push(TERMINATOR);
        }
        serde_json::to_writer(&mut buf, &RecordRef { config, result })?;
        buf.push(TERMINATOR);

        self.file
            .write_all(&buf)
            .and_then(|_| self.file.flush())
            .map_err(|e| CheckpointError::WriteFailed {
                message: format!("{}: {}", self.path.display(), e),
            })?;
        if self.sync == SyncPolicy::FsyncEach {
            self.file.sync_data().map_err(|e| CheckpointError::WriteFailed {
                message: format!("fsync {}: {}", self.path.display(), e),
            })?;
        }

        self.needs_terminator = false;
        self.appended += 1;
        Ok(())
    }

    pub fn append_record(&mut self, record: &SweepRecord) -> AvResult<()> {
        self.append(&record.config, &record.result)
    }

    /// Flush to stable storage and release the handle.
    pub fn close(mut self) -> AvResult<()> {
        self.file
            .flush()
            .and_then(|_| self.file.sync_all())
            .map_err(|e| CheckpointError::WriteFailed {
                message: format!("close {}: {}", self.path.display(), e),
            })?;
        debug!(
            "Closed checkpoint log {} after {} appends",
            self.path.display(),
            self.appended
        );
        Ok(())
    }
}

#[derive(Debug)]
enum ScanError {
    Io(std::io::Error),
    Fatal(AvError),
}

/// Only the final line can lack a terminator; that is where a torn write lands.
fn scan_lines<R: BufRead>(mut reader: R) -> Result<CheckpointScan, ScanError> {
    let mut scan = CheckpointScan::default();
    let mut line = Vec::with_capacity(4096);
    let mut line_no = 0usize;

    loop {
        line.clear();
        if reader.read_until(TERMINATOR, &mut line).map_err(ScanError::Io)? == 0 {
            break;
        }
        line_no += 1;

        if line.last() != Some(&TERMINATOR) {
            // unterminated tail: accept it only if the record itself is whole
            if !is_blank(&line) {
                match serde_json::from_slice::<SweepRecord>(&line) {
                    Ok(record) => scan.insert(record),
                    Err(e) => {
                        warn!("Checkpoint log has a torn record at line {}: {}", line_no, e);
                        scan.truncated_tail = true;
                    }
                }
            }
            break;
        }

        let body = &line[..line.len() - 1];
        if is_blank(body) {
            continue;
        }

        match serde_json::from_slice::<SweepRecord>(body) {
            Ok(record) => scan.insert(record),
            Err(e) => {
                if let Some(family) = unknown_family(body) {
                    return Err(ScanError::Fatal(
                        CheckpointError::UnknownFamily {
                            family,
                            line: line_no,
                        }
                        .into(),
                    ));
                }
                warn!("Skipping invalid checkpoint record at line {}: {}", line_no, e);
                scan.skipped += 1;
            }
        }
    }

    Ok(scan)
}

fn is_blank(bytes: &[u8]) -> bool {
    bytes.iter().all(u8::is_ascii_whitespace)
}

/// The family tag of a structurally valid record whose family is not one we know.
fn unknown_family(line: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(line).ok()?;
    let family = value.get("config")?.get("family")?.as_str()?;
    match ModelFamily::from_record_tag(family) {
        Some(_) => None,
        None => Some(family.to_string()),
    }
}
