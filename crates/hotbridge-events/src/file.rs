//! File-backed event log.
//!
//! Layout inside the log directory:
//!
//! - `events.jsonl`: one [`LogEntry`] per line, append-only.
//! - `offsets.json`: consumer name to committed offset, rewritten atomically
//!   through a temporary file and a rename.
//!
//! A failed append truncates the segment back to its previous length, and a
//! commit only reaches memory once the offsets file is on disk.
//!
//! Entries are cached in memory after [`FileEventLog::open`] so reads never
//! touch the disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use hotbridge_core::{HotplugEvent, LogEntry, Offset};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::error::{LogError, LogResult};
use crate::log::{EventLog, LogState};

const SEGMENT_FILE: &str = "events.jsonl";
const OFFSETS_FILE: &str = "offsets.json";
const OFFSETS_TMP_FILE: &str = "offsets.json.tmp";

/// Event log persisted as JSON Lines.
#[derive(Debug)]
pub struct FileEventLog {
    directory: PathBuf,
    state: Mutex<LogState>,
    head_tx: watch::Sender<Offset>,
}

impl FileEventLog {
    /// Open (or create) the log in `directory`, restoring entries, consumer
    /// offsets and per-bus sequence counters.
    ///
    /// A torn final line left by a crash mid-append is truncated away. Any
    /// other undecodable line is reported as [`LogError::Corrupt`].
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or a file cannot
    /// be read or decoded.
    pub async fn open(directory: impl AsRef<Path>) -> LogResult<Self> {
        let directory = directory.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&directory)
            .await
            .map_err(|e| LogError::io(&directory, e))?;

        let mut state = LogState::default();
        load_segment(&directory.join(SEGMENT_FILE), &mut state).await?;
        state.offsets = load_offsets(&directory.join(OFFSETS_FILE)).await?;

        info!(
            directory = %directory.display(),
            entries = state.entries.len(),
            consumers = state.offsets.len(),
            "opened file event log"
        );

        let (head_tx, _) = watch::channel(state.head());
        Ok(Self {
            directory,
            state: Mutex::new(state),
            head_tx,
        })
    }

    /// Directory holding the log files.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    async fn write_offsets(&self, offsets: &HashMap<String, Offset>) -> LogResult<()> {
        let tmp = self.directory.join(OFFSETS_TMP_FILE);
        let target = self.directory.join(OFFSETS_FILE);
        let bytes = serde_json::to_vec_pretty(offsets)?;

        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| LogError::io(&tmp, e))?;
        file.write_all(&bytes)
            .await
            .map_err(|e| LogError::io(&tmp, e))?;
        file.sync_data().await.map_err(|e| LogError::io(&tmp, e))?;
        drop(file);

        tokio::fs::rename(&tmp, &target)
            .await
            .map_err(|e| LogError::io(&target, e))
    }
}

async fn load_segment(path: &Path, state: &mut LogState) -> LogResult<()> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(LogError::io(path, e)),
    };

    let mut good_len: usize = 0;
    let mut lines = content.split_inclusive('\n').enumerate().peekable();
    while let Some((index, raw)) = lines.next() {
        let line_no = index.saturating_add(1);
        let is_last = lines.peek().is_none();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            good_len = good_len.saturating_add(raw.len());
            continue;
        }
        match serde_json::from_str::<LogEntry>(trimmed) {
            Ok(entry) if entry.offset == state.head() => {
                state.track_sequence(&entry.event);
                state.entries.push(entry);
                good_len = good_len.saturating_add(raw.len());
            },
            Ok(entry) => {
                return Err(LogError::Corrupt {
                    line: line_no,
                    message: format!(
                        "expected offset {}, found {}",
                        state.head(),
                        entry.offset
                    ),
                });
            },
            Err(e) if is_last && !raw.ends_with('\n') => {
                warn!(
                    path = %path.display(),
                    line = line_no,
                    error = %e,
                    "truncating torn final record"
                );
                truncate(path, good_len).await?;
                break;
            },
            Err(e) => {
                return Err(LogError::Corrupt {
                    line: line_no,
                    message: e.to_string(),
                });
            },
        }
    }
    Ok(())
}

async fn truncate(path: &Path, len: usize) -> LogResult<()> {
    let file = tokio::fs::OpenOptions::new()
        .write(true)
        .open(path)
        .await
        .map_err(|e| LogError::io(path, e))?;
    file.set_len(len as u64)
        .await
        .map_err(|e| LogError::io(path, e))
}

/// Append `line` to the segment and sync it. On failure the segment is cut
/// back to its length before the write.
async fn append_line(path: &Path, line: &[u8]) -> LogResult<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| LogError::io(path, e))?;
    let len = file
        .metadata()
        .await
        .map_err(|e| LogError::io(path, e))?
        .len();

    let written = async {
        file.write_all(line).await?;
        file.sync_data().await
    }
    .await;
    if let Err(e) = written {
        if let Err(rollback_err) = rollback(&file, path, len).await {
            warn!(path = %path.display(), error = %rollback_err, "failed to roll back partial append");
        }
        return Err(LogError::io(path, e));
    }
    Ok(())
}

async fn rollback(file: &tokio::fs::File, path: &Path, len: u64) -> LogResult<()> {
    file.set_len(len).await.map_err(|e| LogError::io(path, e))?;
    file.sync_data().await.map_err(|e| LogError::io(path, e))
}

async fn load_offsets(path: &Path) -> LogResult<HashMap<String, Offset>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
        Err(e) => Err(LogError::io(path, e)),
    }
}

#[async_trait]
impl EventLog for FileEventLog {
    async fn append(&self, event: HotplugEvent) -> LogResult<Offset> {
        let path = self.directory.join(SEGMENT_FILE);
        let mut state = self.state.lock().await;

        let entry = LogEntry {
            offset: state.head(),
            event,
        };
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');
        append_line(&path, &line).await?;

        let stored = state.push(entry.event);
        let head = state.head();
        drop(state);

        debug!(offset = stored.offset, "appended to file log");
        self.head_tx.send_replace(head);
        Ok(stored.offset)
    }

    async fn read_from(&self, offset: Offset, max: usize) -> LogResult<Vec<LogEntry>> {
        Ok(self.state.lock().await.read_from(offset, max))
    }

    async fn commit(&self, consumer: &str, offset: Offset) -> LogResult<()> {
        let mut state = self.state.lock().await;
        if state.offsets.get(consumer).is_some_and(|&current| offset <= current) {
            return Ok(());
        }
        let mut snapshot = state.offsets.clone();
        snapshot.insert(consumer.to_string(), offset);
        self.write_offsets(&snapshot).await?;
        state.offsets = snapshot;
        Ok(())
    }

    async fn committed(&self, consumer: &str) -> LogResult<Option<Offset>> {
        Ok(self.state.lock().await.offsets.get(consumer).copied())
    }

    async fn head(&self) -> LogResult<Offset> {
        Ok(self.state.lock().await.head())
    }

    async fn last_sequences(&self) -> LogResult<HashMap<u16, u64>> {
        Ok(self.state.lock().await.sequences.clone())
    }

    fn subscribe(&self) -> watch::Receiver<Offset> {
        self.head_tx.subscribe()
    }
}
