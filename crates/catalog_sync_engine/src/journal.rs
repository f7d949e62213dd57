//! Durable storage for outbox entries.
//!
//! The outbox writes every entry to its journal before the entry becomes
//! visible in memory, and records acknowledgements so a restarted replica
//! only resends what the peer never confirmed.
//!
//! ## File format
//!
//! `FileJournal` keeps an append-only JSON-lines log:
//!
//! ```text
//! {"type":"enqueued","entry":{"seq":1,"change":{...},"enqueuedAt":"..."}}
//! {"type":"acked","seqs":[1]}
//! ```
//!
//! A torn final line (crash mid-append) is dropped on open. The log is
//! rewritten to contain only pending entries once acknowledged records
//! dominate it.

use crate::error::{SyncError, SyncResult};
use crate::outbox::OutboxEntry;
use fs2::FileExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Records written before compaction is considered.
const COMPACT_MIN_RECORDS: usize = 1024;

/// Persistence for outbox entries.
pub trait OutboxJournal: Send + Sync {
    /// Returns every entry not yet acknowledged, in `seq` order.
    fn load(&self) -> SyncResult<Vec<OutboxEntry>>;

    /// Durably records a new entry.
    fn append(&self, entry: &OutboxEntry) -> SyncResult<()>;

    /// Durably records that the peer accepted `seqs`.
    fn acknowledge(&self, seqs: &[u64]) -> SyncResult<()>;

    /// Drops acknowledged history, if the journal keeps any.
    fn compact(&self) -> SyncResult<()> {
        Ok(())
    }
}

impl<J: OutboxJournal + ?Sized> OutboxJournal for std::sync::Arc<J> {
    fn load(&self) -> SyncResult<Vec<OutboxEntry>> {
        (**self).load()
    }

    fn append(&self, entry: &OutboxEntry) -> SyncResult<()> {
        (**self).append(entry)
    }

    fn acknowledge(&self, seqs: &[u64]) -> SyncResult<()> {
        (**self).acknowledge(seqs)
    }

    fn compact(&self) -> SyncResult<()> {
        (**self).compact()
    }
}

/// A journal held in memory.
///
/// Survives outbox re-creation within one process, which is enough to test
/// restart behavior. Writes can be made to fail.
#[derive(Debug, Default)]
pub struct MemoryJournal {
    pending: Mutex<BTreeMap<u64, OutboxEntry>>,
    failing: std::sync::atomic::AtomicBool,
}

impl MemoryJournal {
    /// Creates an empty journal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    /// Returns the number of pending entries.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    fn check_writable(&self) -> SyncResult<()> {
        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(SyncError::Journal("journal is not writable".into()));
        }
        Ok(())
    }
}

impl OutboxJournal for MemoryJournal {
    fn load(&self) -> SyncResult<Vec<OutboxEntry>> {
        Ok(self.pending.lock().values().cloned().collect())
    }

    fn append(&self, entry: &OutboxEntry) -> SyncResult<()> {
        self.check_writable()?;
        self.pending.lock().insert(entry.seq, entry.clone());
        Ok(())
    }

    fn acknowledge(&self, seqs: &[u64]) -> SyncResult<()> {
        self.check_writable()?;
        let mut pending = self.pending.lock();
        for seq in seqs {
            pending.remove(seq);
        }
        Ok(())
    }
}

/// One line of the journal file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum JournalRecord {
    Enqueued { entry: OutboxEntry },
    Acked { seqs: Vec<u64> },
}

struct FileState {
    file: File,
    pending: BTreeMap<u64, OutboxEntry>,
    records: usize,
}

/// An append-only JSON-lines journal on disk.
///
/// Holds an exclusive advisory lock on `<path>.lock` for its lifetime, so
/// two processes never share one outbox.
pub struct FileJournal {
    path: PathBuf,
    state: Mutex<FileState>,
    _lock_file: File,
}

impl FileJournal {
    /// Opens or creates the journal at `path` and replays it.
    ///
    /// # Errors
    ///
    /// Returns an error if another process holds the journal, if a record
    /// other than the last one is unreadable, or on I/O failure.
    pub fn open(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path(&path))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(SyncError::Journal(format!(
                "outbox journal is in use: {}",
                path.display()
            )));
        }

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;

        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;
        let (pending, records, valid_len) = replay(&contents)?;

        if valid_len < contents.len() {
            warn!(
                path = %path.display(),
                dropped_bytes = contents.len() - valid_len,
                "dropping torn record at end of outbox journal"
            );
            file.set_len(valid_len as u64)?;
            file.sync_all()?;
        }

        debug!(path = %path.display(), pending = pending.len(), records, "opened outbox journal");

        Ok(Self {
            path,
            state: Mutex::new(FileState {
                file,
                pending,
                records,
            }),
            _lock_file: lock_file,
        })
    }

    /// Returns the journal path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_record(state: &mut FileState, record: &JournalRecord) -> SyncResult<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        state.file.write_all(&line)?;
        state.file.sync_data()?;
        state.records += 1;
        Ok(())
    }

    fn compact_locked(&self, state: &mut FileState) -> SyncResult<()> {
        let temp_path = self.path.with_extension("compact");
        {
            let mut temp = File::create(&temp_path)?;
            for entry in state.pending.values() {
                let mut line = serde_json::to_vec(&JournalRecord::Enqueued {
                    entry: entry.clone(),
                })?;
                line.push(b'\n');
                temp.write_all(&line)?;
            }
            temp.sync_all()?;
        }

        fs::rename(&temp_path, &self.path)?;
        sync_parent(&self.path)?;

        state.file = OpenOptions::new().read(true).append(true).open(&self.path)?;
        state.records = state.pending.len();
        debug!(path = %self.path.display(), pending = state.pending.len(), "compacted outbox journal");
        Ok(())
    }

    fn needs_compaction(state: &FileState) -> bool {
        state.records >= COMPACT_MIN_RECORDS && state.records > state.pending.len() * 2
    }
}

impl OutboxJournal for FileJournal {
    fn load(&self) -> SyncResult<Vec<OutboxEntry>> {
        Ok(self.state.lock().pending.values().cloned().collect())
    }

    fn append(&self, entry: &OutboxEntry) -> SyncResult<()> {
        let mut state = self.state.lock();
        Self::write_record(
            &mut state,
            &JournalRecord::Enqueued {
                entry: entry.clone(),
            },
        )?;
        state.pending.insert(entry.seq, entry.clone());
        Ok(())
    }

    fn acknowledge(&self, seqs: &[u64]) -> SyncResult<()> {
        if seqs.is_empty() {
            return Ok(());
        }

        let mut state = self.state.lock();
        Self::write_record(
            &mut state,
            &JournalRecord::Acked {
                seqs: seqs.to_vec(),
            },
        )?;
        for seq in seqs {
            state.pending.remove(seq);
        }

        if Self::needs_compaction(&state) {
            self.compact_locked(&mut state)?;
        }
        Ok(())
    }

    fn compact(&self) -> SyncResult<()> {
        let mut state = self.state.lock();
        self.compact_locked(&mut state)
    }
}

impl std::fmt::Debug for FileJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileJournal")
            .field("path", &self.path)
            .field("pending", &self.state.lock().pending.len())
            .finish()
    }
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

/// Replays journal bytes into the pending set.
///
/// Returns the pending entries, the number of records read, and the byte
/// length of the well-formed prefix.
fn replay(contents: &[u8]) -> SyncResult<(BTreeMap<u64, OutboxEntry>, usize, usize)> {
    let mut pending = BTreeMap::new();
    let mut records = 0;
    let mut offset = 0;

    while offset < contents.len() {
        let rest = &contents[offset..];
        // Records are written together with their newline, so an
        // unterminated tail is a torn write.
        let Some(end) = rest.iter().position(|&b| b == b'\n') else {
            break;
        };
        let line = &rest[..end];

        if !line.iter().all(u8::is_ascii_whitespace) {
            match serde_json::from_slice::<JournalRecord>(line) {
                Ok(JournalRecord::Enqueued { entry }) => {
                    pending.insert(entry.seq, entry);
                }
                Ok(JournalRecord::Acked { seqs }) => {
                    for seq in seqs {
                        pending.remove(&seq);
                    }
                }
                Err(e) => {
                    return Err(SyncError::Journal(format!(
                        "corrupt outbox journal record at byte {offset}: {e}"
                    )));
                }
            }
            records += 1;
        }
        offset += end + 1;
    }

    Ok((pending, records, offset))
}

#[cfg(unix)]
fn sync_parent(path: &Path) -> SyncResult<()> {
    if let Some(parent) = path.parent() {
        let parent = if parent.as_os_str().is_empty() {
            Path::new(".")
        } else {
            parent
        };
        File::open(parent)?.sync_all()?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> SyncResult<()> {
    Ok(())
}
