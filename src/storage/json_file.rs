use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fs4::fs_std::FileExt;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use crate::error::EngineError;
use crate::models::{Holding, Id, LedgerEntry, LedgerRecord, PortfolioSnapshot, Security};

use super::state::LedgerState;
use super::{SnapshotInsert, Storage};

/// One line of the ledger journal.
///
/// A commit is written as a single line, so a holding's new state and the
/// entries justifying it land on disk together or not at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum JournalLine {
    Commit {
        records: Vec<LedgerRecord>,
    },
    Removal {
        entry_id: Id,
        removed_at: DateTime<Utc>,
    },
}

/// JSON file-based storage implementation.
///
/// Directory structure:
/// ```text
/// data/
///   ledger.jsonl       # append-only journal of commits and removals
///   securities.jsonl   # security registry, last write wins
///   snapshots.jsonl    # append-only net-worth snapshots
///   .kuberan.lock      # held exclusively while a storage is open
/// ```
///
/// The journal is replayed into memory by [`JsonFileStorage::open`]. Reads are
/// served from memory; every write is appended and synced before the in-memory
/// state changes.
///
/// Only one `JsonFileStorage` may be open on a directory at a time, across
/// processes. A second `open` fails with [`EngineError::Conflict`] until the
/// first is dropped. Open the storage before any other file-backed
/// collaborator sharing the directory, so they run under the same lock.
pub struct JsonFileStorage {
    base_path: PathBuf,
    state: Mutex<LedgerState>,
    _dir_lock: std::fs::File,
}

impl JsonFileStorage {
    pub async fn open(base_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        let dir_lock = lock_data_dir(&base_path).await?;
        let storage = Self {
            base_path,
            state: Mutex::new(LedgerState::default()),
            _dir_lock: dir_lock,
        };
        storage.replay().await?;
        Ok(storage)
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn ledger_file(&self) -> PathBuf {
        self.base_path.join("ledger.jsonl")
    }

    fn securities_file(&self) -> PathBuf {
        self.base_path.join("securities.jsonl")
    }

    fn snapshots_file(&self) -> PathBuf {
        self.base_path.join("snapshots.jsonl")
    }

    async fn replay(&self) -> Result<()> {
        let mut state = self.state.lock().await;

        for path in [
            self.ledger_file(),
            self.securities_file(),
            self.snapshots_file(),
        ] {
            truncate_torn_tail(&path).await?;
        }

        for line in read_jsonl::<JournalLine>(&self.ledger_file()).await? {
            match line {
                JournalLine::Commit { records } => {
                    if let Err(err) = state.check_commit(&records) {
                        tracing::warn!(error = %err, "Skipping inconsistent ledger commit");
                        continue;
                    }
                    state.apply_commit(&records);
                }
                JournalLine::Removal {
                    entry_id,
                    removed_at,
                } => {
                    state.apply_removal(&entry_id, removed_at);
                }
            }
        }

        for security in read_jsonl::<Security>(&self.securities_file()).await? {
            state.put_security(security);
        }

        for snapshot in read_jsonl::<PortfolioSnapshot>(&self.snapshots_file()).await? {
            if let SnapshotInsert::Conflict(existing) = state.insert_snapshot(snapshot) {
                tracing::warn!(
                    user_id = %existing.user_id,
                    recorded_at = %existing.recorded_at,
                    "Ignoring duplicate snapshot line"
                );
            }
        }

        Ok(())
    }
}

/// Take the directory's exclusive lock for the life of the returned handle.
async fn lock_data_dir(dir: &Path) -> Result<std::fs::File> {
    fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create data directory {}", dir.display()))?;

    let path = dir.join(".kuberan.lock");
    let file = fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?
        .into_std()
        .await;

    if let Err(err) = file.try_lock_exclusive() {
        tracing::warn!(path = %dir.display(), error = %err, "Data directory is locked");
        return Err(EngineError::Conflict(format!(
            "data directory {} is in use by another kuberan session",
            dir.display()
        ))
        .into());
    }
    Ok(file)
}

/// Cut a partial last line left by a crash mid-append, so the next append
/// starts on a line of its own.
async fn truncate_torn_tail(path: &Path) -> Result<()> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
    };
    if matches!(bytes.last(), None | Some(b'\n')) {
        return Ok(());
    }

    let keep = bytes
        .iter()
        .rposition(|b| *b == b'\n')
        .map_or(0, |newline| newline + 1);
    tracing::warn!(
        path = %path.display(),
        dropped_bytes = bytes.len() - keep,
        "Truncating torn JSONL line"
    );

    let file = fs::OpenOptions::new()
        .write(true)
        .open(path)
        .await
        .with_context(|| format!("Failed to open {} for repair", path.display()))?;
    file.set_len(keep as u64)
        .await
        .with_context(|| format!("Failed to truncate {}", path.display()))?;
    file.sync_all()
        .await
        .with_context(|| format!("Failed to sync {}", path.display()))?;
    Ok(())
}

async fn ensure_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .context("Failed to create directory")?;
    }
    Ok(())
}

/// Read a JSONL file, skipping blank and unparsable lines. A line torn by a
/// crash mid-append is the expected source of the latter.
async fn read_jsonl<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>> {
    let file = match fs::File::open(path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("Failed to open {}", path.display())),
    };

    let reader = BufReader::new(file);
    let mut lines = reader.lines();
    let mut items = Vec::new();
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await.context("Failed to read line")? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(item) => items.push(item),
            Err(err) => tracing::warn!(
                path = %path.display(),
                line = line_no,
                error = %err,
                "Skipping unparsable JSONL line"
            ),
        }
    }

    Ok(items)
}

/// Append one serialized line and sync it to disk. A failed append is cut
/// back off the file before the error is returned.
async fn append_line<T: Serialize>(path: &Path, item: &T) -> Result<()> {
    ensure_dir(path).await?;

    let mut line = serde_json::to_string(item).context("Failed to serialize item")?;
    line.push('\n');

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("Failed to open {} for append", path.display()))?;
    let len_before = file
        .metadata()
        .await
        .with_context(|| format!("Failed to stat {}", path.display()))?
        .len();

    let written = match file.write_all(line.as_bytes()).await {
        Ok(()) => file.sync_data().await,
        Err(err) => Err(err),
    };
    if let Err(err) = written {
        if let Err(cleanup) = file.set_len(len_before).await {
            tracing::error!(
                path = %path.display(),
                error = %cleanup,
                "Failed to cut back a partial JSONL append"
            );
        }
        return Err(err).with_context(|| format!("Failed to append to {}", path.display()));
    }
    Ok(())
}

#[async_trait::async_trait]
impl Storage for JsonFileStorage {
    async fn get_holding(&self, account_id: &Id, security_id: &Id) -> Result<Option<Holding>> {
        Ok(self.state.lock().await.holding(account_id, security_id))
    }

    async fn list_holdings(&self, account_ids: &[Id]) -> Result<Vec<Holding>> {
        Ok(self.state.lock().await.holdings_for(account_ids))
    }

    async fn commit(&self, records: &[LedgerRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut state = self.state.lock().await;
        state.check_commit(records)?;
        append_line(
            &self.ledger_file(),
            &JournalLine::Commit {
                records: records.to_vec(),
            },
        )
        .await?;
        state.apply_commit(records);
        Ok(())
    }

    async fn list_entries(&self, holding_id: &Id, include_removed: bool) -> Result<Vec<LedgerEntry>> {
        Ok(self.state.lock().await.entries(holding_id, include_removed))
    }

    async fn get_entry(&self, entry_id: &Id) -> Result<Option<LedgerEntry>> {
        Ok(self.state.lock().await.entry(entry_id))
    }

    async fn soft_remove_entry(&self, entry_id: &Id, removed_at: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state.lock().await;
        if !state.can_remove(entry_id) {
            return Ok(false);
        }
        append_line(
            &self.ledger_file(),
            &JournalLine::Removal {
                entry_id: entry_id.clone(),
                removed_at,
            },
        )
        .await?;
        Ok(state.apply_removal(entry_id, removed_at))
    }

    async fn get_security(&self, id: &Id) -> Result<Option<Security>> {
        Ok(self.state.lock().await.security(id))
    }

    async fn list_securities(&self) -> Result<Vec<Security>> {
        Ok(self.state.lock().await.securities())
    }

    async fn save_security(&self, security: &Security) -> Result<()> {
        let mut state = self.state.lock().await;
        append_line(&self.securities_file(), security).await?;
        state.put_security(security.clone());
        Ok(())
    }

    async fn insert_snapshot(&self, snapshot: &PortfolioSnapshot) -> Result<SnapshotInsert> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.existing_snapshot(snapshot) {
            return Ok(SnapshotInsert::Conflict(existing));
        }
        append_line(&self.snapshots_file(), snapshot).await?;
        Ok(state.insert_snapshot(snapshot.clone()))
    }

    async fn get_snapshot(
        &self,
        user_id: &Id,
        recorded_at: DateTime<Utc>,
    ) -> Result<Option<PortfolioSnapshot>> {
        Ok(self.state.lock().await.snapshot(user_id, recorded_at))
    }

    async fn list_snapshots(
        &self,
        user_id: &Id,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PortfolioSnapshot>> {
        Ok(self.state.lock().await.snapshots_between(user_id, from, to))
    }
}
