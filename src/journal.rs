//! Durable two-phase transactions over file system mutations.
//!
//! Install and uninstall touch two independent owners (the package store and
//! the shim directory). Each mutation is written to a journal file *before* it
//! is performed, so an interrupted process can be rolled back (or its commit
//! finished) by [`recover`] on the next start.

use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use crate::error::{IoContext, Result, ToolError};
use crate::util::{random_file_name, remove_path, write_atomically};

/// One recorded mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JournalEntry {
    /// Scratch space, removed whatever the outcome.
    Temporary { path: PathBuf },
    /// Something new; removed on rollback.
    Created { path: PathBuf },
    /// Something removed; the backup is deleted on commit or moved back on rollback.
    MovedAside { original: PathBuf, backup: PathBuf },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum JournalState {
    Pending,
    Committed,
}

#[derive(Debug, Serialize, Deserialize)]
struct JournalFile {
    state: JournalState,
    entries: Vec<JournalEntry>,
}

/// An open transaction. Dropping it without calling [`Transaction::commit`]
/// rolls every recorded mutation back in reverse order.
#[derive(Debug)]
pub struct Transaction {
    journal_path: PathBuf,
    entries: Vec<JournalEntry>,
    finished: bool,
}

impl Transaction {
    /// Opens a new transaction whose journal lives in `journal_dir`.
    pub fn begin(journal_dir: &Path) -> Result<Transaction> {
        std::fs::create_dir_all(journal_dir).at("Could not create journal directory", journal_dir)?;
        let journal_path = journal_dir.join(format!("{}.json", random_file_name()));
        let transaction = Transaction {
            journal_path,
            entries: Vec::new(),
            finished: false,
        };
        transaction.persist(JournalState::Pending)?;
        debug!("begin transaction {}", transaction.journal_path.display());
        Ok(transaction)
    }

    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    /// Records an entry and flushes the journal. Call before mutating.
    pub fn record(&mut self, entry: JournalEntry) -> Result<()> {
        self.entries.push(entry);
        self.persist(JournalState::Pending)
    }

    /// Creates a directory as a rollback-able mutation. Missing parents are
    /// created too but not tracked.
    pub fn create_dir(&mut self, path: &Path) -> Result<()> {
        self.record(JournalEntry::Created { path: path.to_path_buf() })?;
        std::fs::create_dir_all(path).at("Could not create directory", path)
    }

    /// Creates a scratch directory that disappears on commit and on rollback.
    pub fn create_temporary_dir(&mut self, path: &Path) -> Result<()> {
        self.record(JournalEntry::Temporary { path: path.to_path_buf() })?;
        std::fs::create_dir_all(path).at("Could not create directory", path)
    }

    /// Writes a new file (or replaces an existing one) as a rollback-able mutation.
    pub fn write_file(&mut self, path: &Path, contents: &[u8], stage_dir: &Path) -> Result<()> {
        if path.exists() {
            self.move_aside(path, stage_dir)?;
        }
        self.record(JournalEntry::Created { path: path.to_path_buf() })?;
        write_atomically(path, contents)
    }

    /// Moves `path` into `stage_dir` so it can be restored on rollback.
    /// `stage_dir` must be on the same file system as `path`.
    pub fn move_aside(&mut self, path: &Path, stage_dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(stage_dir).at("Could not create staging directory", stage_dir)?;
        let backup = stage_dir.join(random_file_name());
        self.record(JournalEntry::MovedAside {
            original: path.to_path_buf(),
            backup: backup.clone(),
        })?;
        std::fs::rename(path, &backup).at("Could not move", path)?;
        Ok(backup)
    }

    /// Makes every recorded mutation permanent.
    pub fn commit(mut self) -> Result<()> {
        self.persist(JournalState::Committed)?;
        self.finished = true;
        finish_commit(&self.entries);
        remove_journal(&self.journal_path);
        debug!("committed transaction {}", self.journal_path.display());
        Ok(())
    }

    fn persist(&self, state: JournalState) -> Result<()> {
        let file = JournalFile {
            state,
            entries: self.entries.clone(),
        };
        let json = serde_json::to_vec_pretty(&file)
            .map_err(|e| ToolError::Journal(format!("cannot serialize journal: {e}")))?;
        write_atomically(&self.journal_path, &json)?;
        // the journal must hit the disk before the mutation it describes
        if let Ok(handle) = std::fs::File::open(&self.journal_path) {
            let _ = handle.sync_all();
        }
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        debug!("rolling back transaction {}", self.journal_path.display());
        roll_back(&self.entries);
        remove_journal(&self.journal_path);
    }
}

fn finish_commit(entries: &[JournalEntry]) {
    for entry in entries {
        let path = match entry {
            JournalEntry::Temporary { path } => path,
            JournalEntry::MovedAside { backup, .. } => backup,
            JournalEntry::Created { .. } => continue,
        };
        if let Err(e) = remove_path(path) {
            warn!("could not clean up '{}': {e}", path.display());
        }
    }
}

fn roll_back(entries: &[JournalEntry]) {
    for entry in entries.iter().rev() {
        let result = match entry {
            JournalEntry::Temporary { path } | JournalEntry::Created { path } => remove_path(path),
            JournalEntry::MovedAside { original, backup } => restore_backup(original, backup),
        };
        if let Err(e) = result {
            warn!("rollback step failed: {e}");
        }
    }
}

fn restore_backup(original: &Path, backup: &Path) -> Result<()> {
    if std::fs::symlink_metadata(backup).is_err() {
        return Ok(());
    }
    if let Some(parent) = original.parent() {
        std::fs::create_dir_all(parent).at("Could not create directory", parent)?;
    }
    remove_path(original)?;
    std::fs::rename(backup, original).at("Could not restore", original)
}

fn remove_journal(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        warn!("could not remove journal '{}': {e}", path.display());
    }
}

/// Outcome of [`recover`].
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Recovery {
    pub rolled_back: usize,
    pub completed: usize,
    pub discarded: usize,
}

/// Finishes or undoes transactions left behind by interrupted processes.
pub fn recover(journal_dir: &Path) -> Result<Recovery> {
    let mut recovery = Recovery::default();
    if !journal_dir.is_dir() {
        return Ok(recovery);
    }
    let mut journals = Vec::new();
    for entry in std::fs::read_dir(journal_dir).at("Could not read journal directory", journal_dir)? {
        let path = entry.at("Could not read journal directory", journal_dir)?.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            journals.push(path);
        }
    }
    journals.sort();

    for path in journals {
        let parsed = std::fs::read_to_string(&path)
            .ok()
            .and_then(|text| serde_json::from_str::<JournalFile>(&text).ok());
        match parsed {
            Some(JournalFile { state: JournalState::Committed, entries }) => {
                warn!("completing interrupted transaction {}", path.display());
                finish_commit(&entries);
                recovery.completed += 1;
            }
            Some(JournalFile { state: JournalState::Pending, entries }) => {
                warn!("rolling back interrupted transaction {}", path.display());
                roll_back(&entries);
                recovery.rolled_back += 1;
            }
            None => {
                warn!("discarding unreadable journal {}", path.display());
                recovery.discarded += 1;
            }
        }
        remove_journal(&path);
    }
    Ok(recovery)
}
