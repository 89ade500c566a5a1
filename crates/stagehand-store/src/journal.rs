use crate::layout::StoreLayout;
use crate::{fsync_dir, StoreError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// An action that was started but not yet committed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JournalEntry {
    pub op_id: String,
    pub action: String,
    pub unit: String,
    pub timestamp: String,
}

/// Journal of in-flight actions.
///
/// An entry is written before an action starts and removed once its
/// milestones are persisted. Entries found on startup belong to a pass that
/// died mid-action; since that action's milestone was never written, the
/// next evaluation selects it again, so recovery only reports and discards
/// them.
pub struct Journal {
    dir: PathBuf,
}

impl Journal {
    pub fn new(layout: &StoreLayout) -> Self {
        Self {
            dir: layout.journal_dir(),
        }
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    /// Begin a new entry for an action. Returns the op_id.
    pub fn begin(&self, action: &str, unit: &str) -> Result<String, StoreError> {
        let op_id = format!(
            "{}-{}",
            chrono::Utc::now().format("%Y%m%d%H%M%S%3f"),
            &blake3::hash(format!("{unit}/{action}").as_bytes()).to_hex()[..8]
        );
        let entry = JournalEntry {
            op_id: op_id.clone(),
            action: action.to_owned(),
            unit: unit.to_owned(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        self.write_entry(&entry)?;
        debug!("journal begin: {action} on {unit} (op_id={op_id})");
        Ok(op_id)
    }

    /// Remove an entry after its action finished, successfully or not.
    pub fn commit(&self, op_id: &str) -> Result<(), StoreError> {
        let path = self.entry_path(op_id);
        if path.exists() {
            fs::remove_file(&path)?;
            debug!("journal commit: {op_id}");
        }
        Ok(())
    }

    pub fn list_incomplete(&self) -> Result<Vec<JournalEntry>, StoreError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        for dir_entry in fs::read_dir(&self.dir)? {
            let path = dir_entry?.path();
            if path.extension().is_some_and(|e| e == "json") {
                match fs::read_to_string(&path) {
                    Ok(content) => match serde_json::from_str::<JournalEntry>(&content) {
                        Ok(entry) => entries.push(entry),
                        Err(e) => {
                            warn!("corrupt journal entry {}: {e}", path.display());
                            let _ = fs::remove_file(&path);
                        }
                    },
                    Err(e) => {
                        warn!("unreadable journal entry {}: {e}", path.display());
                        let _ = fs::remove_file(&path);
                    }
                }
            }
        }
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(entries)
    }

    /// Discard incomplete entries, returning them for reporting.
    pub fn recover(&self) -> Result<Vec<JournalEntry>, StoreError> {
        let entries = self.list_incomplete()?;
        for entry in &entries {
            warn!(
                "interrupted action {} on {} (op_id={}) will be retried",
                entry.action, entry.unit, entry.op_id
            );
            let _ = fs::remove_file(self.entry_path(&entry.op_id));
        }
        if !entries.is_empty() {
            info!("journal recovery: {} interrupted actions", entries.len());
        }
        Ok(entries)
    }

    fn entry_path(&self, op_id: &str) -> PathBuf {
        self.dir.join(format!("{op_id}.json"))
    }

    fn write_entry(&self, entry: &JournalEntry) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;
        let content = serde_json::to_string_pretty(entry)?;
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.entry_path(&entry.op_id))
            .map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(&self.dir)?;
        Ok(())
    }
}
