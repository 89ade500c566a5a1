use crate::{fsync_dir, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;

/// Flat string key/value namespace.
///
/// `compare_and_set` is atomic with respect to other users of the same
/// handle; cross-process callers must hold the store lock.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Set `key` to `new` only if its current value equals `expected`
    /// (`None` meaning absent). Returns whether the value was written.
    fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        new: &str,
    ) -> Result<bool, StoreError>;

    fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// All keys, sorted.
    fn keys(&self) -> Result<Vec<String>, StoreError>;
}

pub(crate) fn validate_key(key: &str) -> Result<(), StoreError> {
    let valid = !key.is_empty()
        && key.len() <= 128
        && !key.starts_with('.')
        && key.bytes().all(|b| {
            b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b':' | b'.' | b'_' | b'-')
        });
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_owned()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct Record {
    key: String,
    value: String,
    updated_at: String,
    /// blake3 over the record with this field unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    checksum: Option<String>,
}

impl Record {
    fn compute_checksum(&self) -> Result<String, StoreError> {
        let mut copy = self.clone();
        copy.checksum = None;
        let json = serde_json::to_string_pretty(&copy)?;
        Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
    }
}

/// Durable store with one JSON record per key.
///
/// Writes go through a temp file, `sync_all`, rename and a directory fsync;
/// reads verify the embedded checksum.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(key.replace(':', "."))
    }

    fn read_record(&self, key: &str) -> Result<Option<Record>, StoreError> {
        validate_key(key)?;
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        let record: Record = serde_json::from_str(&content)?;
        if let Some(ref expected) = record.checksum {
            let actual = record.compute_checksum()?;
            if actual != *expected {
                return Err(StoreError::IntegrityFailure {
                    key: key.to_owned(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }
        Ok(Some(record))
    }

    fn write_record(&self, key: &str, value: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        fs::create_dir_all(&self.dir)?;
        let mut record = Record {
            key: key.to_owned(),
            value: value.to_owned(),
            updated_at: chrono::Utc::now().to_rfc3339(),
            checksum: None,
        };
        record.checksum = Some(record.compute_checksum()?);
        let content = serde_json::to_string_pretty(&record)?;

        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.path_for(key))
            .map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(&self.dir)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.read_record(key)?.map(|r| r.value))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.write_record(key, value)
    }

    fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        new: &str,
    ) -> Result<bool, StoreError> {
        let current = self.get(key)?;
        if current.as_deref() != expected {
            return Ok(false);
        }
        self.write_record(key, new)?;
        Ok(true)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        let path = self.path_for(key);
        if path.exists() {
            fs::remove_file(path)?;
            fsync_dir(&self.dir)?;
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_str().unwrap_or("");
            // Temp files and dotfiles are never records.
            if name.is_empty() || name.starts_with('.') {
                continue;
            }
            match fs::read_to_string(entry.path())
                .map_err(StoreError::from)
                .and_then(|c| Ok(serde_json::from_str::<Record>(&c)?))
            {
                Ok(record) => keys.push(record.key),
                Err(e) => tracing::warn!("skipping unreadable record '{name}': {e}"),
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// Volatile store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>, StoreError> {
        self.entries
            .lock()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        validate_key(key)?;
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        self.lock()?.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        new: &str,
    ) -> Result<bool, StoreError> {
        validate_key(key)?;
        let mut entries = self.lock()?;
        if entries.get(key).map(String::as_str) != expected {
            return Ok(false);
        }
        entries.insert(key.to_owned(), new.to_owned());
        Ok(true)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        self.lock()?.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.lock()?.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_store() -> (tempfile::TempDir, FileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("unit"));
        (dir, store)
    }

    fn exercise(store: &dyn KeyValueStore) {
        assert_eq!(store.get("milestone:installed").unwrap(), None);
        store.set("milestone:installed", "true").unwrap();
        assert_eq!(
            store.get("milestone:installed").unwrap().as_deref(),
            Some("true")
        );

        assert!(!store
            .compare_and_set("shared:db-synced", Some("x"), "y")
            .unwrap());
        assert!(store
            .compare_and_set("shared:db-synced", None, "first")
            .unwrap());
        assert!(!store
            .compare_and_set("shared:db-synced", None, "second")
            .unwrap());
        assert!(store
            .compare_and_set("shared:db-synced", Some("first"), "second")
            .unwrap());
        assert_eq!(
            store.get("shared:db-synced").unwrap().as_deref(),
            Some("second")
        );

        assert_eq!(
            store.keys().unwrap(),
            ["milestone:installed", "shared:db-synced"]
        );
        store.remove("milestone:installed").unwrap();
        store.remove("milestone:installed").unwrap();
        assert_eq!(store.keys().unwrap(), ["shared:db-synced"]);
    }

    #[test]
    fn file_store_semantics() {
        let (_dir, store) = file_store();
        exercise(&store);
    }

    #[test]
    fn memory_store_semantics() {
        exercise(&MemoryStore::new());
    }

    #[test]
    fn file_store_survives_reopen() {
        let (dir, store) = file_store();
        store.set("unit:rendered-marker", "abc").unwrap();
        drop(store);
        let reopened = FileStore::new(dir.path().join("unit"));
        assert_eq!(
            reopened.get("unit:rendered-marker").unwrap().as_deref(),
            Some("abc")
        );
    }

    #[test]
    fn file_store_detects_tampering() {
        let (_dir, store) = file_store();
        store.set("milestone:installed", "true").unwrap();
        let path = store.dir().join("milestone.installed");
        let tampered = fs::read_to_string(&path)
            .unwrap()
            .replace("\"true\"", "\"false\"");
        fs::write(&path, tampered).unwrap();
        assert!(matches!(
            store.get("milestone:installed"),
            Err(StoreError::IntegrityFailure { .. })
        ));
    }

    #[test]
    fn file_store_skips_garbage_in_listing() {
        let (_dir, store) = file_store();
        store.set("milestone:installed", "true").unwrap();
        fs::write(store.dir().join("garbage"), "NOT JSON").unwrap();
        assert_eq!(store.keys().unwrap(), ["milestone:installed"]);
    }

    #[test]
    fn rejects_invalid_keys() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.set("Milestone:Installed", "true"),
            Err(StoreError::InvalidKey(_))
        ));
        assert!(store.get("").is_err());
        assert!(store.get("../escape").is_err());
        assert!(store.get(".hidden").is_err());
    }
}
