use crate::StoreError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Current store format version. Incremented on incompatible layout changes.
pub const STORE_FORMAT_VERSION: u32 = 1;
const VERSION_FILE: &str = "version";

/// Directory layout of a unit's provisioning store.
///
/// `state/unit` holds the per-unit namespace, `state/shared` the namespace
/// visible to every peer, and `state/journal` the in-flight action journal.
/// Subdirectories are created on [`initialize`](Self::initialize).
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreVersion {
    format_version: u32,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn state_dir(&self) -> PathBuf {
        self.root.join("state")
    }

    #[inline]
    pub fn unit_dir(&self) -> PathBuf {
        self.state_dir().join("unit")
    }

    #[inline]
    pub fn shared_dir(&self) -> PathBuf {
        self.state_dir().join("shared")
    }

    #[inline]
    pub fn journal_dir(&self) -> PathBuf {
        self.state_dir().join("journal")
    }

    #[inline]
    pub fn lock_file(&self) -> PathBuf {
        self.state_dir().join(".lock")
    }

    pub fn is_initialized(&self) -> bool {
        self.state_dir().join(VERSION_FILE).exists()
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(self.unit_dir())?;
        fs::create_dir_all(self.shared_dir())?;
        fs::create_dir_all(self.journal_dir())?;

        let version_path = self.state_dir().join(VERSION_FILE);
        if version_path.exists() {
            self.verify_version()?;
        } else {
            let ver = StoreVersion {
                format_version: STORE_FORMAT_VERSION,
            };
            let content = serde_json::to_string_pretty(&ver)?;
            let state_dir = self.state_dir();
            let mut tmp = NamedTempFile::new_in(&state_dir)?;
            tmp.write_all(content.as_bytes())?;
            tmp.as_file().sync_all()?;
            tmp.persist(&version_path)
                .map_err(|e| StoreError::Io(e.error))?;
            crate::fsync_dir(&state_dir)?;
        }

        Ok(())
    }

    pub fn verify_version(&self) -> Result<(), StoreError> {
        let version_path = self.state_dir().join(VERSION_FILE);
        let content = fs::read_to_string(&version_path)?;
        let ver: StoreVersion = serde_json::from_str(&content)?;

        if ver.format_version != STORE_FORMAT_VERSION {
            return Err(StoreError::VersionMismatch {
                expected: STORE_FORMAT_VERSION,
                found: ver.format_version,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths_are_correct() {
        let layout = StoreLayout::new("/tmp/stagehand-test");
        assert_eq!(
            layout.unit_dir(),
            PathBuf::from("/tmp/stagehand-test/state/unit")
        );
        assert_eq!(
            layout.shared_dir(),
            PathBuf::from("/tmp/stagehand-test/state/shared")
        );
        assert_eq!(
            layout.journal_dir(),
            PathBuf::from("/tmp/stagehand-test/state/journal")
        );
        assert_eq!(
            layout.lock_file(),
            PathBuf::from("/tmp/stagehand-test/state/.lock")
        );
    }

    #[test]
    fn initialize_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        assert!(!layout.is_initialized());
        layout.initialize().unwrap();

        assert!(layout.unit_dir().is_dir());
        assert!(layout.shared_dir().is_dir());
        assert!(layout.journal_dir().is_dir());
        assert!(layout.is_initialized());
    }

    #[test]
    fn initialize_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        layout.initialize().unwrap();
        layout.initialize().unwrap();
        layout.verify_version().unwrap();
    }

    #[test]
    fn initialize_rejects_foreign_version() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        layout.initialize().unwrap();
        fs::write(
            layout.state_dir().join(VERSION_FILE),
            r#"{"format_version": 9}"#,
        )
        .unwrap();
        assert!(matches!(
            layout.initialize(),
            Err(StoreError::VersionMismatch { found: 9, .. })
        ));
    }
}
