use crate::kv::KeyValueStore;
use crate::StoreError;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

const KEY_PREFIX: &str = "shared:";

/// Published by the leader once the database schema is migrated.
pub const DB_SYNCED: &str = "db-synced";
/// Published by the leader when record bootstrap changed record IDs.
pub const DOMAIN_INIT_DONE: &str = "domain-init-done";

/// Markers visible to every peer unit and written only by the leader.
#[derive(Clone)]
pub struct SharedState {
    kv: Arc<dyn KeyValueStore>,
}

impl SharedState {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    pub fn get(&self, name: &str) -> Result<Option<String>, StoreError> {
        self.kv.get(&format!("{KEY_PREFIX}{name}"))
    }

    pub fn publish(&self, is_leader: bool, name: &str, value: &str) -> Result<(), StoreError> {
        if !is_leader {
            return Err(StoreError::NotLeader(name.to_owned()));
        }
        self.kv.set(&format!("{KEY_PREFIX}{name}"), value)?;
        info!("published shared marker {name}={value}");
        Ok(())
    }

    /// Publish only if the marker still holds `expected` (`None` meaning
    /// unpublished). Returns whether the marker was written.
    pub fn publish_if(
        &self,
        is_leader: bool,
        name: &str,
        expected: Option<&str>,
        value: &str,
    ) -> Result<bool, StoreError> {
        if !is_leader {
            return Err(StoreError::NotLeader(name.to_owned()));
        }
        let written = self
            .kv
            .compare_and_set(&format!("{KEY_PREFIX}{name}"), expected, value)?;
        if written {
            info!("published shared marker {name}={value}");
        }
        Ok(written)
    }

    pub fn list(&self) -> Result<BTreeMap<String, String>, StoreError> {
        let mut markers = BTreeMap::new();
        for key in self.kv.keys()? {
            let Some(name) = key.strip_prefix(KEY_PREFIX) else {
                continue;
            };
            if let Some(value) = self.kv.get(&key)? {
                markers.insert(name.to_owned(), value);
            }
        }
        Ok(markers)
    }
}
