use crate::kv::KeyValueStore;
use crate::StoreError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

const KEY_PREFIX: &str = "milestone:";
const SET: &str = "true";

/// A one-way fact about provisioning progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Milestone {
    Installed,
    BaseConfigRendered,
    DatabaseMigrated,
    EndpointRegistered,
    FullConfigRendered,
    RecordsInitialized,
    PoolsUpdated,
    HaConfigured,
}

impl Milestone {
    pub const ALL: [Milestone; 8] = [
        Milestone::Installed,
        Milestone::BaseConfigRendered,
        Milestone::DatabaseMigrated,
        Milestone::EndpointRegistered,
        Milestone::FullConfigRendered,
        Milestone::RecordsInitialized,
        Milestone::PoolsUpdated,
        Milestone::HaConfigured,
    ];

    /// The strictly ordered provisioning chain.
    pub const CHAIN: [Milestone; 6] = [
        Milestone::Installed,
        Milestone::BaseConfigRendered,
        Milestone::DatabaseMigrated,
        Milestone::FullConfigRendered,
        Milestone::RecordsInitialized,
        Milestone::PoolsUpdated,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Milestone::Installed => "installed",
            Milestone::BaseConfigRendered => "base-config-rendered",
            Milestone::DatabaseMigrated => "database-migrated",
            Milestone::EndpointRegistered => "endpoint-registered",
            Milestone::FullConfigRendered => "full-config-rendered",
            Milestone::RecordsInitialized => "records-initialized",
            Milestone::PoolsUpdated => "pools-updated",
            Milestone::HaConfigured => "ha-configured",
        }
    }

    /// Milestone that must already hold before this one may be marked.
    pub fn predecessor(self) -> Option<Milestone> {
        match self {
            Milestone::Installed | Milestone::HaConfigured => None,
            Milestone::BaseConfigRendered | Milestone::EndpointRegistered => {
                Some(Milestone::Installed)
            }
            Milestone::DatabaseMigrated => Some(Milestone::BaseConfigRendered),
            Milestone::FullConfigRendered => Some(Milestone::DatabaseMigrated),
            Milestone::RecordsInitialized | Milestone::PoolsUpdated => {
                Some(Milestone::FullConfigRendered)
            }
        }
    }

    /// Chain milestones that come after this one.
    pub fn dependents(self) -> Vec<Milestone> {
        match Milestone::CHAIN.iter().position(|m| *m == self) {
            Some(idx) => Milestone::CHAIN[idx + 1..].to_vec(),
            None => Vec::new(),
        }
    }

    fn key(self) -> String {
        format!("{KEY_PREFIX}{}", self.as_str())
    }
}

impl fmt::Display for Milestone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Milestone {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Milestone::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| StoreError::UnknownMilestone(s.to_owned()))
    }
}

/// The set of milestones reached by a unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MilestoneSet(BTreeSet<Milestone>);

impl MilestoneSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, m: Milestone) -> bool {
        self.0.contains(&m)
    }

    pub fn insert(&mut self, m: Milestone) -> bool {
        self.0.insert(m)
    }

    pub fn remove(&mut self, m: Milestone) -> bool {
        self.0.remove(&m)
    }

    pub fn iter(&self) -> impl Iterator<Item = Milestone> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Milestone> for MilestoneSet {
    fn from_iter<T: IntoIterator<Item = Milestone>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Milestones persisted in a unit's key/value namespace as
/// `milestone:<name>` keys.
#[derive(Clone)]
pub struct MilestoneStore {
    kv: Arc<dyn KeyValueStore>,
}

impl MilestoneStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    pub fn load(&self) -> Result<MilestoneSet, StoreError> {
        let mut set = MilestoneSet::new();
        for m in Milestone::ALL {
            if self.is_set(m)? {
                set.insert(m);
            }
        }
        Ok(set)
    }

    pub fn is_set(&self, m: Milestone) -> Result<bool, StoreError> {
        Ok(self.kv.get(&m.key())?.as_deref() == Some(SET))
    }

    /// Record a milestone. Returns `false` if it was already set.
    pub fn mark(&self, m: Milestone) -> Result<bool, StoreError> {
        if self.is_set(m)? {
            return Ok(false);
        }
        self.kv.set(&m.key(), SET)?;
        debug!("milestone reached: {m}");
        Ok(true)
    }

    /// Clear a milestone and every later chain milestone. Returns the
    /// milestones that were actually cleared.
    pub fn clear(&self, m: Milestone) -> Result<Vec<Milestone>, StoreError> {
        let mut cleared = Vec::new();
        for target in std::iter::once(m).chain(m.dependents()) {
            if self.is_set(target)? {
                self.kv.remove(&target.key())?;
                debug!("milestone cleared: {target}");
                cleared.push(target);
            }
        }
        Ok(cleared)
    }
}
