//! The provisioning guard table.
//!
//! Every action the engine can take is listed once in [`TRANSITIONS`], with
//! the guard that enables it and the milestone it writes. Table order is
//! execution order within a pass. [`evaluate`] is a pure function of the
//! service and the current [`Facts`]; it never mutates milestones.

use crate::service::Service;
use crate::signals::{DependencyStatus, Signals};
use serde::{Deserialize, Serialize};
use stagehand_schema::DependencyKind;
use stagehand_store::{Milestone, MilestoneSet};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    RequestDatabase,
    RequestQueue,
    Install,
    RegisterEndpoint,
    RenderBaseConfig,
    MigrateDatabase,
    ObserveMigration,
    UpdatePeers,
    RenderFullConfig,
    BootstrapRecords,
    UpdatePools,
    ConfigureHa,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::RequestDatabase => "request-database",
            Action::RequestQueue => "request-queue",
            Action::Install => "install",
            Action::RegisterEndpoint => "register-endpoint",
            Action::RenderBaseConfig => "render-base-config",
            Action::MigrateDatabase => "migrate-database",
            Action::ObserveMigration => "observe-migration",
            Action::UpdatePeers => "update-peers",
            Action::RenderFullConfig => "render-full-config",
            Action::BootstrapRecords => "bootstrap-records",
            Action::UpdatePools => "update-pools",
            Action::ConfigureHa => "configure-ha",
        }
    }

    /// The table row of this action. Rows are declared in variant order.
    pub fn transition(self) -> &'static Transition {
        &TRANSITIONS[self as usize]
    }

    pub fn writes(self) -> Option<Milestone> {
        self.transition().writes
    }

    /// Whether the action advances the provisioning chain. A failed chained
    /// action stops the rest of the chain for the pass.
    pub fn is_chained(self) -> bool {
        self.writes().is_some_and(|m| Milestone::CHAIN.contains(&m))
    }

    pub fn leader_only(self) -> bool {
        self.transition().leader_only
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TRANSITIONS
            .iter()
            .map(|t| t.action)
            .find(|a| a.as_str() == s)
            .ok_or_else(|| format!("unknown action: {s}"))
    }
}

/// Everything a guard may look at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Facts {
    pub dependencies: BTreeMap<DependencyKind, DependencyStatus>,
    pub milestones: MilestoneSet,
    pub leader: bool,
    /// Whether the shared `db-synced` marker is present.
    pub db_synced: bool,
}

impl Facts {
    pub fn from_signals(signals: &Signals, milestones: MilestoneSet, db_synced: bool) -> Self {
        Self {
            dependencies: signals.statuses(),
            milestones,
            leader: signals.leader,
            db_synced,
        }
    }

    pub fn status(&self, kind: DependencyKind) -> DependencyStatus {
        self.dependencies
            .get(&kind)
            .copied()
            .unwrap_or(DependencyStatus::NotConnected)
    }

    fn available(&self, kind: DependencyKind) -> bool {
        self.status(kind) == DependencyStatus::Available
    }

    fn has(&self, m: Milestone) -> bool {
        self.milestones.contains(m)
    }
}

pub struct Transition {
    pub action: Action,
    pub guard: fn(&Service, &Facts) -> bool,
    pub writes: Option<Milestone>,
    pub leader_only: bool,
}

fn core_available(s: &Service, f: &Facts) -> bool {
    s.descriptor
        .core_dependencies()
        .into_iter()
        .all(|k| f.available(k))
}

fn all_required_available(s: &Service, f: &Facts) -> bool {
    s.descriptor
        .service
        .requires
        .iter()
        .all(|k| f.available(*k))
}

fn migration_pending(s: &Service, f: &Facts) -> bool {
    core_available(s, f)
        && f.has(Milestone::BaseConfigRendered)
        && !f.has(Milestone::DatabaseMigrated)
}

fn pools_ready(s: &Service, f: &Facts) -> bool {
    if s.descriptor.capabilities.bootstrap_records {
        f.has(Milestone::RecordsInitialized)
    } else {
        f.has(Milestone::FullConfigRendered)
    }
}

pub static TRANSITIONS: [Transition; 12] = [
    Transition {
        action: Action::RequestDatabase,
        guard: |_, f| f.status(DependencyKind::Database) == DependencyStatus::ConnectedIncomplete,
        writes: None,
        leader_only: false,
    },
    Transition {
        action: Action::RequestQueue,
        guard: |_, f| {
            f.status(DependencyKind::MessageQueue) == DependencyStatus::ConnectedIncomplete
        },
        writes: None,
        leader_only: false,
    },
    Transition {
        action: Action::Install,
        guard: |_, f| !f.has(Milestone::Installed),
        writes: Some(Milestone::Installed),
        leader_only: false,
    },
    Transition {
        action: Action::RegisterEndpoint,
        guard: |_, f| {
            f.status(DependencyKind::Identity).is_connected()
                && f.has(Milestone::Installed)
                && !f.has(Milestone::EndpointRegistered)
        },
        writes: Some(Milestone::EndpointRegistered),
        leader_only: false,
    },
    Transition {
        action: Action::RenderBaseConfig,
        guard: |s, f| core_available(s, f) && !f.has(Milestone::BaseConfigRendered),
        writes: Some(Milestone::BaseConfigRendered),
        leader_only: false,
    },
    Transition {
        action: Action::MigrateDatabase,
        guard: |s, f| f.leader && migration_pending(s, f),
        writes: Some(Milestone::DatabaseMigrated),
        leader_only: true,
    },
    Transition {
        action: Action::ObserveMigration,
        guard: |s, f| !f.leader && f.db_synced && migration_pending(s, f),
        writes: Some(Milestone::DatabaseMigrated),
        leader_only: false,
    },
    Transition {
        action: Action::UpdatePeers,
        guard: |_, f| f.available(DependencyKind::Cluster),
        writes: None,
        leader_only: false,
    },
    Transition {
        action: Action::RenderFullConfig,
        guard: |s, f| {
            all_required_available(s, f)
                && f.has(Milestone::DatabaseMigrated)
                && !f.has(Milestone::FullConfigRendered)
        },
        writes: Some(Milestone::FullConfigRendered),
        leader_only: false,
    },
    Transition {
        action: Action::BootstrapRecords,
        guard: |s, f| {
            s.descriptor.capabilities.bootstrap_records
                && f.leader
                && f.has(Milestone::FullConfigRendered)
                && !f.has(Milestone::RecordsInitialized)
        },
        writes: Some(Milestone::RecordsInitialized),
        leader_only: true,
    },
    Transition {
        action: Action::UpdatePools,
        guard: |s, f| {
            s.descriptor.pools.is_some()
                && f.leader
                && pools_ready(s, f)
                && !f.has(Milestone::PoolsUpdated)
        },
        writes: Some(Milestone::PoolsUpdated),
        leader_only: true,
    },
    Transition {
        action: Action::ConfigureHa,
        guard: |s, f| {
            s.descriptor.capabilities.ha
                && f.status(DependencyKind::HaCluster).is_connected()
                && !f.has(Milestone::HaConfigured)
        },
        writes: Some(Milestone::HaConfigured),
        leader_only: false,
    },
];

/// Actions enabled by the current facts, in execution order.
pub fn evaluate(service: &Service, facts: &Facts) -> Vec<Action> {
    TRANSITIONS
        .iter()
        .filter(|t| (t.guard)(service, facts))
        .map(|t| t.action)
        .collect()
}
