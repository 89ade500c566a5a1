use crate::machine::Facts;
use crate::service::Service;
use crate::signals::DependencyStatus;
use serde::{Deserialize, Serialize};
use stagehand_schema::DependencyKind;
use stagehand_store::Milestone;
use std::fmt;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLevel {
    Active,
    Waiting,
    Blocked,
}

impl fmt::Display for StatusLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusLevel::Active => write!(f, "active"),
            StatusLevel::Waiting => write!(f, "waiting"),
            StatusLevel::Blocked => write!(f, "blocked"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitStatus {
    pub level: StatusLevel,
    pub message: String,
}

impl UnitStatus {
    fn new(level: StatusLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.level, self.message)
    }
}

/// Milestones this unit must reach before it reports ready.
pub fn required_milestones(service: &Service, facts: &Facts) -> Vec<Milestone> {
    let caps = service.descriptor.capabilities;
    let mut required = vec![
        Milestone::Installed,
        Milestone::BaseConfigRendered,
        Milestone::DatabaseMigrated,
        Milestone::FullConfigRendered,
    ];
    if facts.leader && caps.bootstrap_records {
        required.push(Milestone::RecordsInitialized);
    }
    if facts.leader && service.descriptor.pools.is_some() {
        required.push(Milestone::PoolsUpdated);
    }
    if caps.ha && facts.status(DependencyKind::HaCluster).is_connected() {
        required.push(Milestone::HaConfigured);
    }
    required
}

fn joined(kinds: &[DependencyKind]) -> String {
    kinds
        .iter()
        .map(|k| k.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Compute the single aggregate status of the unit.
pub fn assess_status(service: &Service, facts: &Facts) -> UnitStatus {
    let status = compute(service, facts);
    info!("unit status: {status}");
    status
}

fn compute(service: &Service, facts: &Facts) -> UnitStatus {
    if let Some(check) = service.status_check() {
        return UnitStatus::new(check.level, check.message);
    }

    let required = &service.descriptor.service.requires;
    let with_status = |wanted: DependencyStatus| -> Vec<DependencyKind> {
        required
            .iter()
            .copied()
            .filter(|k| facts.status(*k) == wanted)
            .collect()
    };

    let missing = with_status(DependencyStatus::NotConnected);
    if !missing.is_empty() {
        return UnitStatus::new(
            StatusLevel::Waiting,
            format!("Missing relations: {}", joined(&missing)),
        );
    }

    let incomplete = with_status(DependencyStatus::ConnectedIncomplete);
    if !incomplete.is_empty() {
        return UnitStatus::new(
            StatusLevel::Waiting,
            format!("Incomplete relations: {}", joined(&incomplete)),
        );
    }

    let pending: Vec<&str> = required_milestones(service, facts)
        .into_iter()
        .filter(|m| !facts.milestones.contains(*m))
        .map(Milestone::as_str)
        .collect();
    if !pending.is_empty() {
        return UnitStatus::new(
            StatusLevel::Waiting,
            format!("Waiting for: {}", pending.join(", ")),
        );
    }

    UnitStatus::new(StatusLevel::Active, "Unit is ready")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::tests::designate;
    use stagehand_store::MilestoneSet;
    use std::collections::BTreeMap;

    fn facts(available: &[DependencyKind], incomplete: &[DependencyKind]) -> Facts {
        let mut deps = BTreeMap::new();
        for k in available {
            deps.insert(*k, DependencyStatus::Available);
        }
        for k in incomplete {
            deps.insert(*k, DependencyStatus::ConnectedIncomplete);
        }
        Facts {
            dependencies: deps,
            milestones: MilestoneSet::new(),
            leader: true,
            db_synced: false,
        }
    }

    const ALL_REQUIRED: [DependencyKind; 4] = [
        DependencyKind::Database,
        DependencyKind::MessageQueue,
        DependencyKind::Identity,
        DependencyKind::DnsBackend,
    ];

    #[test]
    fn blocked_wins_over_everything() {
        let s = designate("[sinks.nova]\ndomain = \"nova.example.com.\"");
        let st = assess_status(&s, &facts(&[], &[]));
        assert_eq!(st.level, StatusLevel::Blocked);
        assert!(st.message.contains("nameservers"));
    }

    #[test]
    fn missing_relations_are_listed_in_declaration_order() {
        let s = designate("");
        let st = assess_status(&s, &facts(&[DependencyKind::Database], &[]));
        assert_eq!(st.level, StatusLevel::Waiting);
        assert_eq!(
            st.message,
            "Missing relations: message-queue, identity, dns-backend"
        );
    }

    #[test]
    fn incomplete_relations_come_after_missing() {
        let s = designate("");
        let st = assess_status(
            &s,
            &facts(
                &[DependencyKind::Database, DependencyKind::Identity, DependencyKind::DnsBackend],
                &[DependencyKind::MessageQueue],
            ),
        );
        assert_eq!(st.message, "Incomplete relations: message-queue");
    }

    #[test]
    fn pending_milestones_then_ready() {
        let s = designate("");
        let mut f = facts(&ALL_REQUIRED, &[]);
        f.leader = false;
        let st = assess_status(&s, &f);
        assert_eq!(
            st.message,
            "Waiting for: installed, base-config-rendered, database-migrated, full-config-rendered"
        );

        f.milestones = [
            Milestone::Installed,
            Milestone::BaseConfigRendered,
            Milestone::DatabaseMigrated,
            Milestone::FullConfigRendered,
        ]
        .into_iter()
        .collect();
        let st = assess_status(&s, &f);
        assert_eq!(st.level, StatusLevel::Active);
        assert_eq!(st.message, "Unit is ready");
    }

    #[test]
    fn leader_also_waits_for_records_and_pools() {
        let s = designate("");
        let mut f = facts(&ALL_REQUIRED, &[]);
        f.dependencies
            .insert(DependencyKind::HaCluster, DependencyStatus::ConnectedIncomplete);
        let required = required_milestones(&s, &f);
        assert!(required.contains(&Milestone::RecordsInitialized));
        assert!(required.contains(&Milestone::PoolsUpdated));
        assert!(required.contains(&Milestone::HaConfigured));
    }
}
