//! The inbound event payload: who this unit is, whether it leads, and what
//! each related dependency has published so far.

use crate::CoreError;
use serde::{Deserialize, Serialize};
use stagehand_schema::DependencyKind;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DependencyStatus {
    NotConnected,
    ConnectedIncomplete,
    Available,
}

impl DependencyStatus {
    pub fn is_connected(self) -> bool {
        self != DependencyStatus::NotConnected
    }
}

impl fmt::Display for DependencyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyStatus::NotConnected => write!(f, "not-connected"),
            DependencyStatus::ConnectedIncomplete => write!(f, "connected-incomplete"),
            DependencyStatus::Available => write!(f, "available"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnitInfo {
    pub name: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DependencySignal {
    pub kind: DependencyKind,
    #[serde(default)]
    pub connected: bool,
    #[serde(default)]
    pub available: bool,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl DependencySignal {
    /// Available only when flagged so and every field the kind needs is
    /// present and non-empty.
    pub fn status(&self) -> DependencyStatus {
        if !self.connected {
            return DependencyStatus::NotConnected;
        }
        let complete = self
            .kind
            .required_fields()
            .iter()
            .all(|f| self.fields.get(*f).is_some_and(|v| !v.trim().is_empty()));
        if self.available && complete {
            DependencyStatus::Available
        } else {
            DependencyStatus::ConnectedIncomplete
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Signals {
    pub unit: UnitInfo,
    #[serde(default)]
    pub leader: bool,
    #[serde(default)]
    pub dependencies: Vec<DependencySignal>,
}

impl Signals {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.unit.name.trim().is_empty() {
            return Err(CoreError::InvalidSignals("unit.name must not be empty".to_owned()));
        }
        if self.unit.address.trim().is_empty() {
            return Err(CoreError::InvalidSignals(
                "unit.address must not be empty".to_owned(),
            ));
        }
        let mut seen = Vec::new();
        for dep in &self.dependencies {
            if seen.contains(&dep.kind) {
                return Err(CoreError::InvalidSignals(format!(
                    "dependency '{}' signalled more than once",
                    dep.kind
                )));
            }
            seen.push(dep.kind);
        }
        Ok(())
    }

    pub fn signal(&self, kind: DependencyKind) -> Option<&DependencySignal> {
        self.dependencies.iter().find(|d| d.kind == kind)
    }

    pub fn status(&self, kind: DependencyKind) -> DependencyStatus {
        self.signal(kind)
            .map_or(DependencyStatus::NotConnected, DependencySignal::status)
    }

    /// Status of every known dependency kind.
    pub fn statuses(&self) -> BTreeMap<DependencyKind, DependencyStatus> {
        DependencyKind::ALL
            .into_iter()
            .map(|k| (k, self.status(k)))
            .collect()
    }

    pub fn field(&self, kind: DependencyKind, name: &str) -> Option<&str> {
        self.signal(kind)
            .and_then(|d| d.fields.get(name))
            .map(String::as_str)
    }
}

pub fn parse_signals_str(input: &str) -> Result<Signals, CoreError> {
    let signals: Signals = serde_json::from_str(input)?;
    signals.validate()?;
    Ok(signals)
}

pub fn parse_signals_file(path: impl AsRef<Path>) -> Result<Signals, CoreError> {
    let content = fs::read_to_string(path)?;
    parse_signals_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIGNALS: &str = r#"{
        "unit": {"name": "trove/0", "address": "10.0.0.5"},
        "leader": true,
        "dependencies": [
            {"kind": "database", "connected": true, "available": true,
             "fields": {"host": "10.0.0.2", "password": "s3cret"}},
            {"kind": "message-queue", "connected": true, "available": true,
             "fields": {"hostname": "10.0.0.3"}},
            {"kind": "identity", "connected": false}
        ]
    }"#;

    #[test]
    fn parses_and_classifies() {
        let s = parse_signals_str(SIGNALS).unwrap();
        assert!(s.leader);
        assert_eq!(s.status(DependencyKind::Database), DependencyStatus::Available);
        assert_eq!(
            s.status(DependencyKind::MessageQueue),
            DependencyStatus::ConnectedIncomplete
        );
        assert_eq!(s.status(DependencyKind::Identity), DependencyStatus::NotConnected);
        assert_eq!(s.status(DependencyKind::Cluster), DependencyStatus::NotConnected);
        assert_eq!(s.field(DependencyKind::Database, "host"), Some("10.0.0.2"));
    }

    #[test]
    fn available_flag_alone_is_not_enough() {
        let sig = DependencySignal {
            kind: DependencyKind::Identity,
            connected: true,
            available: true,
            fields: BTreeMap::from([("auth_host".to_owned(), "10.0.0.4".to_owned())]),
        };
        assert_eq!(sig.status(), DependencyStatus::ConnectedIncomplete);
    }

    #[test]
    fn kinds_without_fields_follow_the_flag() {
        let mut sig = DependencySignal {
            kind: DependencyKind::HaCluster,
            connected: true,
            available: false,
            fields: BTreeMap::new(),
        };
        assert_eq!(sig.status(), DependencyStatus::ConnectedIncomplete);
        sig.available = true;
        assert_eq!(sig.status(), DependencyStatus::Available);
    }

    #[test]
    fn blank_fields_do_not_count() {
        let sig = DependencySignal {
            kind: DependencyKind::DnsBackend,
            connected: true,
            available: true,
            fields: BTreeMap::from([("rndc_key".to_owned(), "  ".to_owned())]),
        };
        assert_eq!(sig.status(), DependencyStatus::ConnectedIncomplete);
    }

    #[test]
    fn rejects_duplicate_kinds_and_empty_unit() {
        let dup = r#"{"unit": {"name": "a/0", "address": "h"},
            "dependencies": [{"kind": "cluster"}, {"kind": "cluster"}]}"#;
        assert!(matches!(
            parse_signals_str(dup),
            Err(CoreError::InvalidSignals(_))
        ));
        let empty = r#"{"unit": {"name": "", "address": "h"}}"#;
        assert!(matches!(
            parse_signals_str(empty),
            Err(CoreError::InvalidSignals(_))
        ));
    }

    #[test]
    fn rejects_unknown_kind() {
        let bad = r#"{"unit": {"name": "a/0", "address": "h"},
            "dependencies": [{"kind": "telemetry"}]}"#;
        assert!(matches!(
            parse_signals_str(bad),
            Err(CoreError::Serialization(_))
        ));
    }
}
