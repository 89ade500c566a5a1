use crate::dependency::DependencyKind;
use crate::types::DaemonName;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

pub const DESCRIPTOR_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("failed to read descriptor file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse descriptor: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("unsupported descriptor_version: {0}, expected 1")]
    UnsupportedVersion(u32),
    #[error("service.name must not be empty")]
    EmptyServiceName,
    #[error("daemon '{0}' is declared more than once")]
    DuplicateDaemon(String),
    #[error("restart_map entry '{file}' references unmanaged daemon '{daemon}'")]
    UnknownRestartDaemon { file: String, daemon: String },
    #[error("ports declared for unmanaged daemon '{0}'")]
    UnknownPortDaemon(String),
    #[error("default_service '{0}' is not a managed daemon")]
    UnknownDefaultService(String),
    #[error("{tier} port {port} is assigned to both '{first}' and '{second}'")]
    PortConflict {
        tier: Tier,
        port: u16,
        first: String,
        second: String,
    },
    #[error("unknown daemon '{0}'")]
    UnknownDaemon(String),
    #[error("no {tier} port declared for daemon '{daemon}'")]
    NoPort { daemon: String, tier: Tier },
    #[error("unknown network tier '{0}', expected public, admin or internal")]
    UnknownTier(String),
    #[error("{0} must not be an empty command")]
    EmptyCommand(&'static str),
    #[error("capability '{capability}' requires a [{section}] section")]
    MissingSection {
        capability: &'static str,
        section: &'static str,
    },
    #[error("database '{0}' is provisioned more than once")]
    DuplicateDatabase(String),
    #[error("invalid options: {0}")]
    Options(String),
    #[error(transparent)]
    Slaves(#[from] crate::slaves::SlaveParseError),
}

/// Network visibility tier of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Public,
    Admin,
    Internal,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Public, Tier::Admin, Tier::Internal];
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Public => write!(f, "public"),
            Tier::Admin => write!(f, "admin"),
            Tier::Internal => write!(f, "internal"),
        }
    }
}

impl FromStr for Tier {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Tier::Public),
            "admin" => Ok(Tier::Admin),
            "internal" | "int" => Ok(Tier::Internal),
            other => Err(DescriptorError::UnknownTier(other.to_owned())),
        }
    }
}

/// Static declaration of a deployable service.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServiceDescriptor {
    pub descriptor_version: u32,
    pub service: ServiceSection,
    #[serde(default)]
    pub capabilities: Capabilities,
    #[serde(default)]
    pub ports: BTreeMap<DaemonName, PortMap>,
    #[serde(default)]
    pub restart_map: BTreeMap<String, Vec<DaemonName>>,
    #[serde(default)]
    pub configs: ConfigSets,
    #[serde(default)]
    pub migration: Option<CommandSection>,
    #[serde(default)]
    pub pools: Option<PoolsSection>,
    #[serde(default)]
    pub bootstrap: Option<BootstrapSection>,
    #[serde(default)]
    pub ha: HaSection,
    #[serde(default)]
    pub databases: Vec<DatabaseSpec>,
    #[serde(default)]
    pub credentials: CredentialDefaults,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServiceSection {
    pub name: String,
    #[serde(default)]
    pub release: String,
    #[serde(default)]
    pub service_type: Option<String>,
    #[serde(default)]
    pub default_service: Option<DaemonName>,
    #[serde(default)]
    pub packages: Vec<String>,
    #[serde(default)]
    pub daemons: Vec<DaemonName>,
    #[serde(default)]
    pub requires: Vec<DependencyKind>,
    #[serde(default)]
    pub optional: Vec<DependencyKind>,
    #[serde(default)]
    pub endpoint_suffix: String,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Capabilities {
    #[serde(default)]
    pub ha: bool,
    #[serde(default)]
    pub ssl: bool,
    #[serde(default)]
    pub bootstrap_records: bool,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PortMap {
    pub public: u16,
    pub admin: u16,
    pub internal: u16,
}

impl PortMap {
    pub fn get(&self, tier: Tier) -> u16 {
        match tier {
            Tier::Public => self.public,
            Tier::Admin => self.admin,
            Tier::Internal => self.internal,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ConfigSets {
    #[serde(default)]
    pub base: Vec<String>,
    /// Files rendered once the database is migrated. Empty means every file
    /// in the restart map.
    #[serde(default)]
    pub full: Vec<String>,
    /// Directory that receives one rndc key file per DNS slave.
    #[serde(default)]
    pub rndc_key_dir: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CommandSection {
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PoolsSection {
    pub update_command: Vec<String>,
}

/// Argv templates for the bootstrap helper. `{domain}`, `{email}` and
/// `{server}` are substituted per call.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BootstrapSection {
    pub probe: Vec<String>,
    pub server_create: Vec<String>,
    pub domain_get: Vec<String>,
    pub domain_create: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct HaSection {
    #[serde(default)]
    pub resources: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DatabaseSpec {
    pub database: String,
    pub username: String,
    #[serde(default)]
    pub prefix: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CredentialDefaults {
    #[serde(default)]
    pub queue_user: Option<String>,
    #[serde(default)]
    pub queue_vhost: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub database_user: Option<String>,
}

impl ServiceDescriptor {
    pub fn name(&self) -> &str {
        &self.service.name
    }

    pub fn daemons(&self) -> &[DaemonName] {
        &self.service.daemons
    }

    /// Check the structural invariants of the descriptor.
    pub fn validate(&self) -> Result<(), DescriptorError> {
        if self.descriptor_version != DESCRIPTOR_VERSION {
            return Err(DescriptorError::UnsupportedVersion(self.descriptor_version));
        }
        if self.service.name.trim().is_empty() {
            return Err(DescriptorError::EmptyServiceName);
        }

        let mut managed = BTreeSet::new();
        for daemon in &self.service.daemons {
            if !managed.insert(daemon.as_str()) {
                return Err(DescriptorError::DuplicateDaemon(daemon.to_string()));
            }
        }

        for (file, daemons) in &self.restart_map {
            for daemon in daemons {
                if !managed.contains(daemon.as_str()) {
                    return Err(DescriptorError::UnknownRestartDaemon {
                        file: file.clone(),
                        daemon: daemon.to_string(),
                    });
                }
            }
        }

        if let Some(default) = &self.service.default_service {
            if !managed.contains(default.as_str()) {
                return Err(DescriptorError::UnknownDefaultService(default.to_string()));
            }
        }

        for daemon in self.ports.keys() {
            if !managed.contains(daemon.as_str()) {
                return Err(DescriptorError::UnknownPortDaemon(daemon.to_string()));
            }
        }
        for tier in Tier::ALL {
            let mut seen: BTreeMap<u16, &DaemonName> = BTreeMap::new();
            for (daemon, map) in &self.ports {
                let port = map.get(tier);
                if let Some(first) = seen.insert(port, daemon) {
                    return Err(DescriptorError::PortConflict {
                        tier,
                        port,
                        first: first.to_string(),
                        second: daemon.to_string(),
                    });
                }
            }
        }

        if let Some(m) = &self.migration {
            if m.command.is_empty() {
                return Err(DescriptorError::EmptyCommand("migration.command"));
            }
        }
        if let Some(p) = &self.pools {
            if p.update_command.is_empty() {
                return Err(DescriptorError::EmptyCommand("pools.update_command"));
            }
        }
        if self.capabilities.bootstrap_records {
            let Some(b) = &self.bootstrap else {
                return Err(DescriptorError::MissingSection {
                    capability: "bootstrap_records",
                    section: "bootstrap",
                });
            };
            for (field, argv) in [
                ("bootstrap.probe", &b.probe),
                ("bootstrap.server_create", &b.server_create),
                ("bootstrap.domain_get", &b.domain_get),
                ("bootstrap.domain_create", &b.domain_create),
            ] {
                if argv.is_empty() {
                    return Err(DescriptorError::EmptyCommand(field));
                }
            }
        }
        if self.capabilities.ha && self.ha.resources.is_empty() {
            return Err(DescriptorError::MissingSection {
                capability: "ha",
                section: "ha",
            });
        }

        let mut names = BTreeSet::new();
        for db in &self.databases {
            if !names.insert(db.database.as_str()) {
                return Err(DescriptorError::DuplicateDatabase(db.database.clone()));
            }
        }

        Ok(())
    }

    /// Deterministic port lookup.
    pub fn port(&self, daemon: &str, tier: Tier) -> Result<u16, DescriptorError> {
        if !self.service.daemons.iter().any(|d| d == daemon) {
            return Err(DescriptorError::UnknownDaemon(daemon.to_owned()));
        }
        self.ports
            .get(&DaemonName::new(daemon))
            .map(|m| m.get(tier))
            .ok_or_else(|| DescriptorError::NoPort {
                daemon: daemon.to_owned(),
                tier,
            })
    }

    pub fn requires(&self, kind: DependencyKind) -> bool {
        self.service.requires.contains(&kind)
    }

    /// Required kinds that gate base configuration and migration.
    pub fn core_dependencies(&self) -> Vec<DependencyKind> {
        DependencyKind::CORE
            .into_iter()
            .filter(|k| self.requires(*k))
            .collect()
    }

    pub fn full_configs(&self) -> Vec<String> {
        if self.configs.full.is_empty() {
            self.restart_map.keys().cloned().collect()
        } else {
            self.configs.full.clone()
        }
    }

    /// Daemons to restart after the given files changed, in declaration order.
    pub fn daemons_for<S: AsRef<str>>(&self, changed: &[S]) -> Vec<DaemonName> {
        let mut wanted = BTreeSet::new();
        for file in changed {
            if let Some(daemons) = self.restart_map.get(file.as_ref()) {
                wanted.extend(daemons.iter().map(DaemonName::as_str));
            }
        }
        self.service
            .daemons
            .iter()
            .filter(|d| wanted.contains(d.as_str()))
            .cloned()
            .collect()
    }
}

pub fn parse_descriptor_str(input: &str) -> Result<ServiceDescriptor, DescriptorError> {
    let descriptor: ServiceDescriptor = toml::from_str(input)?;
    descriptor.validate()?;
    Ok(descriptor)
}

pub fn parse_descriptor_file(path: impl AsRef<Path>) -> Result<ServiceDescriptor, DescriptorError> {
    let content = fs::read_to_string(path)?;
    parse_descriptor_str(&content)
}
