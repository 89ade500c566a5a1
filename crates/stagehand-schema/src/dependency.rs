use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A category of external service a unit needs wired up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DependencyKind {
    Database,
    MessageQueue,
    Identity,
    ImageService,
    Compute,
    DnsBackend,
    Cluster,
    HaCluster,
}

impl DependencyKind {
    pub const ALL: [DependencyKind; 8] = [
        DependencyKind::Database,
        DependencyKind::MessageQueue,
        DependencyKind::Identity,
        DependencyKind::ImageService,
        DependencyKind::Compute,
        DependencyKind::DnsBackend,
        DependencyKind::Cluster,
        DependencyKind::HaCluster,
    ];

    /// Kinds whose availability gates base configuration and migration.
    pub const CORE: [DependencyKind; 3] = [
        DependencyKind::Database,
        DependencyKind::MessageQueue,
        DependencyKind::Identity,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DependencyKind::Database => "database",
            DependencyKind::MessageQueue => "message-queue",
            DependencyKind::Identity => "identity",
            DependencyKind::ImageService => "image-service",
            DependencyKind::Compute => "compute",
            DependencyKind::DnsBackend => "dns-backend",
            DependencyKind::Cluster => "cluster",
            DependencyKind::HaCluster => "ha-cluster",
        }
    }

    /// Fields a signal of this kind must carry before it counts as available.
    pub fn required_fields(self) -> &'static [&'static str] {
        match self {
            DependencyKind::Database => &["host", "password"],
            DependencyKind::MessageQueue => &["hostname", "password"],
            DependencyKind::Identity => &["auth_host", "auth_port", "service_host", "service_port"],
            DependencyKind::DnsBackend => &["rndc_key"],
            DependencyKind::Cluster => &["peers"],
            DependencyKind::ImageService | DependencyKind::Compute | DependencyKind::HaCluster => {
                &[]
            }
        }
    }
}

impl fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DependencyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "database" | "shared-db" => Ok(DependencyKind::Database),
            "message-queue" | "amqp" => Ok(DependencyKind::MessageQueue),
            "identity" | "identity-service" => Ok(DependencyKind::Identity),
            "image-service" => Ok(DependencyKind::ImageService),
            "compute" | "cloud-compute" => Ok(DependencyKind::Compute),
            "dns-backend" => Ok(DependencyKind::DnsBackend),
            "cluster" => Ok(DependencyKind::Cluster),
            "ha-cluster" | "ha" => Ok(DependencyKind::HaCluster),
            other => Err(format!("unknown dependency kind '{other}'")),
        }
    }
}
