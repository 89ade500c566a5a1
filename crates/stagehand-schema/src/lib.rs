//! Service descriptor, operator options, and dependency schema for Stagehand.
//!
//! This crate defines the static layer: TOML service descriptor parsing and
//! invariant checks (`ServiceDescriptor`), operator options (`Options`),
//! dependency kinds (`DependencyKind`), network tiers (`Tier`), and parsing
//! of DNS slave triples into pool entries.

pub mod dependency;
pub mod descriptor;
pub mod options;
pub mod slaves;
pub mod types;

pub use dependency::DependencyKind;
pub use descriptor::{
    parse_descriptor_file, parse_descriptor_str, BootstrapSection, Capabilities, CommandSection,
    ConfigSets, CredentialDefaults, DatabaseSpec, DescriptorError, HaSection, PoolsSection,
    PortMap, ServiceDescriptor, ServiceSection, Tier, DESCRIPTOR_VERSION,
};
pub use options::{parse_options_file, parse_options_str, ConfiguredSink, Options, SinkDomain};
pub use slaves::{
    parse_dns_slaves, pool_config, pool_targets, rndc_key_contents, slave_addresses, DnsSlave,
    PoolEntry, SlaveParseError,
};
pub use types::{DaemonName, RecordId};
