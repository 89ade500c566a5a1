use crate::descriptor::DescriptorError;
use crate::slaves::{parse_dns_slaves, DnsSlave};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Operator-facing configuration options of a unit.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Options {
    #[serde(default)]
    pub rabbit_user: Option<String>,
    #[serde(default)]
    pub rabbit_vhost: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub database_user: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub vip: Option<String>,
    #[serde(default)]
    pub ssl_cert: Option<String>,
    #[serde(default)]
    pub ssl_key: Option<String>,
    /// Space separated nameserver names.
    #[serde(default)]
    pub nameservers: Option<String>,
    /// Space separated `address:port:key` triples.
    #[serde(default)]
    pub dns_slaves: Option<String>,
    #[serde(default)]
    pub sinks: BTreeMap<String, SinkDomain>,
}

/// Domain that a notification sink (nova, neutron, ...) writes records into.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SinkDomain {
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// A sink with a configured domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfiguredSink<'a> {
    pub sink: &'a str,
    pub domain: &'a str,
    pub email: Option<&'a str>,
}

pub const DEFAULT_REGION: &str = "RegionOne";

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(|s| s.trim()).filter(|s| !s.is_empty())
}

impl Options {
    pub fn region(&self) -> &str {
        non_empty(self.region.as_ref()).unwrap_or(DEFAULT_REGION)
    }

    pub fn nameservers(&self) -> Vec<&str> {
        self.nameservers
            .as_deref()
            .map(|s| s.split_whitespace().collect())
            .unwrap_or_default()
    }

    pub fn sinks(&self) -> Vec<ConfiguredSink<'_>> {
        self.sinks
            .iter()
            .filter_map(|(name, sink)| {
                non_empty(sink.domain.as_ref()).map(|domain| ConfiguredSink {
                    sink: name,
                    domain,
                    email: non_empty(sink.email.as_ref()),
                })
            })
            .collect()
    }

    pub fn dns_slaves(&self) -> Result<Vec<DnsSlave>, DescriptorError> {
        Ok(parse_dns_slaves(self.dns_slaves.as_deref().unwrap_or(""))?)
    }

    pub fn ssl_enabled(&self) -> bool {
        non_empty(self.ssl_cert.as_ref()).is_some() && non_empty(self.ssl_key.as_ref()).is_some()
    }

    /// Digest over every option.
    pub fn fingerprint(&self) -> String {
        digest(self)
    }

    /// Digest over the options that feed record bootstrap.
    pub fn bootstrap_fingerprint(&self) -> String {
        digest(&(self.nameservers(), self.sinks_for_digest()))
    }

    /// Digest over the options that feed endpoint registration.
    pub fn endpoint_fingerprint(&self) -> String {
        digest(&(self.region(), &self.vip, self.ssl_enabled()))
    }

    fn sinks_for_digest(&self) -> Vec<(String, String, Option<String>)> {
        self.sinks()
            .into_iter()
            .map(|s| {
                (
                    s.sink.to_owned(),
                    s.domain.to_owned(),
                    s.email.map(str::to_owned),
                )
            })
            .collect()
    }
}

fn digest(value: &impl Serialize) -> String {
    // Plain data with string keys always serializes.
    let json = serde_json::to_string(value).unwrap_or_default();
    blake3::hash(json.as_bytes()).to_hex().to_string()
}

pub fn parse_options_str(input: &str) -> Result<Options, DescriptorError> {
    toml::from_str(input).map_err(|e| DescriptorError::Options(e.to_string()))
}

pub fn parse_options_file(path: impl AsRef<Path>) -> Result<Options, DescriptorError> {
    let content = fs::read_to_string(path)?;
    parse_options_str(&content)
}
