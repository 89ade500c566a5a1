//! Parsing of operator-supplied DNS slave triples and the pool entries
//! derived from them.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SlaveParseError {
    #[error("invalid dns slave entry '{0}': expected '<address>:<port>:<key>'")]
    Arity(String),
    #[error("invalid dns slave entry '{entry}': port '{port}' is not a number in 1-65535")]
    Port { entry: String, port: String },
    #[error("invalid dns slave entry '{0}': address must not be empty")]
    EmptyAddress(String),
    #[error("invalid dns slave entry '{0}': key must not be empty")]
    EmptyKey(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DnsSlave {
    pub address: String,
    pub port: u16,
    pub key: String,
}

impl DnsSlave {
    /// Address with dots replaced, usable inside section and file names.
    pub fn unit_name(&self) -> String {
        self.address.replace('.', "_")
    }

    pub fn nameserver(&self) -> String {
        format!("nameserver_{}", self.unit_name())
    }

    pub fn rndc_key_file(&self, key_dir: &str) -> String {
        format!(
            "{}/rndc_{}.key",
            key_dir.trim_end_matches('/'),
            self.unit_name()
        )
    }
}

/// A pool section in the rendered DNS configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolEntry {
    pub nameserver: String,
    pub pool_target: String,
    pub address: String,
    pub rndc_key_file: String,
}

/// Parse a whitespace-separated list of `address:port:key` triples.
///
/// A single malformed entry fails the whole list; partial results are never
/// returned.
pub fn parse_dns_slaves(input: &str) -> Result<Vec<DnsSlave>, SlaveParseError> {
    input.split_whitespace().map(parse_entry).collect()
}

fn parse_entry(entry: &str) -> Result<DnsSlave, SlaveParseError> {
    let parts: Vec<&str> = entry.split(':').collect();
    let [address, port, key] = parts.as_slice() else {
        return Err(SlaveParseError::Arity(entry.to_owned()));
    };
    if address.is_empty() {
        return Err(SlaveParseError::EmptyAddress(entry.to_owned()));
    }
    if key.is_empty() {
        return Err(SlaveParseError::EmptyKey(entry.to_owned()));
    }
    let port = match port.parse::<u16>() {
        Ok(p) if p > 0 => p,
        _ => {
            return Err(SlaveParseError::Port {
                entry: entry.to_owned(),
                port: (*port).to_owned(),
            })
        }
    };
    Ok(DnsSlave {
        address: (*address).to_owned(),
        port,
        key: (*key).to_owned(),
    })
}

pub fn pool_config(slaves: &[DnsSlave], key_dir: &str) -> Vec<PoolEntry> {
    slaves
        .iter()
        .map(|s| PoolEntry {
            nameserver: s.nameserver(),
            pool_target: s.nameserver(),
            address: s.address.clone(),
            rndc_key_file: s.rndc_key_file(key_dir),
        })
        .collect()
}

pub fn pool_targets(entries: &[PoolEntry]) -> String {
    entries
        .iter()
        .map(|e| e.pool_target.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn slave_addresses(entries: &[PoolEntry]) -> String {
    entries
        .iter()
        .map(|e| format!("{}:53", e.address))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Contents of an rndc key file for the given secret.
pub fn rndc_key_contents(secret: &str) -> String {
    format!("key \"rndc-key\" {{\n    algorithm hmac-md5;\n    secret \"{secret}\";\n}};")
}
