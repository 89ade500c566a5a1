use crate::status::StatusLevel;
use serde::Serialize;
use stagehand_runtime::EndpointRegistration;
use stagehand_schema::{DependencyKind, DescriptorError, Options, ServiceDescriptor, Tier};
use std::collections::BTreeSet;

pub const DEFAULT_QUEUE_VHOST: &str = "openstack";
pub const HAPROXY_CONFIG: &str = "/etc/haproxy/haproxy.cfg";

/// One schema this unit asks the database to provision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseSetup {
    pub database: String,
    pub username: String,
    pub hostname: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

/// Outcome of the service-specific configuration check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusCheck {
    pub level: StatusLevel,
    pub message: String,
}

/// A descriptor resolved against the operator's options.
#[derive(Debug, Clone)]
pub struct Service {
    pub descriptor: ServiceDescriptor,
    pub options: Options,
}

fn first_set<'a>(candidates: &[Option<&'a String>]) -> Option<&'a str> {
    candidates
        .iter()
        .copied()
        .flatten()
        .map(|s| s.trim())
        .find(|s| !s.is_empty())
}

impl Service {
    pub fn new(descriptor: ServiceDescriptor, options: Options) -> Result<Self, DescriptorError> {
        descriptor.validate()?;
        Ok(Self {
            descriptor,
            options,
        })
    }

    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    /// Principal and resource to request from a dependency, if it hands out
    /// credentials at all.
    pub fn credentials_for(&self, kind: DependencyKind) -> Option<(String, String)> {
        let o = &self.options;
        let d = &self.descriptor.credentials;
        let (principal, resource) = match kind {
            DependencyKind::MessageQueue => (
                first_set(&[o.rabbit_user.as_ref(), d.queue_user.as_ref()]),
                first_set(&[o.rabbit_vhost.as_ref(), d.queue_vhost.as_ref()])
                    .unwrap_or(DEFAULT_QUEUE_VHOST),
            ),
            DependencyKind::Database => (
                first_set(&[o.database_user.as_ref(), d.database_user.as_ref()]),
                first_set(&[o.database.as_ref(), d.database.as_ref()]).unwrap_or(self.name()),
            ),
            _ => return None,
        };
        Some((
            principal.unwrap_or(self.name()).to_owned(),
            resource.to_owned(),
        ))
    }

    /// Schemas to provision for a unit reachable at `hostname`: the primary
    /// one first, then every extra schema the descriptor declares.
    pub fn database_setup(&self, hostname: &str) -> Result<Vec<DatabaseSetup>, DescriptorError> {
        let (username, database) = self
            .credentials_for(DependencyKind::Database)
            .unwrap_or_else(|| (self.name().to_owned(), self.name().to_owned()));
        let extras = &self.descriptor.databases;
        let mut setups = vec![DatabaseSetup {
            prefix: (!extras.is_empty()).then(|| database.clone()),
            database,
            username,
            hostname: hostname.to_owned(),
        }];
        for spec in extras {
            setups.push(DatabaseSetup {
                database: spec.database.clone(),
                username: spec.username.clone(),
                hostname: hostname.to_owned(),
                prefix: Some(spec.prefix.clone().unwrap_or_else(|| spec.database.clone())),
            });
        }

        let mut seen = BTreeSet::new();
        for setup in &setups {
            if !seen.insert(setup.database.as_str()) {
                return Err(DescriptorError::DuplicateDatabase(setup.database.clone()));
            }
        }
        Ok(setups)
    }

    pub fn port(&self, daemon: &str, tier: Tier) -> Result<u16, DescriptorError> {
        self.descriptor.port(daemon, tier)
    }

    /// Port of the daemon behind the registered endpoint.
    pub fn endpoint_port(&self, tier: Tier) -> Result<u16, DescriptorError> {
        let daemon = match &self.descriptor.service.default_service {
            Some(d) => d.clone(),
            None => self
                .descriptor
                .ports
                .keys()
                .next()
                .cloned()
                .ok_or_else(|| DescriptorError::NoPort {
                    daemon: self.name().to_owned(),
                    tier,
                })?,
        };
        self.port(&daemon, tier)
    }

    pub fn ssl_active(&self) -> bool {
        self.descriptor.capabilities.ssl && self.options.ssl_enabled()
    }

    pub fn endpoint_registration(
        &self,
        address: &str,
    ) -> Result<EndpointRegistration, DescriptorError> {
        let scheme = if self.ssl_active() { "https" } else { "http" };
        let host = self
            .options
            .vip
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(address);
        let suffix = &self.descriptor.service.endpoint_suffix;
        let url = |tier| -> Result<String, DescriptorError> {
            Ok(format!(
                "{scheme}://{host}:{}{suffix}",
                self.endpoint_port(tier)?
            ))
        };
        Ok(EndpointRegistration {
            service_type: self
                .descriptor
                .service
                .service_type
                .clone()
                .unwrap_or_else(|| self.name().to_owned()),
            region: self.options.region().to_owned(),
            public_url: url(Tier::Public)?,
            internal_url: url(Tier::Internal)?,
            admin_url: url(Tier::Admin)?,
        })
    }

    pub fn rndc_key_dir(&self) -> String {
        self.descriptor
            .configs
            .rndc_key_dir
            .clone()
            .unwrap_or_else(|| format!("/etc/{}", self.name()))
    }

    /// Static misconfiguration that no amount of waiting will fix.
    pub fn status_check(&self) -> Option<StatusCheck> {
        if !self.options.sinks().is_empty() && self.options.nameservers().is_empty() {
            return Some(StatusCheck {
                level: StatusLevel::Blocked,
                message: "nameservers must be set when specifying sink domains".to_owned(),
            });
        }
        if let Err(e) = self.options.dns_slaves() {
            return Some(StatusCheck {
                level: StatusLevel::Blocked,
                message: e.to_string(),
            });
        }
        None
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use stagehand_schema::{parse_descriptor_str, parse_options_str};

    pub(crate) const DESIGNATE: &str = r#"
descriptor_version = 1

[service]
name = "designate"
release = "mitaka"
service_type = "dns"
default_service = "designate-api"
packages = ["designate-api", "designate-central", "designate-sink", "bind9utils"]
daemons = ["designate-central", "designate-sink", "designate-api"]
requires = ["database", "message-queue", "identity", "dns-backend"]
optional = ["cluster", "ha-cluster"]

[capabilities]
ha = true
ssl = true
bootstrap_records = true

[ports.designate-api]
public = 9001
admin = 9001
internal = 9001

[restart_map]
"/etc/designate/designate.conf" = ["designate-central", "designate-sink", "designate-api"]
"/etc/designate/conf.d/nova_sink.cfg" = ["designate-sink"]
"/etc/designate/pools.yaml" = []

[configs]
base = ["/etc/designate/designate.conf"]

[migration]
command = ["designate-manage", "database", "sync"]

[pools]
update_command = ["designate-manage", "pool", "update"]

[bootstrap]
probe = ["designate-utils", "server-list"]
server_create = ["designate-utils", "server-create", "--server-name", "{server}"]
domain_get = ["designate-utils", "domain-get", "--domain-name", "{domain}"]
domain_create = ["designate-utils", "domain-create", "--domain-name", "{domain}", "--email", "{email}"]

[ha]
resources = ["vips", "haproxy"]

[[databases]]
database = "dpm"
username = "dpm"

[credentials]
queue_user = "designate"
"#;

    pub(crate) fn designate(options: &str) -> Service {
        Service::new(
            parse_descriptor_str(DESIGNATE).unwrap(),
            parse_options_str(options).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn queue_credentials_fall_back_to_descriptor_defaults() {
        let s = designate("");
        assert_eq!(
            s.credentials_for(DependencyKind::MessageQueue),
            Some(("designate".to_owned(), "openstack".to_owned()))
        );
        let s = designate("rabbit-user = \"dns\"\nrabbit-vhost = \"infra\"");
        assert_eq!(
            s.credentials_for(DependencyKind::MessageQueue),
            Some(("dns".to_owned(), "infra".to_owned()))
        );
    }

    #[test]
    fn database_credentials_default_to_service_name() {
        let s = designate("");
        assert_eq!(
            s.credentials_for(DependencyKind::Database),
            Some(("designate".to_owned(), "designate".to_owned()))
        );
        assert_eq!(s.credentials_for(DependencyKind::Identity), None);
        assert_eq!(s.credentials_for(DependencyKind::Cluster), None);
    }

    #[test]
    fn database_setup_lists_every_schema_with_prefixes() {
        let s = designate("");
        let setups = s.database_setup("10.0.0.5").unwrap();
        assert_eq!(setups.len(), 2);
        assert_eq!(setups[0].database, "designate");
        assert_eq!(setups[0].prefix.as_deref(), Some("designate"));
        assert_eq!(setups[1].database, "dpm");
        assert_eq!(setups[1].prefix.as_deref(), Some("dpm"));
        assert!(setups.iter().all(|d| d.hostname == "10.0.0.5"));
    }

    #[test]
    fn database_setup_rejects_collision_with_primary() {
        let s = designate("database = \"dpm\"");
        assert!(matches!(
            s.database_setup("10.0.0.5"),
            Err(DescriptorError::DuplicateDatabase(ref d)) if d == "dpm"
        ));
    }

    #[test]
    fn endpoint_uses_vip_and_https_when_ssl_configured() {
        let s = designate("");
        let plain = s.endpoint_registration("10.0.0.5").unwrap();
        assert_eq!(plain.public_url, "http://10.0.0.5:9001");
        assert_eq!(plain.service_type, "dns");
        assert_eq!(plain.region, "RegionOne");

        let s = designate("vip = \"10.0.0.100\"\nssl-cert = \"C\"\nssl-key = \"K\"");
        let secure = s.endpoint_registration("10.0.0.5").unwrap();
        assert_eq!(secure.admin_url, "https://10.0.0.100:9001");
    }

    #[test]
    fn status_check_blocks_sinks_without_nameservers() {
        let s = designate("[sinks.nova]\ndomain = \"nova.example.com.\"");
        let check = s.status_check().unwrap();
        assert_eq!(check.level, StatusLevel::Blocked);
        assert_eq!(
            check.message,
            "nameservers must be set when specifying sink domains"
        );

        let s = designate("nameservers = \"ns1.example.com.\"\n[sinks.nova]\ndomain = \"nova.example.com.\"");
        assert!(s.status_check().is_none());
    }

    #[test]
    fn status_check_blocks_malformed_dns_slaves() {
        let s = designate("dns-slaves = \"10.0.0.10:53\"");
        let check = s.status_check().unwrap();
        assert_eq!(check.level, StatusLevel::Blocked);
        assert!(check.message.contains("10.0.0.10:53"));
    }

    #[test]
    fn rndc_key_dir_defaults_under_etc() {
        assert_eq!(designate("").rndc_key_dir(), "/etc/designate");
    }
}
