#![allow(dead_code)]

use stagehand_core::{DependencySignal, Engine, Service, Signals, UnitInfo};
use stagehand_runtime::{MockBackend, RetryPolicy};
use stagehand_schema::{parse_descriptor_str, parse_options_str, DependencyKind};
use stagehand_store::{FileStore, KeyValueStore, StoreLayout};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

pub const TROVE: &str = r#"
descriptor_version = 1

[service]
name = "trove"
release = "mitaka"
service_type = "trove"
default_service = "trove-api"
packages = ["trove-api", "trove-taskmanager", "trove-conductor"]
daemons = ["trove-api", "trove-taskmanager", "trove-conductor"]
requires = ["database", "message-queue", "identity"]
endpoint_suffix = "/v1.0/%(tenant_id)s"

[ports.trove-api]
public = 8779
admin = 8779
internal = 8779

[restart_map]
"/etc/trove/trove.conf" = ["trove-api", "trove-taskmanager", "trove-conductor"]
"/etc/trove/api-paste.ini" = ["trove-api"]
"/root/novarc" = []

[configs]
base = ["/etc/trove/trove.conf", "/root/novarc"]

[migration]
command = ["trove-manage", "db_sync"]
"#;

pub const DESIGNATE: &str = r#"
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
"#;

pub const DESIGNATE_OPTIONS: &str = r#"
nameservers = "ns1.example.com."
[sinks.nova]
domain = "nova.example.com."
email = "dns@example.com"
"#;

pub fn service(descriptor: &str, options: &str) -> Service {
    Service::new(
        parse_descriptor_str(descriptor).unwrap(),
        parse_options_str(options).unwrap(),
    )
    .unwrap()
}

pub fn engine(store: &Path, service: Service, backend: &Arc<MockBackend>) -> Engine {
    Engine::new(store, service, backend.clone())
        .unwrap()
        .with_retry_policy(RetryPolicy::immediate(3))
}

/// An engine whose shared markers live in `shared`, as peers of one service.
pub fn peer(
    store: &Path,
    shared: &Path,
    service: Service,
    backend: &Arc<MockBackend>,
) -> Engine {
    let shared: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(shared));
    Engine::with_shared(StoreLayout::new(store), shared, service, backend.clone())
        .unwrap()
        .with_retry_policy(RetryPolicy::immediate(3))
}

fn fields(kind: DependencyKind) -> BTreeMap<String, String> {
    kind.required_fields()
        .iter()
        .map(|f| ((*f).to_owned(), format!("{f}-value")))
        .collect()
}

pub fn available(kind: DependencyKind) -> DependencySignal {
    DependencySignal {
        kind,
        connected: true,
        available: true,
        fields: fields(kind),
    }
}

pub fn incomplete(kind: DependencyKind) -> DependencySignal {
    DependencySignal {
        kind,
        connected: true,
        available: false,
        fields: BTreeMap::new(),
    }
}

pub fn signals(unit: &str, address: &str, leader: bool, deps: Vec<DependencySignal>) -> Signals {
    Signals {
        unit: UnitInfo {
            name: unit.to_owned(),
            address: address.to_owned(),
        },
        leader,
        dependencies: deps,
    }
}

pub fn core_available() -> Vec<DependencySignal> {
    vec![
        available(DependencyKind::Database),
        available(DependencyKind::MessageQueue),
        available(DependencyKind::Identity),
    ]
}

pub fn designate_available() -> Vec<DependencySignal> {
    let mut deps = core_available();
    deps.push(available(DependencyKind::DnsBackend));
    deps
}
