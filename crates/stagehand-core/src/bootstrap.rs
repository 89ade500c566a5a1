use crate::service::Service;
use crate::CoreError;
use stagehand_runtime::{probe, RetryPolicy, RuntimeBackend};
use stagehand_schema::{BootstrapSection, DescriptorError, RecordId};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Record ID of each configured sink domain, keyed by sink name.
pub type DomainSnapshot = BTreeMap<String, Option<RecordId>>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapOutcome {
    pub servers_created: Vec<String>,
    pub domains_created: Vec<String>,
    pub before: DomainSnapshot,
    pub after: DomainSnapshot,
}

impl BootstrapOutcome {
    /// Peers must re-render when any sink domain ID moved.
    pub fn changed(&self) -> bool {
        self.before != self.after
    }
}

fn fill(template: &[String], vars: &[(&str, &str)]) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            vars.iter().fold(arg.clone(), |acc, (name, value)| {
                acc.replace(&format!("{{{name}}}"), value)
            })
        })
        .collect()
}

fn section(service: &Service) -> Result<&BootstrapSection, CoreError> {
    service.descriptor.bootstrap.as_ref().ok_or_else(|| {
        CoreError::Descriptor(DescriptorError::MissingSection {
            capability: "bootstrap_records",
            section: "bootstrap",
        })
    })
}

pub fn default_email(domain: &str) -> String {
    format!("hostmaster@{}", domain.trim_end_matches('.'))
}

/// Look up the current record ID of every configured sink domain.
pub fn snapshot(
    backend: &dyn RuntimeBackend,
    service: &Service,
) -> Result<DomainSnapshot, CoreError> {
    let section = section(service)?;
    let mut ids = DomainSnapshot::new();
    for sink in service.options.sinks() {
        let argv = fill(&section.domain_get, &[("domain", sink.domain)]);
        let output = backend.run_checked(&argv)?;
        let id = output.stdout.trim();
        ids.insert(
            sink.sink.to_owned(),
            (!id.is_empty()).then(|| RecordId::new(id)),
        );
    }
    Ok(ids)
}

/// Current record IDs of the sink domains, for rendering. Checks that the
/// API answers first; without sinks nothing is queried.
pub fn domain_ids_for(
    backend: &dyn RuntimeBackend,
    service: &Service,
    policy: &RetryPolicy,
) -> Result<DomainSnapshot, CoreError> {
    if service.options.sinks().is_empty() {
        return Ok(DomainSnapshot::new());
    }
    probe(backend, &section(service)?.probe, policy)?;
    snapshot(backend, service)
}

/// Create nameserver records and sink domains once the API answers.
///
/// Domains that already have an ID are left alone. Without nameservers
/// nothing is created.
pub fn bootstrap_records(
    backend: &dyn RuntimeBackend,
    service: &Service,
    policy: &RetryPolicy,
) -> Result<BootstrapOutcome, CoreError> {
    let section = section(service)?;
    probe(backend, &section.probe, policy)?;

    let before = snapshot(backend, service)?;
    let mut outcome = BootstrapOutcome {
        before: before.clone(),
        ..BootstrapOutcome::default()
    };

    let nameservers = service.options.nameservers();
    if nameservers.is_empty() {
        warn!("no nameservers configured, skipping creation of servers and sink domains");
        outcome.after = before;
        return Ok(outcome);
    }

    for ns in nameservers {
        backend.run_checked(&fill(&section.server_create, &[("server", ns)]))?;
        outcome.servers_created.push(ns.to_owned());
    }

    for sink in service.options.sinks() {
        if before.get(sink.sink).is_some_and(Option::is_some) {
            continue;
        }
        let email = sink
            .email
            .map_or_else(|| default_email(sink.domain), str::to_owned);
        let argv = fill(
            &section.domain_create,
            &[("domain", sink.domain), ("email", &email)],
        );
        backend.run_checked(&argv)?;
        info!("created {} domain {}", sink.sink, sink.domain);
        outcome.domains_created.push(sink.domain.to_owned());
    }

    outcome.after = snapshot(backend, service)?;
    Ok(outcome)
}
