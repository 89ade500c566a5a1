use crate::bootstrap::{bootstrap_records, domain_ids_for};
use crate::concurrency::{shutdown_requested, StoreLock};
use crate::lifecycle::validate_mark;
use crate::machine::{evaluate, Action, Facts};
use crate::service::{Service, HAPROXY_CONFIG};
use crate::signals::{DependencyStatus, Signals};
use crate::status::{assess_status, UnitStatus};
use crate::CoreError;
use serde::Serialize;
use stagehand_runtime::{CredentialRequest, HaResources, RetryPolicy, RuntimeBackend};
use stagehand_schema::{
    pool_config, pool_targets, rndc_key_contents, slave_addresses, DependencyKind, Options, RecordId,
};
use stagehand_store::{
    FileStore, Journal, KeyValueStore, Milestone, MilestoneSet, MilestoneStore, SharedState,
    StoreLayout, DB_SYNCED, DOMAIN_INIT_DONE,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Shared `domain-init-done` value the unit last rendered its full config with.
const RENDERED_MARKER: &str = "unit:rendered-marker";
const OPTIONS_FINGERPRINT: &str = "unit:options-fingerprint";
const BOOTSTRAP_FINGERPRINT: &str = "unit:bootstrap-fingerprint";
const ENDPOINT_FINGERPRINT: &str = "unit:endpoint-fingerprint";

const RNDC_KEY_MODE: u32 = 0o440;
const SSL_CERT_MODE: u32 = 0o644;
const SSL_KEY_MODE: u32 = 0o640;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedAction {
    pub action: Action,
    pub milestones: Vec<Milestone>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedAction {
    pub action: Action,
    pub error: String,
}

/// What one evaluation pass did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub unit: String,
    pub invalidated: Vec<Milestone>,
    pub planned: Vec<Action>,
    pub applied: Vec<AppliedAction>,
    pub failed: Vec<FailedAction>,
    pub skipped: Vec<Action>,
    pub interrupted: bool,
    pub status: UnitStatus,
}

impl PassReport {
    pub fn wrote_milestones(&self) -> bool {
        self.applied.iter().any(|a| !a.milestones.is_empty())
    }

    pub fn is_ok(&self) -> bool {
        self.failed.is_empty() && !self.interrupted
    }
}

/// Provisioning context of one unit.
///
/// Owns the unit's milestone store, the peer-visible shared markers, the
/// action journal and the backend through which every side effect goes.
pub struct Engine {
    layout: StoreLayout,
    service: Service,
    backend: Arc<dyn RuntimeBackend>,
    unit: Arc<dyn KeyValueStore>,
    milestones: MilestoneStore,
    shared: SharedState,
    journal: Journal,
    retry: RetryPolicy,
}

impl Engine {
    /// Open the store at `store_root`, using its own shared namespace.
    pub fn new(
        store_root: impl Into<PathBuf>,
        service: Service,
        backend: Arc<dyn RuntimeBackend>,
    ) -> Result<Self, CoreError> {
        let layout = StoreLayout::new(store_root);
        let shared: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(layout.shared_dir()));
        Self::with_shared(layout, shared, service, backend)
    }

    /// Open a unit store whose shared markers live in `shared`, typically a
    /// namespace every peer of the service can read.
    ///
    /// Action journal entries left behind by an interrupted pass are reported
    /// and discarded; the affected actions run again on the next pass since
    /// their milestones were never written.
    pub fn with_shared(
        layout: StoreLayout,
        shared: Arc<dyn KeyValueStore>,
        service: Service,
        backend: Arc<dyn RuntimeBackend>,
    ) -> Result<Self, CoreError> {
        layout.initialize()?;
        let unit: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(layout.unit_dir()));
        let journal = Journal::new(&layout);

        // Recovery mutates the store; avoid running it while a pass holds the lock.
        match StoreLock::try_acquire(&layout.lock_file()) {
            Ok(Some(_lock)) => match journal.recover() {
                Ok(entries) if !entries.is_empty() => {
                    warn!("{} interrupted actions will be retried", entries.len());
                }
                Ok(_) => {}
                Err(e) => warn!("journal recovery failed: {e}"),
            },
            Ok(None) => debug!("store lock held; skipping journal recovery"),
            Err(e) => warn!("store lock check failed; skipping journal recovery: {e}"),
        }

        Ok(Self {
            layout,
            service,
            backend,
            milestones: MilestoneStore::new(unit.clone()),
            unit,
            shared: SharedState::new(shared),
            journal,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn service(&self) -> &Service {
        &self.service
    }

    pub fn backend(&self) -> &dyn RuntimeBackend {
        self.backend.as_ref()
    }

    pub fn shared(&self) -> &SharedState {
        &self.shared
    }

    pub fn milestones(&self) -> Result<MilestoneSet, CoreError> {
        Ok(self.milestones.load()?)
    }

    pub fn facts(&self, signals: &Signals) -> Result<Facts, CoreError> {
        let db_synced = self.shared.get(DB_SYNCED)?.is_some();
        Ok(Facts::from_signals(signals, self.milestones()?, db_synced))
    }

    /// The actions a pass would apply now, without applying them.
    pub fn plan(&self, signals: &Signals) -> Result<Vec<Action>, CoreError> {
        signals.validate()?;
        Ok(evaluate(&self.service, &self.facts(signals)?))
    }

    pub fn status(&self, signals: &Signals) -> Result<UnitStatus, CoreError> {
        signals.validate()?;
        Ok(assess_status(&self.service, &self.facts(signals)?))
    }

    /// Execute one action and persist the milestone it writes.
    ///
    /// The milestone is stored before this returns; on failure it stays
    /// unset. An action whose milestone already holds does nothing. Guards
    /// are not re-checked here, only the milestone ordering.
    pub fn apply(&self, action: Action, signals: &Signals) -> Result<Vec<Milestone>, CoreError> {
        if action.leader_only() && !signals.leader {
            return Err(CoreError::NotLeader(action.to_string()));
        }
        if let Some(milestone) = action.writes() {
            if self.milestones.is_set(milestone)? {
                debug!("{action} skipped: {milestone} already reached");
                return Ok(vec![milestone]);
            }
        }
        let op_id = self.journal.begin(action.as_str(), &signals.unit.name)?;
        let result = self.execute(action, signals).and_then(|()| self.record(action));
        self.journal.commit(&op_id)?;
        result
    }

    fn record(&self, action: Action) -> Result<Vec<Milestone>, CoreError> {
        let Some(milestone) = action.writes() else {
            return Ok(Vec::new());
        };
        validate_mark(milestone, &self.milestones()?)?;
        self.milestones.mark(milestone)?;
        Ok(vec![milestone])
    }

    /// Run one evaluation pass: apply option and peer-marker invalidations,
    /// evaluate the guard table, apply the selected actions in order and
    /// compute the unit status.
    ///
    /// Once a chained action fails the rest of the chain is skipped for this
    /// pass while independent actions still run. Action failures are
    /// collected in the report; store failures abort the pass.
    pub fn run_pass(&self, signals: &Signals) -> Result<PassReport, CoreError> {
        signals.validate()?;
        let _lock = StoreLock::acquire_now(&self.layout.lock_file())?;

        let mut invalidated = self.sync_options()?;
        invalidated.extend(self.refresh_markers()?);

        let planned = evaluate(&self.service, &self.facts(signals)?);
        info!(
            "{}: planned {}",
            signals.unit.name,
            if planned.is_empty() {
                "nothing".to_owned()
            } else {
                planned
                    .iter()
                    .map(|a| a.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            }
        );

        let mut applied = Vec::new();
        let mut failed = Vec::new();
        let mut skipped = Vec::new();
        let mut interrupted = false;
        let mut chain_broken = false;

        for &action in &planned {
            if shutdown_requested() {
                interrupted = true;
                skipped.push(action);
                continue;
            }
            if chain_broken && action.is_chained() {
                debug!("skipping {action}: an earlier chained action failed");
                skipped.push(action);
                continue;
            }
            info!("applying {action}");
            match self.apply(action, signals) {
                Ok(milestones) => {
                    info!("{action} done");
                    applied.push(AppliedAction { action, milestones });
                }
                Err(e @ CoreError::Store(_)) => return Err(e),
                Err(e) => {
                    warn!("{action} failed: {e}");
                    if action.is_chained() {
                        chain_broken = true;
                    }
                    failed.push(FailedAction {
                        action,
                        error: e.to_string(),
                    });
                }
            }
        }

        let status = assess_status(&self.service, &self.facts(signals)?);
        Ok(PassReport {
            unit: signals.unit.name.clone(),
            invalidated,
            planned,
            applied,
            failed,
            skipped,
            interrupted,
            status,
        })
    }

    /// Repeat passes until one writes no milestone, fails or is interrupted.
    pub fn converge(
        &self,
        signals: &Signals,
        max_passes: usize,
    ) -> Result<Vec<PassReport>, CoreError> {
        let mut reports = Vec::new();
        for _ in 0..max_passes.max(1) {
            let report = self.run_pass(signals)?;
            let settled = !report.wrote_milestones() || !report.is_ok();
            reports.push(report);
            if settled {
                break;
            }
        }
        Ok(reports)
    }

    /// Swap in new options and clear the milestones they invalidate.
    pub fn reconfigure(&mut self, options: Options) -> Result<Vec<Milestone>, CoreError> {
        let _lock = StoreLock::acquire_now(&self.layout.lock_file())?;
        self.service.options = options;
        self.sync_options()
    }

    /// Clear the full config when the leader published record IDs this unit
    /// has not rendered yet.
    pub fn refresh_peer_markers(&self) -> Result<Vec<Milestone>, CoreError> {
        let _lock = StoreLock::acquire_now(&self.layout.lock_file())?;
        self.refresh_markers()
    }

    /// Operator-driven invalidation of one milestone and its chain successors.
    pub fn invalidate(&self, milestone: Milestone) -> Result<Vec<Milestone>, CoreError> {
        let _lock = StoreLock::acquire_now(&self.layout.lock_file())?;
        let cleared = self.milestones.clear(milestone)?;
        if !cleared.is_empty() {
            info!(
                "invalidated {}",
                cleared
                    .iter()
                    .map(|m| m.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
        Ok(cleared)
    }

    fn sync_options(&self) -> Result<Vec<Milestone>, CoreError> {
        let options = &self.service.options;
        let current = [
            (OPTIONS_FINGERPRINT, options.fingerprint()),
            (BOOTSTRAP_FINGERPRINT, options.bootstrap_fingerprint()),
            (ENDPOINT_FINGERPRINT, options.endpoint_fingerprint()),
        ];

        let mut cleared = Vec::new();
        for (key, fingerprint) in &current {
            let previous = self.unit.get(key)?;
            if previous.as_deref() == Some(fingerprint.as_str()) {
                continue;
            }
            if previous.is_some() {
                let target = match *key {
                    BOOTSTRAP_FINGERPRINT => Milestone::RecordsInitialized,
                    ENDPOINT_FINGERPRINT => Milestone::EndpointRegistered,
                    _ => Milestone::FullConfigRendered,
                };
                debug!("options changed ({key}), invalidating {target}");
                for m in self.milestones.clear(target)? {
                    if !cleared.contains(&m) {
                        cleared.push(m);
                    }
                }
            }
            self.unit.set(key, fingerprint)?;
        }
        Ok(cleared)
    }

    fn refresh_markers(&self) -> Result<Vec<Milestone>, CoreError> {
        let Some(published) = self.shared.get(DOMAIN_INIT_DONE)? else {
            return Ok(Vec::new());
        };
        if self.unit.get(RENDERED_MARKER)?.as_deref() == Some(published.as_str())
            || !self.milestones.is_set(Milestone::FullConfigRendered)?
        {
            return Ok(Vec::new());
        }
        info!("leader published new record IDs ({published}), re-rendering full config");
        Ok(self.milestones.clear(Milestone::FullConfigRendered)?)
    }

    fn execute(&self, action: Action, signals: &Signals) -> Result<(), CoreError> {
        let service = &self.service;
        let address = signals.unit.address.as_str();
        match action {
            Action::RequestDatabase => {
                for setup in service.database_setup(address)? {
                    self.backend.request_credentials(&CredentialRequest {
                        kind: DependencyKind::Database,
                        principal: setup.username,
                        resource: setup.database,
                        host: setup.hostname,
                        prefix: setup.prefix,
                    })?;
                }
            }
            Action::RequestQueue => {
                if let Some((principal, resource)) =
                    service.credentials_for(DependencyKind::MessageQueue)
                {
                    self.backend.request_credentials(&CredentialRequest {
                        kind: DependencyKind::MessageQueue,
                        principal,
                        resource,
                        host: address.to_owned(),
                        prefix: None,
                    })?;
                }
            }
            Action::Install => self.backend.install(&service.descriptor.service.packages)?,
            Action::RegisterEndpoint => {
                let registration = service.endpoint_registration(address)?;
                self.backend.register_endpoint(&registration)?;
            }
            Action::RenderBaseConfig => self.render_base(signals)?,
            Action::MigrateDatabase => {
                if let Some(migration) = &service.descriptor.migration {
                    self.backend.run_checked(&migration.command)?;
                }
                self.shared.publish(
                    signals.leader,
                    DB_SYNCED,
                    &chrono::Utc::now().to_rfc3339(),
                )?;
            }
            Action::ObserveMigration => {
                debug!("database migrated by the leader");
            }
            Action::UpdatePeers => self.backend.announce_peer(address)?,
            Action::RenderFullConfig => self.render_full(signals)?,
            Action::BootstrapRecords => {
                let seen = self.shared.get(DOMAIN_INIT_DONE)?;
                let outcome = bootstrap_records(self.backend.as_ref(), service, &self.retry)?;
                if outcome.changed() {
                    let marker = uuid::Uuid::new_v4().to_string();
                    if !self.shared.publish_if(
                        signals.leader,
                        DOMAIN_INIT_DONE,
                        seen.as_deref(),
                        &marker,
                    )? {
                        warn!("{DOMAIN_INIT_DONE} moved during bootstrap, keeping the newer marker");
                    }
                } else {
                    debug!("record IDs unchanged, peers keep their config");
                }
            }
            Action::UpdatePools => {
                if let Some(pools) = &service.descriptor.pools {
                    self.backend.run_checked(&pools.update_command)?;
                }
            }
            Action::ConfigureHa => self.backend.configure_ha(&HaResources {
                service: service.name().to_owned(),
                resources: service.descriptor.ha.resources.clone(),
                vip: service.options.vip.clone(),
            })?,
        }
        Ok(())
    }

    fn base_files(&self, signals: &Signals) -> Vec<String> {
        let mut files = self.service.descriptor.configs.base.clone();
        if self.service.descriptor.capabilities.ha
            && signals.status(DependencyKind::Cluster) == DependencyStatus::Available
        {
            files.push(HAPROXY_CONFIG.to_owned());
        }
        files
    }

    fn render_context(
        &self,
        signals: &Signals,
        domain_ids: &BTreeMap<String, Option<String>>,
    ) -> Result<serde_json::Value, CoreError> {
        let service = &self.service;
        let dependencies: BTreeMap<&str, &BTreeMap<String, String>> = signals
            .dependencies
            .iter()
            .filter(|d| d.status().is_connected())
            .map(|d| (d.kind.as_str(), &d.fields))
            .collect();
        let pools = pool_config(&service.options.dns_slaves()?, &service.rndc_key_dir());
        Ok(serde_json::json!({
            "service": service.name(),
            "release": service.descriptor.service.release,
            "region": service.options.region(),
            "unit": signals.unit,
            "leader": signals.leader,
            "vip": service.options.vip,
            "ssl": service.ssl_active(),
            "dependencies": dependencies,
            "pools": pools,
            "pool_targets": pool_targets(&pools),
            "slave_addresses": slave_addresses(&pools),
            "nameservers": service.options.nameservers(),
            "domain_ids": domain_ids,
        }))
    }

    fn render_and_restart(
        &self,
        files: &[String],
        context: &serde_json::Value,
    ) -> Result<(), CoreError> {
        let changed = self.backend.render(files, context)?;
        let daemons = self.service.descriptor.daemons_for(&changed);
        if !daemons.is_empty() {
            self.backend.restart(&daemons)?;
        }
        Ok(())
    }

    fn render_base(&self, signals: &Signals) -> Result<(), CoreError> {
        let context = self.render_context(signals, &BTreeMap::new())?;
        self.render_and_restart(&self.base_files(signals), &context)
    }

    fn render_full(&self, signals: &Signals) -> Result<(), CoreError> {
        let service = &self.service;
        let marker = self.shared.get(DOMAIN_INIT_DONE)?;

        let mut domain_ids = BTreeMap::new();
        if service.descriptor.capabilities.bootstrap_records {
            for (sink, id) in domain_ids_for(self.backend.as_ref(), service, &self.retry)? {
                domain_ids.insert(sink, id.map(RecordId::into_inner));
            }
        }

        let mut files = self.base_files(signals);
        for file in service.descriptor.full_configs() {
            if !files.contains(&file) {
                files.push(file);
            }
        }
        let context = self.render_context(signals, &domain_ids)?;
        self.render_and_restart(&files, &context)?;

        if service.ssl_active() {
            let dir = format!("/etc/{}/ssl", service.name());
            if let (Some(cert), Some(key)) = (&service.options.ssl_cert, &service.options.ssl_key)
            {
                self.backend
                    .write_file(&format!("{dir}/cert.pem"), cert.as_bytes(), SSL_CERT_MODE)?;
                self.backend
                    .write_file(&format!("{dir}/key.pem"), key.as_bytes(), SSL_KEY_MODE)?;
            }
        }

        let key_dir = service.rndc_key_dir();
        for slave in service.options.dns_slaves()? {
            self.backend.write_file(
                &slave.rndc_key_file(&key_dir),
                rndc_key_contents(&slave.key).as_bytes(),
                RNDC_KEY_MODE,
            )?;
        }

        if let Some(marker) = marker {
            self.unit.set(RENDERED_MARKER, &marker)?;
        }
        Ok(())
    }
}
