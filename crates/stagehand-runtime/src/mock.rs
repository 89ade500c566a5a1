use crate::backend::{
    CommandOutput, CredentialRequest, EndpointRegistration, HaResources, RuntimeBackend,
};
use crate::RuntimeError;
use stagehand_schema::{DaemonName, RecordId};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

/// Verbs of the DNS bootstrap helper understood by the simulated record store.
pub const VERB_SERVER_LIST: &str = "server-list";
pub const VERB_SERVER_CREATE: &str = "server-create";
pub const VERB_DOMAIN_GET: &str = "domain-get";
pub const VERB_DOMAIN_CREATE: &str = "domain-create";

#[derive(Default)]
struct MockState {
    calls: Vec<String>,
    failures: HashMap<String, u32>,
    rendered: BTreeMap<String, String>,
    files: BTreeMap<String, (Vec<u8>, u32)>,
    restarts: Vec<DaemonName>,
    credential_requests: Vec<CredentialRequest>,
    endpoints: Vec<EndpointRegistration>,
    servers: BTreeSet<String>,
    domains: BTreeMap<String, RecordId>,
    next_record: u32,
}

impl MockState {
    /// Consume one injected failure matching any of `keys`.
    fn take_failure(&mut self, keys: &[&str]) -> bool {
        for key in keys {
            if let Some(remaining) = self.failures.get_mut(*key) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return true;
                }
            }
        }
        false
    }
}

/// In-memory backend that records every call.
///
/// Commands succeed unless a failure was injected with [`fail`](Self::fail).
/// Commands carrying one of the DNS helper verbs operate on a simulated
/// record store where creation is idempotent and record IDs are stable.
#[derive(Default)]
pub struct MockBackend {
    state: Mutex<MockState>,
}

fn flag_value<'a>(argv: &'a [String], flag: &str) -> Option<&'a str> {
    argv.iter()
        .position(|a| a == flag)
        .and_then(|i| argv.get(i + 1))
        .map(String::as_str)
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MockState>, RuntimeError> {
        self.state
            .lock()
            .map_err(|e| RuntimeError::ExecFailed(format!("mutex poisoned: {e}")))
    }

    /// Make the next `times` calls of `op` fail. `op` is an operation name
    /// (`install`, `render`, ...) or, for commands, any argv token.
    pub fn fail(&self, op: &str, times: u32) {
        if let Ok(mut state) = self.lock() {
            state.failures.insert(op.to_owned(), times);
        }
    }

    /// Pre-populate the simulated record store.
    pub fn with_domain(self, domain: &str, id: &str) -> Self {
        if let Ok(mut state) = self.lock() {
            state
                .domains
                .insert(domain.to_owned(), RecordId::new(id.to_owned()));
        }
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().map(|s| s.calls.clone()).unwrap_or_default()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn credential_requests(&self) -> Vec<CredentialRequest> {
        self.lock()
            .map(|s| s.credential_requests.clone())
            .unwrap_or_default()
    }

    pub fn endpoints(&self) -> Vec<EndpointRegistration> {
        self.lock().map(|s| s.endpoints.clone()).unwrap_or_default()
    }

    pub fn restarts(&self) -> Vec<DaemonName> {
        self.lock().map(|s| s.restarts.clone()).unwrap_or_default()
    }

    pub fn servers(&self) -> Vec<String> {
        self.lock()
            .map(|s| s.servers.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn domains(&self) -> BTreeMap<String, RecordId> {
        self.lock().map(|s| s.domains.clone()).unwrap_or_default()
    }

    /// Context that `path` was last rendered with.
    pub fn rendered(&self, path: &str) -> Option<serde_json::Value> {
        let state = self.lock().ok()?;
        serde_json::from_str(state.rendered.get(path)?).ok()
    }

    pub fn file(&self, path: &str) -> Option<(Vec<u8>, u32)> {
        self.lock().ok().and_then(|s| s.files.get(path).cloned())
    }

    fn record(&self, op: &str, detail: &str) -> Result<MutexGuard<'_, MockState>, RuntimeError> {
        let mut state = self.lock()?;
        let call = if detail.is_empty() {
            op.to_owned()
        } else {
            format!("{op} {detail}")
        };
        state.calls.push(call);
        if state.take_failure(&[op]) {
            return Err(RuntimeError::ExecFailed(format!("injected failure: {op}")));
        }
        Ok(state)
    }
}

impl RuntimeBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn available(&self) -> bool {
        true
    }

    fn install(&self, packages: &[String]) -> Result<(), RuntimeError> {
        drop(self.record("install", &packages.join(" "))?);
        Ok(())
    }

    fn render(
        &self,
        files: &[String],
        context: &serde_json::Value,
    ) -> Result<Vec<String>, RuntimeError> {
        let mut state = self.record("render", &files.join(" "))?;
        let rendered = serde_json::to_string(context)?;
        let mut changed = Vec::new();
        for file in files {
            if state.rendered.get(file) != Some(&rendered) {
                state.rendered.insert(file.clone(), rendered.clone());
                changed.push(file.clone());
            }
        }
        Ok(changed)
    }

    fn restart(&self, daemons: &[DaemonName]) -> Result<(), RuntimeError> {
        let detail = daemons
            .iter()
            .map(DaemonName::as_str)
            .collect::<Vec<_>>()
            .join(" ");
        let mut state = self.record("restart", &detail)?;
        state.restarts.extend(daemons.iter().cloned());
        Ok(())
    }

    fn run(&self, argv: &[String]) -> Result<CommandOutput, RuntimeError> {
        let mut state = self.lock()?;
        state.calls.push(format!("run {}", argv.join(" ")));

        let keys: Vec<&str> = argv.iter().map(String::as_str).collect();
        if state.take_failure(&keys) {
            return Ok(CommandOutput {
                status: 1,
                stdout: String::new(),
                stderr: format!("injected failure: {}", argv.join(" ")),
            });
        }

        let mut stdout = String::new();
        if keys.contains(&VERB_SERVER_CREATE) {
            if let Some(server) =
                flag_value(argv, "--server-name").or_else(|| flag_value(argv, "--name"))
            {
                state.servers.insert(server.to_owned());
            }
        } else if keys.contains(&VERB_DOMAIN_CREATE) {
            if let Some(domain) = flag_value(argv, "--domain-name") {
                if !state.domains.contains_key(domain) {
                    state.next_record += 1;
                    let id = RecordId::new(format!("mock-domain-{:04}", state.next_record));
                    state.domains.insert(domain.to_owned(), id);
                }
            }
        } else if keys.contains(&VERB_DOMAIN_GET) {
            if let Some(id) = flag_value(argv, "--domain-name").and_then(|d| state.domains.get(d))
            {
                stdout = format!("{id}\n");
            }
        }

        Ok(CommandOutput {
            status: 0,
            stdout,
            stderr: String::new(),
        })
    }

    fn request_credentials(&self, request: &CredentialRequest) -> Result<(), RuntimeError> {
        let detail = format!("{} {}@{}", request.kind, request.principal, request.resource);
        let mut state = self.record("request-credentials", &detail)?;
        if !state.credential_requests.contains(request) {
            state.credential_requests.push(request.clone());
        }
        Ok(())
    }

    fn register_endpoint(&self, registration: &EndpointRegistration) -> Result<(), RuntimeError> {
        let mut state = self.record("register-endpoint", &registration.public_url)?;
        state.endpoints.push(registration.clone());
        Ok(())
    }

    fn announce_peer(&self, address: &str) -> Result<(), RuntimeError> {
        drop(self.record("announce-peer", address)?);
        Ok(())
    }

    fn configure_ha(&self, resources: &HaResources) -> Result<(), RuntimeError> {
        drop(self.record("configure-ha", &resources.resources.join(" "))?);
        Ok(())
    }

    fn write_file(&self, path: &str, contents: &[u8], mode: u32) -> Result<(), RuntimeError> {
        let mut state = self.record("write-file", path)?;
        state
            .files
            .insert(path.to_owned(), (contents.to_vec(), mode));
        Ok(())
    }
}
