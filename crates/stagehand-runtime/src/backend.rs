use crate::RuntimeError;
use serde::{Deserialize, Serialize};
use stagehand_schema::{DaemonName, DependencyKind};

/// Ask a dependency to provision access for this unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CredentialRequest {
    pub kind: DependencyKind,
    pub principal: String,
    pub resource: String,
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EndpointRegistration {
    pub service_type: String,
    pub region: String,
    pub public_url: String,
    pub internal_url: String,
    pub admin_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HaResources {
    pub service: String,
    pub resources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vip: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Every external side effect of a provisioning pass goes through this trait.
pub trait RuntimeBackend: Send + Sync {
    fn name(&self) -> &str;

    fn available(&self) -> bool;

    fn install(&self, packages: &[String]) -> Result<(), RuntimeError>;

    /// Render config files from the context. Returns the files whose
    /// contents changed.
    fn render(
        &self,
        files: &[String],
        context: &serde_json::Value,
    ) -> Result<Vec<String>, RuntimeError>;

    fn restart(&self, daemons: &[DaemonName]) -> Result<(), RuntimeError>;

    fn run(&self, argv: &[String]) -> Result<CommandOutput, RuntimeError>;

    /// Like [`run`](Self::run), but a non-zero exit is an error.
    fn run_checked(&self, argv: &[String]) -> Result<CommandOutput, RuntimeError> {
        let output = self.run(argv)?;
        if output.success() {
            Ok(output)
        } else {
            Err(RuntimeError::CommandFailed {
                argv: argv.join(" "),
                status: output.status,
                stderr: output.stderr.trim().to_owned(),
            })
        }
    }

    fn request_credentials(&self, request: &CredentialRequest) -> Result<(), RuntimeError>;

    fn register_endpoint(&self, registration: &EndpointRegistration) -> Result<(), RuntimeError>;

    fn announce_peer(&self, address: &str) -> Result<(), RuntimeError>;

    fn configure_ha(&self, resources: &HaResources) -> Result<(), RuntimeError>;

    fn write_file(&self, path: &str, contents: &[u8], mode: u32) -> Result<(), RuntimeError>;
}

pub fn select_backend(name: &str) -> Result<Box<dyn RuntimeBackend>, RuntimeError> {
    match name {
        "host" => Ok(Box::new(crate::host::HostBackend::new())),
        "mock" => Ok(Box::new(crate::mock::MockBackend::new())),
        other => Err(RuntimeError::BackendUnavailable(other.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_valid_backends() {
        assert_eq!(select_backend("host").unwrap().name(), "host");
        assert_eq!(select_backend("mock").unwrap().name(), "mock");
    }

    #[test]
    fn select_invalid_backend_fails() {
        assert!(matches!(
            select_backend("juju"),
            Err(RuntimeError::BackendUnavailable(ref n)) if n == "juju"
        ));
    }

    #[test]
    fn run_checked_maps_nonzero_exit() {
        let mock = crate::mock::MockBackend::new();
        mock.fail("trove-manage", 1);
        let argv = vec!["trove-manage".to_owned(), "db_sync".to_owned()];
        let err = mock.run_checked(&argv).unwrap_err();
        assert!(matches!(err, RuntimeError::CommandFailed { status: 1, .. }));
        assert!(mock.run_checked(&argv).is_ok());
    }

    #[test]
    fn credential_request_omits_missing_prefix() {
        let req = CredentialRequest {
            kind: DependencyKind::MessageQueue,
            principal: "trove".to_owned(),
            resource: "openstack".to_owned(),
            host: "10.0.0.5".to_owned(),
            prefix: None,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("prefix"));
        assert!(json.contains("\"message-queue\""));
    }
}
