//! Collaborator backends for Stagehand units.
//!
//! This crate implements the side-effecting layer behind one pluggable
//! `RuntimeBackend` trait: package installation, config rendering, daemon
//! restarts, helper commands, and the relation calls that request
//! credentials, register endpoints and configure HA. It ships a `host`
//! backend driving real OS commands and an in-memory `mock` backend, plus the
//! bounded-retry reachability probe and host prerequisite checks.

pub mod backend;
pub mod host;
pub mod mock;
pub mod prereq;
pub mod probe;

pub use backend::{
    select_backend, CommandOutput, CredentialRequest, EndpointRegistration, HaResources,
    RuntimeBackend,
};
pub use host::HostBackend;
pub use mock::MockBackend;
pub use prereq::{check_host_prereqs, format_missing, MissingPrereq};
pub use probe::{probe, RetryPolicy};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("backend '{0}' is not available on this system")]
    BackendUnavailable(String),
    #[error("command `{argv}` exited with status {status}: {stderr}")]
    CommandFailed {
        argv: String,
        status: i32,
        stderr: String,
    },
    #[error("runtime execution failed: {0}")]
    ExecFailed(String),
    #[error("{what} still unreachable after {attempts} attempts: {last}")]
    Unreachable {
        what: String,
        attempts: u32,
        last: String,
    },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
