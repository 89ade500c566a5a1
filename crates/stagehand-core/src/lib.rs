//! Provisioning engine for Stagehand units.
//!
//! This crate ties together the service descriptor, the durable store and a
//! runtime backend into the `Engine`, which runs evaluation passes: read the
//! dependency signals, select the actions the guard table enables, apply them,
//! persist milestones and report one aggregate unit status. It also provides
//! record bootstrap, option-driven invalidation, store locking and shutdown
//! handling.

pub mod bootstrap;
pub mod concurrency;
pub mod engine;
pub mod lifecycle;
pub mod machine;
pub mod service;
pub mod signals;
pub mod status;

pub use bootstrap::{domain_ids_for, BootstrapOutcome, DomainSnapshot};
pub use concurrency::{install_signal_handler, shutdown_requested, StoreLock};
pub use engine::{AppliedAction, Engine, FailedAction, PassReport};
pub use lifecycle::validate_mark;
pub use machine::{evaluate, Action, Facts, Transition, TRANSITIONS};
pub use service::{DatabaseSetup, Service, StatusCheck};
pub use signals::{
    parse_signals_file, parse_signals_str, DependencySignal, DependencyStatus, Signals, UnitInfo,
};
pub use status::{assess_status, StatusLevel, UnitStatus};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("descriptor error: {0}")]
    Descriptor(#[from] stagehand_schema::DescriptorError),
    #[error("store error: {0}")]
    Store(#[from] stagehand_store::StoreError),
    #[error("runtime error: {0}")]
    Runtime(#[from] stagehand_runtime::RuntimeError),
    #[error("invalid milestone transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("action '{0}' may only run on the leader")]
    NotLeader(String),
    #[error("store is locked by another pass: {0}")]
    StoreLocked(String),
    #[error("invalid signals: {0}")]
    InvalidSignals(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
