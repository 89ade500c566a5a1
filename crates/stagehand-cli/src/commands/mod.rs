pub mod completions;
pub mod credentials;
pub mod databases;
pub mod doctor;
pub mod invalidate;
pub mod man_pages;
pub mod milestones;
pub mod plan;
pub mod ports;
pub mod run;
pub mod shared;
pub mod status;
pub mod validate;

use indicatif::{ProgressBar, ProgressStyle};
use stagehand_core::{parse_signals_file, Engine, Service, Signals, StatusLevel};
use stagehand_runtime::select_backend;
use stagehand_schema::{parse_descriptor_file, parse_options_file, Options};
use stagehand_store::{FileStore, KeyValueStore, StoreLayout};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_DESCRIPTOR_ERROR: u8 = 2;
pub const EXIT_STORE_ERROR: u8 = 3;
pub const EXIT_BLOCKED: u8 = 4;

/// Paths and backend selected by the global flags.
#[derive(Debug, Clone)]
pub struct Context {
    pub store: PathBuf,
    pub descriptor: PathBuf,
    pub config: PathBuf,
    pub backend: String,
    pub shared: Option<PathBuf>,
    pub json: bool,
}

impl Context {
    pub fn layout(&self) -> StoreLayout {
        StoreLayout::new(&self.store)
    }

    /// Directory holding the peer-visible markers.
    pub fn shared_dir(&self) -> PathBuf {
        self.shared
            .clone()
            .unwrap_or_else(|| self.layout().shared_dir())
    }

    pub fn load_service(&self) -> Result<Service, String> {
        let descriptor = parse_descriptor_file(&self.descriptor)
            .map_err(|e| format!("descriptor error: {}: {e}", self.descriptor.display()))?;
        let options = if self.config.exists() {
            parse_options_file(&self.config)
                .map_err(|e| format!("descriptor error: {}: {e}", self.config.display()))?
        } else {
            Options::default()
        };
        Service::new(descriptor, options).map_err(|e| format!("descriptor error: {e}"))
    }

    pub fn open_engine(&self) -> Result<Engine, String> {
        let service = self.load_service()?;
        let backend = select_backend(&self.backend).map_err(|e| e.to_string())?;
        let shared: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(self.shared_dir()));
        Engine::with_shared(self.layout(), shared, service, Arc::from(backend))
            .map_err(|e| e.to_string())
    }
}

pub fn load_signals(path: &Path) -> Result<Signals, String> {
    parse_signals_file(path).map_err(|e| format!("{}: {e}", path.display()))
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template).unwrap_or_else(|_| ProgressStyle::default_spinner())
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        style("{spinner:.cyan} {msg}")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(style("{msg}"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(style("{msg}"));
    pb.finish_with_message(format!("✗ {msg}"));
}

pub fn colorize_level(level: StatusLevel) -> String {
    use console::Style;
    let text = level.to_string();
    match level {
        StatusLevel::Active => Style::new().green().apply_to(text).to_string(),
        StatusLevel::Waiting => Style::new().yellow().apply_to(text).to_string(),
        StatusLevel::Blocked => Style::new().red().bold().apply_to(text).to_string(),
    }
}

pub fn exit_for(level: StatusLevel) -> u8 {
    if level == StatusLevel::Blocked {
        EXIT_BLOCKED
    } else {
        EXIT_SUCCESS
    }
}
