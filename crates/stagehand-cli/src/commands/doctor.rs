use super::{Context, EXIT_FAILURE, EXIT_SUCCESS};
use stagehand_core::StoreLock;
use stagehand_runtime::{check_host_prereqs, format_missing, HostBackend, RuntimeBackend};
use stagehand_store::{FileStore, Journal, MilestoneStore, StoreLayout};
use std::sync::Arc;

pub fn run(ctx: &Context) -> Result<u8, String> {
    let mut checks: Vec<Check> = Vec::new();
    let mut all_pass = true;

    if ctx.backend == "host" {
        check_prereqs(&mut checks, &mut all_pass);
    } else {
        checks.push(Check::info(
            "runtime_prereqs",
            &format!("Backend '{}' needs no host tools", ctx.backend),
        ));
    }

    check_descriptor(ctx, &mut checks, &mut all_pass);

    let layout = ctx.layout();
    if layout.is_initialized() {
        checks.push(Check::pass("store_exists", "Store directory exists"));
        check_store(&layout, &mut checks, &mut all_pass);
    } else {
        checks.push(Check::info(
            "store_exists",
            "Store not initialized (will be created on first run)",
        ));
    }

    print_results(&checks, all_pass, ctx.json)
}

fn check_prereqs(checks: &mut Vec<Check>, all_pass: &mut bool) {
    let host = HostBackend::new();
    let missing = check_host_prereqs(host.render_helper(), host.relation_helper());
    if missing.is_empty() && host.available() {
        checks.push(Check::pass("runtime_prereqs", "Host prerequisites satisfied"));
    } else {
        *all_pass = false;
        checks.push(Check::fail("runtime_prereqs", &format_missing(&missing)));
    }
}

fn check_descriptor(ctx: &Context, checks: &mut Vec<Check>, all_pass: &mut bool) {
    match ctx.load_service() {
        Ok(service) => {
            checks.push(Check::pass(
                "descriptor",
                &format!("Descriptor for '{}' is valid", service.name()),
            ));
            if let Some(check) = service.status_check() {
                checks.push(Check::warn("options", &check.message));
            }
        }
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail("descriptor", &e));
        }
    }
}

fn check_store(layout: &StoreLayout, checks: &mut Vec<Check>, all_pass: &mut bool) {
    match layout.verify_version() {
        Ok(()) => checks.push(Check::pass("store_version", "Store format version valid")),
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail(
                "store_version",
                &format!("Store version check failed: {e}"),
            ));
        }
    }

    let journal = Journal::new(layout);
    match journal.list_incomplete() {
        Ok(entries) if entries.is_empty() => {
            checks.push(Check::pass(
                "journal_clean",
                "Journal is clean (no interrupted actions)",
            ));
        }
        Ok(entries) => {
            let actions: Vec<&str> = entries.iter().map(|e| e.action.as_str()).collect();
            checks.push(Check::warn(
                "journal_clean",
                &format!(
                    "{} interrupted actions ({}), retried on next run",
                    entries.len(),
                    actions.join(", ")
                ),
            ));
        }
        Err(e) => checks.push(Check::warn(
            "journal_clean",
            &format!("Cannot read journal: {e}"),
        )),
    }

    match StoreLock::try_acquire(&layout.lock_file()) {
        Ok(Some(_)) => checks.push(Check::pass("store_lock", "Store lock is free")),
        Ok(None) => checks.push(Check::warn(
            "store_lock",
            "Store lock is held by a running pass",
        )),
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail(
                "store_lock",
                &format!("Cannot check store lock: {e}"),
            ));
        }
    }

    let milestones = MilestoneStore::new(Arc::new(FileStore::new(layout.unit_dir())));
    match milestones.load() {
        Ok(set) => checks.push(Check::info(
            "milestones",
            &format!("{} milestones reached", set.len()),
        )),
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail(
                "milestones",
                &format!("Cannot read milestones: {e}"),
            ));
        }
    }
}

fn print_results(checks: &[Check], all_pass: bool, json_output: bool) -> Result<u8, String> {
    if json_output {
        let json = serde_json::json!({
            "healthy": all_pass,
            "checks": checks.iter().map(|c| serde_json::json!({
                "name": c.name,
                "status": c.status,
                "message": c.message,
            })).collect::<Vec<_>>(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&json).map_err(|e| e.to_string())?
        );
    } else {
        println!("Stagehand Doctor\n");
        for check in checks {
            let icon = match check.status {
                "pass" => "✓",
                "fail" => "✗",
                "warn" => "⚠",
                _ => "ℹ",
            };
            println!("  {icon} {}", check.message);
        }
        println!();
        if all_pass {
            println!("All checks passed.");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }
    Ok(if all_pass { EXIT_SUCCESS } else { EXIT_FAILURE })
}

struct Check {
    name: &'static str,
    status: &'static str,
    message: String,
}

impl Check {
    fn new(name: &'static str, status: &'static str, message: &str) -> Self {
        Self {
            name,
            status,
            message: message.to_owned(),
        }
    }

    fn pass(name: &'static str, message: &str) -> Self {
        Self::new(name, "pass", message)
    }

    fn fail(name: &'static str, message: &str) -> Self {
        Self::new(name, "fail", message)
    }

    fn warn(name: &'static str, message: &str) -> Self {
        Self::new(name, "warn", message)
    }

    fn info(name: &'static str, message: &str) -> Self {
        Self::new(name, "info", message)
    }
}
