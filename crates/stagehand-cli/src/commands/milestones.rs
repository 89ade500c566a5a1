use super::{json_pretty, Context, EXIT_SUCCESS};
use stagehand_store::{FileStore, Milestone, MilestoneStore};
use std::sync::Arc;

pub fn run(ctx: &Context) -> Result<u8, String> {
    let layout = ctx.layout();
    let store = MilestoneStore::new(Arc::new(FileStore::new(layout.unit_dir())));
    let reached = store.load().map_err(|e| format!("store error: {e}"))?;

    if ctx.json {
        let payload: Vec<_> = Milestone::ALL
            .iter()
            .map(|m| serde_json::json!({ "milestone": m, "set": reached.contains(*m) }))
            .collect();
        println!("{}", json_pretty(&payload)?);
    } else {
        for m in Milestone::ALL {
            let mark = if reached.contains(m) { "✓" } else { " " };
            println!("[{mark}] {m}");
        }
    }
    Ok(EXIT_SUCCESS)
}
