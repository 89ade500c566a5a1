use super::{json_pretty, Context, EXIT_SUCCESS};
use stagehand_store::{FileStore, SharedState};
use std::sync::Arc;

pub fn run(ctx: &Context) -> Result<u8, String> {
    let shared = SharedState::new(Arc::new(FileStore::new(ctx.shared_dir())));
    let markers = shared.list().map_err(|e| format!("store error: {e}"))?;
    if ctx.json {
        println!("{}", json_pretty(&markers)?);
    } else if markers.is_empty() {
        println!("no shared markers");
    } else {
        for (name, value) in &markers {
            println!("{name:<20} {value}");
        }
    }
    Ok(EXIT_SUCCESS)
}
