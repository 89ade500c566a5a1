use super::{json_pretty, load_signals, Context, EXIT_SUCCESS};
use std::path::Path;

pub fn run(ctx: &Context, signals: &Path) -> Result<u8, String> {
    let engine = ctx.open_engine()?;
    let signals = load_signals(signals)?;
    let actions = engine.plan(&signals).map_err(|e| e.to_string())?;

    if ctx.json {
        let payload = serde_json::json!({
            "unit": signals.unit.name,
            "actions": actions,
        });
        println!("{}", json_pretty(&payload)?);
    } else if actions.is_empty() {
        println!("nothing to do");
    } else {
        for action in &actions {
            let leader = if action.leader_only() { " (leader)" } else { "" };
            println!("{action}{leader}");
        }
    }
    Ok(EXIT_SUCCESS)
}
