use super::{colorize_level, exit_for, json_pretty, load_signals, Context};
use std::path::Path;

pub fn run(ctx: &Context, signals: &Path) -> Result<u8, String> {
    let engine = ctx.open_engine()?;
    let signals = load_signals(signals)?;
    let status = engine.status(&signals).map_err(|e| e.to_string())?;

    if ctx.json {
        let payload = serde_json::json!({
            "unit": signals.unit.name,
            "leader": signals.leader,
            "status": status,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!(
            "{}: {} ({})",
            signals.unit.name,
            colorize_level(status.level),
            status.message
        );
    }
    Ok(exit_for(status.level))
}
