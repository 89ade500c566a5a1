use super::{json_pretty, Context, EXIT_SUCCESS};
use stagehand_core::CoreError;
use stagehand_store::Milestone;

pub fn run(ctx: &Context, milestone: &str) -> Result<u8, String> {
    let milestone = milestone
        .parse::<Milestone>()
        .map_err(|e| e.to_string())?;
    let engine = ctx.open_engine()?;
    let cleared = engine.invalidate(milestone).map_err(|e| match e {
        CoreError::StoreLocked(_) => format!("store lock: {e}"),
        other => other.to_string(),
    })?;

    if ctx.json {
        let payload = serde_json::json!({ "cleared": cleared });
        println!("{}", json_pretty(&payload)?);
    } else if cleared.is_empty() {
        println!("{milestone} was not set");
    } else {
        for m in &cleared {
            println!("cleared {m}");
        }
    }
    Ok(EXIT_SUCCESS)
}
