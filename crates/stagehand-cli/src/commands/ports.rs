use super::{json_pretty, Context, EXIT_SUCCESS};
use stagehand_schema::Tier;

pub fn run(ctx: &Context, daemon: &str, tier: &str) -> Result<u8, String> {
    let service = ctx.load_service()?;
    let tier: Tier = tier.parse().map_err(|e| format!("descriptor error: {e}"))?;
    let port = service
        .port(daemon, tier)
        .map_err(|e| format!("descriptor error: {e}"))?;
    if ctx.json {
        let payload = serde_json::json!({ "daemon": daemon, "tier": tier, "port": port });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("{port}");
    }
    Ok(EXIT_SUCCESS)
}
