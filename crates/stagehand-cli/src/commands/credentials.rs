use super::{json_pretty, Context, EXIT_SUCCESS};
use stagehand_schema::DependencyKind;

pub fn run(ctx: &Context, kind: &str) -> Result<u8, String> {
    let service = ctx.load_service()?;
    let kind: DependencyKind = kind.parse()?;
    let (principal, resource) = service
        .credentials_for(kind)
        .ok_or_else(|| format!("{kind} does not hand out credentials"))?;
    if ctx.json {
        let payload = serde_json::json!({
            "kind": kind,
            "principal": principal,
            "resource": resource,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("{principal}@{resource}");
    }
    Ok(EXIT_SUCCESS)
}
