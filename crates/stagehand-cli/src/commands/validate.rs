use super::{json_pretty, Context, EXIT_SUCCESS};

/// Parse the descriptor and options and report what they declare.
pub fn run(ctx: &Context) -> Result<u8, String> {
    let service = ctx.load_service()?;
    let slaves = service
        .options
        .dns_slaves()
        .map_err(|e| format!("descriptor error: {e}"))?;
    let check = service.status_check();
    let d = &service.descriptor;

    if ctx.json {
        let payload = serde_json::json!({
            "service": service.name(),
            "release": d.service.release,
            "daemons": d.service.daemons,
            "requires": d.service.requires,
            "optional": d.service.optional,
            "capabilities": d.capabilities,
            "dns_slaves": slaves.len(),
            "sinks": service.options.sinks().len(),
            "status_check": check,
            "valid": true,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("descriptor valid: {} ({})", service.name(), d.service.release);
        println!(
            "daemons: {}",
            d.service
                .daemons
                .iter()
                .map(|d| d.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        println!(
            "requires: {}",
            d.service
                .requires
                .iter()
                .map(|k| k.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        if !slaves.is_empty() {
            println!("dns slaves: {}", slaves.len());
        }
        if let Some(check) = check {
            println!("warning: unit would be {}: {}", check.level, check.message);
        }
    }
    Ok(EXIT_SUCCESS)
}
