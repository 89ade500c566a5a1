use super::{json_pretty, Context, EXIT_SUCCESS};

pub fn run(ctx: &Context, address: &str) -> Result<u8, String> {
    let service = ctx.load_service()?;
    let setups = service
        .database_setup(address)
        .map_err(|e| format!("descriptor error: {e}"))?;
    if ctx.json {
        println!("{}", json_pretty(&setups)?);
    } else {
        println!("{:<16} {:<16} {:<16} PREFIX", "DATABASE", "USERNAME", "HOSTNAME");
        for s in &setups {
            println!(
                "{:<16} {:<16} {:<16} {}",
                s.database,
                s.username,
                s.hostname,
                s.prefix.as_deref().unwrap_or("-")
            );
        }
    }
    Ok(EXIT_SUCCESS)
}
