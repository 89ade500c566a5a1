mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{Context, EXIT_DESCRIPTOR_ERROR, EXIT_FAILURE, EXIT_STORE_ERROR};
use stagehand_core::install_signal_handler;
use stagehand_runtime::{check_host_prereqs, format_missing, HostBackend};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "stagehand",
    version,
    about = "Event-driven provisioning engine for OpenStack service units"
)]
struct Cli {
    /// Path to the unit's store directory.
    #[arg(long, default_value = "~/.local/share/stagehand", global = true)]
    store: String,

    /// Path to the service descriptor.
    #[arg(long, default_value = "service.toml", global = true)]
    descriptor: PathBuf,

    /// Path to the operator options; a missing file means defaults.
    #[arg(long, default_value = "config.toml", global = true)]
    config: PathBuf,

    /// Collaborator backend: host or mock.
    #[arg(long, default_value = "host", global = true)]
    backend: String,

    /// Directory of the marker namespace shared with peer units.
    #[arg(long, global = true)]
    shared: Option<String>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Check the descriptor and options without touching the store.
    Validate,
    /// Show the actions the next pass would apply.
    Plan {
        /// Path to the dependency signals JSON file.
        signals: PathBuf,
    },
    /// Run an evaluation pass and apply the enabled actions.
    Run {
        /// Path to the dependency signals JSON file.
        signals: PathBuf,
        /// Keep running passes until nothing new is reached.
        #[arg(long, default_value_t = false)]
        converge: bool,
        /// Upper bound on passes with --converge.
        #[arg(long, default_value_t = 10)]
        max_passes: usize,
    },
    /// Report the unit status without applying anything.
    Status {
        /// Path to the dependency signals JSON file.
        signals: PathBuf,
    },
    /// List milestones and whether they are reached.
    Milestones,
    /// Clear a milestone and every later step of the chain.
    Invalidate {
        /// Milestone name, e.g. full-config-rendered.
        milestone: String,
    },
    /// List markers shared with peer units.
    Shared,
    /// Look up the port of a daemon on a network tier.
    Ports {
        /// Daemon name.
        daemon: String,
        /// public, admin or internal.
        tier: String,
    },
    /// Show the principal and resource requested from a dependency.
    Credentials {
        /// Dependency kind, e.g. database or message-queue.
        kind: String,
    },
    /// List the database schemas requested for a unit address.
    Databases {
        /// Address of the unit.
        address: String,
    },
    /// Run diagnostic checks on the host, descriptor and store.
    Doctor,
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
    /// Generate man pages in the specified directory.
    ManPages {
        /// Output directory for man pages.
        #[arg(default_value = "man")]
        dir: PathBuf,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("STAGEHAND_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    install_signal_handler();

    let ctx = Context {
        store: expand_tilde(&cli.store),
        descriptor: cli.descriptor,
        config: cli.config,
        backend: cli.backend,
        shared: cli.shared.as_deref().map(expand_tilde),
        json: cli.json,
    };

    let needs_host = matches!(cli.command, Commands::Run { .. });
    if needs_host
        && ctx.backend == "host"
        && std::env::var("STAGEHAND_SKIP_PREREQS").as_deref() != Ok("1")
    {
        let host = HostBackend::new();
        let missing = check_host_prereqs(host.render_helper(), host.relation_helper());
        if !missing.is_empty() {
            eprintln!("error: {}", format_missing(&missing));
            return ExitCode::from(EXIT_FAILURE);
        }
    }

    let result = match cli.command {
        Commands::Validate => commands::validate::run(&ctx),
        Commands::Plan { signals } => commands::plan::run(&ctx, &signals),
        Commands::Run {
            signals,
            converge,
            max_passes,
        } => commands::run::run(&ctx, &signals, converge, max_passes),
        Commands::Status { signals } => commands::status::run(&ctx, &signals),
        Commands::Milestones => commands::milestones::run(&ctx),
        Commands::Invalidate { milestone } => commands::invalidate::run(&ctx, &milestone),
        Commands::Shared => commands::shared::run(&ctx),
        Commands::Ports { daemon, tier } => commands::ports::run(&ctx, &daemon, &tier),
        Commands::Credentials { kind } => commands::credentials::run(&ctx, &kind),
        Commands::Databases { address } => commands::databases::run(&ctx, &address),
        Commands::Doctor => commands::doctor::run(&ctx),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
        Commands::ManPages { dir } => commands::man_pages::run::<Cli>(&dir),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("descriptor error:") {
                EXIT_DESCRIPTOR_ERROR
            } else if msg.starts_with("store error:") || msg.starts_with("store lock:") {
                EXIT_STORE_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    PathBuf::from(path)
}
