#![forbid(unsafe_code)]

mod cmd;
mod output;
mod project;

use clap::{Parser, Subcommand};
use project::Project;
use std::env;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "braid: issues, patches and pull requests over relays",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Use this project config file instead of `.braid/config.toml`.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Relays",
        about = "Fetch a repository's events into the local projection",
        long_about = "Fetch the announcement, ref state, root items and their replies for one repository from every configured relay, and fold them into the local projection.",
        after_help = "EXAMPLES:\n    # Incremental sync since the last complete one\n    braid sync --repo 30617:<pubkey>:braid\n\n    # Fetch everything again\n    braid sync --repo 30617:<pubkey>:braid --full"
    )]
    Sync(cmd::sync::SyncArgs),

    #[command(
        next_help_heading = "Read",
        about = "List issues, patches and pull requests",
        long_about = "List root items from the local projection with their derived status.",
        after_help = "EXAMPLES:\n    # Open issues\n    braid list --kind issue --state open\n\n    # Everything labelled bug, as JSON\n    braid list --label bug --json"
    )]
    List(cmd::list::ListArgs),

    #[command(
        next_help_heading = "Read",
        about = "Show one item with its comment thread",
        long_about = "Show a root item, its status history, bounty and threaded comments.",
        after_help = "EXAMPLES:\n    # Show by unique prefix\n    braid show 3fa9c1\n\n    # Emit machine-readable output\n    braid show 3fa9c1 --json"
    )]
    Show(cmd::show::ShowArgs),

    #[command(
        next_help_heading = "Read",
        about = "Count activity per type and user",
        long_about = "Count issues, patches, pull requests, comments and status changes once each, from the stored ledger, locally cached items and optionally a live relay query.",
        after_help = "EXAMPLES:\n    # Everything stored locally\n    braid activity\n\n    # Include a live count for one repository\n    braid activity --repo 30617:<pubkey>:braid --live"
    )]
    Activity(cmd::activity::ActivityArgs),

    #[command(
        next_help_heading = "Write",
        about = "Push a directory through the git bridge",
        long_about = "Push files to the git bridge in bounded chunks, then sign and publish the resulting ref state. Interrupted pushes can be resumed.",
        after_help = "EXAMPLES:\n    # Push the current directory\n    braid push --owner alice --repo braid\n\n    # Resume after a failed chunk\n    braid push --owner alice --repo braid --resume"
    )]
    Push(cmd::push::PushArgs),

    #[command(
        next_help_heading = "Write",
        about = "Offer, pay, release or cancel a bounty",
        long_about = "Apply a bounty action to an issue, sign it as a bounty event and publish it.",
        after_help = "EXAMPLES:\n    # Offer 5000 sats\n    braid bounty 3fa9c1 pending --amount 5000\n\n    # Release with a withdraw link\n    braid bounty 3fa9c1 released --withdraw-link lnurl1..."
    )]
    Bounty(cmd::bounty::BountyArgs),

    #[command(
        next_help_heading = "Project Maintenance",
        about = "Rebuild the projection from stored events",
        long_about = "Drop every derived table and replay the stored events in order."
    )]
    Rebuild,

    #[command(
        next_help_heading = "Relays",
        about = "Show a relay's self-description",
        long_about = "Fetch the info document of one relay, or of every configured relay.",
        after_help = "EXAMPLES:\n    # Every configured relay\n    braid relay-info\n\n    # One relay\n    braid relay-info wss://relay.example.com"
    )]
    RelayInfo(cmd::relay_info::RelayInfoArgs),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("BRAID_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "braid=debug,info"
        } else {
            "braid=info,warn"
        })
    });

    let format = env::var("BRAID_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    if cli.verbose {
        info!("Verbose mode enabled");
    }

    let project_root = env::current_dir()?;
    let project = Project::load(&project_root, cli.json, cli.config.as_deref())?;

    match &cli.command {
        Commands::Sync(args) => cmd::sync::run_sync(args, &project),
        Commands::List(args) => cmd::list::run_list(args, &project),
        Commands::Show(args) => cmd::show::run_show(args, &project),
        Commands::Activity(args) => cmd::activity::run_activity(args, &project),
        Commands::Push(args) => cmd::push::run_push(args, &project),
        Commands::Bounty(args) => cmd::bounty::run_bounty(args, &project),
        Commands::Rebuild => cmd::rebuild::run_rebuild(&project),
        Commands::RelayInfo(args) => cmd::relay_info::run_relay_info(args, &project),
    }
}
