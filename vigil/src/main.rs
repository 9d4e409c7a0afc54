// vigil/src/main.rs

mod cli;
mod commands;
mod output;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use commands::Session;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let session = Session {
        project_dir: cli.project_dir,
        actor: cli.actor,
        format: cli.format,
    };

    if let Err(e) = dispatch(&session, cli.command).await {
        eprintln!("❌ {:#}", e);
        std::process::exit(1);
    }
}

async fn dispatch(session: &Session, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Setup => commands::lifecycle::setup(session),
        Commands::Health => commands::lifecycle::health(session).await,
        Commands::Ready => commands::lifecycle::ready(session).await,
        Commands::Upgrade => commands::lifecycle::upgrade(session),
        Commands::Rule(args) => commands::rule::execute(session, args.command),
        Commands::Pack(args) => commands::pack::execute(session, args.command),
        Commands::Apply { pack, asset } => commands::apply::execute(session, &pack, &asset).await,
        Commands::Anomaly(args) => commands::anomaly::execute(session, args.command),
        Commands::Monitor(args) => commands::monitor::execute(session, args.command).await,
        Commands::Incident(args) => commands::incident::execute(session, args.command).await,
        Commands::Task(args) => commands::task::execute(session, args.command),
        Commands::Admin(args) => commands::admin::execute(session, args.command),
    }
}
