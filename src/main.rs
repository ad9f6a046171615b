//! pollsync - offline-resilient client for the Pollsync survey service

use anyhow::Context;
use clap::Parser;

mod cli;

use cli::{CacheCommands, Cli, CommandContext, Commands, GlobalOptions, QueueCommands};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("Error: {:#}", err);
        std::process::exit(1);
    }
}

fn init_logging(debug: bool) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if debug {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.format_timestamp(None).init();
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let opts = GlobalOptions::from_cli(&cli);
    let ctx = CommandContext::new(&opts).context("Failed to initialize pollsync")?;

    match cli.command {
        Commands::Status => cli::status::run(&ctx)?,
        Commands::Sync => cli::sync::run(&ctx).await?,
        Commands::Call {
            endpoint,
            method,
            data,
        } => cli::call::run(&ctx, &endpoint, &method, data.as_deref()).await?,
        Commands::Track {
            category,
            action,
            label,
            data,
        } => {
            cli::track::run(&ctx, &category, &action, label.as_deref(), data.as_deref()).await?
        }
        Commands::Flush => cli::sync::flush(&ctx).await?,
        Commands::Submit { survey_id, answers } => {
            cli::submit::run(&ctx, &survey_id, &answers).await?
        }
        Commands::Queue(QueueCommands::List) => cli::queue::list(&ctx)?,
        Commands::Queue(QueueCommands::Clear { dead_letters }) => {
            cli::queue::clear(&ctx, dead_letters)?
        }
        Commands::Cache(CacheCommands::Clear) => cli::cache::clear(&ctx)?,
        Commands::Login { email, password } => cli::auth::login(&ctx, &email, &password).await?,
        Commands::Logout => cli::auth::logout(&ctx).await?,
    }

    Ok(())
}
