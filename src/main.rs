mod cli;
mod commands;
mod output;

use clap::Parser;
use cli::{Cli, Commands};
use mission_control::config::{self, LoadedSettings};
use mission_control::notify::BroadcastNotifier;
use mission_control::state::SqliteServiceStore;
use mission_control::{Error as McError, MissionControl};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        if let Some(mc_error) = e.downcast_ref::<McError>() {
            eprintln!("Error: {}", mc_error);
            if let Some(suggestion) = mc_error.suggestion() {
                eprintln!("\nHint: {}", suggestion);
            }
        } else {
            eprintln!("Error: {:#}", e);
        }
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    // ── Commands that need only the settings ────────────────────────
    if let Commands::Validate = cli.command {
        return commands::run_validate(cli.config.as_deref(), &output::CliOutput);
    }

    let loaded = config::resolve(cli.config.as_deref())?;
    let notifier = Arc::new(BroadcastNotifier::default());
    let app = build_app(&loaded, cli.database.as_deref(), Arc::clone(&notifier)).await?;
    let out = &output::CliOutput;

    match cli.command {
        Commands::Seed { replace } => {
            commands::run_seed(&app, &loaded.settings, replace, out).await?;
        }
        Commands::List { json, daemons } => {
            commands::run_list(&app, json, daemons, out).await?;
        }
        Commands::Start { id } => commands::run_start(&app, id, out).await?,
        Commands::Stop { id } => commands::run_stop(&app, id, out).await?,
        Commands::Restart { id } => commands::run_restart(&app, id, out).await?,
        Commands::Logs { id } => commands::run_logs(&app, id, out).await?,
        Commands::Stats { id, interval } => {
            let interval =
                commands::stats_interval(interval.as_deref(), loaded.settings.stats_interval()?)?;
            commands::run_stats(&app, id, interval, out).await?;
        }
        Commands::Cache => commands::run_cache(&app, out).await?,
        Commands::Serve => {
            let docker = loaded.settings.docker_client()?;
            commands::run_serve(&app, &notifier, &docker, &output::ServeOutput).await?;
        }
        Commands::Validate => unreachable!("handled before loading the database"),
    }

    Ok(())
}

async fn build_app(
    loaded: &LoadedSettings,
    database_override: Option<&std::path::Path>,
    notifier: Arc<BroadcastNotifier>,
) -> anyhow::Result<MissionControl> {
    let settings = &loaded.settings;
    let db_path = settings.database_path(loaded.base_dir(), database_override);
    tracing::debug!(path = %db_path.display(), "Opening database");

    let store = SqliteServiceStore::new(&db_path).await?;
    let docker = settings.docker_client()?;
    let app = MissionControl::new(Arc::new(docker), store, notifier)
        .await?
        .with_stats_interval(settings.stats_interval()?);
    Ok(app)
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}
