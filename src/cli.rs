use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mctl")]
#[command(about = "Mission Control - keep declared container services in step with Docker")]
pub struct Cli {
    /// Settings file (defaults to mission-control.yaml in this or a parent directory)
    #[arg(short, long, env = "MCTL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Database file, overriding the settings file
    #[arg(long, env = "MCTL_DATABASE")]
    pub database: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load the services catalogue from the settings file into the database
    Seed {
        /// Remove existing services first
        #[arg(long)]
        replace: bool,
    },
    /// List services and their last known state
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,

        /// Only daemon services
        #[arg(long)]
        daemons: bool,
    },
    /// Start a service
    Start {
        /// Service id
        id: i64,
    },
    /// Stop and remove a service's container
    Stop {
        /// Service id
        id: i64,
    },
    /// Restart a service, starting it if it has no container
    Restart {
        /// Service id
        id: i64,
    },
    /// Follow a service's container output (Ctrl+C to stop)
    Logs {
        /// Service id
        id: i64,
    },
    /// Follow a service's resource usage (Ctrl+C to stop)
    Stats {
        /// Service id
        id: i64,

        /// Pause between samples, e.g. "2s" (defaults to the settings file)
        #[arg(long)]
        interval: Option<String>,
    },
    /// Pull every enabled service's image that is missing locally
    Cache,
    /// Boot (cache images, bring up daemons), then reconcile container events
    /// and print notifications as JSON lines until Ctrl+C
    Serve,
    /// Check the settings file without touching Docker or the database
    Validate,
}
