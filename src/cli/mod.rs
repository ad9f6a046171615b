//! CLI command definitions and handlers

use clap::{Parser, Subcommand};

pub mod args;
pub mod auth;
pub mod cache;
pub mod call;
pub mod context;
pub mod notifier;
pub mod queue;
pub mod status;
pub mod submit;
pub mod sync;
pub mod track;

pub use args::{GlobalOptions, OutputFormat};
pub use context::CommandContext;

/// pollsync - offline-resilient client for the Pollsync survey service
#[derive(Parser, Debug)]
#[command(name = "pollsync")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (pretty, json)
    #[arg(
        long,
        global = true,
        env = "POLLSYNC_FORMAT",
        default_value = "pretty",
        hide_env = true
    )]
    pub format: OutputFormat,

    /// Override config file location
    #[arg(long, global = true, env = "POLLSYNC_CONFIG", hide_env = true)]
    pub config: Option<String>,

    /// Override the API base URL
    #[arg(long, global = true, env = "POLLSYNC_API_URL", hide_env = true)]
    pub api_url: Option<String>,

    /// Enable debug logging
    #[arg(long, global = true, env = "POLLSYNC_DEBUG", hide_env = true)]
    pub debug: bool,

    /// Treat the network as unavailable (work is queued locally)
    #[arg(long, global = true)]
    pub offline: bool,

    /// Bypass the response cache
    #[arg(long, global = true, env = "POLLSYNC_NO_CACHE", hide_env = true)]
    pub no_cache: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show connectivity, queues, session and last sync
    Status,

    /// Replay queued work, refresh snapshots and confirm responses
    Sync,

    /// Issue a raw API call through the gateway
    Call {
        /// Endpoint path, e.g. /surveys/active
        endpoint: String,

        /// HTTP method
        #[arg(long, short = 'X', default_value = "GET")]
        method: String,

        /// JSON request body
        #[arg(long, short)]
        data: Option<String>,
    },

    /// Record a telemetry event
    Track {
        category: String,

        action: String,

        #[arg(long)]
        label: Option<String>,

        /// JSON payload attached to the event
        #[arg(long)]
        data: Option<String>,
    },

    /// Deliver buffered telemetry now
    Flush,

    /// Submit survey answers, queueing them if the service is unreachable
    Submit {
        survey_id: String,

        /// Answers as a JSON object keyed by question id
        #[arg(long)]
        answers: String,
    },

    /// Inspect offline mutations
    #[command(subcommand)]
    Queue(QueueCommands),

    /// Manage locally mirrored data
    #[command(subcommand)]
    Cache(CacheCommands),

    /// Sign in and store the session token
    Login {
        #[arg(long)]
        email: String,

        #[arg(long, env = "POLLSYNC_PASSWORD", hide_env = true)]
        password: String,
    },

    /// Sign out and forget stored credentials
    Logout,
}

#[derive(Subcommand, Debug)]
pub enum QueueCommands {
    /// List queued and dead-lettered mutations
    List,

    /// Discard queued mutations
    Clear {
        /// Also discard dead-lettered mutations
        #[arg(long)]
        dead_letters: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// Remove mirrored snapshots
    Clear,
}

/// Parse a JSON argument, naming the flag it came from on failure
pub fn parse_json_arg(flag: &str, raw: &str) -> pollsync::Result<serde_json::Value> {
    serde_json::from_str(raw)
        .map_err(|e| pollsync::Error::Validation(format!("--{} is not valid JSON: {}", flag, e)))
}
