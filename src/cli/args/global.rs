//! Global CLI options shared across all commands

use crate::cli::{Cli, OutputFormat};

/// Global CLI options passed to all command handlers.
///
/// Precedence is CLI flag > environment variable > config file > default.
/// This struct captures the CLI/env layer; the config file is applied in
/// `CommandContext`.
#[derive(Debug, Clone)]
pub struct GlobalOptions {
    pub format: OutputFormat,

    /// Custom config file path (defaults to ~/.pollsync/config.yaml)
    pub config: Option<String>,

    /// API base URL override
    pub api_url: Option<String>,

    /// Start with connectivity reported as offline
    pub offline: bool,

    /// Bypass the response cache for raw calls
    pub no_cache: bool,
}

impl GlobalOptions {
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            format: cli.format,
            config: cli.config.clone(),
            api_url: cli.api_url.clone(),
            offline: cli.offline,
            no_cache: cli.no_cache,
        }
    }

    pub fn config_ref(&self) -> Option<&str> {
        self.config.as_deref()
    }

    pub fn api_url_ref(&self) -> Option<&str> {
        self.api_url.as_deref()
    }
}
