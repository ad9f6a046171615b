//! Command execution context
//!
//! Loads configuration, applies global overrides and builds the resilience
//! context every command works through.

use std::sync::Arc;

use pollsync::Resilience;
use pollsync::config::Config;
use pollsync::error::Result;
use pollsync::host::Connectivity;

use crate::cli::notifier::ConsoleNotifier;
use crate::cli::{GlobalOptions, OutputFormat};

pub struct CommandContext {
    pub resilience: Resilience,
    pub format: OutputFormat,
    pub no_cache: bool,
}

impl CommandContext {
    pub fn new(opts: &GlobalOptions) -> Result<Self> {
        let mut config = Config::load_at(opts.config_ref())?;
        if let Some(url) = opts.api_url_ref() {
            config.api_base_url = url.to_string();
            config.validate()?;
        }
        log::debug!("Using API at {}", config.api_base_url);

        let resilience = Resilience::builder(config)
            .connectivity(Connectivity::new(!opts.offline))
            .notifier(Arc::new(ConsoleNotifier))
            .build()?;

        Ok(Self {
            resilience,
            format: opts.format,
            no_cache: opts.no_cache,
        })
    }

    pub fn is_json(&self) -> bool {
        self.format.is_json()
    }
}

/// Print a value as pretty JSON
pub fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
