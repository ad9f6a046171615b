//! Raw gateway call

use std::str::FromStr;

use reqwest::Method;

use pollsync::error::{Error, Result};
use pollsync::gateway::CallOptions;

use crate::cli::context::{CommandContext, print_json};
use crate::cli::parse_json_arg;

pub async fn run(
    ctx: &CommandContext,
    endpoint: &str,
    method: &str,
    data: Option<&str>,
) -> Result<()> {
    let method = Method::from_str(&method.to_ascii_uppercase())
        .map_err(|_| Error::Validation(format!("Unknown HTTP method '{}'", method)))?;

    let mut options = CallOptions {
        method,
        body: data.map(|raw| parse_json_arg("data", raw)).transpose()?,
        ..CallOptions::default()
    };
    if ctx.no_cache {
        options = options.no_cache();
    }

    let value = ctx.resilience.gateway().call(endpoint, options).await?;
    print_json(&value)
}
