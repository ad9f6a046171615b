//! Record a telemetry event

use colored::Colorize;
use serde_json::{Value, json};

use pollsync::error::Result;

use crate::cli::context::{CommandContext, print_json};
use crate::cli::parse_json_arg;

pub async fn run(
    ctx: &CommandContext,
    category: &str,
    action: &str,
    label: Option<&str>,
    data: Option<&str>,
) -> Result<()> {
    let data = match data {
        Some(raw) => parse_json_arg("data", raw)?,
        None => Value::Null,
    };

    let telemetry = ctx.resilience.telemetry();
    telemetry.track_event(category, action, label, data).await;
    let pending = telemetry.len();

    if ctx.is_json() {
        return print_json(&json!({ "recorded": true, "pendingEvents": pending }));
    }
    println!(
        "{} Recorded {}/{} ({} buffered)",
        "✓".green(),
        category,
        action,
        pending
    );
    Ok(())
}
