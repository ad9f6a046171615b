//! Sync and flush commands

use colored::Colorize;
use serde_json::json;

use pollsync::error::Result;
use pollsync::sync::SyncRun;
use pollsync::telemetry::FlushOutcome;

use crate::cli::context::{CommandContext, print_json};

/// Run one sync pass and print its report
pub async fn run(ctx: &CommandContext) -> Result<()> {
    let run = ctx.resilience.sync().sync_all().await;

    if ctx.is_json() {
        let value = match run {
            SyncRun::Completed(ref report) => json!({ "status": "completed", "report": report }),
            SyncRun::AlreadyRunning => json!({ "status": "already_running" }),
            SyncRun::Offline => json!({ "status": "offline" }),
        };
        return print_json(&value);
    }

    match run {
        SyncRun::Completed(report) => {
            println!("{}", "Sync complete".bold());
            println!("  Replayed:            {}", report.replayed);
            println!("  Still queued:        {}", report.failed);
            if report.dead_lettered > 0 {
                println!("  Undeliverable:       {}", report.dead_lettered.to_string().red());
            }
            println!("  Snapshots refreshed: {}", report.snapshots_refreshed);
            println!("  Responses confirmed: {}", report.responses_confirmed);
            for error in &report.errors {
                println!("  {} {}", "⚠".yellow(), error);
            }
        }
        SyncRun::AlreadyRunning => println!("A sync is already running"),
        SyncRun::Offline => println!("{} Offline; nothing was synced", "⚠".yellow()),
    }
    Ok(())
}

/// Deliver buffered telemetry
pub async fn flush(ctx: &CommandContext) -> Result<()> {
    let outcome = ctx.resilience.telemetry().flush().await;

    if ctx.is_json() {
        let value = match outcome {
            FlushOutcome::Delivered(n) => json!({ "status": "delivered", "events": n }),
            FlushOutcome::Empty => json!({ "status": "empty" }),
            FlushOutcome::AlreadyRunning => json!({ "status": "already_running" }),
            FlushOutcome::Offline => json!({ "status": "offline" }),
            FlushOutcome::Requeued { events, ref error } => {
                json!({ "status": "requeued", "events": events, "error": error })
            }
            FlushOutcome::Disabled => json!({ "status": "disabled" }),
        };
        return print_json(&value);
    }

    match outcome {
        FlushOutcome::Delivered(n) => println!("{} Delivered {} events", "✓".green(), n),
        FlushOutcome::Empty => println!("No buffered events"),
        FlushOutcome::AlreadyRunning => println!("A flush is already running"),
        FlushOutcome::Offline => println!("{} Offline; events kept for later", "⚠".yellow()),
        FlushOutcome::Requeued { events, error } => println!(
            "{} Delivery failed, {} events kept: {}",
            "⚠".yellow(),
            events,
            error
        ),
        FlushOutcome::Disabled => println!("Telemetry is disabled"),
    }
    Ok(())
}
