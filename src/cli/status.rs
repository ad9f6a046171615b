//! Status command implementation

use colored::Colorize;
use serde_json::{Value, json};

use pollsync::error::Result;
use pollsync::store::{PersistentStore, StoreExt, keys};

use crate::cli::context::{CommandContext, print_json};

pub fn run(ctx: &CommandContext) -> Result<()> {
    let r = &ctx.resilience;
    let sync = r.sync().status();
    let session = r.telemetry().session();
    let pending_events = r.telemetry().len();
    let snapshots = r.store().keys_with_prefix(keys::SNAPSHOT_PREFIX)?;
    let user: Option<Value> = r.store().get_json(keys::USER_PROFILE)?;

    if ctx.is_json() {
        return print_json(&json!({
            "apiBaseUrl": r.config().api_base_url,
            "sync": sync,
            "telemetry": {
                "enabled": r.config().telemetry.enabled,
                "pendingEvents": pending_events,
                "session": session,
            },
            "snapshots": snapshots,
            "user": user,
        }));
    }

    println!("{}\n", "Pollsync Status".bold());
    println!("API: {}", r.config().api_base_url.cyan());

    if sync.online {
        println!("{} Online", "✓".green());
    } else {
        println!("{} Offline (work is queued locally)", "⚠".yellow());
    }

    match user.as_ref().and_then(|u| u.get("email")).and_then(Value::as_str) {
        Some(email) => println!("{} Signed in as {}", "✓".green(), email),
        None => println!("{} Not signed in", "○".dimmed()),
    }

    println!();
    println!("Queued changes:        {}", sync.queued_mutations);
    if sync.dead_letters > 0 {
        println!(
            "Undeliverable changes: {}",
            sync.dead_letters.to_string().red()
        );
    }
    println!("Unconfirmed responses: {}", sync.unconfirmed_responses);
    println!("Buffered events:       {}", pending_events);
    println!("Snapshots:             {}", snapshots.len());
    match sync.last_sync {
        Some(at) => println!(
            "Last sync:             {}",
            at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M")
        ),
        None => println!("Last sync:             {}", "never".dimmed()),
    }

    println!();
    println!(
        "Session {} ({} page views)",
        session.session_id.dimmed(),
        session.page_view_count
    );
    Ok(())
}
