//! Offline mutation queue commands

use colored::Colorize;
use serde_json::json;

use pollsync::error::Result;
use pollsync::sync::OfflineMutation;

use crate::cli::context::{CommandContext, print_json};

pub fn list(ctx: &CommandContext) -> Result<()> {
    let mutations = ctx.resilience.sync().mutations();
    let queued = mutations.load()?;
    let dead = mutations.dead_letters()?;

    if ctx.is_json() {
        return print_json(&json!({ "queued": queued, "deadLetters": dead }));
    }

    if queued.is_empty() && dead.is_empty() {
        println!("No queued changes");
        return Ok(());
    }

    if !queued.is_empty() {
        println!("{}", "Queued".bold());
        for mutation in &queued {
            print_row(mutation);
        }
    }
    if !dead.is_empty() {
        println!("{}", "Undeliverable".bold().red());
        for mutation in &dead {
            print_row(mutation);
        }
    }
    Ok(())
}

fn print_row(mutation: &OfflineMutation) {
    let age = mutation
        .created_at
        .with_timezone(&chrono::Local)
        .format("%Y-%m-%d %H:%M");
    let mut line = format!("  {}  {:<24} {}", mutation.id.dimmed(), mutation.kind, age);
    if mutation.attempts > 0 {
        line.push_str(&format!("  ({} attempts)", mutation.attempts));
    }
    println!("{}", line);
    if let Some(ref error) = mutation.last_error {
        println!("      {}", error.dimmed());
    }
}

pub fn clear(ctx: &CommandContext, dead_letters: bool) -> Result<()> {
    let mutations = ctx.resilience.sync().mutations();
    let cleared = mutations.clear()?;
    let cleared_dead = if dead_letters {
        mutations.clear_dead_letters()?
    } else {
        0
    };

    if ctx.is_json() {
        return print_json(&json!({ "cleared": cleared, "clearedDeadLetters": cleared_dead }));
    }
    println!("Cleared {} queued changes", cleared);
    if dead_letters {
        println!("Cleared {} undeliverable changes", cleared_dead);
    }
    Ok(())
}
