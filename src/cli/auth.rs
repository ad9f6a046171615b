//! Sign-in commands

use colored::Colorize;
use serde_json::json;

use pollsync::error::Result;

use crate::cli::context::{CommandContext, print_json};

pub async fn login(ctx: &CommandContext, email: &str, password: &str) -> Result<()> {
    let user = ctx.resilience.api().login(email, password).await?;

    if ctx.is_json() {
        return print_json(&json!({ "user": user }));
    }
    println!("{} Signed in as {}", "✓".green(), user.email.bold());
    Ok(())
}

pub async fn logout(ctx: &CommandContext) -> Result<()> {
    ctx.resilience.api().logout().await?;

    if ctx.is_json() {
        return print_json(&json!({ "success": true }));
    }
    println!("Signed out");
    Ok(())
}
