//! Submit survey answers

use colored::Colorize;
use serde_json::json;

use pollsync::error::Result;
use pollsync::sync::Submission;
use pollsync::telemetry::QueuedEvent;

use crate::cli::context::{CommandContext, print_json};
use crate::cli::parse_json_arg;

pub async fn run(ctx: &CommandContext, survey_id: &str, answers: &str) -> Result<()> {
    let answers = parse_json_arg("answers", answers)?;
    let submission = ctx
        .resilience
        .sync()
        .submit_response_or_queue(survey_id, answers)
        .await?;

    ctx.resilience
        .telemetry()
        .record(QueuedEvent::new("survey", "submit").with_label(survey_id))
        .await;

    match submission {
        Submission::Submitted(receipt) => {
            if ctx.is_json() {
                return print_json(&json!({ "status": "submitted", "receipt": receipt }));
            }
            match receipt.response_id {
                Some(id) => println!("{} Submitted (response {})", "✓".green(), id),
                None => println!("{} Submitted", "✓".green()),
            }
        }
        Submission::Queued { mutation_id } => {
            if ctx.is_json() {
                return print_json(&json!({ "status": "queued", "mutationId": mutation_id }));
            }
            println!("{} Queued for sync ({})", "⚠".yellow(), mutation_id.dimmed());
        }
    }
    Ok(())
}
