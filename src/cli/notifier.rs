//! Console sink for user-facing notifications

use colored::Colorize;

use pollsync::host::{NoticeLevel, Notifier};

/// Writes notifications to stderr so stdout stays parseable
#[derive(Debug, Default)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, level: NoticeLevel, message: &str) {
        let symbol = match level {
            NoticeLevel::Success => "✓".green(),
            NoticeLevel::Info => "○".dimmed(),
            NoticeLevel::Warning => "⚠".yellow(),
            NoticeLevel::Error => "✗".red(),
        };
        eprintln!("{} {}", symbol, message);
    }
}
