//! Telemetry event model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event kinds understood by the analytics ingestion endpoint
pub mod kinds {
    pub const EVENT: &str = "event";
    pub const PAGE_VIEW: &str = "page_view";
    pub const ERROR: &str = "error";
    pub const TIMING: &str = "timing";
}

/// Actions whose events are delivered immediately
const CRITICAL_ACTIONS: [&str; 4] = ["submit", "submission", "complete", "completion"];

/// A buffered analytics event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedEvent {
    #[serde(rename = "type")]
    pub event_type: String,

    pub category: String,

    pub action: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    #[serde(default)]
    pub data: Value,

    pub timestamp: DateTime<Utc>,

    /// Stamped by the queue when the event is recorded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl QueuedEvent {
    pub fn new(category: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            event_type: kinds::EVENT.to_string(),
            category: category.into(),
            action: action.into(),
            label: None,
            data: Value::Null,
            timestamp: Utc::now(),
            session_id: None,
        }
    }

    pub fn page_view(page: impl Into<String>) -> Self {
        Self::new("navigation", "view")
            .with_type(kinds::PAGE_VIEW)
            .with_label(page)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new("error", "exception")
            .with_type(kinds::ERROR)
            .with_label(message)
    }

    pub fn with_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = event_type.into();
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Submission, completion and error events are flushed right away
    pub fn is_critical(&self) -> bool {
        if self.event_type == kinds::ERROR || self.category.eq_ignore_ascii_case("error") {
            return true;
        }
        let action = self.action.to_ascii_lowercase();
        CRITICAL_ACTIONS
            .iter()
            .any(|critical| action == *critical || action.ends_with(&format!("_{}", critical)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_critical_classification() {
        assert!(QueuedEvent::new("survey", "submit").is_critical());
        assert!(QueuedEvent::new("survey", "survey_completion").is_critical());
        assert!(QueuedEvent::new("survey", "Complete").is_critical());
        assert!(QueuedEvent::new("error", "network").is_critical());
        assert!(QueuedEvent::error("boom").is_critical());

        assert!(!QueuedEvent::new("survey", "start").is_critical());
        assert!(!QueuedEvent::new("ui", "submitted_tooltip_hover").is_critical());
        assert!(!QueuedEvent::page_view("/results").is_critical());
    }

    #[test]
    fn test_wire_format() {
        let event = QueuedEvent::new("survey", "start")
            .with_label("s-1")
            .with_data(json!({"source": "home"}));
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["type"], "event");
        assert_eq!(value["label"], "s-1");
        assert_eq!(value["data"]["source"], "home");
        assert!(value.get("sessionId").is_none());
    }
}
