//! Wire models for the survey service

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Published survey
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Survey {
    pub id: String,

    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub questions: Vec<Question>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closes_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,

    pub prompt: String,

    /// "single", "multiple", "text", "scale"
    #[serde(rename = "type", default)]
    pub kind: String,

    #[serde(default)]
    pub options: Vec<String>,

    #[serde(default)]
    pub required: bool,
}

/// A survey being authored, before the server assigns an id
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveyDraft {
    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub questions: Vec<QuestionDraft>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionDraft {
    pub prompt: String,

    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub options: Vec<String>,

    #[serde(default)]
    pub required: bool,
}

/// Server acknowledgement of a submitted response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseReceipt {
    /// Server-assigned response id, when the service returns one
    #[serde(default, alias = "id", skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
}

impl ResponseReceipt {
    /// Any 2xx reply is an acknowledgement; 204s and bodies without an id
    /// yield an empty receipt.
    pub fn from_reply(value: Value) -> Self {
        serde_json::from_value(value).unwrap_or_default()
    }
}

/// Aggregated results for one survey
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveyResults {
    pub survey_id: String,

    #[serde(default)]
    pub total_responses: u64,

    /// Per-question breakdown, passed through to the view layer untouched
    #[serde(default)]
    pub questions: Value,
}

/// Cached profile of the signed-in user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,

    pub email: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Body returned by login, register and refresh
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSession {
    pub token: String,

    #[serde(default)]
    pub refresh_token: Option<String>,

    #[serde(default)]
    pub user: Option<UserProfile>,
}

/// Free-form product feedback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}
