//! Offline mutations and their persisted queue

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::api::endpoints;
use crate::api::models::{Feedback, SurveyDraft};
use crate::error::{Error, Result};
use crate::gateway::CallOptions;
use crate::store::{PersistentStore, StoreExt, keys};

/// Remote operation a queued mutation replays as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MutationKind {
    SurveyResponse,
    SurveyCreation,
    Feedback,
    NewsletterSubscription,
}

impl std::fmt::Display for MutationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MutationKind::SurveyResponse => "survey response",
            MutationKind::SurveyCreation => "survey",
            MutationKind::Feedback => "feedback",
            MutationKind::NewsletterSubscription => "newsletter subscription",
        };
        f.write_str(name)
    }
}

/// A state-changing operation recorded locally, awaiting acknowledgement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineMutation {
    /// Unique id, also sent as the `Idempotency-Key` on every replay
    pub id: String,

    pub kind: MutationKind,

    pub payload: Value,

    pub created_at: DateTime<Utc>,

    /// Failed replays so far
    #[serde(default)]
    pub attempts: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// Set when the caller supplied the id; such mutations replace each other
    #[serde(default)]
    pub idempotent: bool,
}

impl OfflineMutation {
    pub fn new(kind: MutationKind, payload: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            payload,
            created_at: Utc::now(),
            attempts: 0,
            last_error: None,
            idempotent: false,
        }
    }

    pub fn survey_response(survey_id: &str, answers: Value) -> Self {
        Self::new(
            MutationKind::SurveyResponse,
            json!({ "surveyId": survey_id, "answers": answers }),
        )
    }

    pub fn survey_creation(draft: &SurveyDraft) -> Result<Self> {
        Ok(Self::new(MutationKind::SurveyCreation, serde_json::to_value(draft)?))
    }

    pub fn feedback(feedback: &Feedback) -> Result<Self> {
        Ok(Self::new(MutationKind::Feedback, serde_json::to_value(feedback)?))
    }

    pub fn newsletter(email: &str) -> Self {
        Self::new(
            MutationKind::NewsletterSubscription,
            json!({ "email": email.trim() }),
        )
    }

    /// Use a caller-chosen id so a repeated enqueue replaces the earlier one
    pub fn with_idempotency_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self.idempotent = true;
        self
    }

    /// Survey the mutation belongs to, for response submissions
    pub fn survey_id(&self) -> Option<&str> {
        match self.kind {
            MutationKind::SurveyResponse => self.payload.get("surveyId").and_then(Value::as_str),
            _ => None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
        now - self.created_at >= max_age
    }

    /// Endpoint and call options that replay this mutation
    pub fn request(&self) -> Result<(String, CallOptions)> {
        let (endpoint, body) = match self.kind {
            MutationKind::SurveyResponse => {
                let survey_id = self.survey_id().ok_or_else(|| {
                    Error::Validation(format!("Queued response {} has no survey id", self.id))
                })?;
                let answers = self.payload.get("answers").cloned().unwrap_or(Value::Null);
                crate::api::validate_answers(survey_id, &answers)?;
                (
                    endpoints::survey_responses(survey_id),
                    json!({ "answers": answers }),
                )
            }
            MutationKind::SurveyCreation => {
                let draft: SurveyDraft = serde_json::from_value(self.payload.clone())?;
                (endpoints::SURVEYS.to_string(), serde_json::to_value(draft)?)
            }
            MutationKind::Feedback => {
                let feedback: Feedback = serde_json::from_value(self.payload.clone())?;
                crate::api::validate_feedback(&feedback)?;
                (endpoints::FEEDBACK.to_string(), serde_json::to_value(feedback)?)
            }
            MutationKind::NewsletterSubscription => {
                let email = self
                    .payload
                    .get("email")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                crate::api::auth::validate_email(email)?;
                (endpoints::NEWSLETTER.to_string(), json!({ "email": email }))
            }
        };

        Ok((endpoint, CallOptions::post(body).idempotency_key(&self.id)))
    }
}

/// Persisted FIFO of offline mutations plus the dead-letter list.
///
/// Every operation re-reads the stored list so that concurrent enqueues made
/// while a sync run is replaying are never overwritten.
#[derive(Clone)]
pub struct MutationQueue {
    store: Arc<dyn PersistentStore>,
}

impl MutationQueue {
    pub fn new(store: Arc<dyn PersistentStore>) -> Self {
        Self { store }
    }

    /// Queued mutations in enqueue order
    pub fn load(&self) -> Result<Vec<OfflineMutation>> {
        Ok(self.store.get_json(keys::MUTATION_QUEUE)?.unwrap_or_default())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.load()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Append a mutation. An idempotent mutation replaces a queued one with
    /// the same id in place, keeping its position.
    pub fn enqueue(&self, mutation: OfflineMutation) -> Result<()> {
        let mut queue = self.load()?;
        match queue
            .iter_mut()
            .find(|queued| mutation.idempotent && queued.id == mutation.id)
        {
            Some(existing) => {
                log::debug!("Replacing queued {} {}", mutation.kind, mutation.id);
                *existing = mutation;
            }
            None => queue.push(mutation),
        }
        self.save(&queue)
    }

    /// Drop an acknowledged mutation. Returns whether it was still queued.
    pub fn remove(&self, id: &str) -> Result<bool> {
        let mut queue = self.load()?;
        let before = queue.len();
        queue.retain(|m| m.id != id);
        if queue.len() == before {
            return Ok(false);
        }
        self.save(&queue)?;
        Ok(true)
    }

    /// Persist the retry bookkeeping of a mutation still queued
    pub fn update(&self, mutation: &OfflineMutation) -> Result<()> {
        let mut queue = self.load()?;
        if let Some(existing) = queue.iter_mut().find(|m| m.id == mutation.id) {
            *existing = mutation.clone();
            self.save(&queue)?;
        }
        Ok(())
    }

    /// Move a mutation out of the queue into the dead-letter list
    pub fn dead_letter(&self, mutation: &OfflineMutation) -> Result<()> {
        let mut dead: Vec<OfflineMutation> = self.dead_letters()?;
        dead.push(mutation.clone());
        self.store.put_json(keys::DEAD_LETTER, &dead)?;
        self.remove(&mutation.id)?;
        Ok(())
    }

    pub fn dead_letters(&self) -> Result<Vec<OfflineMutation>> {
        Ok(self.store.get_json(keys::DEAD_LETTER)?.unwrap_or_default())
    }

    /// Discard every queued mutation. Returns how many were dropped.
    pub fn clear(&self) -> Result<usize> {
        let dropped = self.len()?;
        self.store.remove(keys::MUTATION_QUEUE)?;
        Ok(dropped)
    }

    pub fn clear_dead_letters(&self) -> Result<usize> {
        let dropped = self.dead_letters()?.len();
        self.store.remove(keys::DEAD_LETTER)?;
        Ok(dropped)
    }

    fn save(&self, queue: &[OfflineMutation]) -> Result<()> {
        if queue.is_empty() {
            self.store.remove(keys::MUTATION_QUEUE)?;
        } else {
            self.store.put_json(keys::MUTATION_QUEUE, queue)?;
        }
        Ok(())
    }
}
