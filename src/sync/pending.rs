//! Locally recorded survey responses awaiting server confirmation
//!
//! A user's own submission is never deleted: records only move from
//! unconfirmed to confirmed (or rejected) in place.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::store::{PersistentStore, StoreExt, keys};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingResponse {
    pub survey_id: String,

    pub answers: Value,

    pub submitted_at: DateTime<Utc>,

    /// Sent as `Idempotency-Key` whenever this response is (re)submitted
    pub idempotency_key: String,

    #[serde(default)]
    pub confirmed: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,

    /// Set when the service refused the response outright
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected: Option<String>,
}

impl PendingResponse {
    /// Still worth submitting
    pub fn is_outstanding(&self) -> bool {
        !self.confirmed && self.rejected.is_none()
    }
}

#[derive(Clone)]
pub struct PendingResponses {
    store: Arc<dyn PersistentStore>,
}

impl PendingResponses {
    pub fn new(store: Arc<dyn PersistentStore>) -> Self {
        Self { store }
    }

    /// Record a local submission, replacing any earlier one for the survey
    pub fn record(
        &self,
        survey_id: &str,
        answers: &Value,
        idempotency_key: &str,
    ) -> Result<PendingResponse> {
        let pending = PendingResponse {
            survey_id: survey_id.to_string(),
            answers: answers.clone(),
            submitted_at: Utc::now(),
            idempotency_key: idempotency_key.to_string(),
            confirmed: false,
            confirmed_at: None,
            response_id: None,
            rejected: None,
        };
        self.store.put_json(&keys::response(survey_id), &pending)?;
        Ok(pending)
    }

    pub fn get(&self, survey_id: &str) -> Result<Option<PendingResponse>> {
        Ok(self.store.get_json(&keys::response(survey_id))?)
    }

    /// Every recorded response, in survey id order
    pub fn all(&self) -> Result<Vec<PendingResponse>> {
        let mut records = Vec::new();
        for key in self.store.keys_with_prefix(keys::RESPONSE_PREFIX)? {
            match self.store.get_json::<PendingResponse>(&key) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => log::warn!("Skipping unreadable response record {}: {}", key, e),
            }
        }
        Ok(records)
    }

    pub fn outstanding(&self) -> Result<Vec<PendingResponse>> {
        Ok(self.all()?.into_iter().filter(PendingResponse::is_outstanding).collect())
    }

    /// Mark the record confirmed. Returns false if there is no record.
    pub fn mark_confirmed(&self, survey_id: &str, response_id: Option<String>) -> Result<bool> {
        self.modify(survey_id, |record| {
            record.confirmed = true;
            record.confirmed_at = Some(Utc::now());
            record.response_id = response_id;
            record.rejected = None;
        })
    }

    pub fn mark_rejected(&self, survey_id: &str, reason: &str) -> Result<bool> {
        self.modify(survey_id, |record| record.rejected = Some(reason.to_string()))
    }

    fn modify(&self, survey_id: &str, f: impl FnOnce(&mut PendingResponse)) -> Result<bool> {
        let Some(mut record) = self.get(survey_id)? else {
            return Ok(false);
        };
        f(&mut record);
        self.store.put_json(&keys::response(survey_id), &record)?;
        Ok(true)
    }
}
