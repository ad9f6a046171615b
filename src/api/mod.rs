//! Typed remote operations for the survey service
//!
//! Thin wrappers over [`Gateway::call`]: each validates its input locally,
//! picks the endpoint and method, and decodes the response.

pub mod auth;
pub mod models;

use std::sync::Arc;

use log::{debug, warn};
use serde_json::{Value, json};

use crate::error::{ApiError, Error, Result};
use crate::gateway::{CallOptions, Gateway};
use crate::store::{PersistentStore, StoreExt, keys};

pub use models::{
    AuthSession, Feedback, Question, QuestionDraft, ResponseReceipt, Survey, SurveyDraft,
    SurveyResults, UserProfile,
};

/// Endpoint paths, relative to the configured base URL
pub mod endpoints {
    pub const ACTIVE_SURVEYS: &str = "/surveys/active";
    pub const SURVEYS: &str = "/surveys";
    pub const LOGIN: &str = "/auth/login";
    pub const REGISTER: &str = "/auth/register";
    pub const LOGOUT: &str = "/auth/logout";
    pub const VERIFY: &str = "/auth/verify";
    pub const REFRESH: &str = "/auth/refresh";
    pub const FEEDBACK: &str = "/feedback";
    pub const NEWSLETTER: &str = "/newsletter/subscribe";

    pub fn survey(id: &str) -> String {
        format!("/surveys/{}", id)
    }

    pub fn survey_responses(id: &str) -> String {
        format!("/surveys/{}/responses", id)
    }

    pub fn results(id: &str) -> String {
        format!("/results/{}", id)
    }
}

/// Survey service client
#[derive(Clone)]
pub struct Api {
    gateway: Gateway,
}

impl Api {
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    fn store(&self) -> &Arc<dyn PersistentStore> {
        self.gateway.store()
    }

    // ========================================================================
    // Surveys
    // ========================================================================

    pub async fn active_surveys(&self) -> Result<Vec<Survey>> {
        self.gateway
            .call_json(endpoints::ACTIVE_SURVEYS, CallOptions::get())
            .await
    }

    pub async fn survey(&self, id: &str) -> Result<Survey> {
        require("Survey id", id)?;
        self.gateway
            .call_json(&endpoints::survey(id), CallOptions::get())
            .await
    }

    pub async fn create_survey(&self, draft: &SurveyDraft) -> Result<Survey> {
        require("Survey title", &draft.title)?;
        if draft.questions.is_empty() {
            return Err(Error::Validation(
                "A survey needs at least one question".to_string(),
            ));
        }
        if let Some(q) = draft.questions.iter().find(|q| q.prompt.trim().is_empty()) {
            return Err(Error::Validation(format!(
                "Question of type '{}' has an empty prompt",
                q.kind
            )));
        }

        self.refresh_if_expiring().await;
        self.gateway
            .call_json(endpoints::SURVEYS, CallOptions::post(serde_json::to_value(draft)?))
            .await
    }

    // ========================================================================
    // Responses & results
    // ========================================================================

    /// Submit answers for a survey. `idempotency_key` lets the service drop
    /// replays of the same submission.
    pub async fn submit_response(
        &self,
        survey_id: &str,
        answers: &Value,
        idempotency_key: Option<&str>,
    ) -> Result<ResponseReceipt> {
        validate_answers(survey_id, answers)?;

        let mut options = CallOptions::post(json!({ "answers": answers }));
        if let Some(key) = idempotency_key {
            options = options.idempotency_key(key);
        }

        self.refresh_if_expiring().await;
        let reply = self
            .gateway
            .call(&endpoints::survey_responses(survey_id), options)
            .await?;
        Ok(ResponseReceipt::from_reply(reply))
    }

    pub async fn results(&self, survey_id: &str) -> Result<SurveyResults> {
        require("Survey id", survey_id)?;
        self.gateway
            .call_json(&endpoints::results(survey_id), CallOptions::get())
            .await
    }

    // ========================================================================
    // Authentication
    // ========================================================================

    pub async fn login(&self, email: &str, password: &str) -> Result<UserProfile> {
        auth::validate_login(email, password)?;
        let session: AuthSession = self
            .gateway
            .call_json(
                endpoints::LOGIN,
                CallOptions::post(json!({ "email": email.trim(), "password": password })),
            )
            .await?;
        self.persist_session(session)
    }

    pub async fn register(&self, name: &str, email: &str, password: &str) -> Result<UserProfile> {
        auth::validate_registration(name, email, password)?;
        let session: AuthSession = self
            .gateway
            .call_json(
                endpoints::REGISTER,
                CallOptions::post(json!({
                    "name": name.trim(),
                    "email": email.trim(),
                    "password": password,
                })),
            )
            .await?;
        self.persist_session(session)
    }

    /// Sign out remotely (best effort) and always forget local credentials
    pub async fn logout(&self) -> Result<()> {
        if let Err(e) = self
            .gateway
            .call(endpoints::LOGOUT, CallOptions::post(json!({})).attempts(1))
            .await
        {
            warn!("Remote logout failed, clearing local session anyway: {}", e);
        }
        self.clear_credentials()?;
        self.gateway.clear_cache();
        Ok(())
    }

    /// Check the held token with the service.
    ///
    /// Returns `None` (and forgets the token) when the service rejects it.
    pub async fn verify(&self) -> Result<Option<UserProfile>> {
        if self.store().get_string(keys::AUTH_TOKEN)?.is_none() {
            return Ok(None);
        }

        match self
            .gateway
            .call_json::<UserProfile>(endpoints::VERIFY, CallOptions::get().no_cache())
            .await
        {
            Ok(user) => {
                self.store().put_json(keys::USER_PROFILE, &user)?;
                Ok(Some(user))
            }
            Err(Error::Api(ref api)) if api.status() == Some(401) => {
                debug!("Stored token rejected, clearing credentials");
                self.clear_credentials()?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Exchange the refresh token for a new bearer token
    pub async fn refresh(&self) -> Result<()> {
        let refresh_token = self
            .store()
            .get_string(keys::REFRESH_TOKEN)?
            .ok_or_else(|| Error::Validation("No refresh token held; sign in again".to_string()))?;

        let session: AuthSession = self
            .gateway
            .call_json(
                endpoints::REFRESH,
                CallOptions::post(json!({ "refreshToken": refresh_token })),
            )
            .await?;
        self.persist_session(session)?;
        Ok(())
    }

    /// Refresh the bearer token if it is about to expire and we can
    pub async fn ensure_fresh_token(&self) -> Result<()> {
        let Some(token) = self.store().get_string(keys::AUTH_TOKEN)? else {
            return Ok(());
        };
        if auth::is_token_expired(&token) && self.store().get_string(keys::REFRESH_TOKEN)?.is_some()
        {
            debug!("Bearer token near expiry, refreshing");
            self.refresh().await?;
        }
        Ok(())
    }

    /// Refresh before a call that needs the bearer token. A failed refresh
    /// is only logged; the call itself then surfaces any auth fault.
    pub(crate) async fn refresh_if_expiring(&self) {
        if let Err(e) = self.ensure_fresh_token().await {
            warn!("Could not refresh bearer token: {}", e);
        }
    }

    fn persist_session(&self, session: AuthSession) -> Result<UserProfile> {
        let store = self.store();
        store.put(keys::AUTH_TOKEN, session.token.as_bytes())?;
        if let Some(ref refresh) = session.refresh_token {
            store.put(keys::REFRESH_TOKEN, refresh.as_bytes())?;
        }

        let user = match session.user {
            Some(user) => {
                store.put_json(keys::USER_PROFILE, &user)?;
                user
            }
            None => store.get_json(keys::USER_PROFILE)?.ok_or_else(|| {
                ApiError::InvalidResponse("Auth response carried no user profile".to_string())
            })?,
        };
        Ok(user)
    }

    fn clear_credentials(&self) -> Result<()> {
        let store = self.store();
        store.remove(keys::AUTH_TOKEN)?;
        store.remove(keys::REFRESH_TOKEN)?;
        store.remove(keys::USER_PROFILE)?;
        Ok(())
    }

    // ========================================================================
    // Feedback & newsletter
    // ========================================================================

    pub async fn send_feedback(&self, feedback: &Feedback) -> Result<Value> {
        validate_feedback(feedback)?;
        self.refresh_if_expiring().await;
        self.gateway
            .call(endpoints::FEEDBACK, CallOptions::post(serde_json::to_value(feedback)?))
            .await
    }

    pub async fn subscribe_newsletter(&self, email: &str) -> Result<Value> {
        auth::validate_email(email)?;
        self.gateway
            .call(
                endpoints::NEWSLETTER,
                CallOptions::post(json!({ "email": email.trim() })),
            )
            .await
    }
}

fn require(what: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(Error::Validation(format!("{} is required", what)))
    } else {
        Ok(())
    }
}

/// Answers must be a non-empty object keyed by question id
pub fn validate_answers(survey_id: &str, answers: &Value) -> Result<()> {
    require("Survey id", survey_id)?;
    match answers.as_object() {
        Some(map) if !map.is_empty() => Ok(()),
        _ => Err(Error::Validation(
            "Answers must be a non-empty object keyed by question id".to_string(),
        )),
    }
}

pub fn validate_feedback(feedback: &Feedback) -> Result<()> {
    require("Feedback message", &feedback.message)?;
    if let Some(rating) = feedback.rating
        && !(1..=5).contains(&rating)
    {
        return Err(Error::Validation(format!(
            "Rating must be between 1 and 5, got {}",
            rating
        )));
    }
    if let Some(ref email) = feedback.email {
        auth::validate_email(email)?;
    }
    Ok(())
}
