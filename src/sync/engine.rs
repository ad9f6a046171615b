//! Offline synchronization engine
//!
//! A run replays queued mutations, refreshes mirrored snapshots and then
//! reconciles unconfirmed responses. The phases run one after another and a
//! failure in one never aborts the next.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::task::JoinHandle;

use super::mutation::{MutationKind, MutationQueue, OfflineMutation};
use super::pending::{PendingResponse, PendingResponses};
use crate::api::{Api, ResponseReceipt, endpoints, validate_answers};
use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::gateway::{CallOptions, Gateway};
use crate::host::{Connectivity, NoticeLevel, Notifier};
use crate::store::{PersistentStore, StoreExt, keys};

/// Summary of one sync run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Mutations acknowledged and removed from the queue
    pub replayed: usize,
    /// Mutations left queued for the next run
    pub failed: usize,
    pub dead_lettered: usize,
    pub snapshots_refreshed: usize,
    pub responses_confirmed: usize,
    /// One line per phase-level fault
    pub errors: Vec<String>,
}

/// What a call to [`SyncEngine::sync_all`] did
#[derive(Debug, Clone, PartialEq)]
pub enum SyncRun {
    Completed(SyncReport),
    /// A run was already in progress; nothing was done
    AlreadyRunning,
    /// Known offline; nothing was attempted
    Offline,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub in_progress: bool,
    pub online: bool,
    pub queued_mutations: usize,
    pub dead_letters: usize,
    pub unconfirmed_responses: usize,
    pub last_sync: Option<DateTime<Utc>>,
    pub last_report: Option<SyncReport>,
}

/// Result of [`SyncEngine::submit_response_or_queue`]
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    Submitted(ResponseReceipt),
    /// Saved locally; will be delivered by a later sync run
    Queued { mutation_id: String },
}

/// How replaying one item went
enum Replay {
    Delivered(Value),
    /// Worth trying again on a later run
    Transient(Error),
    /// Will fail the same way every time
    Permanent(Error),
}

impl From<Result<Value>> for Replay {
    fn from(result: Result<Value>) -> Self {
        match result {
            Ok(value) => Replay::Delivered(value),
            Err(e) if e.is_permanent() || matches!(e, Error::Json(_)) => Replay::Permanent(e),
            Err(e) => Replay::Transient(e),
        }
    }
}

/// Clears the in-progress flag when the run ends, however it ends
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct SyncEngine {
    gateway: Gateway,
    api: Api,
    store: Arc<dyn PersistentStore>,
    connectivity: Connectivity,
    notifier: Arc<dyn Notifier>,
    config: SyncConfig,
    mutations: MutationQueue,
    pending: PendingResponses,
    syncing: AtomicBool,
    last_report: Mutex<Option<SyncReport>>,
}

impl SyncEngine {
    pub fn new(
        gateway: Gateway,
        connectivity: Connectivity,
        notifier: Arc<dyn Notifier>,
        config: SyncConfig,
    ) -> Self {
        let store = gateway.store().clone();
        Self {
            mutations: MutationQueue::new(store.clone()),
            pending: PendingResponses::new(store.clone()),
            api: Api::new(gateway.clone()),
            gateway,
            store,
            connectivity,
            notifier,
            config,
            syncing: AtomicBool::new(false),
            last_report: Mutex::new(None),
        }
    }

    pub fn mutations(&self) -> &MutationQueue {
        &self.mutations
    }

    pub fn pending(&self) -> &PendingResponses {
        &self.pending
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::SeqCst)
    }

    /// Queue a mutation for the next run
    pub fn enqueue(&self, mutation: OfflineMutation) -> Result<()> {
        debug!("Queueing offline {} {}", mutation.kind, mutation.id);
        self.mutations.enqueue(mutation)
    }

    /// Run all three phases once.
    ///
    /// Re-entrant calls return [`SyncRun::AlreadyRunning`] immediately without
    /// scheduling a follow-up run.
    pub async fn sync_all(&self) -> SyncRun {
        if self
            .syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Sync already in progress");
            return SyncRun::AlreadyRunning;
        }
        let _guard = RunGuard(&self.syncing);

        if !self.connectivity.is_online() {
            debug!("Offline, skipping sync");
            return SyncRun::Offline;
        }

        let mut report = SyncReport {
            started_at: Some(Utc::now()),
            ..Default::default()
        };

        // Replays may have waited out the token's lifetime
        self.api.refresh_if_expiring().await;

        if let Err(e) = self.replay_mutations(&mut report).await {
            warn!("Mutation replay aborted: {}", e);
            report.errors.push(format!("mutations: {}", e));
        }
        self.refresh_snapshots(&mut report).await;
        if let Err(e) = self.reconcile_responses(&mut report).await {
            warn!("Response reconciliation aborted: {}", e);
            report.errors.push(format!("responses: {}", e));
        }

        let finished = Utc::now();
        report.finished_at = Some(finished);
        if let Err(e) = self.store.put_json(keys::LAST_SYNC, &finished) {
            warn!("Failed to record sync time: {}", e);
        }

        info!(
            "Sync finished: {} replayed, {} pending, {} dead-lettered, {} snapshots, {} responses confirmed",
            report.replayed,
            report.failed,
            report.dead_lettered,
            report.snapshots_refreshed,
            report.responses_confirmed
        );
        self.announce(&report);

        *lock(&self.last_report) = Some(report.clone());
        SyncRun::Completed(report)
    }

    pub fn status(&self) -> SyncStatus {
        let queued_mutations = self.mutations.len().unwrap_or_else(|e| {
            warn!("Failed to read mutation queue: {}", e);
            0
        });
        let dead_letters = self.mutations.dead_letters().map(|d| d.len()).unwrap_or(0);
        let unconfirmed_responses = self.pending.outstanding().map(|p| p.len()).unwrap_or(0);
        let last_sync = self.store.get_json(keys::LAST_SYNC).unwrap_or_else(|e| {
            warn!("Failed to read last sync time: {}", e);
            None
        });

        SyncStatus {
            in_progress: self.is_syncing(),
            online: self.connectivity.is_online(),
            queued_mutations,
            dead_letters,
            unconfirmed_responses,
            last_sync,
            last_report: lock(&self.last_report).clone(),
        }
    }

    /// Submit a response now, or keep it for a later run if that fails
    /// transiently. The response is always recorded locally first.
    pub async fn submit_response_or_queue(
        &self,
        survey_id: &str,
        answers: Value,
    ) -> Result<Submission> {
        validate_answers(survey_id, &answers)?;

        let mutation = OfflineMutation::survey_response(survey_id, answers);
        self.pending
            .record(survey_id, &mutation.payload["answers"], &mutation.id)?;

        if self.connectivity.is_online() {
            self.api.refresh_if_expiring().await;
            match Replay::from(self.dispatch(&mutation).await) {
                Replay::Delivered(value) => {
                    let receipt = self.confirm_response(survey_id, value)?;
                    self.notifier
                        .notify(NoticeLevel::Success, "Your response was submitted");
                    return Ok(Submission::Submitted(receipt));
                }
                Replay::Permanent(e) => {
                    self.pending.mark_rejected(survey_id, &e.to_string())?;
                    return Err(e);
                }
                Replay::Transient(e) => {
                    debug!("Submission failed transiently, queueing: {}", e);
                }
            }
        }

        let mutation_id = mutation.id.clone();
        self.enqueue(mutation)?;
        self.notifier.notify(
            NoticeLevel::Warning,
            "You're offline. Your response was saved and will be sent when you reconnect",
        );
        Ok(Submission::Queued { mutation_id })
    }

    /// Run on a fixed schedule, skipping ticks while offline
    pub fn spawn_periodic(self: Arc<Self>) -> JoinHandle<()> {
        let period = self.config.interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                if self.connectivity.is_online() {
                    self.sync_all().await;
                }
            }
        })
    }

    // ------------------------------------------------------------------------
    // Phase 1: replay offline mutations
    // ------------------------------------------------------------------------

    async fn replay_mutations(&self, report: &mut SyncReport) -> Result<()> {
        let queued = self.mutations.load()?;
        if queued.is_empty() {
            return Ok(());
        }
        debug!("Replaying {} offline mutations", queued.len());

        let now = Utc::now();
        let total = queued.len();
        for (index, mut mutation) in queued.into_iter().enumerate() {
            if mutation.is_expired(now, self.config.max_age()) {
                self.retire(&mutation, "expired before it could be delivered", report)?;
                continue;
            }

            match Replay::from(self.dispatch(&mutation).await) {
                Replay::Delivered(value) => {
                    self.mutations.remove(&mutation.id)?;
                    report.replayed += 1;
                    if mutation.kind == MutationKind::SurveyResponse
                        && let Some(survey_id) = mutation.survey_id()
                        && let Err(e) = self.confirm_response(survey_id, value)
                    {
                        warn!("Replayed response for {} but could not confirm it: {}", survey_id, e);
                    }
                }
                Replay::Permanent(e) => {
                    self.retire(&mutation, &e.to_string(), report)?;
                }
                Replay::Transient(e) => {
                    mutation.attempts += 1;
                    mutation.last_error = Some(e.to_string());
                    if mutation.attempts >= self.config.max_attempts {
                        self.retire(&mutation, &e.to_string(), report)?;
                    } else {
                        self.mutations.update(&mutation)?;
                        report.failed += 1;
                    }

                    // Later mutations would fail the same way; keep them in order
                    if let Error::Api(ref api) = e
                        && api.is_transport()
                    {
                        report.failed += total - index - 1;
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    async fn dispatch(&self, mutation: &OfflineMutation) -> Result<Value> {
        let (endpoint, options) = mutation.request()?;
        self.gateway.call(&endpoint, options).await
    }

    /// Move a mutation to the dead-letter list and tell the user
    fn retire(
        &self,
        mutation: &OfflineMutation,
        reason: &str,
        report: &mut SyncReport,
    ) -> Result<()> {
        warn!("Dead-lettering {} {}: {}", mutation.kind, mutation.id, reason);
        self.mutations.dead_letter(mutation)?;
        if let Some(survey_id) = mutation.survey_id() {
            self.pending.mark_rejected(survey_id, reason)?;
        }
        report.dead_lettered += 1;
        self.notifier.notify(
            NoticeLevel::Error,
            &format!("Your {} could not be delivered: {}", mutation.kind, reason),
        );
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Phase 2: refresh read-only snapshots
    // ------------------------------------------------------------------------

    async fn refresh_snapshots(&self, report: &mut SyncReport) {
        for snapshot in &self.config.snapshots {
            let fetched = self
                .gateway
                .call(&snapshot.endpoint, CallOptions::get().no_cache())
                .await
                .and_then(|value| {
                    self.store
                        .put_json(&keys::snapshot(&snapshot.key), &value)
                        .map_err(Error::from)
                });

            match fetched {
                Ok(()) => {
                    self.gateway.invalidate(&snapshot.endpoint);
                    report.snapshots_refreshed += 1;
                }
                Err(e) => {
                    warn!("Failed to refresh snapshot {}: {}", snapshot.key, e);
                    report.errors.push(format!("snapshot {}: {}", snapshot.key, e));
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Phase 3: reconcile pending responses
    // ------------------------------------------------------------------------

    async fn reconcile_responses(&self, report: &mut SyncReport) -> Result<()> {
        // Responses still backed by a queued mutation are phase 1's job
        let queued: Vec<String> = self
            .mutations
            .load()?
            .iter()
            .filter_map(|m| m.survey_id().map(str::to_string))
            .collect();

        for record in self.pending.outstanding()? {
            if queued.contains(&record.survey_id) {
                continue;
            }

            match Replay::from(self.resubmit(&record).await) {
                Replay::Delivered(value) => {
                    self.confirm_response(&record.survey_id, value)?;
                    report.responses_confirmed += 1;
                }
                Replay::Permanent(e) => {
                    self.pending.mark_rejected(&record.survey_id, &e.to_string())?;
                    self.notifier.notify(
                        NoticeLevel::Error,
                        &format!("Your response to survey {} was rejected: {}", record.survey_id, e),
                    );
                }
                Replay::Transient(e) => {
                    debug!("Response for {} still unconfirmed: {}", record.survey_id, e);
                    if let Error::Api(ref api) = e
                        && api.is_transport()
                    {
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    async fn resubmit(&self, record: &PendingResponse) -> Result<Value> {
        validate_answers(&record.survey_id, &record.answers)?;
        let options = CallOptions::post(json!({ "answers": record.answers }))
            .idempotency_key(&record.idempotency_key);
        self.gateway
            .call(&endpoints::survey_responses(&record.survey_id), options)
            .await
    }

    /// Any 2xx confirms the record, with or without a response id
    fn confirm_response(&self, survey_id: &str, value: Value) -> Result<ResponseReceipt> {
        let receipt = ResponseReceipt::from_reply(value);
        self.pending
            .mark_confirmed(survey_id, receipt.response_id.clone())?;
        Ok(receipt)
    }

    fn announce(&self, report: &SyncReport) {
        if report.replayed > 0 {
            self.notifier.notify(
                NoticeLevel::Success,
                &format!("Synced {} offline change(s)", report.replayed),
            );
        }
        if report.failed > 0 {
            self.notifier.notify(
                NoticeLevel::Warning,
                &format!("{} change(s) still waiting to sync; will retry", report.failed),
            );
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::gateway::mock::{MockReply, MockTransport};
    use crate::host::RecordingNotifier;
    use crate::store::MemoryStore;
    use std::time::Duration;

    struct Harness {
        engine: Arc<SyncEngine>,
        transport: Arc<MockTransport>,
        store: Arc<MemoryStore>,
        notifier: Arc<RecordingNotifier>,
        connectivity: Connectivity,
    }

    fn harness() -> Harness {
        let transport = Arc::new(MockTransport::new());
        let store = Arc::new(MemoryStore::new());
        let config = Config::default();
        let gateway = Gateway::new(&config, transport.clone(), store.clone());
        let connectivity = Connectivity::new(true);
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = Arc::new(SyncEngine::new(
            gateway,
            connectivity.clone(),
            notifier.clone(),
            config.sync,
        ));
        Harness {
            engine,
            transport,
            store,
            notifier,
            connectivity,
        }
    }

    fn completed(run: SyncRun) -> SyncReport {
        match run {
            SyncRun::Completed(report) => report,
            other => panic!("Expected completed run, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_mutation_fails_once_then_succeeds() {
        let h = harness();
        h.transport
            .reply("/surveys/s-1/responses", MockReply::offline())
            .reply("/surveys/s-1/responses", MockReply::offline())
            .reply("/surveys/s-1/responses", MockReply::offline())
            .reply("/surveys/s-1/responses", MockReply::ok(json!({"id": "r-1"})));
        let mutation = OfflineMutation::survey_response("s-1", json!({"q1": "yes"}));
        h.engine.enqueue(mutation.clone()).unwrap();

        let first = completed(h.engine.sync_all().await);
        assert_eq!(first.failed, 1);
        let queued = h.engine.mutations().load().unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].id, mutation.id);
        assert_eq!(queued[0].attempts, 1);

        let second = completed(h.engine.sync_all().await);
        assert_eq!(second.replayed, 1);
        assert!(h.engine.mutations().is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_replay_marks_pending_response_confirmed() {
        let h = harness();
        h.transport
            .reply("/surveys/s-1/responses", MockReply::ok(json!({"responseId": "r-9"})));
        let mutation = OfflineMutation::survey_response("s-1", json!({"q1": "yes"}));
        h.engine
            .pending()
            .record("s-1", &json!({"q1": "yes"}), &mutation.id)
            .unwrap();
        h.engine.enqueue(mutation).unwrap();

        let report = completed(h.engine.sync_all().await);
        assert_eq!(report.replayed, 1);
        // Confirmed by phase 1, so phase 3 does not resubmit
        assert_eq!(report.responses_confirmed, 0);
        assert_eq!(h.transport.count("/surveys/s-1/responses"), 1);

        let record = h.engine.pending().get("s-1").unwrap().unwrap();
        assert!(record.confirmed);
        assert_eq!(record.response_id.as_deref(), Some("r-9"));
    }

    #[tokio::test]
    async fn test_sync_refreshes_expiring_token_before_replay() {
        let h = harness();
        h.transport.reply(
            endpoints::REFRESH,
            MockReply::ok(json!({
                "token": "tok-2",
                "user": {"id": "u-1", "email": "a@b.co"}
            })),
        );
        let expiring = crate::api::auth::fake_jwt(Utc::now() + chrono::Duration::minutes(1));
        h.store.put(keys::AUTH_TOKEN, expiring.as_bytes()).unwrap();
        h.store.put(keys::REFRESH_TOKEN, b"ref-1").unwrap();
        h.engine.enqueue(OfflineMutation::newsletter("a@b.co")).unwrap();

        let report = completed(h.engine.sync_all().await);
        assert_eq!(report.replayed, 1);

        let requests = h.transport.requests();
        assert!(requests[0].url.ends_with(endpoints::REFRESH));
        assert!(requests[1].url.ends_with("/newsletter/subscribe"));
        assert_eq!(requests[1].header("Authorization"), Some("Bearer tok-2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_sync_is_no_op() {
        let h = harness();
        h.transport.set_delay(Duration::from_millis(100));
        h.engine.enqueue(OfflineMutation::newsletter("a@b.co")).unwrap();

        let (first, second) = tokio::join!(h.engine.sync_all(), h.engine.sync_all());

        assert!(matches!(first, SyncRun::Completed(_)));
        assert_eq!(second, SyncRun::AlreadyRunning);
        assert_eq!(h.transport.count("/newsletter/subscribe"), 1);
        assert!(!h.engine.is_syncing());
    }

    #[tokio::test]
    async fn test_offline_sync_does_nothing() {
        let h = harness();
        h.connectivity.set_online(false);
        h.engine.enqueue(OfflineMutation::newsletter("a@b.co")).unwrap();

        assert_eq!(h.engine.sync_all().await, SyncRun::Offline);
        assert!(h.transport.requests().is_empty());
        assert_eq!(h.engine.mutations().len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_permanent_rejection_dead_letters_and_notifies() {
        let h = harness();
        h.transport.reply(
            "/feedback",
            MockReply::Json(422, json!({"message": "Message too long"})),
        );
        let feedback = crate::api::Feedback {
            message: "Great app".to_string(),
            rating: Some(5),
            email: None,
        };
        h.engine
            .enqueue(OfflineMutation::feedback(&feedback).unwrap())
            .unwrap();
        h.engine.enqueue(OfflineMutation::newsletter("a@b.co")).unwrap();

        let report = completed(h.engine.sync_all().await);
        assert_eq!(report.dead_lettered, 1);
        assert_eq!(report.replayed, 1);
        assert!(h.engine.mutations().is_empty().unwrap());
        assert_eq!(h.engine.mutations().dead_letters().unwrap().len(), 1);
        assert!(h.notifier.levels().contains(&NoticeLevel::Error));
    }

    #[tokio::test]
    async fn test_server_error_counts_attempts_until_cap() {
        let h = harness();
        h.transport
            .reply("/newsletter/subscribe", MockReply::Json(503, json!({"message": "busy"})));
        let mut mutation = OfflineMutation::newsletter("a@b.co");
        mutation.attempts = 9;
        h.engine.enqueue(mutation).unwrap();

        let report = completed(h.engine.sync_all().await);
        assert_eq!(report.dead_lettered, 1);
        assert_eq!(report.failed, 0);
        let dead = h.engine.mutations().dead_letters().unwrap();
        assert_eq!(dead[0].attempts, 10);
        assert!(dead[0].last_error.as_deref().unwrap().contains("503"));
    }

    #[tokio::test]
    async fn test_expired_mutation_is_not_replayed() {
        let h = harness();
        let mut mutation = OfflineMutation::newsletter("a@b.co");
        mutation.created_at = Utc::now() - chrono::Duration::hours(200);
        h.engine.enqueue(mutation).unwrap();

        let report = completed(h.engine.sync_all().await);
        assert_eq!(report.dead_lettered, 1);
        assert_eq!(h.transport.count("/newsletter/subscribe"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_fault_stops_replay_in_order() {
        let h = harness();
        h.transport.reply("/newsletter/subscribe", MockReply::offline());
        h.engine.enqueue(OfflineMutation::newsletter("a@b.co")).unwrap();
        h.engine.enqueue(OfflineMutation::newsletter("c@d.co")).unwrap();

        let report = completed(h.engine.sync_all().await);
        assert_eq!(report.failed, 2);
        // One retry sequence for the first mutation only
        assert_eq!(h.transport.count("/newsletter/subscribe"), 3);

        let queued = h.engine.mutations().load().unwrap();
        assert_eq!(queued[0].attempts, 1);
        assert_eq!(queued[1].attempts, 0);
    }

    #[tokio::test]
    async fn test_phases_are_fault_isolated() {
        let h = harness();
        h.transport
            .reply("/surveys/active", MockReply::Json(500, json!({"message": "down"})))
            .reply("/surveys/s-2/responses", MockReply::ok(json!({"id": "r-2"})));
        h.engine
            .pending()
            .record("s-2", &json!({"q1": "no"}), "key-2")
            .unwrap();

        let report = completed(h.engine.sync_all().await);
        assert_eq!(report.snapshots_refreshed, 0);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.responses_confirmed, 1);

        let request = h
            .transport
            .requests()
            .into_iter()
            .find(|r| r.url.ends_with("/surveys/s-2/responses"))
            .unwrap();
        assert_eq!(request.header("Idempotency-Key"), Some("key-2"));
    }

    #[tokio::test]
    async fn test_snapshot_refresh_writes_store() {
        let h = harness();
        h.transport
            .reply("/surveys/active", MockReply::ok(json!([{"id": "s-1"}])));
        let report = completed(h.engine.sync_all().await);
        assert_eq!(report.snapshots_refreshed, 1);

        let snapshot: Value = h
            .store
            .get_json(&keys::snapshot("active_surveys"))
            .unwrap()
            .unwrap();
        assert_eq!(snapshot, json!([{"id": "s-1"}]));
        assert!(h.engine.status().last_sync.is_some());
    }

    #[tokio::test]
    async fn test_submit_online_confirms_immediately() {
        let h = harness();
        h.transport
            .reply("/surveys/s-1/responses", MockReply::ok(json!({"id": "r-1"})));

        let submission = h
            .engine
            .submit_response_or_queue("s-1", json!({"q1": "yes"}))
            .await
            .unwrap();

        assert!(matches!(
            submission,
            Submission::Submitted(ref r) if r.response_id.as_deref() == Some("r-1")
        ));
        assert!(h.engine.pending().get("s-1").unwrap().unwrap().confirmed);
        assert!(h.engine.mutations().is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_submit_accepts_no_content_reply() {
        let h = harness();
        h.transport
            .reply("/surveys/s-1/responses", MockReply::Text(204, String::new()));

        let submission = h
            .engine
            .submit_response_or_queue("s-1", json!({"q1": "yes"}))
            .await
            .unwrap();

        assert_eq!(submission, Submission::Submitted(ResponseReceipt::default()));
        let record = h.engine.pending().get("s-1").unwrap().unwrap();
        assert!(record.confirmed);
        assert!(record.response_id.is_none());
    }

    #[tokio::test]
    async fn test_id_less_acknowledgement_confirms_once() {
        let h = harness();
        h.transport.reply(
            "/surveys/s-1/responses",
            MockReply::Json(201, json!({"success": true})),
        );
        h.engine
            .pending()
            .record("s-1", &json!({"q1": "yes"}), "key-1")
            .unwrap();

        let first = completed(h.engine.sync_all().await);
        let second = completed(h.engine.sync_all().await);

        assert_eq!(first.responses_confirmed, 1);
        assert_eq!(second.responses_confirmed, 0);
        assert!(first.errors.iter().all(|e| !e.starts_with("responses")));
        assert_eq!(h.transport.count("/surveys/s-1/responses"), 1);
        assert!(h.engine.pending().get("s-1").unwrap().unwrap().confirmed);
    }

    #[tokio::test]
    async fn test_id_less_replay_is_not_resubmitted() {
        let h = harness();
        h.transport.reply(
            "/surveys/s-1/responses",
            MockReply::Json(201, json!({"success": true})),
        );
        let mutation = OfflineMutation::survey_response("s-1", json!({"q1": "yes"}));
        h.engine
            .pending()
            .record("s-1", &json!({"q1": "yes"}), &mutation.id)
            .unwrap();
        h.engine.enqueue(mutation).unwrap();

        let report = completed(h.engine.sync_all().await);
        assert_eq!(report.replayed, 1);
        assert_eq!(h.transport.count("/surveys/s-1/responses"), 1);
        assert!(h.engine.pending().get("s-1").unwrap().unwrap().confirmed);
    }

    #[tokio::test]
    async fn test_submit_offline_queues_and_warns() {
        let h = harness();
        h.connectivity.set_online(false);

        let submission = h
            .engine
            .submit_response_or_queue("s-1", json!({"q1": "yes"}))
            .await
            .unwrap();

        assert!(matches!(submission, Submission::Queued { .. }));
        assert!(h.transport.requests().is_empty());
        assert_eq!(h.engine.mutations().len().unwrap(), 1);
        assert!(!h.engine.pending().get("s-1").unwrap().unwrap().confirmed);
        assert_eq!(h.notifier.levels(), vec![NoticeLevel::Warning]);

        let status = h.engine.status();
        assert_eq!(status.queued_mutations, 1);
        assert_eq!(status.unconfirmed_responses, 1);
        assert!(!status.online);
    }

    #[tokio::test]
    async fn test_submit_rejects_empty_answers_locally() {
        let h = harness();
        let result = h.engine.submit_response_or_queue("s-1", json!({})).await;

        assert!(matches!(result, Err(Error::Validation(_))));
        assert!(h.transport.requests().is_empty());
        assert!(h.engine.pending().get("s-1").unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_sync_gated_by_connectivity() {
        let h = harness();
        h.connectivity.set_online(false);
        let timer = h.engine.clone().spawn_periodic();

        tokio::time::sleep(Duration::from_secs(301)).await;
        assert!(h.transport.requests().is_empty());

        h.connectivity.set_online(true);
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(h.transport.count("/surveys/active"), 1);
        timer.abort();
    }
}
