//! Analytics session bookkeeping
//!
//! A session is reused across restarts while it has seen activity within the
//! timeout; otherwise a fresh one is minted. Unauthenticated users get a
//! stable anonymous id that outlives sessions.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::host::IdentityProvider;
use crate::store::{PersistentStore, StoreExt, keys};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,

    /// Authenticated user id, or the anonymous id
    pub user_id: String,

    pub anonymous: bool,

    pub started_at: DateTime<Utc>,

    pub last_activity: DateTime<Utc>,

    #[serde(default)]
    pub page_view_count: u32,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>, timeout: chrono::Duration) -> bool {
        now - self.last_activity >= timeout
    }
}

/// Owns the current session and mirrors it to the store
pub struct SessionManager {
    store: Arc<dyn PersistentStore>,
    identity: Arc<dyn IdentityProvider>,
    timeout: chrono::Duration,
    current: Mutex<Session>,
}

impl SessionManager {
    /// Resume the persisted session if still live, otherwise start one
    pub fn establish(
        store: Arc<dyn PersistentStore>,
        identity: Arc<dyn IdentityProvider>,
        timeout: std::time::Duration,
    ) -> Self {
        let timeout = chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::minutes(30));
        let now = Utc::now();

        let persisted = match store.get_json::<Session>(keys::SESSION) {
            Ok(session) => session,
            Err(e) => {
                log::warn!("Discarding unreadable session record: {}", e);
                None
            }
        };

        let session = match persisted {
            Some(session) if !session.is_expired(now, timeout) => {
                log::debug!("Resuming session {}", session.session_id);
                session
            }
            _ => mint(store.as_ref(), identity.as_ref(), now),
        };

        let manager = Self {
            store,
            identity,
            timeout,
            current: Mutex::new(session),
        };
        manager.touch();
        manager
    }

    pub fn current(&self) -> Session {
        self.lock().clone()
    }

    /// Mark activity now, rotating the session if it lapsed
    pub fn touch(&self) -> Session {
        self.update(|_| {})
    }

    pub fn record_page_view(&self) -> Session {
        self.update(|session| session.page_view_count += 1)
    }

    fn update(&self, f: impl FnOnce(&mut Session)) -> Session {
        let now = Utc::now();
        let snapshot = {
            let mut session = self.lock();
            if session.is_expired(now, self.timeout) {
                *session = mint(self.store.as_ref(), self.identity.as_ref(), now);
            }

            // Sign-in after the session started upgrades the anonymous id
            if session.anonymous
                && let Some(user_id) = self.identity.current_user_id()
            {
                session.user_id = user_id;
                session.anonymous = false;
            }

            session.last_activity = now;
            f(&mut *session);
            session.clone()
        };

        if let Err(e) = self.store.put_json(keys::SESSION, &snapshot) {
            log::warn!("Failed to persist session: {}", e);
        }
        snapshot
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Session> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn mint(
    store: &dyn PersistentStore,
    identity: &dyn IdentityProvider,
    now: DateTime<Utc>,
) -> Session {
    let (user_id, anonymous) = match identity.current_user_id() {
        Some(id) => (id, false),
        None => (anonymous_id(store), true),
    };

    let session = Session {
        session_id: uuid::Uuid::new_v4().to_string(),
        user_id,
        anonymous,
        started_at: now,
        last_activity: now,
        page_view_count: 0,
    };
    log::debug!("Started session {}", session.session_id);
    session
}

fn anonymous_id(store: &dyn PersistentStore) -> String {
    match store.get_string(keys::ANONYMOUS_ID) {
        Ok(Some(id)) => id,
        other => {
            if let Err(e) = other {
                log::warn!("Failed to read anonymous id: {}", e);
            }
            let id = format!("anon-{}", uuid::Uuid::new_v4());
            if let Err(e) = store.put(keys::ANONYMOUS_ID, id.as_bytes()) {
                log::warn!("Failed to persist anonymous id: {}", e);
            }
            id
        }
    }
}
