//! Interfaces the host environment provides to the core
//!
//! The core never listens for browser/OS events itself. The host reports
//! connectivity transitions through [`Connectivity`], exposes the signed-in
//! identity through [`IdentityProvider`] and receives user-facing messages via
//! a [`Notifier`].

use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::watch;

use crate::store::{PersistentStore, StoreExt, keys};

/// Connectivity signal: a boolean plus change notifications.
#[derive(Debug, Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Record a transition. Returns `true` if the state actually changed.
    pub fn set_online(&self, online: bool) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        })
    }

    /// Receiver that wakes on every transition
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Accessor for the currently authenticated identity
pub trait IdentityProvider: Send + Sync {
    fn current_user_id(&self) -> Option<String>;
}

/// Reads the cached user profile written at login
pub struct StoredIdentity {
    store: Arc<dyn PersistentStore>,
}

impl StoredIdentity {
    pub fn new(store: Arc<dyn PersistentStore>) -> Self {
        Self { store }
    }
}

impl IdentityProvider for StoredIdentity {
    fn current_user_id(&self) -> Option<String> {
        #[derive(Deserialize)]
        struct Profile {
            id: String,
        }

        match self.store.get_json::<Profile>(keys::USER_PROFILE) {
            Ok(profile) => profile.map(|p| p.id),
            Err(e) => {
                log::warn!("Failed to read cached user profile: {}", e);
                None
            }
        }
    }
}

/// Severity of a user-facing message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Info,
    Warning,
    Error,
}

/// User-facing notification sink (toasts, banners, console)
pub trait Notifier: Send + Sync {
    fn notify(&self, level: NoticeLevel, message: &str);
}

/// Routes notifications to the log when no UI is attached
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, level: NoticeLevel, message: &str) {
        match level {
            NoticeLevel::Error => log::error!("{}", message),
            NoticeLevel::Warning => log::warn!("{}", message),
            NoticeLevel::Success | NoticeLevel::Info => log::info!("{}", message),
        }
    }
}

/// Captures notifications for assertions
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    pub messages: std::sync::Mutex<Vec<(NoticeLevel, String)>>,
}

#[cfg(test)]
impl RecordingNotifier {
    pub fn levels(&self) -> Vec<NoticeLevel> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .map(|(level, _)| *level)
            .collect()
    }
}

#[cfg(test)]
impl Notifier for RecordingNotifier {
    fn notify(&self, level: NoticeLevel, message: &str) {
        self.messages
            .lock()
            .unwrap()
            .push((level, message.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_connectivity_transitions_notify_subscribers() {
        let connectivity = Connectivity::new(false);
        let mut rx = connectivity.subscribe();

        assert!(!connectivity.is_online());
        assert!(connectivity.set_online(true));
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());

        // Repeating the same state is not a transition
        assert!(!connectivity.set_online(true));
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_stored_identity_reads_profile() {
        let store: Arc<dyn PersistentStore> = Arc::new(MemoryStore::new());
        let identity = StoredIdentity::new(store.clone());
        assert!(identity.current_user_id().is_none());

        store
            .put_json(keys::USER_PROFILE, &serde_json::json!({"id": "u-1", "name": "Ada"}))
            .unwrap();
        assert_eq!(identity.current_user_id().as_deref(), Some("u-1"));
    }
}
