//! Resilience context
//!
//! Builds the gateway, typed API, telemetry queue and sync engine once, wired
//! to a single store, connectivity signal and notifier, and hands them out by
//! reference. Hosts create one per process; tests create one per test.

use std::sync::Arc;

use log::{debug, info};
use tokio::task::JoinHandle;

use crate::api::Api;
use crate::config::Config;
use crate::error::{Result, StorageError};
use crate::gateway::{Gateway, HttpTransport, Transport};
use crate::host::{Connectivity, IdentityProvider, LogNotifier, Notifier, StoredIdentity};
use crate::store::{PersistentStore, SqliteStore};
use crate::sync::{SyncEngine, SyncRun};
use crate::telemetry::{FlushOutcome, TelemetryQueue};

/// Collaborators a host may supply; anything left unset gets a default.
pub struct ResilienceBuilder {
    config: Config,
    store: Option<Arc<dyn PersistentStore>>,
    transport: Option<Arc<dyn Transport>>,
    connectivity: Option<Connectivity>,
    notifier: Option<Arc<dyn Notifier>>,
    identity: Option<Arc<dyn IdentityProvider>>,
}

impl ResilienceBuilder {
    pub fn store(mut self, store: Arc<dyn PersistentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn connectivity(mut self, connectivity: Connectivity) -> Self {
        self.connectivity = Some(connectivity);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn identity(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Wire everything together and restore persisted telemetry
    pub fn build(self) -> Result<Resilience> {
        let config = self.config;

        let store = match self.store {
            Some(store) => store,
            None => {
                let path = config.resolved_store_path().ok_or(StorageError::NoDataDir)?;
                Arc::new(SqliteStore::open_at(&path)?) as Arc<dyn PersistentStore>
            }
        };
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new()?) as Arc<dyn Transport>,
        };
        let connectivity = self.connectivity.unwrap_or_default();
        let notifier = self
            .notifier
            .unwrap_or_else(|| Arc::new(LogNotifier) as Arc<dyn Notifier>);
        let identity = self
            .identity
            .unwrap_or_else(|| Arc::new(StoredIdentity::new(store.clone())) as Arc<dyn IdentityProvider>);

        let gateway = Gateway::new(&config, transport, store.clone());
        let api = Api::new(gateway.clone());
        let telemetry = Arc::new(TelemetryQueue::new(
            gateway.clone(),
            connectivity.clone(),
            identity,
            config.telemetry.clone(),
        ));
        let restored = telemetry.load_persisted();
        if restored > 0 {
            debug!("Restored {} telemetry events from the store", restored);
        }
        let sync = Arc::new(SyncEngine::new(
            gateway.clone(),
            connectivity.clone(),
            notifier.clone(),
            config.sync.clone(),
        ));

        Ok(Resilience {
            config,
            store,
            connectivity,
            notifier,
            gateway,
            api,
            telemetry,
            sync,
        })
    }
}

pub struct Resilience {
    config: Config,
    store: Arc<dyn PersistentStore>,
    connectivity: Connectivity,
    notifier: Arc<dyn Notifier>,
    gateway: Gateway,
    api: Api,
    telemetry: Arc<TelemetryQueue>,
    sync: Arc<SyncEngine>,
}

impl Resilience {
    pub fn builder(config: Config) -> ResilienceBuilder {
        ResilienceBuilder {
            config,
            store: None,
            transport: None,
            connectivity: None,
            notifier: None,
            identity: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn PersistentStore> {
        &self.store
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn api(&self) -> &Api {
        &self.api
    }

    pub fn telemetry(&self) -> &Arc<TelemetryQueue> {
        &self.telemetry
    }

    pub fn sync(&self) -> &Arc<SyncEngine> {
        &self.sync
    }

    /// Host hook for connectivity changes. Returns whether the state changed;
    /// a running [`BackgroundTasks`] reacts to the transition.
    pub fn set_online(&self, online: bool) -> bool {
        self.connectivity.set_online(online)
    }

    /// Flush telemetry, then run a sync. What the background loop does on
    /// every offline to online transition.
    pub async fn reconnected(&self) -> (FlushOutcome, SyncRun) {
        reconnect(&self.telemetry, &self.sync).await
    }

    /// Host hook for page exit / shutdown: best-effort telemetry beacon
    pub fn on_page_exit(&self) -> Option<JoinHandle<()>> {
        self.telemetry.page_exit()
    }

    /// Spawn the cache sweeper, telemetry flush timer, periodic sync and
    /// connectivity watcher.
    pub fn start(&self) -> BackgroundTasks {
        let handles = vec![
            self.gateway.spawn_cache_sweeper(),
            self.telemetry.clone().spawn_flush_timer(),
            self.sync.clone().spawn_periodic(),
            self.spawn_connectivity_watcher(),
        ];
        BackgroundTasks { handles }
    }

    fn spawn_connectivity_watcher(&self) -> JoinHandle<()> {
        let mut rx = self.connectivity.subscribe();
        let telemetry = self.telemetry.clone();
        let sync = self.sync.clone();

        tokio::spawn(async move {
            let mut was_online = *rx.borrow_and_update();
            while rx.changed().await.is_ok() {
                let online = *rx.borrow_and_update();
                if online && !was_online {
                    info!("Connectivity restored, flushing telemetry and syncing");
                    reconnect(&telemetry, &sync).await;
                } else if !online {
                    info!("Connectivity lost");
                }
                was_online = online;
            }
        })
    }
}

async fn reconnect(telemetry: &TelemetryQueue, sync: &SyncEngine) -> (FlushOutcome, SyncRun) {
    let flushed = telemetry.flush().await;
    let synced = sync.sync_all().await;
    (flushed, synced)
}

/// Handles of the background loops; aborted on [`BackgroundTasks::shutdown`]
/// or drop.
pub struct BackgroundTasks {
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn shutdown(self) {
        debug!("Stopping {} background tasks", self.handles.len());
    }
}

impl Drop for BackgroundTasks {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}
