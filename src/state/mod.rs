pub mod abilities;
pub mod clock;
pub mod damage;
pub mod rewards;
pub mod session;
pub mod state_machine;
pub mod vote;

use std::{future::Future, sync::Arc, time::Duration, time::SystemTime};

use dashmap::DashMap;
use tokio::{
    sync::{RwLock, watch},
    task::JoinHandle,
};
use tracing::debug;

use crate::{
    config::AppConfig,
    dao::{archive_store::ArchiveStore, document_store::DocumentStore},
};

use self::clock::{Clock, SystemClock};

pub type SharedState = Arc<AppState>;

/// Central application state: the live document store, the archive backend
/// handle and the advisory timers scheduled by this process.
pub struct AppState {
    documents: DocumentStore,
    archive_store: RwLock<Option<Arc<dyn ArchiveStore>>>,
    degraded: watch::Sender<bool>,
    config: Arc<AppConfig>,
    clock: Arc<dyn Clock>,
    timers: DashMap<String, JoinHandle<()>>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until an archive backend is installed.
    pub fn new(config: AppConfig) -> SharedState {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Same as [`AppState::new`] with an explicit time source.
    pub fn with_clock(config: AppConfig, clock: Arc<dyn Clock>) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            documents: DocumentStore::new(config.store_max_attempts),
            archive_store: RwLock::new(None),
            degraded: degraded_tx,
            config: Arc::new(config),
            clock,
            timers: DashMap::new(),
        })
    }

    /// Live document store shared by every encounter.
    pub fn documents(&self) -> &DocumentStore {
        &self.documents
    }

    /// Runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Current time according to the injected clock.
    pub fn now(&self) -> SystemTime {
        self.clock.now()
    }

    /// Obtain a handle to the current archive store, if one is installed.
    pub async fn archive_store(&self) -> Option<Arc<dyn ArchiveStore>> {
        let guard = self.archive_store.read().await;
        guard.clone()
    }

    /// Install a new archive store and leave degraded mode.
    pub async fn set_archive_store(&self, store: Arc<dyn ArchiveStore>) {
        {
            let mut guard = self.archive_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false);
    }

    /// Remove the current archive store and enter degraded mode.
    pub async fn clear_archive_store(&self) {
        {
            let mut guard = self.archive_store.write().await;
            guard.take();
        }
        self.update_degraded(true);
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Flip the degraded flag without touching the installed backend.
    pub fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            let changed = *current != value;
            *current = value;
            changed
        });
    }

    /// Run `task` once `delay` elapsed. A timer already scheduled under `key`
    /// wins; scheduling the same key twice is a no-op.
    pub fn schedule_timer<F>(&self, key: String, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.timers.retain(|_, handle| !handle.is_finished());
        self.timers.entry(key.clone()).or_insert_with(|| {
            debug!(timer = %key, delay_ms = delay.as_millis() as u64, "scheduling advisory timer");
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                task.await;
            })
        });
    }

    /// Abort every timer whose key starts with `prefix`.
    pub fn cancel_timers(&self, prefix: &str) {
        self.timers.retain(|key, handle| {
            if key.starts_with(prefix) {
                handle.abort();
                false
            } else {
                true
            }
        });
    }
}
