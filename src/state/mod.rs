/// Domain events and the broadcast hub.
pub mod events;
/// Invite lifecycle data.
pub mod invite;
/// Room state machine and scoring.
pub mod room;
/// Persisted timer entries.
pub mod timer;

use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use tokio::sync::{RwLock, watch};

use crate::{
    config::AppConfig,
    dao::room_store::RoomStore,
    error::ServiceError,
    state::events::EventHub,
};

/// Shared handle to the application state, cheap to clone.
pub type SharedState = Arc<AppState>;

/// Broadcast capacity for the domain event hub.
const EVENT_HUB_CAPACITY: usize = 64;

/// Milliseconds elapsed since the Unix epoch for `time`.
pub fn unix_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Current wall clock in epoch milliseconds.
pub fn now_millis() -> u64 {
    unix_millis(SystemTime::now())
}

/// Central application state: immutable configuration, the store handle,
/// and the domain event hub.
pub struct AppState {
    config: AppConfig,
    store: RwLock<Option<Arc<dyn RoomStore>>>,
    events: EventHub,
    degraded: watch::Sender<bool>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a store is installed.
    pub fn new(config: AppConfig) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            config,
            store: RwLock::new(None),
            events: EventHub::new(EVENT_HUB_CAPACITY),
            degraded: degraded_tx,
        })
    }

    /// Immutable runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Hub publishing domain events to in-process subscribers.
    pub fn events(&self) -> &EventHub {
        &self.events
    }

    /// Obtain a handle to the store, failing when running degraded.
    pub async fn require_store(&self) -> Result<Arc<dyn RoomStore>, ServiceError> {
        let guard = self.store.read().await;
        guard.as_ref().cloned().ok_or(ServiceError::Degraded)
    }

    /// Install a store implementation and leave degraded mode.
    pub async fn install_store(&self, store: Arc<dyn RoomStore>) {
        {
            let mut guard = self.store.write().await;
            *guard = Some(store);
        }
        let _ = self.degraded.send(false);
    }

    /// Remove the current store and enter degraded mode.
    pub async fn clear_store(&self) {
        {
            let mut guard = self.store.write().await;
            guard.take();
        }
        let _ = self.degraded.send(true);
    }

    /// Whether the application currently runs without a store.
    pub async fn is_degraded(&self) -> bool {
        let guard = self.store.read().await;
        guard.is_none()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }
}
