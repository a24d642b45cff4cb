pub mod flag_ledger;
pub mod hub;
pub mod session;
pub mod state_machine;

use std::sync::Arc;

use tokio::sync::{RwLock, watch};

use crate::{
    config::AppConfig, dao::session_store::SessionStore, error::ServiceError,
    services::image_search::ImageSearchProvider,
};

pub use self::hub::{FlagsChanged, SessionHub, SessionUpdate};

pub type SharedState = Arc<AppState>;

/// Buffered messages per session channel before slow receivers start lagging.
const HUB_CAPACITY: usize = 32;

/// Central application state storing the session store, change hub and configuration.
pub struct AppState {
    session_store: RwLock<Option<Arc<dyn SessionStore>>>,
    hub: SessionHub,
    config: AppConfig,
    degraded: watch::Sender<bool>,
    image_search: Option<Arc<dyn ImageSearchProvider>>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig) -> SharedState {
        Self::with_image_search(config, None)
    }

    /// Same as [`AppState::new`] with an image search provider attached.
    pub fn with_image_search(
        config: AppConfig,
        image_search: Option<Arc<dyn ImageSearchProvider>>,
    ) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            session_store: RwLock::new(None),
            hub: SessionHub::new(HUB_CAPACITY),
            config,
            degraded: degraded_tx,
            image_search,
        })
    }

    /// Obtain a handle to the current session store, if one is installed.
    pub async fn session_store(&self) -> Option<Arc<dyn SessionStore>> {
        let guard = self.session_store.read().await;
        guard.as_ref().cloned()
    }

    /// Current session store, or [`ServiceError::Degraded`] when none is installed.
    pub async fn require_session_store(&self) -> Result<Arc<dyn SessionStore>, ServiceError> {
        self.session_store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a new session store implementation and leave degraded mode.
    pub async fn install_session_store(&self, store: Arc<dyn SessionStore>) {
        {
            let mut guard = self.session_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false);
    }

    /// Remove the current session store and enter degraded mode.
    pub async fn clear_session_store(&self) {
        {
            let mut guard = self.session_store.write().await;
            guard.take();
        }
        self.update_degraded(true);
    }

    /// Current degraded flag.
    pub async fn is_degraded(&self) -> bool {
        let guard = self.session_store.read().await;
        guard.is_none()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Per-session change fan-out.
    pub fn hub(&self) -> &SessionHub {
        &self.hub
    }

    /// Immutable runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Configured image search provider, if any.
    pub fn image_search(&self) -> Option<Arc<dyn ImageSearchProvider>> {
        self.image_search.clone()
    }

    /// Broadcast the degraded flag when the value changes.
    fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }
}
