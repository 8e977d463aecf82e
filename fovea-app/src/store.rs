//! Shared session state
//!
//! One explicitly owned container per tab, passed by `Arc` to the few
//! components that read or write it. Uses RwLock for concurrent read
//! access with rare writes; writers are the session loop and setter
//! handlers only. Last write wins; no handler may assume its write is
//! the only one in flight.

use serde_json::Value;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use fovea_common::state::{Description, Navigation, ReadyState};

use crate::queries::Dataset;

/// Change notifications for store subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    /// Connection readiness changed
    Ready(ReadyState),
    /// The description (or colorscale/config) was replaced or patched
    State,
    /// Modal/detail overlay toggled
    Modal(bool),
}

/// Mutable session state behind the store's lock
#[derive(Debug, Clone)]
pub struct SessionState {
    pub ready: ReadyState,
    pub description: Description,
    pub colorscale: Option<Value>,
    pub config: Option<Value>,
    pub modal_open: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            ready: ReadyState::Connecting,
            description: Description::default(),
            colorscale: None,
            config: None,
            modal_open: false,
        }
    }
}

/// Tab-wide session store
pub struct SessionStore {
    state: RwLock<SessionState>,
    dataset: RwLock<Option<Dataset>>,
    update_tx: broadcast::Sender<SessionUpdate>,
}

impl SessionStore {
    pub fn new() -> Self {
        let (update_tx, _) = broadcast::channel(64);
        Self {
            state: RwLock::new(SessionState::default()),
            dataset: RwLock::new(None),
            update_tx,
        }
    }

    /// Subscribe to change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.update_tx.subscribe()
    }

    fn notify(&self, update: SessionUpdate) {
        // no receivers is fine
        let _ = self.update_tx.send(update);
    }

    /// Current connection readiness
    pub async fn ready(&self) -> ReadyState {
        self.state.read().await.ready
    }

    /// Set connection readiness
    pub async fn set_ready(&self, ready: ReadyState) {
        debug!(?ready, "ready state");
        self.state.write().await.ready = ready;
        self.notify(SessionUpdate::Ready(ready));
    }

    /// Snapshot of the current description
    pub async fn description(&self) -> Description {
        self.state.read().await.description.clone()
    }

    /// Full snapshot of the session state
    pub async fn snapshot(&self) -> SessionState {
        self.state.read().await.clone()
    }

    /// Replace the description wholesale from a navigation payload
    pub async fn apply_navigation(&self, nav: &Navigation) {
        {
            let mut state = self.state.write().await;
            state.description = nav.state.clone();
            state.colorscale = nav.colorscale.clone();
            state.config = nav.config.clone();
        }
        self.notify(SessionUpdate::State);
    }

    /// Patch the description in place (optimistic setter updates)
    pub async fn patch<F>(&self, patch: F)
    where
        F: FnOnce(&mut Description),
    {
        {
            let mut state = self.state.write().await;
            patch(&mut state.description);
        }
        self.notify(SessionUpdate::State);
    }

    /// Toggle the modal/detail overlay
    pub async fn set_modal(&self, open: bool) {
        self.state.write().await.modal_open = open;
        self.notify(SessionUpdate::Modal(open));
    }

    /// Drop any modal and reset the description to its defaults
    ///
    /// Called when the connection closes, so the reconnect/setup view
    /// never renders stale state.
    pub async fn reset(&self) {
        {
            let mut state = self.state.write().await;
            state.modal_open = false;
            state.description = Description::default();
            state.colorscale = None;
            state.config = None;
        }
        *self.dataset.write().await = None;
        self.notify(SessionUpdate::Modal(false));
        self.notify(SessionUpdate::State);
    }

    /// Reference data from the most recent dataset query
    pub async fn dataset(&self) -> Option<Dataset> {
        self.dataset.read().await.clone()
    }

    /// Store dataset reference data after a route load
    pub async fn set_dataset(&self, dataset: Option<Dataset>) {
        *self.dataset.write().await = dataset;
        self.notify(SessionUpdate::State);
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
