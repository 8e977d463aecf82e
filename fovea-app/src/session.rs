//! Session loop: the consumer side of the push channel
//!
//! Drives the connection state machine (CONNECTING -> OPEN -> CLOSED),
//! feeding each snapshot through the reducer and into the router bridge
//! and store. The first snapshot hydrates: history is replaced (no new
//! back-stack entry) and the route's data load must resolve before the
//! session reports OPEN, so nothing renders against half-loaded route
//! data. Later snapshots push.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use fovea_common::events::StateUpdatePayload;
use fovea_common::state::ReadyState;
use fovea_common::{Error, Result};

use crate::reducer::{reduce, UrlOverride};
use crate::router::{dataset_slug, saved_view_name, Router};
use crate::store::SessionStore;
use crate::transport::{listen, ListenOptions, TransportEvent};

/// Injected side effects, no-ops by default
#[derive(Clone)]
pub struct SessionHooks {
    /// Invalidate cached query results before a refresh-flagged snapshot
    /// is applied
    pub refresh: Arc<dyn Fn() + Send + Sync>,
    /// Screenshot fallback for embedded/notebook deactivation
    pub screenshot: Arc<dyn Fn() + Send + Sync>,
}

impl Default for SessionHooks {
    fn default() -> Self {
        Self {
            refresh: Arc::new(|| {}),
            screenshot: Arc::new(|| {}),
        }
    }
}

/// Everything the session loop needs
pub struct SessionDeps {
    pub http: reqwest::Client,
    pub store: Arc<SessionStore>,
    pub router: Arc<Mutex<Router>>,
    pub base_url: String,
    pub subscription: Uuid,
    /// Stateless mode: the URL tracks the current location, not the
    /// session payload
    pub stateless: bool,
    pub hooks: SessionHooks,
}

/// One tab's session: a transport listener plus the consumer loop
pub struct Session {
    deps: SessionDeps,
}

impl Session {
    pub fn new(deps: SessionDeps) -> Self {
        Self { deps }
    }

    /// Run until cancellation, stream close, or failure
    ///
    /// Transport and load failures propagate out; the caller is the
    /// error boundary.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let (dataset, view) = {
            let router = self.deps.router.lock().await;
            let location = router.location();
            (
                dataset_slug(&location.path),
                saved_view_name(&location.path, &location.search),
            )
        };

        let options = ListenOptions {
            base_url: self.deps.base_url.clone(),
            subscription: self.deps.subscription,
            dataset,
            view,
        };

        let (tx, mut rx) = mpsc::channel(16);
        let listener = tokio::spawn(listen(
            self.deps.http.clone(),
            options,
            tx,
            cancel.clone(),
        ));

        let mut outcome = Ok(());
        while let Some(event) = rx.recv().await {
            match event {
                TransportEvent::StateUpdate(payload) => {
                    if let Err(err) = self.on_state_update(payload).await {
                        error!(%err, "state update failed");
                        cancel.cancel();
                        outcome = Err(err);
                        break;
                    }
                }
                TransportEvent::Deactivate => {
                    info!("deactivated by embedding host");
                    cancel.cancel();
                    (self.deps.hooks.screenshot)();
                }
                TransportEvent::Closed => {
                    self.on_closed().await;
                }
            }
        }
        drop(rx);

        let listened = match listener.await {
            Ok(result) => result,
            Err(join) => Err(Error::Transport(join.to_string())),
        };
        outcome.and(listened)
    }

    async fn on_state_update(&self, payload: StateUpdatePayload) -> Result<()> {
        let (search, url_override) = {
            let router = self.deps.router.lock().await;
            let location = router.location();
            let url_override = self.deps.stateless.then(|| UrlOverride {
                dataset: dataset_slug(&location.path),
                view: saved_view_name(&location.path, &location.search),
            });
            (location.search.clone(), url_override)
        };

        let reduced = reduce(&payload, &search, url_override.as_ref())?;

        if reduced.refresh {
            info!("refresh requested; invalidating cached queries");
            (self.deps.hooks.refresh)();
        }

        let store = &self.deps.store;
        if store.ready().await != ReadyState::Open {
            // hydrate: no new back-stack entry, and the load gate must
            // resolve before the session reports OPEN
            {
                let mut router = self.deps.router.lock().await;
                router.replace(reduced.target.clone());
            }
            store.apply_navigation(&reduced.target.nav).await;
            {
                let router = self.deps.router.lock().await;
                router.load().await?;
            }
            store.set_ready(ReadyState::Open).await;
            info!("session open");
        } else {
            let mut router = self.deps.router.lock().await;
            router.push(reduced.target.clone());
            drop(router);
            store.apply_navigation(&reduced.target.nav).await;
        }
        Ok(())
    }

    async fn on_closed(&self) {
        warn!("connection closed; falling back to setup view");
        let store = &self.deps.store;
        store.reset().await;
        store.set_ready(ReadyState::Closed).await;
    }
}
