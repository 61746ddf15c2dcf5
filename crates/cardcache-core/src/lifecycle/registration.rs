use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::ProxyError;
use crate::http::{Request, Response};
use crate::network::Fetcher;
use crate::proxy::OfflineProxy;

use super::{ClientControl, Event, Outcome, WaitUntil, WorkerState};

/// Open app instances and which worker controls them
#[derive(Default)]
struct Clients {
    open: AtomicUsize,
    controller: Mutex<Option<u64>>,
}

/// One proxy version as tracked by the host.
pub struct Worker {
    id: u64,
    proxy: OfflineProxy,
    state: watch::Sender<WorkerState>,
    control: Arc<WorkerControl>,
}

impl Worker {
    fn new(proxy: OfflineProxy, clients: Arc<Clients>, initial: WorkerState) -> Arc<Self> {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        let id = NEXT_ID.fetch_add(1, Ordering::SeqCst);
        let (state, watcher) = watch::channel(initial);

        Arc::new(Self {
            id,
            proxy,
            state,
            control: Arc::new(WorkerControl {
                worker_id: id,
                state: watcher,
                skip_waiting: AtomicBool::new(false),
                clients,
            }),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn version(&self) -> &str {
        self.proxy.version()
    }

    pub fn proxy(&self) -> &OfflineProxy {
        &self.proxy
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Watch state changes
    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    /// Deliver an event, refusing kinds the current state does not handle.
    pub fn dispatch(&self, event: Event) -> WaitUntil {
        let kind = event.kind();
        let state = self.state();
        if !state.accepts(kind) {
            return WaitUntil::rejected(kind, ProxyError::UnexpectedEvent { kind, state });
        }
        self.proxy.dispatch(event, self.control.clone())
    }

    fn transition(&self, to: WorkerState) -> Result<(), ProxyError> {
        let next = self.state().advance(to)?;
        self.state.send_replace(next);
        debug!(worker = self.id, version = self.version(), state = %next, "Worker state changed");
        Ok(())
    }

    fn retire(&self) {
        if let Err(e) = self.transition(WorkerState::Redundant) {
            debug!(worker = self.id, error = %e, "Worker could not be retired");
        }
    }
}

struct WorkerControl {
    worker_id: u64,
    state: watch::Receiver<WorkerState>,
    skip_waiting: AtomicBool,
    clients: Arc<Clients>,
}

impl WorkerControl {
    fn skipped_waiting(&self) -> bool {
        self.skip_waiting.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClientControl for WorkerControl {
    async fn skip_waiting(&self) {
        self.skip_waiting.store(true, Ordering::SeqCst);
    }

    async fn claim(&self) -> Result<(), ProxyError> {
        let state = *self.state.borrow();
        if !matches!(state, WorkerState::Activating | WorkerState::Active) {
            return Err(ProxyError::ClaimRejected(state));
        }
        *self.clients.controller.lock().await = Some(self.worker_id);
        Ok(())
    }
}

/// The host side of the proxy: drives workers through their lifecycle and
/// routes app requests to whichever one is active.
///
/// A newly installed version replaces the active one right away when it asked
/// to skip waiting, when nothing is active, or when no app instance is open.
/// Otherwise it waits until the last instance closes.
pub struct Registration {
    network: Arc<dyn Fetcher>,
    clients: Arc<Clients>,
    active: RwLock<Option<Arc<Worker>>>,
    waiting: RwLock<Option<Arc<Worker>>>,
    // Serializes install and activation
    lifecycle: Mutex<()>,
}

impl Registration {
    /// `network` serves requests while no worker is active
    pub fn new(network: Arc<dyn Fetcher>) -> Self {
        Self {
            network,
            clients: Arc::new(Clients::default()),
            active: RwLock::new(None),
            waiting: RwLock::new(None),
            lifecycle: Mutex::new(()),
        }
    }

    /// Install `proxy` as a new worker and activate it if allowed.
    ///
    /// Returns the state the new worker ended in. On install failure the
    /// previously active worker, if any, keeps serving.
    pub async fn register(&self, proxy: OfflineProxy) -> Result<WorkerState, ProxyError> {
        let _guard = self.lifecycle.lock().await;
        let worker = Worker::new(proxy, self.clients.clone(), WorkerState::Registered);
        info!(worker = worker.id(), version = worker.version(), "Installing worker");

        worker.transition(WorkerState::Installing)?;
        if let Err(e) = worker.dispatch(Event::Install).settle().await {
            worker.transition(WorkerState::InstallFailed)?;
            warn!(worker = worker.id(), version = worker.version(), error = %e, "Install failed");
            return Err(ProxyError::InstallFailed {
                version: worker.version().to_string(),
                source: Box::new(e),
            });
        }
        worker.transition(WorkerState::Installed)?;

        let has_active = self.active.read().await.is_some();
        let open = self.clients.open.load(Ordering::SeqCst);
        if worker.control.skipped_waiting() || !has_active || open == 0 {
            self.activate(worker).await?;
            return Ok(WorkerState::Active);
        }

        info!(worker = worker.id(), version = worker.version(), open, "Installed, waiting for clients to close");
        if let Some(previous) = self.waiting.write().await.replace(worker) {
            previous.retire();
        }
        Ok(WorkerState::Installed)
    }

    /// Adopt an already installed version as active without re-running
    /// install. Fails unless its namespace holds every manifest asset.
    pub async fn restore(&self, proxy: OfflineProxy) -> Result<(), ProxyError> {
        let _guard = self.lifecycle.lock().await;
        let version = proxy.version().to_string();
        if !proxy.storage().has(&version).await? {
            return Err(ProxyError::NotInstalled(version));
        }

        // A failed install leaves its namespace behind, possibly empty
        let cache = proxy.storage().open(&version).await?;
        for (path, request) in proxy.config().asset_requests()? {
            let cached = cache.match_request(&request).await?;
            if !cached.is_some_and(|response| response.ok()) {
                warn!(version = %version, asset = %path, "Manifest asset missing from cache, not restoring");
                return Err(ProxyError::NotInstalled(version));
            }
        }

        let worker = Worker::new(proxy, self.clients.clone(), WorkerState::Active);
        info!(worker = worker.id(), version = worker.version(), "Restored installed worker");
        *self.clients.controller.lock().await = Some(worker.id());
        if let Some(previous) = self.active.write().await.replace(worker) {
            previous.retire();
        }
        Ok(())
    }

    /// Activate the waiting worker now. Returns false if none is waiting.
    pub async fn activate_waiting(&self) -> Result<bool, ProxyError> {
        let _guard = self.lifecycle.lock().await;
        let waiting = self.waiting.write().await.take();
        match waiting {
            Some(worker) => {
                self.activate(worker).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Send an app request through the active worker, or straight to the
    /// network when nothing is active.
    pub async fn fetch(&self, request: Request) -> Result<Option<Response>, ProxyError> {
        let active = self.active.read().await.clone();
        match active {
            Some(worker) => self.fetch_via(worker, request).await,
            None => Ok(Some(self.network.fetch(request).await?)),
        }
    }

    /// Dispatch to `worker`, which was active when the request was routed.
    /// If it has been retired since, whichever worker replaced it answers.
    async fn fetch_via(&self, worker: Arc<Worker>, request: Request) -> Result<Option<Response>, ProxyError> {
        let outcome = match worker.dispatch(Event::Fetch(request.clone())).settle().await {
            Err(ProxyError::UnexpectedEvent { state: WorkerState::Redundant, .. }) => {
                debug!(worker = worker.id(), "Routed worker was retired, rerouting request");
                let current = self.active.read().await.clone();
                match current {
                    Some(current) if current.id() != worker.id() => {
                        current.dispatch(Event::Fetch(request)).settle().await?
                    }
                    _ => return Ok(Some(self.network.fetch(request).await?)),
                }
            }
            other => other?,
        };

        match outcome {
            Outcome::Responded(response) => Ok(response),
            other => {
                warn!(outcome = ?other, "Fetch settled with a non-response outcome");
                Ok(None)
            }
        }
    }

    /// Wait for the active worker's pending cache writes.
    pub async fn drain(&self) {
        let active = self.active.read().await.clone();
        if let Some(worker) = active {
            worker.proxy().drain().await;
        }
    }

    pub fn open_client(&self) {
        self.clients.open.fetch_add(1, Ordering::SeqCst);
    }

    /// Close an app instance. Closing the last one activates a waiting worker.
    pub async fn close_client(&self) -> Result<(), ProxyError> {
        let previous = self
            .clients
            .open
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        if previous <= 1 && self.waiting.read().await.is_some() {
            self.activate_waiting().await?;
        }
        Ok(())
    }

    pub fn open_clients(&self) -> usize {
        self.clients.open.load(Ordering::SeqCst)
    }

    /// Id of the worker that last claimed the open clients
    pub async fn controller(&self) -> Option<u64> {
        *self.clients.controller.lock().await
    }

    pub async fn active(&self) -> Option<Arc<Worker>> {
        self.active.read().await.clone()
    }

    pub async fn waiting(&self) -> Option<Arc<Worker>> {
        self.waiting.read().await.clone()
    }

    pub async fn active_version(&self) -> Option<String> {
        self.active
            .read()
            .await
            .as_ref()
            .map(|worker| worker.version().to_string())
    }

    async fn activate(&self, worker: Arc<Worker>) -> Result<(), ProxyError> {
        if let Some(waiting) = self.waiting.write().await.take() {
            if waiting.id() != worker.id() {
                waiting.retire();
            }
        }

        worker.transition(WorkerState::Activating)?;
        if let Err(e) = worker.dispatch(Event::Activate).settle().await {
            warn!(worker = worker.id(), version = worker.version(), error = %e, "Activate handler failed, activating anyway");
        }
        worker.transition(WorkerState::Active)?;

        info!(worker = worker.id(), version = worker.version(), "Worker active");
        if let Some(previous) = self.active.write().await.replace(worker) {
            previous.retire();
        }
        Ok(())
    }
}
