//! Pod networks controller.
//!
//! Watches pod updates, turns changes of the networks annotation into
//! add/remove requests, and works those requests off a rate-limited queue:
//! the plugin server attaches or detaches each interface and the pod's
//! network-status annotation is rewritten to match.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::join_all;
use log::{debug, error, info, warn};
use tokio::sync::broadcast;

use crate::delegate::DelegateClient;
use crate::error::Result;
use crate::events::{Event, EventRecorder};
use crate::queue::RateLimitingQueue;
use crate::runtime::ContainerRuntime;
use crate::store::{DefinitionStore, PodStore};
use crate::types::{NamespacedName, PodUpdate};

mod handler;
mod locks;
mod reconcile;
mod request;
mod status;

pub use request::{Direction, ReconcileRequest, RequestRef};

use locks::PodLocks;

/// Name the controller advertises itself under.
pub const ADVERTISED_NAME: &str = "pod-networks-updates";

/// Failed requests are re-queued while their retry count is at most this,
/// so a request is delivered at most `MAX_RETRIES + 2` times.
pub const MAX_RETRIES: u32 = 2;

/// Re-reads allowed after a conflicting status write.
pub const DEFAULT_CONFLICT_RETRIES: u32 = 5;

pub struct Controller {
    pods: Arc<dyn PodStore>,
    definitions: Arc<dyn DefinitionStore>,
    runtime: Arc<dyn ContainerRuntime>,
    delegate: Arc<dyn DelegateClient>,
    events: Arc<dyn EventRecorder>,
    queue: RateLimitingQueue<RequestRef>,
    locks: PodLocks,
    conflict_retries: u32,
}

impl Controller {
    pub fn new(
        pods: Arc<dyn PodStore>,
        definitions: Arc<dyn DefinitionStore>,
        runtime: Arc<dyn ContainerRuntime>,
        delegate: Arc<dyn DelegateClient>,
        events: Arc<dyn EventRecorder>,
    ) -> Self {
        Self {
            pods,
            definitions,
            runtime,
            delegate,
            events,
            queue: RateLimitingQueue::with_default_rate_limiter(),
            locks: PodLocks::default(),
            conflict_retries: DEFAULT_CONFLICT_RETRIES,
        }
    }

    pub fn with_conflict_retries(mut self, retries: u32) -> Self {
        self.conflict_retries = retries;
        self
    }

    pub fn queue(&self) -> &RateLimitingQueue<RequestRef> {
        &self.queue
    }

    pub fn enqueue(&self, request: ReconcileRequest) -> RequestRef {
        let request = RequestRef::new(request);
        self.queue.add(request.clone());
        request
    }

    /// Runs `workers` worker loops plus the pod watch until `shutdown`
    /// resolves, then lets the workers drain the queue.
    pub async fn run<S>(self: Arc<Self>, workers: usize, shutdown: S)
    where
        S: Future<Output = ()>,
    {
        info!("starting {} with {} worker(s)", ADVERTISED_NAME, workers);
        let updates = self.pods.subscribe();
        let watch = tokio::spawn(Arc::clone(&self).watch(updates));

        let handles: Vec<_> = (0..workers)
            .map(|id| tokio::spawn(Arc::clone(&self).worker(id)))
            .collect();

        shutdown.await;
        info!("shutting down {}", ADVERTISED_NAME);
        watch.abort();
        self.queue.shut_down();

        for result in join_all(handles).await {
            if let Err(e) = result {
                error!("worker terminated abnormally: {}", e);
            }
        }
        info!("{} stopped", ADVERTISED_NAME);
    }

    async fn watch(self: Arc<Self>, mut updates: broadcast::Receiver<PodUpdate>) {
        loop {
            match updates.recv().await {
                Ok(update) => self.handle_pod_update(&update.old, &update.new).await,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("pod watch lagged, {} update(s) missed", missed);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("pod update stream closed");
                    return;
                }
            }
        }
    }

    async fn worker(self: Arc<Self>, id: usize) {
        debug!("worker {} started", id);
        while self.process_next_work_item().await {}
        debug!("worker {} stopped", id);
    }

    /// Processes one queued request. Returns `false` once the queue has
    /// shut down and drained.
    pub async fn process_next_work_item(&self) -> bool {
        let Some(request) = self.queue.get().await else {
            return false;
        };
        info!("extracted request [{}] from the queue", request);

        let result = self.reconcile(&request).await;
        self.handle_result(result, &request);
        self.queue.done(&request);
        true
    }

    fn handle_result(&self, result: Result<()>, request: &RequestRef) {
        let err = match result {
            Ok(()) => {
                info!("successfully processed request [{}]", request);
                self.queue.forget(request);
                return;
            }
            Err(err) => err,
        };

        let retries = self.queue.num_requeues(request);
        if retries <= MAX_RETRIES {
            error!("re-queued request [{}]: {}", request, err);
            self.queue.add_rate_limited(request.clone());
            return;
        }

        error!(
            "dropping request [{}] after {} retries: {}",
            request, retries, err
        );
        self.queue.forget(request);
    }

    async fn event(&self, pod: &NamespacedName, reason: &str, message: String) {
        self.events
            .record(Event {
                object: pod.clone(),
                reason: reason.to_string(),
                message,
            })
            .await;
    }
}
