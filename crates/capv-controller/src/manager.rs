use crate::{Action, ManagerConfig, Result, VirtualMachineGroupReconciler, WorkQueue};
use async_trait::async_trait;
use capv_client::{Client, ListParams, ResourceEvent};
use capv_core::labels::{CLUSTER_NAME_LABEL, WATCH_FILTER_LABEL};
use capv_core::{
    Cluster, MachineDeployment, ObjectKey, Resource, VSphereMachine, VirtualMachineGroup,
};
use futures_util::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Something that reconciles one cluster key
#[async_trait]
pub trait Reconcile: Send + Sync + 'static {
    async fn reconcile(&self, key: &ObjectKey) -> Result<Action>;
}

#[async_trait]
impl<C: Client> Reconcile for VirtualMachineGroupReconciler<C> {
    async fn reconcile(&self, key: &ObjectKey) -> Result<Action> {
        VirtualMachineGroupReconciler::reconcile(self, key).await
    }
}

/// Set once the manager's workers are running
#[derive(Debug, Clone, Default)]
pub struct Readiness(Arc<AtomicBool>);

impl Readiness {
    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn set_ready(&self, ready: bool) {
        self.0.store(ready, Ordering::SeqCst);
    }
}

/// Namespace scoping and watch-filter predicate
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub namespace: Option<String>,
    pub watch_filter: Option<String>,
}

impl EventFilter {
    pub fn from_config(config: &ManagerConfig) -> Self {
        Self {
            namespace: config.namespace.clone(),
            watch_filter: config.watch_filter.clone(),
        }
    }

    /// Whether an object in `namespace` with the given watch-filter label is handled
    pub fn accepts(&self, namespace: &str, watch_filter_label: Option<&str>) -> bool {
        if self.namespace.as_deref().is_some_and(|ns| ns != namespace) {
            return false;
        }
        match self.watch_filter.as_deref() {
            Some(value) => watch_filter_label == Some(value),
            None => true,
        }
    }

    fn list_params(&self) -> ListParams {
        let params = match &self.namespace {
            Some(ns) => ListParams::namespaced(ns.clone()),
            None => ListParams::all(),
        };
        match &self.watch_filter {
            Some(value) => params.with_label(WATCH_FILTER_LABEL, value.clone()),
            None => params,
        }
    }
}

/// Cluster key to reconcile for a store event, if any
pub fn cluster_key_for_event(event: &ResourceEvent, filter: &EventFilter) -> Option<ObjectKey> {
    let namespace = event.resource_key.namespace.as_str();
    if !filter.accepts(namespace, event.label(WATCH_FILTER_LABEL)) {
        return None;
    }

    let gvk = event.gvk();
    if *gvk == Cluster::type_gvk() {
        return Some(event.resource_key.object_key());
    }
    if *gvk == VirtualMachineGroup::type_gvk() {
        return event
            .label(CLUSTER_NAME_LABEL)
            .map(|_| event.resource_key.object_key());
    }
    if *gvk == MachineDeployment::type_gvk() || *gvk == VSphereMachine::type_gvk() {
        return event
            .label(CLUSTER_NAME_LABEL)
            .filter(|cluster| !cluster.is_empty())
            .map(|cluster| ObjectKey::new(namespace, cluster));
    }
    None
}

/// Drives the reconciler from store events and periodic resyncs
pub struct Manager<C: Client, R: Reconcile> {
    reconciler: Arc<R>,
    client: Arc<C>,
    events: broadcast::Receiver<ResourceEvent>,
    config: ManagerConfig,
    queue: Arc<WorkQueue<ObjectKey>>,
    readiness: Readiness,
}

impl<C: Client, R: Reconcile> Manager<C, R> {
    pub fn new(
        reconciler: Arc<R>,
        client: Arc<C>,
        events: broadcast::Receiver<ResourceEvent>,
        config: ManagerConfig,
    ) -> Self {
        let queue = Arc::new(WorkQueue::new(config.backoff_base, config.backoff_max));
        Self {
            reconciler,
            client,
            events,
            config,
            queue,
            readiness: Readiness::default(),
        }
    }

    /// Handle reporting whether the workers are running
    pub fn readiness(&self) -> Readiness {
        self.readiness.clone()
    }

    /// Run until `token` is cancelled, then drain the workers
    pub async fn run(self, token: CancellationToken) -> Result<()> {
        let Manager {
            reconciler,
            client,
            events,
            config,
            queue,
            readiness,
        } = self;
        let filter = EventFilter::from_config(&config);
        let workers_count = config.max_concurrent_reconciles.max(1);

        info!(
            "Starting VirtualMachineGroup manager (workers: {}, sync period: {:?})",
            workers_count, config.sync_period
        );

        let mut workers = JoinSet::new();
        for id in 0..workers_count {
            workers.spawn(worker(id, queue.clone(), reconciler.clone()));
        }
        readiness.set_ready(true);

        let mut events = BroadcastStream::new(events);
        let mut resync_interval = tokio::time::interval(config.sync_period);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("VirtualMachineGroup manager shutting down");
                    break;
                }
                _ = resync_interval.tick() => {
                    resync(client.as_ref(), &queue, &filter).await;
                }
                event = events.next() => {
                    match event {
                        Some(Ok(event)) => {
                            if let Some(key) = cluster_key_for_event(&event, &filter) {
                                debug!(
                                    "{:?} {} enqueues cluster {}",
                                    event.event_type, event.resource_key, key
                                );
                                queue.add(key).await;
                            }
                        }
                        Some(Err(BroadcastStreamRecvError::Lagged(n))) => {
                            warn!("Event bus lagged by {} events, resyncing all clusters", n);
                            resync(client.as_ref(), &queue, &filter).await;
                        }
                        None => {
                            info!("Event bus closed, stopping manager");
                            break;
                        }
                    }
                }
            }
        }

        readiness.set_ready(false);
        queue.shut_down().await;
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("Reconcile worker panicked: {}", e);
            }
        }
        info!("VirtualMachineGroup manager stopped");
        Ok(())
    }
}

/// Enqueue every cluster that passes the filter
async fn resync<C: Client>(client: &C, queue: &WorkQueue<ObjectKey>, filter: &EventFilter) {
    match client.list::<Cluster>(&filter.list_params()).await {
        Ok(clusters) => {
            debug!("Resync enqueues {} clusters", clusters.len());
            for cluster in clusters {
                queue.add(cluster.object_key()).await;
            }
        }
        Err(e) => error!("Failed to list clusters for resync: {}", e),
    }
}

async fn worker<R: Reconcile>(id: usize, queue: Arc<WorkQueue<ObjectKey>>, reconciler: Arc<R>) {
    debug!("Reconcile worker {} started", id);
    while let Some(key) = queue.get().await {
        match reconciler.reconcile(&key).await {
            Ok(Action::Done) => queue.forget(&key).await,
            Ok(Action::RequeueAfter(delay)) => {
                queue.forget(&key).await;
                queue.add_after(key.clone(), delay);
            }
            Err(e) => {
                error!("Failed to reconcile cluster {}: {}", key, e);
                queue.add_rate_limited(key.clone()).await;
            }
        }
        queue.done(&key).await;
    }
    debug!("Reconcile worker {} stopped", id);
}
