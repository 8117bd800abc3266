use std::time::Duration;

/// Configuration for the VirtualMachineGroup reconciler
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Delay before re-checking a cluster that is not ready for placement
    pub requeue_after: Duration,
    /// Attempts at writing the VirtualMachineGroup when the store reports a conflict
    pub conflict_retries: u32,
    /// Pause between conflict retries
    pub conflict_retry_delay: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            requeue_after: Duration::from_secs(10),
            conflict_retries: 5,
            conflict_retry_delay: Duration::from_millis(50),
        }
    }
}

/// Configuration for the controller manager
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Number of reconciles that may run at once (on distinct clusters)
    pub max_concurrent_reconciles: usize,
    /// Interval at which every Cluster is enqueued again
    pub sync_period: Duration,
    /// Only handle objects in this namespace
    pub namespace: Option<String>,
    /// Only handle objects labelled with this watch-filter value
    pub watch_filter: Option<String>,
    /// First retry delay after a failed reconcile
    pub backoff_base: Duration,
    /// Upper bound for the retry delay
    pub backoff_max: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_reconciles: 10,
            sync_period: Duration::from_secs(600),
            namespace: None,
            watch_filter: None,
            backoff_base: Duration::from_millis(5),
            backoff_max: Duration::from_secs(1000),
        }
    }
}
