pub use capv_core::{ResourceEvent, WatchEventType};

/// Configuration for the event bus
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Capacity of the broadcast channel
    pub capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self { capacity: 4096 }
    }
}
