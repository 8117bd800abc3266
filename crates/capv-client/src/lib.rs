//! CAPV Client - Typed resource store
//!
//! This crate provides:
//! - The `Client` trait the controller talks to
//! - `ResourceStore`, a redb-backed implementation with optimistic locking,
//!   finalizer-aware deletion and owner-reference garbage collection
//! - A broadcast event bus publishing every mutation

pub mod client;
pub mod error;
pub mod event_bus;
pub mod params;
pub mod store;

pub use client::Client;
pub use error::{ClientError, Result};
pub use event_bus::{EventBusConfig, ResourceEvent, WatchEventType};
pub use params::ListParams;
pub use store::ResourceStore;
