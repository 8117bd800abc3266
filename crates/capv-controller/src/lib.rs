//! CAPV Controller - VirtualMachineGroup placement engine and controller runtime
//!
//! The engine is split along the data it derives:
//! - `naming`: machine name to VM name through an optional template
//! - `topology`: live MachineDeployments, replica totals and explicit zones
//! - `membership`: live worker machines and their VM names
//! - `placement`: the zone committed for each MachineDeployment
//! - `gate`: the one-time creation barrier
//! - `compose`: the desired VirtualMachineGroup
//! - `reconciler`: the per-cluster driver
//!
//! `queue` and `manager` run the reconciler against store events.

pub mod compose;
pub mod config;
pub mod error;
pub mod gate;
pub mod manager;
pub mod membership;
pub mod naming;
pub mod placement;
pub mod queue;
pub mod reconciler;
pub mod topology;

pub use compose::{compose, name_list, Composition, MemberDiff};
pub use config::{ControllerConfig, ManagerConfig};
pub use error::{ControllerError, Result};
pub use gate::GateDecision;
pub use manager::{cluster_key_for_event, EventFilter, Manager, Readiness, Reconcile};
pub use membership::Membership;
pub use naming::NameGenerator;
pub use placement::ZoneMap;
pub use queue::WorkQueue;
pub use reconciler::{Action, VirtualMachineGroupReconciler};
pub use topology::Topology;
