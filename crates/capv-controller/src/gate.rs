use crate::{Membership, Topology};
use tracing::info;

/// Whether a VirtualMachineGroup may be created for the first time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Create,
    Wait { expected: i64, current: i64 },
}

impl GateDecision {
    /// Creation waits until every expected machine of the live
    /// MachineDeployments exists and none of them is being deleted.
    pub fn evaluate(topology: &Topology, membership: &Membership) -> Self {
        let expected = topology.expected_replicas;
        let current = membership.count_in(|md| topology.is_live(md));

        if expected == 0 {
            return GateDecision::Wait { expected, current };
        }

        if membership.has_pending_deletion_in(|md| topology.is_live(md)) {
            info!("Waiting for VSphereMachines required for the initial placement to be deleted");
            return GateDecision::Wait { expected, current };
        }

        if current != expected {
            info!(
                "Waiting for VSphereMachines required for the initial placement (expected {}, current {})",
                expected, current
            );
            return GateDecision::Wait { expected, current };
        }

        GateDecision::Create
    }

    /// Whether the decision allows creation
    pub fn is_create(&self) -> bool {
        matches!(self, GateDecision::Create)
    }
}
