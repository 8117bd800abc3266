use crate::{ControllerError, Membership, Result, ZoneMap};
use capv_core::labels::CLUSTER_NAME_LABEL;
use capv_core::{
    BootOrderGroup, Cluster, GroupMember, OwnerReference, Resource, VirtualMachineGroup,
};
use std::collections::BTreeSet;

/// Names listed in full before the rest is summarised
const NAME_LIST_LIMIT: usize = 20;

/// Members added to and removed from the boot order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemberDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl MemberDiff {
    pub fn between<'a>(
        before: impl IntoIterator<Item = &'a str>,
        after: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let before: BTreeSet<&str> = before.into_iter().collect();
        let after: BTreeSet<&str> = after.into_iter().collect();
        Self {
            added: after.difference(&before).map(|s| s.to_string()).collect(),
            removed: before.difference(&after).map(|s| s.to_string()).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Desired VirtualMachineGroup together with its membership change
#[derive(Debug, Clone)]
pub struct Composition {
    pub group: VirtualMachineGroup,
    pub diff: MemberDiff,
}

/// Build the desired VirtualMachineGroup for `cluster`.
///
/// A fresh group lists every member. An existing group keeps its members
/// and admits new ones only once their MachineDeployment has a zone.
pub fn compose(
    cluster: &Cluster,
    membership: &Membership,
    zones: &ZoneMap,
    existing: Option<&VirtualMachineGroup>,
) -> Result<Composition> {
    let mut group = match existing {
        Some(existing) => existing.clone(),
        None => VirtualMachineGroup::new(cluster.namespace(), cluster.name()),
    };

    group.set_label(CLUSTER_NAME_LABEL, cluster.name());
    ensure_owner_ref(&mut group, owner_reference(cluster)?);

    let annotations = group
        .metadata
        .annotations
        .get_or_insert_with(Default::default);
    zones.apply_to_annotations(annotations);
    if annotations.is_empty() {
        group.metadata.annotations = None;
    }

    let current: BTreeSet<String> = existing
        .into_iter()
        .flat_map(|g| g.member_names())
        .map(str::to_string)
        .collect();

    let members: Vec<String> = membership
        .vm_to_md
        .iter()
        .filter(|(vm, md)| existing.is_none() || current.contains(*vm) || zones.contains(md))
        .map(|(vm, _)| vm.clone())
        .collect();

    let diff = MemberDiff::between(
        current.iter().map(String::as_str),
        members.iter().map(String::as_str),
    );

    group.spec.boot_order = vec![BootOrderGroup {
        members: members.into_iter().map(GroupMember::virtual_machine).collect(),
    }];

    Ok(Composition { group, diff })
}

fn owner_reference(cluster: &Cluster) -> Result<OwnerReference> {
    let uid = cluster.uid().filter(|uid| !uid.is_empty()).ok_or_else(|| {
        ControllerError::internal_error(format!(
            "Cluster {} has no uid to own its VirtualMachineGroup",
            cluster.object_key()
        ))
    })?;

    Ok(OwnerReference {
        api_version: Cluster::API_VERSION.to_string(),
        kind: Cluster::KIND.to_string(),
        name: cluster.name().to_string(),
        uid: uid.to_string(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    })
}

/// Replace a reference to the same owner, or append one
fn ensure_owner_ref(group: &mut VirtualMachineGroup, owner: OwnerReference) {
    let refs = group
        .metadata
        .owner_references
        .get_or_insert_with(Vec::new);

    match refs.iter_mut().find(|r| same_owner(r, &owner)) {
        Some(existing) => *existing = owner,
        None => refs.push(owner),
    }
}

fn same_owner(a: &OwnerReference, b: &OwnerReference) -> bool {
    api_group(&a.api_version) == api_group(&b.api_version) && a.kind == b.kind && a.name == b.name
}

fn api_group(api_version: &str) -> &str {
    api_version.rsplit_once('/').map(|(group, _)| group).unwrap_or("")
}

/// Sorted, comma-separated names; lists longer than 20 end in "... (N more)"
pub fn name_list(names: &[String]) -> String {
    let mut sorted: Vec<&str> = names.iter().map(String::as_str).collect();
    sorted.sort_unstable();

    if sorted.len() <= NAME_LIST_LIMIT {
        return sorted.join(", ");
    }
    format!(
        "{}, ... ({} more)",
        sorted[..NAME_LIST_LIMIT].join(", "),
        sorted.len() - NAME_LIST_LIMIT
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use capv_core::labels::{zone_annotation_key, MACHINE_DEPLOYMENT_NAME_LABEL};
    use capv_core::{MemberKind, VSphereMachine};
    use std::collections::BTreeMap;

    fn cluster() -> Cluster {
        let mut cluster = Cluster::new("ns1", "c1");
        cluster.metadata.uid = Some("uid-c1".to_string());
        cluster
    }

    fn membership(machines: &[(&str, &str)]) -> Membership {
        let machines = machines
            .iter()
            .map(|(name, md)| {
                let mut machine = VSphereMachine::new("ns1", name);
                machine.set_label(MACHINE_DEPLOYMENT_NAME_LABEL, *md);
                machine
            })
            .collect();
        Membership::from_machines(machines, &crate::NameGenerator::new()).unwrap()
    }

    fn zones(pairs: &[(&str, &str)]) -> ZoneMap {
        let mut zones = ZoneMap::new();
        for (md, zone) in pairs {
            zones.insert(md.to_string(), zone.to_string());
        }
        zones
    }

    fn boot_order(group: &VirtualMachineGroup) -> Vec<&str> {
        group.member_names().collect()
    }

    #[test]
    fn test_fresh_group_lists_every_member() {
        let composition = compose(
            &cluster(),
            &membership(&[("m3", "md2"), ("m1", "md1"), ("m2", "md1")]),
            &zones(&[("md2", "zone1")]),
            None,
        )
        .unwrap();
        let group = &composition.group;

        assert_eq!(group.name(), "c1");
        assert_eq!(group.namespace(), "ns1");
        assert_eq!(group.label(CLUSTER_NAME_LABEL), Some("c1"));
        assert_eq!(group.spec.boot_order.len(), 1);
        assert_eq!(boot_order(group), vec!["m1", "m2", "m3"]);
        assert!(group.spec.boot_order[0]
            .members
            .iter()
            .all(|m| m.kind == MemberKind::VirtualMachine));
        assert_eq!(
            group.metadata.annotations,
            Some(BTreeMap::from([(
                zone_annotation_key("md2"),
                "zone1".to_string()
            )]))
        );

        let owners = group.metadata.owner_references.as_ref().unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].kind, "Cluster");
        assert_eq!(owners[0].uid, "uid-c1");
        assert_eq!(owners[0].controller, Some(true));
        assert_eq!(owners[0].block_owner_deletion, Some(true));

        assert_eq!(composition.diff.added, vec!["m1", "m2", "m3"]);
        assert!(composition.diff.removed.is_empty());
    }

    #[test]
    fn test_existing_group_defers_unplaced_members() {
        let first = compose(
            &cluster(),
            &membership(&[("m1", "md1"), ("m3", "md2")]),
            &zones(&[("md2", "zone1")]),
            None,
        )
        .unwrap()
        .group;

        let next = compose(
            &cluster(),
            &membership(&[("m1", "md1"), ("m3", "md2"), ("m4", "md1"), ("m5", "md2")]),
            &zones(&[("md2", "zone1")]),
            Some(&first),
        )
        .unwrap();

        assert_eq!(boot_order(&next.group), vec!["m1", "m3", "m5"]);
        assert_eq!(next.diff.added, vec!["m5"]);
    }

    #[test]
    fn test_deleted_machines_leave_immediately() {
        let first = compose(
            &cluster(),
            &membership(&[("m1", "md1"), ("m2", "md1")]),
            &zones(&[]),
            None,
        )
        .unwrap()
        .group;

        let next = compose(&cluster(), &membership(&[("m2", "md1")]), &zones(&[]), Some(&first))
            .unwrap();
        assert_eq!(boot_order(&next.group), vec!["m2"]);
        assert_eq!(next.diff.removed, vec!["m1"]);
        assert!(next.diff.added.is_empty());
    }

    #[test]
    fn test_existing_metadata_is_preserved() {
        let mut existing = VirtualMachineGroup::new("ns1", "c1");
        existing.metadata.resource_version = Some("rv-1".to_string());
        existing.metadata.finalizers = Some(vec!["example.com/keep".to_string()]);
        existing.set_label("team", "a");
        existing.metadata.annotations = Some(BTreeMap::from([
            ("note".to_string(), "keep".to_string()),
            (zone_annotation_key("gone"), "zone9".to_string()),
        ]));
        existing.metadata.owner_references = Some(vec![
            OwnerReference {
                api_version: "cluster.x-k8s.io/v1beta1".to_string(),
                kind: "Cluster".to_string(),
                name: "c1".to_string(),
                uid: "old-uid".to_string(),
                ..Default::default()
            },
            OwnerReference {
                api_version: "example.com/v1".to_string(),
                kind: "Other".to_string(),
                name: "o1".to_string(),
                uid: "uid-o1".to_string(),
                ..Default::default()
            },
        ]);

        let group = compose(&cluster(), &membership(&[]), &zones(&[("md1", "zone1")]), Some(&existing))
            .unwrap()
            .group;

        assert_eq!(group.metadata.resource_version.as_deref(), Some("rv-1"));
        assert_eq!(group.metadata.finalizers, existing.metadata.finalizers);
        assert_eq!(group.label("team"), Some("a"));
        assert_eq!(group.label(CLUSTER_NAME_LABEL), Some("c1"));
        assert_eq!(group.annotation("note"), Some("keep"));
        assert_eq!(group.annotation(&zone_annotation_key("gone")), None);
        assert_eq!(group.annotation(&zone_annotation_key("md1")), Some("zone1"));

        let owners = group.metadata.owner_references.as_ref().unwrap();
        assert_eq!(owners.len(), 2);
        assert_eq!(owners[0].uid, "uid-c1");
        assert_eq!(owners[0].api_version, "cluster.x-k8s.io/v1beta2");
        assert_eq!(owners[1].name, "o1");
    }

    #[test]
    fn test_cluster_without_uid_fails() {
        let err = compose(&Cluster::new("ns1", "c1"), &membership(&[]), &zones(&[]), None)
            .unwrap_err();
        assert!(matches!(err, ControllerError::InternalError { .. }));
    }

    #[test]
    fn test_member_diff() {
        let diff = MemberDiff::between(["a", "b", "c"], ["b", "d", "a"]);
        assert_eq!(diff.added, vec!["d"]);
        assert_eq!(diff.removed, vec!["c"]);
        assert!(!diff.is_empty());
        assert!(MemberDiff::between(["a"], ["a"]).is_empty());
    }

    #[test]
    fn test_name_list_truncates() {
        assert_eq!(
            name_list(&["b".to_string(), "a".to_string()]),
            "a, b"
        );

        let names: Vec<String> = (0..25).map(|i| format!("m{:02}", i)).collect();
        let list = name_list(&names);
        assert!(list.starts_with("m00, m01"));
        assert!(list.contains("m19, ... (5 more)"));
        assert!(!list.contains("m20"));
    }
}
