//! Label and owner-reference conventions shared by every child reconciler:
//! an `app`/`<group>/name` label pair plus an explicit `OwnerReference`
//! back to the parent CR.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::core::ObjectMeta;
use kube::{Resource, ResourceExt};

pub const APP_LABEL: &str = "app.kubernetes.io/managed-by";
pub const APP_LABEL_VALUE: &str = "hcinfra-controller";
pub const COMPONENT_LABEL: &str = "hostedcluster.densityops.com/component";

pub fn labels(component: &str, parent_name: &str) -> BTreeMap<String, String> {
    let mut m = BTreeMap::new();
    m.insert(APP_LABEL.to_owned(), APP_LABEL_VALUE.to_owned());
    m.insert(COMPONENT_LABEL.to_owned(), component.to_owned());
    m.insert("hostedcluster.densityops.com/parent".to_owned(), parent_name.to_owned());
    m
}

/// Builds `ObjectMeta` for a same-namespace child of `owner`, owned by it
/// (§3 "Invariants": workloads/config objects of each child are owned by
/// the child; children themselves are owned by their parent Infra — this
/// helper is reused for both relationships by passing the right `owner`).
pub fn owned_meta<K>(owner: &K, name: &str, namespace: &str, component: &str) -> ObjectMeta
where
    K: Resource<DynamicType = ()>,
{
    ObjectMeta {
        name: Some(name.to_owned()),
        namespace: Some(namespace.to_owned()),
        labels: Some(labels(component, &owner.name_any())),
        owner_references: owner.controller_owner_ref(&()).map(|o| vec![o]),
        ..ObjectMeta::default()
    }
}

/// Same-namespace owner reference for `owner`, panicking only if the
/// resource is somehow missing both `uid` and `name` (never true for an
/// object freshly fetched from the apiserver).
pub fn owner_reference<K>(owner: &K) -> Option<OwnerReference>
where
    K: Resource<DynamicType = ()>,
{
    owner.controller_owner_ref(&())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_carry_component_and_parent() {
        let l = labels("dhcp", "my-infra");
        assert_eq!(l.get(COMPONENT_LABEL), Some(&"dhcp".to_owned()));
        assert_eq!(l.get("hostedcluster.densityops.com/parent"), Some(&"my-infra".to_owned()));
    }
}
