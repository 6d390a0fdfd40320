//! Shared workload-shape builders reused by all three child reconcilers
//! (§4.3, §4.5, §4.6): a single-container `Deployment` pinned to the
//! secondary network by annotation, a `ClusterIP` `Service`, a
//! `ConfigMap`, RBAC primitives, and the cross-namespace `NetworkPolicy`
//! the proxy reconciler applies into the control-plane namespace (§4.1
//! "When ProxyServer.controlPlaneNamespace is non-empty..."). One
//! `Deployment` per workload rather than a `StatefulSet`, since these
//! workloads are stateless aside from the DHCP lease volume.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, EnvVar, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec,
    ResourceRequirements, Service, ServiceAccount, ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::api::networking::v1::{NetworkPolicy, NetworkPolicyIngressRule, NetworkPolicyPeer, NetworkPolicySpec};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, PolicyRule, Role, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::core::ObjectMeta;
use kube::{Resource, ResourceExt};

use crate::labels::{labels, owned_meta};

/// One container plus the volume it expects mounted, kept together so
/// callers don't have to thread a separate `Vec<Volume>` with matching
/// names by hand.
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub args: Vec<String>,
    pub ports: Vec<i32>,
    pub env: Vec<(String, String)>,
    pub volume_mounts: Vec<(String, String)>,
}

pub fn deployment<K>(
    owner: &K,
    name: &str,
    namespace: &str,
    component: &str,
    network_annotation: String,
    service_account: Option<&str>,
    containers: Vec<ContainerSpec>,
    config_volumes: Vec<(String, String)>,
    pvc_volumes: Vec<(String, String)>,
) -> Deployment
where
    K: Resource<DynamicType = ()>,
{
    let mut meta = owned_meta(owner, name, namespace, component);

    let mut pod_annotations = BTreeMap::new();
    pod_annotations.insert("k8s.v1.cni.cncf.io/networks".to_owned(), network_annotation);

    let mut volumes = Vec::new();
    for (vol_name, config_map_name) in &config_volumes {
        volumes.push(Volume {
            name: vol_name.clone(),
            config_map: Some(ConfigMapVolumeSource {
                name: config_map_name.clone(),
                ..Default::default()
            }),
            ..Default::default()
        });
    }
    for (vol_name, claim_name) in &pvc_volumes {
        volumes.push(Volume {
            name: vol_name.clone(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: claim_name.clone(),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    let k8s_containers: Vec<Container> = containers
        .into_iter()
        .map(|c| Container {
            name: c.name,
            image: Some(c.image),
            args: if c.args.is_empty() { None } else { Some(c.args) },
            ports: if c.ports.is_empty() {
                None
            } else {
                Some(
                    c.ports
                        .into_iter()
                        .map(|p| ContainerPort {
                            container_port: p,
                            ..Default::default()
                        })
                        .collect(),
                )
            },
            env: if c.env.is_empty() {
                None
            } else {
                Some(
                    c.env
                        .into_iter()
                        .map(|(name, value)| EnvVar {
                            name,
                            value: Some(value),
                            ..Default::default()
                        })
                        .collect(),
                )
            },
            volume_mounts: if c.volume_mounts.is_empty() {
                None
            } else {
                Some(
                    c.volume_mounts
                        .into_iter()
                        .map(|(name, mount_path)| VolumeMount {
                            name,
                            mount_path,
                            ..Default::default()
                        })
                        .collect(),
                )
            },
            resources: Some(ResourceRequirements::default()),
            ..Default::default()
        })
        .collect();

    let pod_labels = labels(component, &owner.name_any());

    let deployment = Deployment {
        metadata: {
            meta.labels = Some(pod_labels.clone());
            meta
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(pod_labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(pod_labels),
                    annotations: Some(pod_annotations),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: service_account.map(str::to_owned),
                    containers: k8s_containers,
                    volumes: if volumes.is_empty() { None } else { Some(volumes) },
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    };

    deployment
}

pub fn service<K>(owner: &K, name: &str, namespace: &str, component: &str, ports: Vec<(&str, i32, i32)>) -> Service
where
    K: Resource<DynamicType = ()>,
{
    let selector = labels(component, &owner.meta().name.clone().unwrap_or_default());
    Service {
        metadata: owned_meta(owner, name, namespace, component),
        spec: Some(ServiceSpec {
            selector: Some(selector),
            ports: Some(
                ports
                    .into_iter()
                    .map(|(port_name, port, target)| ServicePort {
                        name: Some(port_name.to_owned()),
                        port,
                        target_port: Some(IntOrString::Int(target)),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        status: None,
    }
}

pub fn config_map<K>(owner: &K, name: &str, namespace: &str, component: &str, key: &str, contents: String) -> ConfigMap
where
    K: Resource<DynamicType = ()>,
{
    let mut data = BTreeMap::new();
    data.insert(key.to_owned(), contents);
    ConfigMap {
        metadata: owned_meta(owner, name, namespace, component),
        data: Some(data),
        ..Default::default()
    }
}

pub fn service_account<K>(owner: &K, name: &str, namespace: &str, component: &str) -> ServiceAccount
where
    K: Resource<DynamicType = ()>,
{
    ServiceAccount {
        metadata: owned_meta(owner, name, namespace, component),
        ..Default::default()
    }
}

pub fn persistent_volume_claim<K>(
    owner: &K,
    name: &str,
    namespace: &str,
    component: &str,
    storage: &str,
) -> PersistentVolumeClaim
where
    K: Resource<DynamicType = ()>,
{
    let mut requests = BTreeMap::new();
    requests.insert("storage".to_owned(), Quantity(storage.to_owned()));
    PersistentVolumeClaim {
        metadata: owned_meta(owner, name, namespace, component),
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_owned()]),
            resources: Some(ResourceRequirements {
                requests: Some(requests),
                ..Default::default()
            }),
            ..Default::default()
        }),
        status: None,
    }
}

/// Namespaced role granting `get/list/watch` on `resource_name` in group
/// `api_group`, bound to `service_account` (§4.6: ProxyServer watch RBAC).
pub fn role_and_binding<K>(
    owner: &K,
    namespace: &str,
    component: &str,
    name_prefix: &str,
    api_group: &str,
    resources: Vec<String>,
    service_account: &str,
) -> (Role, RoleBinding)
where
    K: Resource<DynamicType = ()>,
{
    let role_name = format!("{name_prefix}-role");
    let binding_name = format!("{name_prefix}-rolebinding");

    let role = Role {
        metadata: owned_meta(owner, &role_name, namespace, component),
        rules: Some(vec![PolicyRule {
            api_groups: Some(vec![api_group.to_owned()]),
            resources: Some(resources),
            verbs: vec!["get".to_owned(), "list".to_owned(), "watch".to_owned()],
            ..Default::default()
        }]),
    };

    let binding = RoleBinding {
        metadata: owned_meta(owner, &binding_name, namespace, component),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_owned(),
            kind: "Role".to_owned(),
            name: role_name,
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_owned(),
            name: service_account.to_owned(),
            namespace: Some(namespace.to_owned()),
            ..Default::default()
        }]),
    };

    (role, binding)
}

/// Cluster-scoped role/binding (§4.3: tenant VM inventory RBAC; §4.6: an
/// OpenShift-like privileged-port binding). Cluster-scoped objects cannot
/// carry an owner reference to a namespaced object (§9), so these carry no
/// owner reference at all and are cleaned up via the parent's finalizer.
pub fn cluster_role_and_binding(
    name_prefix: &str,
    api_group: &str,
    resources: Vec<String>,
    service_account: &str,
    namespace: &str,
) -> (ClusterRole, ClusterRoleBinding) {
    let role_name = format!("{name_prefix}-clusterrole");
    let binding_name = format!("{name_prefix}-clusterrolebinding");

    let role = ClusterRole {
        metadata: ObjectMeta {
            name: Some(role_name.clone()),
            ..Default::default()
        },
        rules: Some(vec![PolicyRule {
            api_groups: Some(vec![api_group.to_owned()]),
            resources: Some(resources),
            verbs: vec!["get".to_owned(), "list".to_owned(), "watch".to_owned()],
            ..Default::default()
        }]),
        ..Default::default()
    };

    let binding = ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(binding_name),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_owned(),
            kind: "ClusterRole".to_owned(),
            name: role_name,
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_owned(),
            name: service_account.to_owned(),
            namespace: Some(namespace.to_owned()),
            ..Default::default()
        }]),
    };

    (role, binding)
}

/// Binds `service_account` to a privileged admission class (the OpenShift
/// `system:openshift:scc:privileged` shape generalized to a configurable
/// cluster-role name) so the DHCP/proxy engine can bind privileged ports
/// (§4.3, §4.6).
pub fn privileged_binding(name_prefix: &str, service_account: &str, namespace: &str) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(format!("{name_prefix}-privileged")),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_owned(),
            kind: "ClusterRole".to_owned(),
            name: "system:openshift:scc:privileged".to_owned(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_owned(),
            name: service_account.to_owned(),
            namespace: Some(namespace.to_owned()),
            ..Default::default()
        }]),
    }
}

/// The cross-namespace network policy applied into a ProxyServer's
/// `controlPlaneNamespace` (§4.1): select all pods, allow ingress from
/// namespaces labeled `network-policy-group=infrastructure`. Carries no
/// owner reference — it lives in a different namespace than its logical
/// parent, so its lifecycle is the explicit finalizer path (§9).
pub fn infrastructure_ingress_policy(name: &str, namespace: &str) -> NetworkPolicy {
    let mut ns_selector_labels = BTreeMap::new();
    ns_selector_labels.insert("network-policy-group".to_owned(), "infrastructure".to_owned());

    NetworkPolicy {
        metadata: ObjectMeta {
            name: Some(name.to_owned()),
            namespace: Some(namespace.to_owned()),
            ..Default::default()
        },
        spec: Some(NetworkPolicySpec {
            pod_selector: LabelSelector::default(),
            ingress: Some(vec![NetworkPolicyIngressRule {
                from: Some(vec![NetworkPolicyPeer {
                    namespace_selector: Some(LabelSelector {
                        match_labels: Some(ns_selector_labels),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
                ports: None,
            }]),
            policy_types: Some(vec!["Ingress".to_owned()]),
            ..Default::default()
        }),
    }
}
