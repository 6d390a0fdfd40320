use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::common::{default_true, AttachmentRef, Condition};

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct InfraNetwork {
    pub cidr: String,
    pub gateway: String,
    pub attachment: AttachmentRef,
    #[serde(default, rename = "upstreamResolvers", skip_serializing_if = "Option::is_none")]
    pub upstream_resolvers: Option<Vec<String>>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct ComponentConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(rename = "serverIP", skip_serializing_if = "Option::is_none")]
    pub server_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl ComponentConfig {
    pub fn disabled() -> Self {
        ComponentConfig {
            enabled: false,
            server_ip: None,
            image: None,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct Components {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dhcp: Option<ComponentConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<ComponentConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ComponentConfig>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct HostedClusterRef {
    pub name: String,
    pub namespace: String,
}

/// Optional apps-ingress block (§4.2); absence is equivalent to
/// `enabled=false` (§9, Open Question).
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct AppsIngressSpec {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(rename = "poolName")]
    pub pool_name: String,
    #[serde(rename = "ipRange")]
    pub ip_range: String,
    #[serde(rename = "l2AdvertisementName")]
    pub l2_advertisement_name: String,
    #[serde(rename = "hostedClusterRef")]
    pub hosted_cluster_ref: HostedClusterRef,
    #[serde(rename = "serviceName")]
    pub service_name: String,
    #[serde(rename = "serviceNamespace")]
    pub service_namespace: String,
    #[serde(rename = "httpPort", default = "default_http_port")]
    pub http_port: u16,
    #[serde(rename = "httpsPort", default = "default_https_port")]
    pub https_port: u16,
}

fn default_http_port() -> u16 {
    80
}

fn default_https_port() -> u16 {
    443
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[cfg_attr(test, derive(Default))]
#[kube(
    kind = "Infra",
    group = "hostedcluster.densityops.com",
    version = "v1alpha1",
    namespaced
)]
#[kube(status = "InfraStatus", shortname = "infra")]
#[serde(rename_all = "camelCase")]
pub struct InfraSpec {
    pub network: InfraNetwork,
    #[serde(default)]
    pub components: Components,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apps_ingress: Option<AppsIngressSpec>,
    pub cluster_name: String,
    pub base_domain: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_plane_namespace: Option<String>,
}

#[cfg(test)]
impl Default for InfraNetwork {
    fn default() -> Self {
        InfraNetwork {
            cidr: "192.168.100.0/24".to_owned(),
            gateway: "192.168.100.1".to_owned(),
            attachment: AttachmentRef {
                name: "secondary".to_owned(),
                namespace: None,
            },
            upstream_resolvers: None,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct AppsIngressStatus {
    pub phase: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(rename = "lastSyncTime", skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InfraStatus {
    #[serde(default)]
    pub dhcp_ready: bool,
    #[serde(default)]
    pub dns_ready: bool,
    #[serde(default)]
    pub proxy_ready: bool,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub observed_generation: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apps_ingress: Option<AppsIngressStatus>,
}

impl InfraStatus {
    pub fn ready_condition(&self) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == "Ready")
    }
}
