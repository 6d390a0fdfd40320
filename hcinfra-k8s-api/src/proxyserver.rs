use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::common::{
    default_configurator_port, default_listen_port, default_log_level, default_protocol,
    default_timeout_seconds, AttachmentRef, Condition, Protocol,
};

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProxyNetwork {
    pub server_ip: String,
    pub attachment: AttachmentRef,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Backend {
    pub name: String,
    pub hostname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternate_hostnames: Option<Vec<String>>,
    pub port: u16,
    pub target_service: String,
    pub target_port: u16,
    pub target_namespace: String,
    #[serde(default = "default_protocol")]
    pub protocol: Protocol,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u32,
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[cfg_attr(test, derive(Default))]
#[kube(
    kind = "ProxyServer",
    group = "hostedcluster.densityops.com",
    version = "v1alpha1",
    namespaced
)]
#[kube(status = "ProxyServerStatus", shortname = "proxysrv")]
#[serde(rename_all = "camelCase")]
pub struct ProxyServerSpec {
    pub network: ProxyNetwork,
    pub backends: Vec<Backend>,
    pub data_plane_image: String,
    pub control_plane_image: String,
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    #[serde(default = "default_configurator_port")]
    pub configurator_port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_namespace: Option<String>,
}

#[cfg(test)]
impl Default for ProxyNetwork {
    fn default() -> Self {
        ProxyNetwork {
            server_ip: "192.168.100.4".to_owned(),
            attachment: AttachmentRef {
                name: "secondary".to_owned(),
                namespace: None,
            },
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProxyServerStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_object_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_cluster_ip: Option<String>,
    #[serde(default)]
    pub backend_count: i32,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub observed_generation: i64,
}
