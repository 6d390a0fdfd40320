use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::common::{default_lease_duration, AttachmentRef, Condition};

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DhcpNetwork {
    pub cidr: String,
    pub gateway: String,
    pub server_ip: String,
    #[serde(default)]
    pub upstream_resolvers: Vec<String>,
    pub attachment: AttachmentRef,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LeaseConfig {
    pub range_start: String,
    pub range_end: String,
    #[serde(default = "default_lease_duration")]
    pub lease_duration: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct DhcpOption {
    pub code: u16,
    pub value: String,
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[cfg_attr(test, derive(Default))]
#[kube(
    kind = "DHCPServer",
    group = "hostedcluster.densityops.com",
    version = "v1alpha1",
    namespaced
)]
#[kube(status = "DHCPServerStatus", shortname = "dhcpsrv")]
#[serde(rename_all = "camelCase")]
pub struct DHCPServerSpec {
    pub network: DhcpNetwork,
    pub lease: LeaseConfig,
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<DhcpOption>>,
}

#[cfg(test)]
impl Default for DhcpNetwork {
    fn default() -> Self {
        DhcpNetwork {
            cidr: "192.168.100.0/24".to_owned(),
            gateway: "192.168.100.1".to_owned(),
            server_ip: "192.168.100.2".to_owned(),
            upstream_resolvers: vec!["8.8.8.8".to_owned()],
            attachment: AttachmentRef {
                name: "secondary".to_owned(),
                namespace: None,
            },
        }
    }
}

#[cfg(test)]
impl Default for LeaseConfig {
    fn default() -> Self {
        LeaseConfig {
            range_start: "192.168.100.10".to_owned(),
            range_end: "192.168.100.200".to_owned(),
            lease_duration: "60s".to_owned(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DHCPServerStatus {
    #[serde(default)]
    pub active_leases: i32,
    #[serde(default)]
    pub total_leases: i32,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub observed_generation: i64,
}
