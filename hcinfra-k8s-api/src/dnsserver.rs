use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::common::{default_cache_ttl, default_dns_port, default_reload_interval, AttachmentRef, Condition};

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DnsNetwork {
    pub server_ip: String,
    pub external_proxy_ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_proxy_ip: Option<String>,
    pub secondary_cidr: String,
    pub attachment: AttachmentRef,
    #[serde(default = "default_dns_port")]
    pub port: u16,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct StaticEntry {
    pub hostname: String,
    pub ipv4: String,
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[cfg_attr(test, derive(Default))]
#[kube(
    kind = "DNSServer",
    group = "hostedcluster.densityops.com",
    version = "v1alpha1",
    namespaced
)]
#[kube(status = "DNSServerStatus", shortname = "dnssrv")]
#[serde(rename_all = "camelCase")]
pub struct DNSServerSpec {
    pub network: DnsNetwork,
    pub hosted_cluster_domain: String,
    #[serde(default)]
    pub static_entries: Vec<StaticEntry>,
    #[serde(default)]
    pub upstream_resolvers: Vec<String>,
    #[serde(default = "default_reload_interval")]
    pub reload_interval: String,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl: String,
}

#[cfg(test)]
impl Default for DnsNetwork {
    fn default() -> Self {
        DnsNetwork {
            server_ip: "192.168.100.3".to_owned(),
            external_proxy_ip: "192.168.100.4".to_owned(),
            internal_proxy_ip: None,
            secondary_cidr: "192.168.100.0/24".to_owned(),
            attachment: AttachmentRef {
                name: "secondary".to_owned(),
                namespace: None,
            },
            port: 53,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DNSServerStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_object_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_cluster_ip: Option<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub observed_generation: i64,
}
