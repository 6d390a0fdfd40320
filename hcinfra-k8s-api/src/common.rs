use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A reference to a network-attachment-definition-shaped resource (§3
/// "Attachment"). Namespace defaults to the referencing object's own
/// namespace when absent (§4.1 "Derivation rules").
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
pub struct AttachmentRef {
    pub name: String,
    pub namespace: Option<String>,
}

/// The standard `metav1.Condition` shape, reused by every status type in
/// this API group.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema, Default)]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    pub reason: String,
    pub message: String,
    #[serde(rename = "lastTransitionTime", skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
    #[serde(rename = "observedGeneration", skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    pub fn ready(status: bool, reason: &str, message: &str, observed_generation: i64) -> Self {
        Condition {
            type_: "Ready".to_owned(),
            status: if status { "True" } else { "False" }.to_owned(),
            reason: reason.to_owned(),
            message: message.to_owned(),
            last_transition_time: None,
            observed_generation: Some(observed_generation),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "TCP"),
            Protocol::Udp => write!(f, "UDP"),
        }
    }
}

pub fn default_reload_interval() -> String {
    "30s".to_owned()
}

pub fn default_cache_ttl() -> String {
    "60s".to_owned()
}

pub fn default_lease_duration() -> String {
    "60s".to_owned()
}

pub fn default_dns_port() -> u16 {
    53
}

pub fn default_listen_port() -> u16 {
    443
}

pub fn default_configurator_port() -> u16 {
    18000
}

pub fn default_timeout_seconds() -> u32 {
    30
}

pub fn default_log_level() -> String {
    "info".to_owned()
}

pub fn default_protocol() -> Protocol {
    Protocol::Tcp
}

pub fn default_true() -> bool {
    true
}
