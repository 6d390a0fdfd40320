use std::net::Ipv4Addr;
use std::str::FromStr;

use ipnet::Ipv4Net;
use once_cell::sync::Lazy;
use regex::Regex;

/// Matches a bare dotted-quad IPv4 address, e.g. `192.168.100.1`.
pub static IPV4_PATTERN: &str = r"^(?:[0-9]{1,3}\.){3}[0-9]{1,3}$";
/// Matches a dotted-quad CIDR, e.g. `192.168.100.0/24`.
pub static CIDR_PATTERN: &str = r"^(?:[0-9]{1,3}\.){3}[0-9]{1,3}/(?:[0-9]|[1-2][0-9]|3[0-2])$";
/// Matches a duration string such as `30s`, `5m`, `1h`.
pub static DURATION_PATTERN: &str = r"^[0-9]+(s|m|h)$";
/// Matches a DNS-label backend name.
pub static BACKEND_NAME_PATTERN: &str = r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$";

static IPV4_RE: Lazy<Regex> = Lazy::new(|| Regex::new(IPV4_PATTERN).unwrap());
static CIDR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(CIDR_PATTERN).unwrap());
static DURATION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(DURATION_PATTERN).unwrap());
static BACKEND_NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(BACKEND_NAME_PATTERN).unwrap());

pub fn is_ipv4(s: &str) -> bool {
    IPV4_RE.is_match(s) && s.parse::<Ipv4Addr>().is_ok()
}

pub fn is_cidr(s: &str) -> bool {
    CIDR_RE.is_match(s) && s.parse::<Ipv4Net>().is_ok()
}

pub fn is_duration(s: &str) -> bool {
    DURATION_RE.is_match(s)
}

pub fn is_backend_name(s: &str) -> bool {
    s.len() <= 63 && BACKEND_NAME_RE.is_match(s)
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum NetError {
    #[error("'{0}' is not a valid IPv4 address")]
    InvalidIpv4(String),
    #[error("'{0}' is not a valid IPv4 CIDR")]
    InvalidCidr(String),
}

/// A parsed CIDR, exposing the prefix length independently since several
/// render sites need `/N` without the rest of the network.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cidr(Ipv4Net);

impl Cidr {
    pub fn parse(s: &str) -> Result<Self, NetError> {
        Ipv4Net::from_str(s)
            .map(Cidr)
            .map_err(|_| NetError::InvalidCidr(s.to_owned()))
    }

    pub fn prefix_len(&self) -> u8 {
        self.0.prefix_len()
    }

    pub fn network(&self) -> Ipv4Addr {
        self.0.network()
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        self.0.contains(&addr)
    }

    pub fn netmask(&self) -> Ipv4Addr {
        self.0.netmask()
    }
}

impl std::fmt::Display for Cidr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parse a bare IPv4 (without prefix), used for server/gateway addresses.
pub fn parse_ipv4(s: &str) -> Result<Ipv4Addr, NetError> {
    if !is_ipv4(s) {
        return Err(NetError::InvalidIpv4(s.to_owned()));
    }
    s.parse().map_err(|_| NetError::InvalidIpv4(s.to_owned()))
}

/// The `/N` prefix for an address given a secondary-network CIDR, falling
/// back to `/24` if the CIDR is absent (as §4.3 describes for the DHCP
/// network-attachment annotation, and reused identically by the DNS and
/// Proxy reconcilers for their own attachment annotations).
pub fn prefix_or_default(cidr: Option<&str>) -> u8 {
    cidr.and_then(|c| Cidr::parse(c).ok())
        .map(|c| c.prefix_len())
        .unwrap_or(24)
}

/// Renders the Multus network-attachment-selection annotation value shared
/// by the DHCP, DNS and Proxy workloads: `[{"name":...,"namespace":...,"ips":["<ip>/<prefix>"]}]`.
pub fn attachment_annotation(
    attachment_name: &str,
    attachment_namespace: Option<&str>,
    server_ip: &str,
    cidr: Option<&str>,
) -> String {
    let prefix = prefix_or_default(cidr);
    let mut entry = serde_json::json!({
        "name": attachment_name,
        "ips": [format!("{server_ip}/{prefix}")],
    });
    if let Some(ns) = attachment_namespace {
        entry["namespace"] = serde_json::Value::String(ns.to_owned());
    }
    serde_json::to_string(&vec![entry]).expect("attachment annotation is always serializable")
}

/// Linear scan over an inclusive IPv4 range, used by the DHCP allocator and
/// by tests asserting IPAM behavior; yields in ascending numeric order.
pub fn ipv4_range_inclusive(start: Ipv4Addr, end: Ipv4Addr) -> impl Iterator<Item = Ipv4Addr> {
    let start = u32::from(start);
    let end = u32::from(end);
    (start..=end).map(Ipv4Addr::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_ipv4() {
        assert!(is_ipv4("192.168.100.1"));
        assert!(!is_ipv4("192.168.100.256"));
        assert!(!is_ipv4("not-an-ip"));
    }

    #[test]
    fn accepts_valid_cidr_and_extracts_prefix() {
        assert!(is_cidr("192.168.100.0/24"));
        assert!(!is_cidr("192.168.100.0/33"));
        assert_eq!(prefix_or_default(Some("10.0.0.0/16")), 16);
        assert_eq!(prefix_or_default(None), 24);
    }

    #[test]
    fn duration_pattern_matches_spec_examples() {
        assert!(is_duration("30s"));
        assert!(is_duration("5m"));
        assert!(is_duration("1h"));
        assert!(!is_duration("30"));
        assert!(!is_duration("30 seconds"));
    }

    #[test]
    fn backend_name_pattern_enforces_dns_label_shape() {
        assert!(is_backend_name("api"));
        assert!(is_backend_name("kube-apiserver-kubernetes-hostname"));
        assert!(!is_backend_name("-leading-dash"));
        assert!(!is_backend_name("Has-Upper"));
        assert!(!is_backend_name(&"a".repeat(64)));
    }

    #[test]
    fn attachment_annotation_defaults_prefix_to_24() {
        let ann = attachment_annotation("secondary", Some("ns1"), "192.168.100.5", None);
        let parsed: serde_json::Value = serde_json::from_str(&ann).unwrap();
        assert_eq!(parsed[0]["ips"][0], "192.168.100.5/24");
        assert_eq!(parsed[0]["namespace"], "ns1");
    }

    #[test]
    fn ipv4_range_is_inclusive_and_ascending() {
        let start: Ipv4Addr = "192.168.100.10".parse().unwrap();
        let end: Ipv4Addr = "192.168.100.12".parse().unwrap();
        let all: Vec<_> = ipv4_range_inclusive(start, end).collect();
        assert_eq!(all, vec![
            "192.168.100.10".parse::<Ipv4Addr>().unwrap(),
            "192.168.100.11".parse().unwrap(),
            "192.168.100.12".parse().unwrap(),
        ]);
    }
}
