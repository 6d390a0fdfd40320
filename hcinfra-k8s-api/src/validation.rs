//! Admission-time validation (§6 "Validation rules"), invoked both by the
//! admission webhook and by unit tests, independent of any particular
//! apiserver round trip.

use std::collections::HashSet;

use hcinfra_core::net::{is_backend_name, is_cidr, is_duration, is_ipv4};

use crate::dhcpserver::DHCPServerSpec;
use crate::dnsserver::DNSServerSpec;
use crate::infra::InfraSpec;
use crate::proxyserver::ProxyServerSpec;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("field '{field}': '{value}' is not a valid IPv4 address")]
    InvalidIpv4 { field: String, value: String },
    #[error("field '{field}': '{value}' is not a valid CIDR")]
    InvalidCidr { field: String, value: String },
    #[error("field '{field}': '{value}' is not a valid duration")]
    InvalidDuration { field: String, value: String },
    #[error("field '{field}': port {value} out of range [1,65535]")]
    InvalidPort { field: String, value: u32 },
    #[error("field '{field}': dhcp option code {value} out of range [1,254]")]
    InvalidOptionCode { field: String, value: u32 },
    #[error("field '{field}': '{value}' is not a valid backend name")]
    InvalidBackendName { field: String, value: String },
    #[error("backends list must not be empty")]
    EmptyBackends,
    #[error("duplicate (port, hostname) pair: {port}/{hostname}")]
    DuplicateBackendPortHostname { port: u16, hostname: String },
    #[error("field '{field}': '{value}' is not a recognized log level")]
    InvalidLogLevel { field: String, value: String },
}

type Result<T> = std::result::Result<T, ValidationError>;

fn check_ipv4(field: &str, value: &str) -> Result<()> {
    if is_ipv4(value) {
        Ok(())
    } else {
        Err(ValidationError::InvalidIpv4 {
            field: field.to_owned(),
            value: value.to_owned(),
        })
    }
}

fn check_cidr(field: &str, value: &str) -> Result<()> {
    if is_cidr(value) {
        Ok(())
    } else {
        Err(ValidationError::InvalidCidr {
            field: field.to_owned(),
            value: value.to_owned(),
        })
    }
}

fn check_duration(field: &str, value: &str) -> Result<()> {
    if is_duration(value) {
        Ok(())
    } else {
        Err(ValidationError::InvalidDuration {
            field: field.to_owned(),
            value: value.to_owned(),
        })
    }
}

fn check_port(field: &str, value: u32) -> Result<()> {
    if (1..=65535).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::InvalidPort {
            field: field.to_owned(),
            value,
        })
    }
}

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warning", "error", "critical"];

fn check_log_level(field: &str, value: &str) -> Result<()> {
    if LOG_LEVELS.contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::InvalidLogLevel {
            field: field.to_owned(),
            value: value.to_owned(),
        })
    }
}

pub fn validate_infra(spec: &InfraSpec) -> Result<()> {
    check_cidr("network.cidr", &spec.network.cidr)?;
    check_ipv4("network.gateway", &spec.network.gateway)?;
    if let Some(dhcp) = &spec.components.dhcp {
        if let Some(ip) = &dhcp.server_ip {
            check_ipv4("components.dhcp.serverIP", ip)?;
        }
    }
    if let Some(dns) = &spec.components.dns {
        if let Some(ip) = &dns.server_ip {
            check_ipv4("components.dns.serverIP", ip)?;
        }
    }
    if let Some(proxy) = &spec.components.proxy {
        if let Some(ip) = &proxy.server_ip {
            check_ipv4("components.proxy.serverIP", ip)?;
        }
    }
    if let Some(ai) = &spec.apps_ingress {
        check_port("appsIngress.httpPort", ai.http_port as u32)?;
        check_port("appsIngress.httpsPort", ai.https_port as u32)?;
    }
    Ok(())
}

pub fn validate_dhcpserver(spec: &DHCPServerSpec) -> Result<()> {
    check_cidr("network.cidr", &spec.network.cidr)?;
    check_ipv4("network.gateway", &spec.network.gateway)?;
    check_ipv4("network.serverIP", &spec.network.server_ip)?;
    for r in &spec.network.upstream_resolvers {
        check_ipv4("network.upstreamResolvers[]", r)?;
    }
    check_ipv4("lease.rangeStart", &spec.lease.range_start)?;
    check_ipv4("lease.rangeEnd", &spec.lease.range_end)?;
    check_duration("lease.leaseDuration", &spec.lease.lease_duration)?;
    if let Some(options) = &spec.options {
        for opt in options {
            if !(1..=254).contains(&opt.code) {
                return Err(ValidationError::InvalidOptionCode {
                    field: "options[].code".to_owned(),
                    value: opt.code as u32,
                });
            }
        }
    }
    Ok(())
}

pub fn validate_dnsserver(spec: &DNSServerSpec) -> Result<()> {
    check_ipv4("network.serverIP", &spec.network.server_ip)?;
    check_ipv4("network.externalProxyIP", &spec.network.external_proxy_ip)?;
    if let Some(ip) = &spec.network.internal_proxy_ip {
        check_ipv4("network.internalProxyIP", ip)?;
    }
    check_cidr("network.secondaryCIDR", &spec.network.secondary_cidr)?;
    check_port("network.port", spec.network.port as u32)?;
    for entry in &spec.static_entries {
        check_ipv4("staticEntries[].ipv4", &entry.ipv4)?;
    }
    for r in &spec.upstream_resolvers {
        check_ipv4("upstreamResolvers[]", r)?;
    }
    check_duration("reloadInterval", &spec.reload_interval)?;
    check_duration("cacheTTL", &spec.cache_ttl)?;
    Ok(())
}

pub fn validate_proxyserver(spec: &ProxyServerSpec) -> Result<()> {
    check_ipv4("network.serverIP", &spec.network.server_ip)?;
    check_port("listenPort", spec.listen_port as u32)?;
    check_port("configuratorPort", spec.configurator_port as u32)?;
    check_log_level("logLevel", &spec.log_level)?;

    if spec.backends.is_empty() {
        return Err(ValidationError::EmptyBackends);
    }

    let mut seen: HashSet<(u16, String)> = HashSet::new();
    for b in &spec.backends {
        if !is_backend_name(&b.name) {
            return Err(ValidationError::InvalidBackendName {
                field: "backends[].name".to_owned(),
                value: b.name.clone(),
            });
        }
        check_port("backends[].port", b.port as u32)?;
        check_port("backends[].targetPort", b.target_port as u32)?;

        let key = (b.port, b.hostname.clone());
        if !seen.insert(key) {
            return Err(ValidationError::DuplicateBackendPortHostname {
                port: b.port,
                hostname: b.hostname.clone(),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{AttachmentRef, Protocol};
    use crate::proxyserver::ProxyNetwork;

    fn backend(name: &str, hostname: &str, port: u16) -> Backend {
        Backend {
            name: name.to_owned(),
            hostname: hostname.to_owned(),
            alternate_hostnames: None,
            port,
            target_service: "svc".to_owned(),
            target_port: 6443,
            target_namespace: "ns".to_owned(),
            protocol: Protocol::Tcp,
            timeout_seconds: 30,
        }
    }

    use crate::proxyserver::Backend;

    #[test]
    fn rejects_empty_backends() {
        let spec = ProxyServerSpec {
            network: ProxyNetwork {
                server_ip: "192.168.100.4".to_owned(),
                attachment: AttachmentRef {
                    name: "secondary".to_owned(),
                    namespace: None,
                },
            },
            backends: vec![],
            data_plane_image: "img".to_owned(),
            control_plane_image: "img2".to_owned(),
            listen_port: 443,
            configurator_port: 18000,
            log_level: "info".to_owned(),
            control_plane_namespace: None,
        };
        assert_eq!(validate_proxyserver(&spec), Err(ValidationError::EmptyBackends));
    }

    #[test]
    fn rejects_duplicate_port_hostname_pair() {
        let spec = ProxyServerSpec {
            network: ProxyNetwork {
                server_ip: "192.168.100.4".to_owned(),
                attachment: AttachmentRef {
                    name: "secondary".to_owned(),
                    namespace: None,
                },
            },
            backends: vec![
                backend("api", "api.example.com", 443),
                backend("api2", "api.example.com", 443),
            ],
            data_plane_image: "img".to_owned(),
            control_plane_image: "img2".to_owned(),
            listen_port: 443,
            configurator_port: 18000,
            log_level: "info".to_owned(),
            control_plane_namespace: None,
        };
        assert!(matches!(
            validate_proxyserver(&spec),
            Err(ValidationError::DuplicateBackendPortHostname { .. })
        ));
    }

    #[test]
    fn allows_shared_port_with_distinct_hostnames() {
        let spec = ProxyServerSpec {
            network: ProxyNetwork {
                server_ip: "192.168.100.4".to_owned(),
                attachment: AttachmentRef {
                    name: "secondary".to_owned(),
                    namespace: None,
                },
            },
            backends: vec![backend("api", "api.example.com", 443), backend("oauth", "oauth.example.com", 443)],
            data_plane_image: "img".to_owned(),
            control_plane_image: "img2".to_owned(),
            listen_port: 443,
            configurator_port: 18000,
            log_level: "info".to_owned(),
            control_plane_namespace: None,
        };
        assert!(validate_proxyserver(&spec).is_ok());
    }

    #[test]
    fn rejects_invalid_log_level() {
        let mut spec = ProxyServerSpec {
            network: ProxyNetwork {
                server_ip: "192.168.100.4".to_owned(),
                attachment: AttachmentRef {
                    name: "secondary".to_owned(),
                    namespace: None,
                },
            },
            backends: vec![backend("api", "api.example.com", 443)],
            data_plane_image: "img".to_owned(),
            control_plane_image: "img2".to_owned(),
            listen_port: 443,
            configurator_port: 18000,
            log_level: "verbose".to_owned(),
            control_plane_namespace: None,
        };
        assert!(validate_proxyserver(&spec).is_err());
        spec.log_level = "critical".to_owned();
        assert!(validate_proxyserver(&spec).is_ok());
    }

    #[test]
    fn rejects_out_of_range_dhcp_option_code() {
        use crate::dhcpserver::{DhcpNetwork, DhcpOption, LeaseConfig};
        let spec = DHCPServerSpec {
            network: DhcpNetwork::default(),
            lease: LeaseConfig::default(),
            image: "img".to_owned(),
            options: Some(vec![DhcpOption {
                code: 255,
                value: "x".to_owned(),
            }]),
        };
        assert!(matches!(
            validate_dhcpserver(&spec),
            Err(ValidationError::InvalidOptionCode { .. })
        ));
    }
}
