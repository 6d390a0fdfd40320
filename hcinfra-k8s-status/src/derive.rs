//! Pure derivation functions implementing §4.1 "Derivation rules": turning
//! one `InfraSpec` into the three child specs, with no Kubernetes I/O, so
//! they're exercised directly by unit tests (§8's idempotence/derivation
//! invariants) without a fake apiserver.

use std::net::Ipv4Addr;

use hcinfra_core::net::Cidr;
use hcinfra_core::STATIC_HOSTNAME_PREFIXES;
use hcinfra_k8s_api::common::AttachmentRef;
use hcinfra_k8s_api::dhcpserver::{DhcpNetwork, DHCPServerSpec, LeaseConfig};
use hcinfra_k8s_api::dnsserver::{DnsNetwork, DNSServerSpec, StaticEntry};
use hcinfra_k8s_api::infra::InfraSpec;
use hcinfra_k8s_api::proxyserver::{Backend, ProxyNetwork, ProxyServerSpec};

use crate::error::Result;

pub const DHCP_COMPONENT: &str = "dhcp";
pub const DNS_COMPONENT: &str = "dns";
pub const PROXY_COMPONENT: &str = "proxy";

/// `<parent>-{dhcp|dns|proxy}` (§4.1).
pub fn child_name(parent: &str, component: &str) -> String {
    format!("{parent}-{component}")
}

/// Attachment namespace defaults to the parent's own namespace (§4.1).
pub fn resolved_attachment(attachment: &AttachmentRef, parent_namespace: &str) -> AttachmentRef {
    AttachmentRef {
        name: attachment.name.clone(),
        namespace: Some(
            attachment
                .namespace
                .clone()
                .unwrap_or_else(|| parent_namespace.to_owned()),
        ),
    }
}

/// DHCP's advertised resolver list: `[dns.serverIP]` when DNS is enabled,
/// else the Infra-level upstream list verbatim (§4.1).
pub fn dhcp_resolvers(dns_enabled: bool, dns_server_ip: Option<&str>, infra_upstreams: &[String]) -> Vec<String> {
    if dns_enabled {
        dns_server_ip.map(|ip| vec![ip.to_owned()]).unwrap_or_default()
    } else {
        infra_upstreams.to_vec()
    }
}

/// `<clusterName>.<baseDomain>` (§4.1).
pub fn hosted_cluster_domain(cluster_name: &str, base_domain: &str) -> String {
    format!("{cluster_name}.{base_domain}")
}

/// The target service/port a canonical static-entry hostname prefix routes
/// to. Not pinned by name in spec.md beyond "fixed canonical list"; this
/// mapping follows the hosted-control-plane service names the fixed
/// hostname prefixes (`api`, `api-int`, `oauth`, `ignition`,
/// `konnectivity`) name, and is recorded as a derivation decision in
/// DESIGN.md.
fn canonical_target(prefix: &str) -> (&'static str, u16, u16) {
    // (targetService, targetPort, proxy listen port)
    match prefix {
        "api" => ("kube-apiserver", 6443, 6443),
        "api-int" => ("kube-apiserver", 6443, 6443),
        "oauth" => ("oauth-openshift", 6443, 443),
        "ignition" => ("ignition-server", 443, 443),
        "konnectivity" => ("konnectivity-server", 8091, 443),
        other => unreachable!("unexpected static hostname prefix '{other}'"),
    }
}

/// Static DNS entries synthesized for the fixed set
/// `{api, api-int, oauth, ignition, konnectivity}.<domain>`, each resolving
/// to the external proxy IP (§4.1).
pub fn static_entries(domain: &str, external_proxy_ip: &str) -> Vec<StaticEntry> {
    STATIC_HOSTNAME_PREFIXES
        .iter()
        .map(|prefix| StaticEntry {
            hostname: format!("{prefix}.{domain}"),
            ipv4: external_proxy_ip.to_owned(),
        })
        .collect()
}

pub const KUBERNETES_HOSTNAME_BACKEND: &str = "kube-apiserver-kubernetes-hostname";

/// The canonical proxy backend list (§4.1): one backend per static entry,
/// plus the extra `kube-apiserver-kubernetes-hostname` backend carrying the
/// in-cluster Kubernetes service aliases.
pub fn canonical_backends(domain: &str, control_plane_namespace: &str) -> Vec<Backend> {
    let mut backends: Vec<Backend> = STATIC_HOSTNAME_PREFIXES
        .iter()
        .map(|prefix| {
            let (target_service, target_port, port) = canonical_target(prefix);
            Backend {
                name: prefix.to_string(),
                hostname: format!("{prefix}.{domain}"),
                alternate_hostnames: None,
                port,
                target_service: target_service.to_owned(),
                target_port,
                target_namespace: control_plane_namespace.to_owned(),
                protocol: hcinfra_k8s_api::common::Protocol::Tcp,
                timeout_seconds: hcinfra_k8s_api::common::default_timeout_seconds(),
            }
        })
        .collect();

    backends.push(Backend {
        name: KUBERNETES_HOSTNAME_BACKEND.to_owned(),
        hostname: "kubernetes".to_owned(),
        alternate_hostnames: Some(vec![
            "kubernetes".to_owned(),
            "kubernetes.default".to_owned(),
            "kubernetes.default.svc".to_owned(),
            "kubernetes.default.svc.cluster.local".to_owned(),
        ]),
        port: 6443,
        target_service: "kube-apiserver".to_owned(),
        target_port: 6443,
        target_namespace: control_plane_namespace.to_owned(),
        protocol: hcinfra_k8s_api::common::Protocol::Tcp,
        timeout_seconds: hcinfra_k8s_api::common::default_timeout_seconds(),
    });

    backends
}

/// `controlPlaneNamespace` default: `<parent-namespace>-<parent-name>` when
/// unspecified (§4.1, "targetNamespace = proxy.controlPlaneNamespace
/// (defaults to `<parent-namespace>-<parent-name>`)").
pub fn default_control_plane_namespace(parent_namespace: &str, parent_name: &str) -> String {
    format!("{parent_namespace}-{parent_name}")
}

/// Not named by the derivation rules directly (rangeStart/rangeEnd are plain
/// DHCPServer attributes, not derived per §3); this rewrite derives them
/// from the secondary CIDR so the Infra reconciler never needs an explicit
/// range field of its own. Reserves the first 10 host addresses (gateway,
/// server IPs) and the broadcast address, recorded as a derivation decision
/// in DESIGN.md.
pub fn derive_lease_range(cidr: &str) -> Result<(String, String)> {
    let parsed = Cidr::parse(cidr)?;
    let network = u32::from(parsed.network());
    let host_bits = 32 - u32::from(parsed.prefix_len());
    let broadcast = if host_bits == 0 {
        network
    } else {
        network | ((1u32 << host_bits) - 1)
    };
    let start = network + 10;
    let end = broadcast.saturating_sub(1);
    Ok((Ipv4Addr::from(start).to_string(), Ipv4Addr::from(end.max(start)).to_string()))
}

pub fn derive_dhcp_spec(
    infra: &InfraSpec,
    parent_namespace: &str,
    server_ip: &str,
    image: &str,
) -> Result<DHCPServerSpec> {
    let dns_enabled = infra.components.dns.as_ref().is_some_and(|d| d.enabled);
    let dns_server_ip = infra.components.dns.as_ref().and_then(|d| d.server_ip.as_deref());
    let upstream_resolvers = dhcp_resolvers(
        dns_enabled,
        dns_server_ip,
        infra.network.upstream_resolvers.as_deref().unwrap_or_default(),
    );
    let (range_start, range_end) = derive_lease_range(&infra.network.cidr)?;

    Ok(DHCPServerSpec {
        network: DhcpNetwork {
            cidr: infra.network.cidr.clone(),
            gateway: infra.network.gateway.clone(),
            server_ip: server_ip.to_owned(),
            upstream_resolvers,
            attachment: resolved_attachment(&infra.network.attachment, parent_namespace),
        },
        lease: LeaseConfig {
            range_start,
            range_end,
            lease_duration: hcinfra_k8s_api::common::default_lease_duration(),
        },
        image: image.to_owned(),
        options: None,
    })
}

pub fn derive_dns_spec(
    infra: &InfraSpec,
    parent_namespace: &str,
    server_ip: &str,
    external_proxy_ip: &str,
    internal_proxy_ip: Option<&str>,
) -> DNSServerSpec {
    let domain = hosted_cluster_domain(&infra.cluster_name, &infra.base_domain);
    DNSServerSpec {
        network: DnsNetwork {
            server_ip: server_ip.to_owned(),
            external_proxy_ip: external_proxy_ip.to_owned(),
            internal_proxy_ip: internal_proxy_ip.map(str::to_owned),
            secondary_cidr: infra.network.cidr.clone(),
            attachment: resolved_attachment(&infra.network.attachment, parent_namespace),
            port: hcinfra_k8s_api::common::default_dns_port(),
        },
        hosted_cluster_domain: domain.clone(),
        static_entries: static_entries(&domain, external_proxy_ip),
        upstream_resolvers: infra.network.upstream_resolvers.clone().unwrap_or_default(),
        reload_interval: hcinfra_k8s_api::common::default_reload_interval(),
        cache_ttl: hcinfra_k8s_api::common::default_cache_ttl(),
    }
}

pub fn derive_proxy_spec(
    infra: &InfraSpec,
    parent_name: &str,
    parent_namespace: &str,
    server_ip: &str,
    data_plane_image: &str,
    control_plane_image: &str,
) -> ProxyServerSpec {
    let domain = hosted_cluster_domain(&infra.cluster_name, &infra.base_domain);
    let control_plane_namespace = infra
        .control_plane_namespace
        .clone()
        .unwrap_or_else(|| default_control_plane_namespace(parent_namespace, parent_name));

    ProxyServerSpec {
        network: ProxyNetwork {
            server_ip: server_ip.to_owned(),
            attachment: resolved_attachment(&infra.network.attachment, parent_namespace),
        },
        backends: canonical_backends(&domain, &control_plane_namespace),
        data_plane_image: data_plane_image.to_owned(),
        control_plane_image: control_plane_image.to_owned(),
        listen_port: hcinfra_k8s_api::common::default_listen_port(),
        configurator_port: hcinfra_k8s_api::common::default_configurator_port(),
        log_level: hcinfra_k8s_api::common::default_log_level(),
        control_plane_namespace: Some(control_plane_namespace),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hcinfra_k8s_api::common::AttachmentRef;
    use hcinfra_k8s_api::infra::{Components, InfraNetwork};

    fn infra_spec() -> InfraSpec {
        InfraSpec {
            network: InfraNetwork {
                cidr: "192.168.100.0/24".to_owned(),
                gateway: "192.168.100.1".to_owned(),
                attachment: AttachmentRef {
                    name: "secondary".to_owned(),
                    namespace: None,
                },
                upstream_resolvers: Some(vec!["8.8.8.8".to_owned()]),
            },
            components: Components::default(),
            apps_ingress: None,
            cluster_name: "my-cluster".to_owned(),
            base_domain: "example.com".to_owned(),
            control_plane_namespace: None,
        }
    }

    #[test]
    fn child_name_follows_fixed_pattern() {
        assert_eq!(child_name("my-infra", DHCP_COMPONENT), "my-infra-dhcp");
    }

    #[test]
    fn attachment_namespace_defaults_to_parent() {
        let attachment = AttachmentRef {
            name: "secondary".to_owned(),
            namespace: None,
        };
        let resolved = resolved_attachment(&attachment, "tenant-ns");
        assert_eq!(resolved.namespace.as_deref(), Some("tenant-ns"));
    }

    #[test]
    fn dhcp_resolvers_prefer_dns_server_ip_when_dns_enabled() {
        let resolvers = dhcp_resolvers(true, Some("192.168.100.3"), &["8.8.8.8".to_owned()]);
        assert_eq!(resolvers, vec!["192.168.100.3".to_owned()]);
    }

    #[test]
    fn dhcp_resolvers_fall_back_to_infra_upstreams_when_dns_disabled() {
        let resolvers = dhcp_resolvers(false, None, &["8.8.8.8".to_owned()]);
        assert_eq!(resolvers, vec!["8.8.8.8".to_owned()]);
    }

    #[test]
    fn static_entries_cover_fixed_prefixes_at_external_ip() {
        let entries = static_entries("my-cluster.example.com", "192.168.100.4");
        assert_eq!(entries.len(), 5);
        assert!(entries
            .iter()
            .any(|e| e.hostname == "api.my-cluster.example.com" && e.ipv4 == "192.168.100.4"));
        assert!(entries
            .iter()
            .any(|e| e.hostname == "konnectivity.my-cluster.example.com"));
    }

    #[test]
    fn canonical_backends_include_kubernetes_hostname_alternate_names() {
        let backends = canonical_backends("my-cluster.example.com", "ns-my-infra");
        let kube = backends
            .iter()
            .find(|b| b.name == KUBERNETES_HOSTNAME_BACKEND)
            .unwrap();
        let alts = kube.alternate_hostnames.as_ref().unwrap();
        assert!(alts.contains(&"kubernetes.default.svc.cluster.local".to_owned()));
        assert_eq!(backends.len(), 6);
    }

    #[test]
    fn derive_proxy_spec_scenario_one_end_to_end() {
        let infra = infra_spec();
        let proxy = derive_proxy_spec(&infra, "my-infra", "tenant-ns", "192.168.100.4", "img", "img2");
        let kube = proxy
            .backends
            .iter()
            .find(|b| b.name == KUBERNETES_HOSTNAME_BACKEND)
            .unwrap();
        assert_eq!(
            kube.alternate_hostnames.as_ref().unwrap(),
            &vec![
                "kubernetes".to_owned(),
                "kubernetes.default".to_owned(),
                "kubernetes.default.svc".to_owned(),
                "kubernetes.default.svc.cluster.local".to_owned(),
            ]
        );
    }

    #[test]
    fn derive_dns_spec_places_external_ip_in_static_entries() {
        let infra = infra_spec();
        let dns = derive_dns_spec(&infra, "tenant-ns", "192.168.100.3", "192.168.100.4", None);
        assert!(dns
            .static_entries
            .iter()
            .any(|e| e.hostname == "api.my-cluster.example.com" && e.ipv4 == "192.168.100.4"));
        assert_eq!(dns.hosted_cluster_domain, "my-cluster.example.com");
    }

    #[test]
    fn control_plane_namespace_defaults_to_namespace_hyphen_name() {
        assert_eq!(default_control_plane_namespace("tenant-ns", "my-infra"), "tenant-ns-my-infra");
    }

    #[test]
    fn lease_range_stays_within_cidr_and_excludes_broadcast() {
        let (start, end) = derive_lease_range("192.168.100.0/24").unwrap();
        assert_eq!(start, "192.168.100.10");
        assert_eq!(end, "192.168.100.254");
    }

    #[test]
    fn lease_range_rejects_malformed_cidr() {
        assert!(derive_lease_range("not-a-cidr").is_err());
    }

    #[test]
    fn derive_dhcp_spec_fills_range_from_cidr_and_resolver_from_dns() {
        let mut infra = infra_spec();
        infra.components.dns = Some(hcinfra_k8s_api::infra::ComponentConfig {
            enabled: true,
            server_ip: Some("192.168.100.3".to_owned()),
            image: None,
        });
        let dhcp = derive_dhcp_spec(&infra, "tenant-ns", "192.168.100.2", "dhcp-image:latest").unwrap();
        assert_eq!(dhcp.lease.range_start, "192.168.100.10");
        assert_eq!(dhcp.network.upstream_resolvers, vec!["192.168.100.3".to_owned()]);
        assert_eq!(dhcp.network.attachment.namespace.as_deref(), Some("tenant-ns"));
    }
}
