//! The proxy configurator's domain model (§4.7), independent of its wire
//! encoding. `hcinfra-k8s-index` builds these from `ProxyServer` specs;
//! `hcinfra-xds` translates them into Aggregated Discovery resources.

use std::time::Duration;

pub const KUBE_APISERVER_PORT: u16 = 6443;
pub const KONNECTIVITY_TARGET_SERVICE: &str = "konnectivity-server";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TransportProtocol {
    #[default]
    Tcp,
    Udp,
}

/// One backend as declared on a `ProxyServer`, already validated.
#[derive(Clone, Debug, PartialEq)]
pub struct Backend {
    pub name: String,
    pub hostname: String,
    pub alternate_hostnames: Vec<String>,
    pub port: u16,
    pub target_service: String,
    pub target_port: u16,
    pub target_namespace: String,
    pub protocol: TransportProtocol,
    pub timeout: Duration,
}

impl Backend {
    pub fn server_names(&self) -> Vec<String> {
        let mut names = vec![self.hostname.clone()];
        names.extend(self.alternate_hostnames.iter().cloned());
        names
    }

    pub fn endpoint_host(&self) -> String {
        format!(
            "{}.{}.svc.cluster.local",
            self.target_service, self.target_namespace
        )
    }
}

/// A compiled cluster resource (§4.7 step 1): one per backend.
#[derive(Clone, Debug, PartialEq)]
pub struct Cluster {
    pub name: String,
    pub endpoint_host: String,
    pub endpoint_port: u16,
    pub connect_timeout: Duration,
}

impl Cluster {
    pub fn for_backend(proxy_name: &str, backend: &Backend) -> Self {
        Cluster {
            name: format!("{proxy_name}-{}", backend.name),
            endpoint_host: backend.endpoint_host(),
            endpoint_port: backend.target_port,
            connect_timeout: backend.timeout,
        }
    }
}

/// Match predicate for a filter chain: either a catch-all (`None`) or an
/// SNI match against one or more server names.
#[derive(Clone, Debug, PartialEq)]
pub enum FilterChainMatch {
    CatchAll,
    ServerNames(Vec<String>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct FilterChain {
    pub r#match: FilterChainMatch,
    pub cluster: String,
}

/// A compiled listener (§4.7 step 3): one per distinct port in the group.
#[derive(Clone, Debug, PartialEq)]
pub struct Listener {
    pub port: u16,
    pub filter_chains: Vec<FilterChain>,
    /// Whether a TLS-inspection listener filter is attached so SNI is
    /// available to the filter-chain matcher — false only for the
    /// kube-apiserver catch-all port (§4.7 step 2).
    pub tls_inspection: bool,
}

/// A fully-built, immutable configuration bundle for one proxy (§3
/// "ProxySnapshot"). Rebuilt in full on every observed spec change.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    pub version: u64,
    pub listeners: Vec<Listener>,
    pub clusters: Vec<Cluster>,
}

#[derive(thiserror::Error, Debug)]
pub enum CompileError {
    #[error("proxy spec has no backends")]
    NoBackends,
}

/// Compiles a proxy's backends into listeners and clusters per §4.7's
/// `build()` algorithm: group by port, emit one cluster per backend, decide
/// plain-TCP vs SNI routing per port group.
pub fn compile(proxy_name: &str, backends: &[Backend]) -> Result<(Vec<Listener>, Vec<Cluster>), CompileError> {
    if backends.is_empty() {
        return Err(CompileError::NoBackends);
    }

    let mut clusters = Vec::with_capacity(backends.len());
    for b in backends {
        clusters.push(Cluster::for_backend(proxy_name, b));
    }

    let mut ports: Vec<u16> = backends.iter().map(|b| b.port).collect();
    ports.sort_unstable();
    ports.dedup();

    let mut listeners = Vec::with_capacity(ports.len());
    for port in ports {
        let group: Vec<&Backend> = backends.iter().filter(|b| b.port == port).collect();

        if port == KUBE_APISERVER_PORT {
            let first = group.first().expect("group is non-empty by construction");
            let cluster_name = format!("{proxy_name}-{}", first.name);
            listeners.push(Listener {
                port,
                filter_chains: vec![FilterChain {
                    r#match: FilterChainMatch::CatchAll,
                    cluster: cluster_name,
                }],
                tls_inspection: false,
            });
            continue;
        }

        let mut filter_chains: Vec<FilterChain> = group
            .iter()
            .map(|b| FilterChain {
                r#match: FilterChainMatch::ServerNames(b.server_names()),
                cluster: format!("{proxy_name}-{}", b.name),
            })
            .collect();

        if let Some(konnectivity) = group.iter().find(|b| b.target_service == KONNECTIVITY_TARGET_SERVICE) {
            filter_chains.push(FilterChain {
                r#match: FilterChainMatch::CatchAll,
                cluster: format!("{proxy_name}-{}", konnectivity.name),
            });
        }

        listeners.push(Listener {
            port,
            filter_chains,
            tls_inspection: true,
        });
    }

    Ok((listeners, clusters))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(name: &str, hostname: &str, port: u16, target_service: &str) -> Backend {
        Backend {
            name: name.to_owned(),
            hostname: hostname.to_owned(),
            alternate_hostnames: vec![],
            port,
            target_service: target_service.to_owned(),
            target_port: 6443,
            target_namespace: "ns".to_owned(),
            protocol: TransportProtocol::Tcp,
            timeout: Duration::from_secs(30),
        }
    }

    #[test]
    fn two_backends_on_443_yield_one_listener_two_sni_chains() {
        let backends = vec![
            backend("api", "api.my-cluster.example.com", 443, "kube-apiserver"),
            backend("oauth", "oauth.my-cluster.example.com", 443, "oauth-openshift"),
        ];
        let (listeners, clusters) = compile("proxy1", &backends).unwrap();
        assert_eq!(listeners.len(), 1);
        assert_eq!(clusters.len(), 2);
        let l = &listeners[0];
        assert_eq!(l.port, 443);
        assert!(l.tls_inspection);
        assert_eq!(l.filter_chains.len(), 2);
        assert!(l
            .filter_chains
            .iter()
            .all(|fc| matches!(fc.r#match, FilterChainMatch::ServerNames(_))));
    }

    #[test]
    fn single_backend_on_6443_yields_catchall_no_tls_inspection() {
        let backends = vec![backend("api", "api.my-cluster.example.com", 6443, "kube-apiserver")];
        let (listeners, _clusters) = compile("proxy1", &backends).unwrap();
        assert_eq!(listeners.len(), 1);
        let l = &listeners[0];
        assert!(!l.tls_inspection);
        assert_eq!(l.filter_chains.len(), 1);
        assert_eq!(l.filter_chains[0].r#match, FilterChainMatch::CatchAll);
    }

    #[test]
    fn backends_on_two_ports_yield_two_listeners_two_clusters() {
        let backends = vec![
            backend("api", "api.my-cluster.example.com", 443, "kube-apiserver"),
            backend("mcs", "ignition.my-cluster.example.com", 22623, "machine-config-server"),
        ];
        let (listeners, clusters) = compile("proxy1", &backends).unwrap();
        assert_eq!(listeners.len(), 2);
        assert_eq!(clusters.len(), 2);
    }

    #[test]
    fn konnectivity_backend_gets_fallback_catchall_chain() {
        let backends = vec![
            backend("api", "api.my-cluster.example.com", 443, "kube-apiserver"),
            backend("konnectivity", "konnectivity.my-cluster.example.com", 443, KONNECTIVITY_TARGET_SERVICE),
        ];
        let (listeners, _clusters) = compile("proxy1", &backends).unwrap();
        let l = &listeners[0];
        assert_eq!(l.filter_chains.len(), 3);
        let catchalls: Vec<_> = l
            .filter_chains
            .iter()
            .filter(|fc| fc.r#match == FilterChainMatch::CatchAll)
            .collect();
        assert_eq!(catchalls.len(), 1);
        assert_eq!(catchalls[0].cluster, "proxy1-konnectivity");
    }

    #[test]
    fn empty_backends_is_a_compile_error() {
        assert!(matches!(compile("proxy1", &[]), Err(CompileError::NoBackends)));
    }
}
