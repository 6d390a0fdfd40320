//! Translates the domain-level `hcinfra_core::snapshot::Snapshot` into wire
//! `DiscoveryResponse` resources (§4.7 step 3's access-log fields are
//! rendered here as the `access_log_format` string).

use hcinfra_core::snapshot as core;

use crate::proto;

const ACCESS_LOG_FORMAT: &str =
    "%START_TIME% %DOWNSTREAM_REMOTE_ADDRESS% %UPSTREAM_CLUSTER% %REQUESTED_SERVER_NAME% \
     %DOWNSTREAM_TLS_VERSION% %DOWNSTREAM_TLS_CIPHER% %PROTOCOL% %RESPONSE_FLAGS% \
     %BYTES_RECEIVED% %BYTES_SENT% %CONNECTION_ID%";

fn filter_chain_match(m: &core::FilterChainMatch) -> proto::FilterChainMatch {
    match m {
        core::FilterChainMatch::CatchAll => proto::FilterChainMatch {
            catch_all: true,
            server_names: vec![],
        },
        core::FilterChainMatch::ServerNames(names) => proto::FilterChainMatch {
            catch_all: false,
            server_names: names.clone(),
        },
    }
}

fn filter_chain(fc: &core::FilterChain) -> proto::FilterChain {
    proto::FilterChain {
        r#match: Some(filter_chain_match(&fc.r#match)),
        tcp_proxy: Some(proto::TcpProxyFilter {
            cluster_name: fc.cluster.clone(),
            access_log_format: ACCESS_LOG_FORMAT.to_owned(),
        }),
    }
}

fn listener(l: &core::Listener) -> proto::Listener {
    proto::Listener {
        name: format!("listener_{}", l.port),
        port: l.port as u32,
        filter_chains: l.filter_chains.iter().map(filter_chain).collect(),
        tls_inspection: l.tls_inspection,
    }
}

fn cluster(c: &core::Cluster) -> proto::Cluster {
    proto::Cluster {
        name: c.name.clone(),
        endpoint: Some(proto::ClusterEndpoint {
            host: c.endpoint_host.clone(),
            port: c.endpoint_port as u32,
        }),
        connect_timeout_seconds: c.connect_timeout.as_secs() as u32,
        lb_policy: "ROUND_ROBIN".to_owned(),
        dns_lookup_family: "V4_ONLY".to_owned(),
    }
}

/// Renders one `DiscoveryResponse` per typed resource set (the aggregated
/// stream multiplexes both Listener and Cluster resources over one
/// connection, but each response carries a single `type_url`).
pub fn to_discovery_responses(snap: &core::Snapshot) -> Vec<proto::DiscoveryResponse> {
    let version_info = snap.version.to_string();

    let listeners = proto::DiscoveryResponse {
        version_info: version_info.clone(),
        resources: snap
            .listeners
            .iter()
            .map(|l| proto::Resource {
                kind: Some(proto::resource::Kind::Listener(listener(l))),
            })
            .collect(),
        type_url: "type.googleapis.com/hcinfra.xds.v3.Listener".to_owned(),
        nonce: version_info.clone(),
    };

    let clusters = proto::DiscoveryResponse {
        version_info: version_info.clone(),
        resources: snap
            .clusters
            .iter()
            .map(|c| proto::Resource {
                kind: Some(proto::resource::Kind::Cluster(cluster(c))),
            })
            .collect(),
        type_url: "type.googleapis.com/hcinfra.xds.v3.Cluster".to_owned(),
        nonce: version_info,
    };

    vec![clusters, listeners]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn snapshot_with_one_listener_one_cluster_yields_two_responses() {
        let snap = core::Snapshot {
            version: 3,
            listeners: vec![core::Listener {
                port: 443,
                filter_chains: vec![core::FilterChain {
                    r#match: core::FilterChainMatch::ServerNames(vec!["api.example.com".to_owned()]),
                    cluster: "proxy1-api".to_owned(),
                }],
                tls_inspection: true,
            }],
            clusters: vec![core::Cluster {
                name: "proxy1-api".to_owned(),
                endpoint_host: "kube-apiserver.ns.svc.cluster.local".to_owned(),
                endpoint_port: 6443,
                connect_timeout: Duration::from_secs(30),
            }],
        };

        let responses = to_discovery_responses(&snap);
        assert_eq!(responses.len(), 2);
        assert!(responses.iter().all(|r| r.version_info == "3"));

        let cluster_resp = responses.iter().find(|r| r.type_url.contains("Cluster")).unwrap();
        assert_eq!(cluster_resp.resources.len(), 1);

        let listener_resp = responses.iter().find(|r| r.type_url.contains("Listener")).unwrap();
        assert_eq!(listener_resp.resources.len(), 1);
    }
}
