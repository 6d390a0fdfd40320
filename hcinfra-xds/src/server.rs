//! The Aggregated Discovery Service endpoint the data-plane engine's
//! sidecar connects to over loopback (§4.7 "Role", §6 "Wire protocol").
//! Node identity (`node.id`) on the first inbound `DiscoveryRequest`
//! selects which cached snapshot this stream follows; every subsequent
//! change published under that node id (§4.7 "Transitions") is pushed
//! without the client needing to re-request.

use std::pin::Pin;

use futures::Stream;
use hcinfra_k8s_index::ProxyCacheReader;
use tonic::{Request, Response, Status, Streaming};

use crate::convert::to_discovery_responses;
use crate::proto::aggregated_discovery_service_server::{
    AggregatedDiscoveryService, AggregatedDiscoveryServiceServer,
};
use crate::proto::{DiscoveryRequest, DiscoveryResponse};

/// gRPC service implementation backing the configurator's ADS endpoint.
/// Cheap to clone: it only holds the read side of the snapshot cache.
#[derive(Clone)]
pub struct AdsService {
    reader: ProxyCacheReader,
}

impl AdsService {
    pub fn new(reader: ProxyCacheReader) -> Self {
        AdsService { reader }
    }

    pub fn into_server(self) -> AggregatedDiscoveryServiceServer<Self> {
        AggregatedDiscoveryServiceServer::new(self)
    }
}

type ResponseStream = Pin<Box<dyn Stream<Item = Result<DiscoveryResponse, Status>> + Send + 'static>>;

#[tonic::async_trait]
impl AggregatedDiscoveryService for AdsService {
    type StreamAggregatedResourcesStream = ResponseStream;

    async fn stream_aggregated_resources(
        &self,
        request: Request<Streaming<DiscoveryRequest>>,
    ) -> Result<Response<Self::StreamAggregatedResourcesStream>, Status> {
        let mut inbound = request.into_inner();

        let first = inbound
            .message()
            .await
            .map_err(|e| Status::internal(format!("failed to read initial discovery request: {e}")))?
            .ok_or_else(|| Status::invalid_argument("stream closed before any request"))?;

        let node_id = first
            .node
            .map(|n| n.id)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Status::invalid_argument("discovery request missing node.id"))?;

        let mut rx = self
            .reader
            .watch(&node_id)
            .ok_or_else(|| Status::not_found(format!("no snapshot published for node '{node_id}'")))?;

        let stream = async_stream::try_stream! {
            // The ADS protocol is a bidi stream; the engine acks/nacks on
            // the request side, but that bookkeeping is owned entirely by
            // the embedded client library on its end (§4.7 "Failure"), so
            // we only need to keep draining it to detect stream closure.
            tokio::spawn(async move {
                while let Ok(Some(_)) = inbound.message().await {}
            });

            loop {
                let snap = rx.borrow_and_update().clone();
                for resp in to_discovery_responses(&snap) {
                    yield resp;
                }
                if rx.changed().await.is_err() {
                    return;
                }
            }
        };

        Ok(Response::new(Box::pin(stream)))
    }
}

#[cfg(test)]
mod tests {
    use hcinfra_k8s_api::proxyserver::ProxyServerSpec;
    use hcinfra_k8s_index::proxy_cache_pair;

    fn spec() -> ProxyServerSpec {
        use hcinfra_k8s_api::common::{AttachmentRef, Protocol};
        use hcinfra_k8s_api::proxyserver::{Backend as SpecBackend, ProxyNetwork};

        ProxyServerSpec {
            network: ProxyNetwork {
                server_ip: "192.168.100.4".to_owned(),
                attachment: AttachmentRef {
                    name: "secondary".to_owned(),
                    namespace: None,
                },
            },
            backends: vec![SpecBackend {
                name: "api".to_owned(),
                hostname: "api.example.com".to_owned(),
                alternate_hostnames: None,
                port: 443,
                target_service: "kube-apiserver".to_owned(),
                target_port: 6443,
                target_namespace: "ns".to_owned(),
                protocol: Protocol::Tcp,
                timeout_seconds: 30,
            }],
            data_plane_image: "img".to_owned(),
            control_plane_image: "img2".to_owned(),
            listen_port: 443,
            configurator_port: 18000,
            log_level: "info".to_owned(),
            control_plane_namespace: None,
        }
    }

    #[test]
    fn unknown_node_id_has_no_watch() {
        let (_writer, reader) = proxy_cache_pair();
        assert!(reader.watch("unknown-proxy").is_none());
    }

    #[tokio::test]
    async fn known_node_id_streams_published_snapshot() {
        let (writer, reader) = proxy_cache_pair();
        writer.apply("proxy1", &spec()).unwrap();

        let mut rx = reader.watch("proxy1").unwrap();
        let snap = rx.borrow_and_update().clone();
        assert_eq!(snap.version, 1);
        assert_eq!(snap.clusters.len(), 1);
    }
}
