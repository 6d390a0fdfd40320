//! The Dynamic Proxy Configurator's state machine (§4.7): a monotonic
//! `snapVersion` shared across all watched proxies, a `proxies` map of
//! last-seen specs, and a `cache` of per-node-id snapshots streamed out to
//! the gRPC layer via `tokio::sync::watch`, split into a `Writer` side
//! (held by the watch loop) and a cheaply-cloned `Reader` side (handed to
//! every gRPC stream).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use hcinfra_core::snapshot::{self, Snapshot};
use hcinfra_k8s_api::proxyserver::{Backend as SpecBackend, ProxyServerSpec};
use tokio::sync::watch;

fn to_core_backend(b: &SpecBackend) -> snapshot::Backend {
    snapshot::Backend {
        name: b.name.clone(),
        hostname: b.hostname.clone(),
        alternate_hostnames: b.alternate_hostnames.clone().unwrap_or_default(),
        port: b.port,
        target_service: b.target_service.clone(),
        target_port: b.target_port,
        target_namespace: b.target_namespace.clone(),
        protocol: match b.protocol {
            hcinfra_k8s_api::common::Protocol::Tcp => snapshot::TransportProtocol::Tcp,
            hcinfra_k8s_api::common::Protocol::Udp => snapshot::TransportProtocol::Udp,
        },
        timeout: Duration::from_secs(b.timeout_seconds as u64),
    }
}

struct Inner {
    snap_version: u64,
    proxies: HashMap<String, ProxyServerSpec>,
    cache: HashMap<String, watch::Sender<Snapshot>>,
}

impl Inner {
    fn new() -> Self {
        Inner {
            snap_version: 0,
            proxies: HashMap::new(),
            cache: HashMap::new(),
        }
    }
}

#[derive(Clone)]
struct Shared(Arc<RwLock<Inner>>);

/// The write side: held by the reconciler/watcher loop that observes
/// `ProxyServer` changes.
#[derive(Clone)]
pub struct Writer(Shared);

/// The read side: cloned into every gRPC stream handler.
#[derive(Clone)]
pub struct Reader(Shared);

pub fn pair() -> (Writer, Reader) {
    let shared = Shared(Arc::new(RwLock::new(Inner::new())));
    (Writer(shared.clone()), Reader(shared))
}

impl Writer {
    /// §4.7 "Transitions, on observed upsert": rebuild the snapshot for
    /// `name` in full and publish it under node id `name`.
    pub fn apply(&self, name: &str, spec: &ProxyServerSpec) -> Result<(), snapshot::CompileError> {
        let mut inner = self.0 .0.write().expect("proxy cache lock poisoned");

        let backends: Vec<snapshot::Backend> = spec.backends.iter().map(to_core_backend).collect();
        let (listeners, clusters) = snapshot::compile(name, &backends)?;

        inner.snap_version += 1;
        let version = inner.snap_version;
        inner.proxies.insert(name.to_owned(), spec.clone());

        let snap = Snapshot {
            version,
            listeners,
            clusters,
        };

        match inner.cache.get(name) {
            Some(tx) => {
                let _ = tx.send(snap);
            }
            None => {
                let (tx, _rx) = watch::channel(snap);
                inner.cache.insert(name.to_owned(), tx);
            }
        }

        Ok(())
    }

    /// §4.7 "On observed delete": the engine reverts to its last good
    /// configuration because no further snapshot is ever published for
    /// this node id; existing watchers keep the last value until dropped.
    pub fn delete(&self, name: &str) {
        let mut inner = self.0 .0.write().expect("proxy cache lock poisoned");
        inner.proxies.remove(name);
        inner.cache.remove(name);
    }

    pub fn reader(&self) -> Reader {
        Reader(self.0.clone())
    }
}

impl Reader {
    pub fn get(&self, name: &str) -> Option<Snapshot> {
        let inner = self.0 .0.read().expect("proxy cache lock poisoned");
        inner.cache.get(name).map(|tx| tx.borrow().clone())
    }

    pub fn watch(&self, name: &str) -> Option<watch::Receiver<Snapshot>> {
        let inner = self.0 .0.read().expect("proxy cache lock poisoned");
        inner.cache.get(name).map(|tx| tx.subscribe())
    }

    pub fn snap_version(&self) -> u64 {
        self.0 .0.read().expect("proxy cache lock poisoned").snap_version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hcinfra_k8s_api::common::{AttachmentRef, Protocol};
    use hcinfra_k8s_api::proxyserver::ProxyNetwork;

    fn spec_with_backend(name: &str, hostname: &str, port: u16) -> ProxyServerSpec {
        ProxyServerSpec {
            network: ProxyNetwork {
                server_ip: "192.168.100.4".to_owned(),
                attachment: AttachmentRef {
                    name: "secondary".to_owned(),
                    namespace: None,
                },
            },
            backends: vec![SpecBackend {
                name: name.to_owned(),
                hostname: hostname.to_owned(),
                alternate_hostnames: None,
                port,
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
    fn version_strictly_increases_across_ten_updates_to_same_proxy() {
        let (writer, reader) = pair();
        let spec = spec_with_backend("api", "api.example.com", 443);
        for _ in 0..10 {
            writer.apply("proxy1", &spec).unwrap();
        }
        assert_eq!(reader.snap_version(), 10);
        assert_eq!(reader.get("proxy1").unwrap().version, 10);
    }

    #[test]
    fn each_proxy_publishes_under_its_own_node_id() {
        let (writer, reader) = pair();
        let spec1 = spec_with_backend("api", "api.example.com", 443);
        let spec2 = spec_with_backend("oauth", "oauth.example.com", 443);
        writer.apply("proxy1", &spec1).unwrap();
        writer.apply("proxy2", &spec2).unwrap();

        let s1 = reader.get("proxy1").unwrap();
        let s2 = reader.get("proxy2").unwrap();
        assert_ne!(s1.clusters[0].name, s2.clusters[0].name);
    }

    #[test]
    fn delete_removes_the_cached_snapshot() {
        let (writer, reader) = pair();
        let spec = spec_with_backend("api", "api.example.com", 443);
        writer.apply("proxy1", &spec).unwrap();
        assert!(reader.get("proxy1").is_some());
        writer.delete("proxy1");
        assert!(reader.get("proxy1").is_none());
    }

    #[tokio::test]
    async fn watchers_observe_published_updates() {
        let (writer, reader) = pair();
        let spec = spec_with_backend("api", "api.example.com", 443);
        writer.apply("proxy1", &spec).unwrap();

        let mut rx = reader.watch("proxy1").unwrap();
        let initial_version = rx.borrow().version;
        assert_eq!(initial_version, 1);

        writer.apply("proxy1", &spec).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().version, 2);
    }
}
