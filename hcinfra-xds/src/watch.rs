//! The Dynamic Proxy Configurator's own watch loop (§4.7 "Transitions"):
//! observes `ProxyServer` objects in one namespace (optionally filtered to
//! a single name — the sidecar shape, where a configurator only ever cares
//! about its own pod's `ProxyServer`) and, on every upsert, feeds the spec
//! into the [`ProxyCacheWriter`] so `build()` recompiles and republishes a
//! snapshot (§4.7 steps 1-6). Delete events remove the cached snapshot.
//!
//! Shaped like a plain `Controller::new(...).run(...)` watch loop but
//! without a finalizer: the configurator never mutates `ProxyServer`
//! itself, so there is nothing to clean up on delete beyond dropping the
//! cache entry.

use std::sync::Arc;

use futures::StreamExt;
use kube::api::Api;
use kube::runtime::watcher::{self, Event};
use kube::{Client, ResourceExt};
use tracing::{info, warn};

use hcinfra_k8s_api::proxyserver::ProxyServer;
use hcinfra_k8s_index::ProxyCacheWriter;

/// Runs until the watch stream ends (normally never, for a live
/// apiserver connection). Every `Event::Applied`/`Event::Restarted` republishes
/// the node's snapshot (§4.7 "On observed upsert"); `Event::Deleted` removes
/// it (§4.7 "On observed delete").
pub async fn run(client: Client, namespace: &str, proxy_name_filter: Option<&str>, writer: ProxyCacheWriter, metrics: Option<Arc<dyn SnapVersionSink>>) {
    let api: Api<ProxyServer> = Api::namespaced(client, namespace);
    let mut config = watcher::Config::default();
    if let Some(name) = proxy_name_filter {
        config = config.fields(&format!("metadata.name={name}"));
    }

    let mut stream = Box::pin(watcher::watcher(api, config));

    let publish = |proxy: &ProxyServer, writer: &ProxyCacheWriter, metrics: &Option<Arc<dyn SnapVersionSink>>| {
        let name = proxy.name_any();
        match writer.apply(&name, &proxy.spec) {
            Ok(()) => {
                info!(proxy = %name, "published new snapshot");
                if let Some(sink) = metrics {
                    sink.set_snap_version(&name, writer.reader().snap_version());
                }
            }
            Err(e) => warn!(proxy = %name, "snapshot compile failed, keeping previous snapshot live: {e}"),
        }
    };

    while let Some(event) = stream.next().await {
        match event {
            Ok(Event::Applied(proxy)) => {
                if proxy_name_filter.is_some_and(|f| f != proxy.name_any()) {
                    continue;
                }
                publish(&proxy, &writer, &metrics);
            }
            Ok(Event::Restarted(proxies)) => {
                for proxy in &proxies {
                    if proxy_name_filter.is_some_and(|f| f != proxy.name_any()) {
                        continue;
                    }
                    publish(proxy, &writer, &metrics);
                }
            }
            Ok(Event::Deleted(proxy)) => {
                let name = proxy.name_any();
                if proxy_name_filter.is_some_and(|f| f != name) {
                    continue;
                }
                info!(proxy = %name, "proxy deleted, dropping cached snapshot");
                writer.delete(&name);
            }
            Err(e) => warn!("proxy watch error: {e}"),
        }
    }
}

/// Small seam so `hcinfra-xds` doesn't depend on `hcinfra-k8s-status`'s
/// `Metrics` type just to record the snapshot-version gauge (§NEW
/// "Metrics"); the `proxy` subcommand supplies an adapter.
pub trait SnapVersionSink: Send + Sync {
    fn set_snap_version(&self, proxy: &str, version: u64);
}
