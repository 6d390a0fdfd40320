//! The DNS child reconciler (§4.5): renders a split-horizon Corefile into a
//! mounted `ConfigMap`, materializes the workload and its `ClusterIP`
//! `Service`, and republishes the service's cluster IP into status so the
//! Infra reconciler can thread it into the DNS spec's `internalProxyIP`
//! on a later pass.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::StreamExt;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::finalizer::{finalizer, Event as FinalizerEvent};
use kube::{Client, ResourceExt};
use serde_json::json;
use tracing::{error, info, warn};

use hcinfra_core::duration::{parse_duration, render_seconds};
use hcinfra_dns::corefile::{render as render_corefile, StaticEntry as CorefileStaticEntry, ZoneInput};
use hcinfra_k8s_api::common::Condition;
use hcinfra_k8s_api::dnsserver::{DNSServer, DNSServerStatus};

use crate::apply::apply;
use crate::context::{Context, State};
use crate::error::{Error, Result};
use crate::workloads::{config_map, service, ContainerSpec};

pub static FINALIZER: &str = "dnsserver.hostedcluster.densityops.com";
const CONFIG_KEY: &str = "Corefile";

async fn reconcile(dns: Arc<DNSServer>, ctx: Arc<Context>) -> Result<Action> {
    let _timer = ctx.metrics.count_and_measure("dns");
    ctx.diagnostics.write().await.last_event = Utc::now();
    let ns = dns.namespace().ok_or_else(|| Error::MissingField {
        resource: "DNSServer",
        name: dns.name_any(),
        field: "namespace",
    })?;
    let api: Api<DNSServer> = Api::namespaced(ctx.client.clone(), &ns);

    info!("reconciling DNSServer {}/{}", ns, dns.name_any());
    finalizer(&api, FINALIZER, dns, |event| async {
        match event {
            FinalizerEvent::Apply(dns) => apply_dns(&dns, ctx.clone()).await,
            FinalizerEvent::Cleanup(dns) => cleanup(&dns, ctx.clone()).await,
        }
    })
    .await
    .map_err(|e| Error::FinalizerError(Box::new(e)))
}

async fn apply_dns(dns: &DNSServer, ctx: Arc<Context>) -> Result<Action> {
    let ns = dns.namespace().unwrap();
    let name = dns.name_any();
    let generation = dns.meta().generation.unwrap_or_default();
    let client = ctx.client.clone();

    let reload = render_seconds(parse_duration(&dns.spec.reload_interval).map_err(|_| Error::MissingField {
        resource: "DNSServer",
        name: name.clone(),
        field: "reloadInterval",
    })?);
    let cache_ttl = render_seconds(parse_duration(&dns.spec.cache_ttl).map_err(|_| Error::MissingField {
        resource: "DNSServer",
        name: name.clone(),
        field: "cacheTTL",
    })?);

    let zone = ZoneInput {
        port: dns.spec.network.port,
        secondary_cidr: dns.spec.network.secondary_cidr.clone(),
        external_proxy_ip: dns.spec.network.external_proxy_ip.clone(),
        internal_proxy_ip: dns.spec.network.internal_proxy_ip.clone(),
        static_entries: dns
            .spec
            .static_entries
            .iter()
            .map(|e| CorefileStaticEntry {
                hostname: e.hostname.clone(),
                ipv4: e.ipv4.clone(),
            })
            .collect(),
        upstream_resolvers: dns.spec.upstream_resolvers.clone(),
        reload_interval_secs: reload,
        cache_ttl_secs: cache_ttl,
    };
    let corefile = render_corefile(&zone);

    let config_map_name = format!("{name}-config");
    let cm = config_map(dns, &config_map_name, &ns, "dns", CONFIG_KEY, corefile);
    apply(
        &Api::namespaced(client.clone(), &ns),
        &config_map_name,
        serde_json::to_value(&cm).map_err(Error::SerializationError)?,
    )
    .await?;

    let network_annotation = hcinfra_core::net::attachment_annotation(
        &dns.spec.network.attachment.name,
        dns.spec.network.attachment.namespace.as_deref(),
        &dns.spec.network.server_ip,
        Some(&dns.spec.network.secondary_cidr),
    );

    let deploy = crate::workloads::deployment(
        dns,
        &name,
        &ns,
        "dns",
        network_annotation,
        None,
        vec![ContainerSpec {
            name: "coredns".to_owned(),
            image: "coredns/coredns:latest".to_owned(),
            args: vec!["-conf".to_owned(), format!("/etc/coredns/{CONFIG_KEY}")],
            ports: vec![dns.spec.network.port as i32, 8080, 8181],
            env: vec![],
            volume_mounts: vec![("config".to_owned(), "/etc/coredns".to_owned())],
        }],
        vec![("config".to_owned(), config_map_name.clone())],
        vec![],
    );
    apply(
        &Api::namespaced(client.clone(), &ns),
        &name,
        serde_json::to_value(&deploy).map_err(Error::SerializationError)?,
    )
    .await?;

    let service_name = format!("{name}-svc");
    let port = dns.spec.network.port as i32;
    let svc = service(
        dns,
        &service_name,
        &ns,
        "dns",
        vec![("dns-udp", port, port), ("dns-tcp", port, port), ("health", 8080, 8080), ("ready", 8181, 8181)],
    );
    let applied_svc: k8s_openapi::api::core::v1::Service = apply(
        &Api::namespaced(client.clone(), &ns),
        &service_name,
        serde_json::to_value(&svc).map_err(Error::SerializationError)?,
    )
    .await?;
    let cluster_ip = applied_svc.spec.and_then(|s| s.cluster_ip);

    let condition = Condition::ready(true, "WorkloadApplied", "corefile, deployment and service applied", generation);
    let status = DNSServerStatus {
        config_object_name: Some(config_map_name),
        workload_name: Some(name.clone()),
        service_name: Some(service_name),
        service_cluster_ip: cluster_ip,
        conditions: vec![condition],
        observed_generation: generation,
    };
    let api: Api<DNSServer> = Api::namespaced(client, &ns);
    api.patch_status(&name, &PatchParams::default(), &Patch::Merge(json!({ "status": status })))
        .await
        .map_err(Error::KubeError)?;

    Ok(Action::requeue(StdDuration::from_secs(60)))
}

async fn cleanup(_dns: &DNSServer, _ctx: Arc<Context>) -> Result<Action> {
    Ok(Action::await_change())
}

fn error_policy(dns: Arc<DNSServer>, error: &Error, ctx: Arc<Context>) -> Action {
    warn!(dnsserver = %dns.name_any(), "dns reconcile failed: {error:?}");
    ctx.metrics.record_failure("dns", error.metric_label());
    Action::requeue(StdDuration::from_secs(5 * 60))
}

pub async fn init(client: Client) -> (BoxFuture<'static, ()>, State) {
    let state = State::default();
    let api = Api::<DNSServer>::all(client.clone());
    if let Err(e) = api.list(&ListParams::default().limit(1)).await {
        error!("DNSServer CRD is not queryable; {e:?}. Is the CRD installed?");
        std::process::exit(1);
    }
    let controller = Controller::new(api, ListParams::default())
        .run(reconcile, error_policy, state.create_context(client))
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .boxed();
    (controller, state)
}
