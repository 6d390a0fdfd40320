//! The Proxy child reconciler (§4.6): renders the data-plane/configurator
//! bootstrap, materializes the workload (data-plane container plus
//! configurator sidecar), its `ClusterIP` `Service` and watch RBAC, and
//! validates the backend list compiles to a snapshot (§4.7 step 1) before
//! reporting Ready — the actual snapshot publication to the running
//! configurator sidecar happens out-of-band, driven by the `controller`
//! binary's `proxy` subcommand watching `ProxyServer` directly.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::StreamExt;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::finalizer::{finalizer, Event as FinalizerEvent};
use kube::{Client, ResourceExt};
use serde_json::json;
use tracing::{error, info, warn};

use hcinfra_core::snapshot;
use hcinfra_k8s_api::common::Condition;
use hcinfra_k8s_api::proxyserver::{Backend as SpecBackend, ProxyServer, ProxyServerStatus};

use crate::apply::apply;
use crate::context::{Context, State};
use crate::error::{Error, Result};
use crate::workloads::{cluster_role_and_binding, privileged_binding, role_and_binding, service, service_account, ContainerSpec};

pub static FINALIZER: &str = "proxyserver.hostedcluster.densityops.com";

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

async fn reconcile(proxy: Arc<ProxyServer>, ctx: Arc<Context>) -> Result<Action> {
    let _timer = ctx.metrics.count_and_measure("proxy");
    ctx.diagnostics.write().await.last_event = Utc::now();
    let ns = proxy.namespace().ok_or_else(|| Error::MissingField {
        resource: "ProxyServer",
        name: proxy.name_any(),
        field: "namespace",
    })?;
    let api: Api<ProxyServer> = Api::namespaced(ctx.client.clone(), &ns);

    info!("reconciling ProxyServer {}/{}", ns, proxy.name_any());
    finalizer(&api, FINALIZER, proxy, |event| async {
        match event {
            FinalizerEvent::Apply(proxy) => apply_proxy(&proxy, ctx.clone()).await,
            FinalizerEvent::Cleanup(proxy) => cleanup(&proxy, ctx.clone()).await,
        }
    })
    .await
    .map_err(|e| Error::FinalizerError(Box::new(e)))
}

async fn apply_proxy(proxy: &ProxyServer, ctx: Arc<Context>) -> Result<Action> {
    let ns = proxy.namespace().unwrap();
    let name = proxy.name_any();
    let generation = proxy.meta().generation.unwrap_or_default();
    let client = ctx.client.clone();

    let backends: Vec<snapshot::Backend> = proxy.spec.backends.iter().map(to_core_backend).collect();
    let compiled = snapshot::compile(&name, &backends);
    let backend_count = proxy.spec.backends.len() as i32;

    let sa_name = format!("{name}-sa");
    let sa = service_account(proxy, &sa_name, &ns, "proxy");
    apply(
        &Api::namespaced(client.clone(), &ns),
        &sa_name,
        serde_json::to_value(&sa).map_err(Error::SerializationError)?,
    )
    .await?;

    let bootstrap = render_bootstrap(&name, proxy.spec.configurator_port);
    let config_map_name = format!("{name}-bootstrap");
    let cm = crate::workloads::config_map(proxy, &config_map_name, &ns, "proxy", "bootstrap.json", bootstrap);
    apply(
        &Api::namespaced(client.clone(), &ns),
        &config_map_name,
        serde_json::to_value(&cm).map_err(Error::SerializationError)?,
    )
    .await?;

    let network_annotation = hcinfra_core::net::attachment_annotation(
        &proxy.spec.network.attachment.name,
        proxy.spec.network.attachment.namespace.as_deref(),
        &proxy.spec.network.server_ip,
        None,
    );

    let deploy = crate::workloads::deployment(
        proxy,
        &name,
        &ns,
        "proxy",
        network_annotation,
        Some(&sa_name),
        vec![
            ContainerSpec {
                name: "data-plane".to_owned(),
                image: proxy.spec.data_plane_image.clone(),
                args: vec!["-c".to_owned(), "/etc/envoy/bootstrap.json".to_owned(), "--log-level".to_owned(), proxy.spec.log_level.clone()],
                ports: vec![proxy.spec.listen_port as i32, 9901],
                env: vec![],
                volume_mounts: vec![("bootstrap".to_owned(), "/etc/envoy".to_owned())],
            },
            ContainerSpec {
                name: "configurator".to_owned(),
                image: proxy.spec.control_plane_image.clone(),
                args: vec![
                    "proxy".to_owned(),
                    "--xds-port".to_owned(),
                    proxy.spec.configurator_port.to_string(),
                    "--namespace".to_owned(),
                    ns.clone(),
                    "--proxy-name".to_owned(),
                    name.clone(),
                ],
                ports: vec![proxy.spec.configurator_port as i32],
                env: vec![],
                volume_mounts: vec![],
            },
        ],
        vec![("bootstrap".to_owned(), config_map_name.clone())],
        vec![],
    );
    apply(
        &Api::namespaced(client.clone(), &ns),
        &name,
        serde_json::to_value(&deploy).map_err(Error::SerializationError)?,
    )
    .await?;

    let service_name = format!("{name}-svc");
    let svc = service(
        proxy,
        &service_name,
        &ns,
        "proxy",
        vec![("proxy", proxy.spec.listen_port as i32, proxy.spec.listen_port as i32)],
    );
    let applied_svc: k8s_openapi::api::core::v1::Service = apply(
        &Api::namespaced(client.clone(), &ns),
        &service_name,
        serde_json::to_value(&svc).map_err(Error::SerializationError)?,
    )
    .await?;
    let cluster_ip = applied_svc.spec.and_then(|s| s.cluster_ip);

    let (role, binding) = role_and_binding(
        proxy,
        &ns,
        "proxy",
        &name,
        "hostedcluster.densityops.com",
        vec!["proxyservers".to_owned()],
        &sa_name,
    );
    apply(
        &Api::namespaced(client.clone(), &ns),
        role.name_any().as_str(),
        serde_json::to_value(&role).map_err(Error::SerializationError)?,
    )
    .await?;
    apply(
        &Api::namespaced(client.clone(), &ns),
        binding.name_any().as_str(),
        serde_json::to_value(&binding).map_err(Error::SerializationError)?,
    )
    .await?;

    let privileged = privileged_binding(&format!("hcinfra-proxy-{ns}-{name}"), &sa_name, &ns);
    apply(&Api::all(client.clone()), privileged.name_any().as_str(), serde_json::to_value(&privileged).map_err(Error::SerializationError)?).await?;

    if let Some(control_plane_namespace) = &proxy.spec.control_plane_namespace {
        let policy = crate::workloads::infrastructure_ingress_policy(
            &format!("hcinfra-proxy-{ns}-{name}"),
            control_plane_namespace,
        );
        apply(
            &Api::namespaced(client.clone(), control_plane_namespace),
            policy.name_any().as_str(),
            serde_json::to_value(&policy).map_err(Error::SerializationError)?,
        )
        .await?;
    }

    let (ready, reason, message) = match compiled {
        Ok(_) => (true, "SnapshotCompiled".to_owned(), format!("{backend_count} backends compiled")),
        Err(e) => (false, "SnapshotCompileFailed".to_owned(), e.to_string()),
    };
    let condition = Condition::ready(ready, &reason, &message, generation);
    let status = ProxyServerStatus {
        config_object_name: Some(config_map_name),
        workload_name: Some(name.clone()),
        service_name: Some(service_name),
        service_cluster_ip: cluster_ip,
        backend_count,
        conditions: vec![condition],
        observed_generation: generation,
    };
    let api: Api<ProxyServer> = Api::namespaced(client, &ns);
    api.patch_status(&name, &PatchParams::default(), &Patch::Merge(json!({ "status": status })))
        .await
        .map_err(Error::KubeError)?;

    Ok(Action::requeue(Duration::from_secs(30)))
}

/// Renders the data-plane bootstrap (§4.7, §6 "Bootstrap"): a static
/// listener/cluster-less config whose only job is to point the data plane
/// at the sidecar configurator over gRPC for everything dynamic.
fn render_bootstrap(proxy_name: &str, configurator_port: u16) -> String {
    let bootstrap = json!({
        "node": { "id": proxy_name, "cluster": proxy_name },
        "admin": {
            "address": { "socket_address": { "address": "0.0.0.0", "port_value": 9901 } }
        },
        "dynamic_resources": {
            "ads_config": {
                "api_type": "GRPC",
                "transport_api_version": "V3",
                "grpc_services": [{ "envoy_grpc": { "cluster_name": "xds_cluster" } }]
            },
            "cds_config": { "ads": {}, "resource_api_version": "V3" },
            "lds_config": { "ads": {}, "resource_api_version": "V3" }
        },
        "static_resources": {
            "clusters": [{
                "name": "xds_cluster",
                "connect_timeout": "1s",
                "type": "STATIC",
                "typed_extension_protocol_options": {
                    "envoy.extensions.upstreams.http.v3.HttpProtocolOptions": {
                        "@type": "type.googleapis.com/envoy.extensions.upstreams.http.v3.HttpProtocolOptions",
                        "explicit_http_config": { "http2_protocol_options": {} }
                    }
                },
                "load_assignment": {
                    "cluster_name": "xds_cluster",
                    "endpoints": [{
                        "lb_endpoints": [{
                            "endpoint": {
                                "address": { "socket_address": { "address": "127.0.0.1", "port_value": configurator_port } }
                            }
                        }]
                    }]
                }
            }]
        },
    });
    serde_json::to_string_pretty(&bootstrap).expect("bootstrap is always serializable")
}

async fn cleanup(proxy: &ProxyServer, ctx: Arc<Context>) -> Result<Action> {
    let ns = proxy.namespace().unwrap();
    let name = proxy.name_any();
    let cluster_bindings: Api<k8s_openapi::api::rbac::v1::ClusterRoleBinding> = Api::all(ctx.client.clone());
    let dp = kube::api::DeleteParams::default();
    let _ = cluster_bindings.delete(&format!("hcinfra-proxy-{ns}-{name}-privileged"), &dp).await;
    if let Some(control_plane_namespace) = &proxy.spec.control_plane_namespace {
        let policies: Api<k8s_openapi::api::networking::v1::NetworkPolicy> =
            Api::namespaced(ctx.client.clone(), control_plane_namespace);
        let _ = policies.delete(&format!("hcinfra-proxy-{ns}-{name}"), &dp).await;
    }
    Ok(Action::await_change())
}

fn error_policy(proxy: Arc<ProxyServer>, error: &Error, ctx: Arc<Context>) -> Action {
    warn!(proxyserver = %proxy.name_any(), "proxy reconcile failed: {error:?}");
    ctx.metrics.record_failure("proxy", error.metric_label());
    Action::requeue(Duration::from_secs(5 * 60))
}

pub async fn init(client: Client) -> (BoxFuture<'static, ()>, State) {
    let state = State::default();
    let api = Api::<ProxyServer>::all(client.clone());
    if let Err(e) = api.list(&ListParams::default().limit(1)).await {
        error!("ProxyServer CRD is not queryable; {e:?}. Is the CRD installed?");
        std::process::exit(1);
    }
    let controller = Controller::new(api, ListParams::default())
        .run(reconcile, error_policy, state.create_context(client))
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .boxed();
    (controller, state)
}
