//! The hierarchical Infra reconciler (§4.1): derives the three child specs
//! from one `Infra`, applies them, folds their status back up, and drives
//! the apps-ingress sub-reconciler (§4.2). `finalizer()`-wrapped
//! `reconcile`/`cleanup`, a module-level `error_policy`, and an `init()`
//! returning `(BoxFuture<'static, ()>, State)`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::StreamExt;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::finalizer::{finalizer, Event as FinalizerEvent};
use kube::{Client, Resource, ResourceExt};
use serde_json::json;
use tracing::{error, info, warn};

use hcinfra_k8s_api::common::Condition;
use hcinfra_k8s_api::dhcpserver::{DHCPServer, DHCPServerStatus};
use hcinfra_k8s_api::dnsserver::{DNSServer, DNSServerStatus};
use hcinfra_k8s_api::infra::{AppsIngressStatus, Infra, InfraStatus};
use hcinfra_k8s_api::proxyserver::{ProxyServer, ProxyServerStatus};

use crate::apply::apply;
use crate::context::{Context, State};
use crate::derive::{child_name, derive_dhcp_spec, derive_dns_spec, derive_proxy_spec, DHCP_COMPONENT, DNS_COMPONENT, PROXY_COMPONENT};
use crate::error::{Error, Result};
use crate::labels::owned_meta;

pub static FINALIZER: &str = "infra.hostedcluster.densityops.com";

/// Offsets from the network address used to assign fixed server IPs when
/// `ComponentConfig.serverIP` is not given (§4.1 derivation; the exact
/// offsets reproduce the fixtures `derive.rs`'s unit tests were written
/// against — recorded as a derivation decision in DESIGN.md).
fn default_server_ip(cidr: &str, offset: u32) -> Result<String> {
    let parsed = hcinfra_core::net::Cidr::parse(cidr)?;
    let network = u32::from(parsed.network());
    Ok(std::net::Ipv4Addr::from(network + offset).to_string())
}

fn component_enabled(c: &Option<hcinfra_k8s_api::infra::ComponentConfig>) -> bool {
    c.as_ref().map(|cfg| cfg.enabled).unwrap_or(true)
}

fn component_image<'a>(c: &'a Option<hcinfra_k8s_api::infra::ComponentConfig>, default: &'a str) -> &'a str {
    c.as_ref().and_then(|cfg| cfg.image.as_deref()).unwrap_or(default)
}

const DEFAULT_DHCP_IMAGE: &str = "quay.io/densityops/hcinfra-dhcp:latest";
const DEFAULT_DNS_IMAGE: &str = "coredns/coredns:latest";
const DEFAULT_PROXY_DATA_PLANE_IMAGE: &str = "envoyproxy/envoy:v1.28-latest";
const DEFAULT_PROXY_CONTROL_PLANE_IMAGE: &str = "quay.io/densityops/hcinfra-proxy-configurator:latest";

async fn reconcile(infra: Arc<Infra>, ctx: Arc<Context>) -> Result<Action> {
    let _timer = ctx.metrics.count_and_measure("infra");
    ctx.diagnostics.write().await.last_event = Utc::now();
    let ns = infra.namespace().ok_or_else(|| Error::MissingField {
        resource: "Infra",
        name: infra.name_any(),
        field: "namespace",
    })?;
    let api: Api<Infra> = Api::namespaced(ctx.client.clone(), &ns);

    info!("reconciling Infra {}/{}", ns, infra.name_any());
    finalizer(&api, FINALIZER, infra, |event| async {
        match event {
            FinalizerEvent::Apply(infra) => apply_infra(&infra, ctx.clone()).await,
            FinalizerEvent::Cleanup(infra) => cleanup(&infra, ctx.clone()).await,
        }
    })
    .await
    .map_err(|e| Error::FinalizerError(Box::new(e)))
}

async fn apply_infra(infra: &Infra, ctx: Arc<Context>) -> Result<Action> {
    let ns = infra.namespace().unwrap();
    let name = infra.name_any();
    let generation = infra.meta().generation.unwrap_or_default();
    let client = ctx.client.clone();

    let dhcp_enabled = component_enabled(&infra.spec.components.dhcp);
    let dns_enabled = component_enabled(&infra.spec.components.dns);
    let proxy_enabled = component_enabled(&infra.spec.components.proxy);

    let dhcp_api: Api<DHCPServer> = Api::namespaced(client.clone(), &ns);
    let dns_api: Api<DNSServer> = Api::namespaced(client.clone(), &ns);
    let proxy_api: Api<ProxyServer> = Api::namespaced(client.clone(), &ns);

    let proxy_name = child_name(&name, PROXY_COMPONENT);
    let dns_name = child_name(&name, DNS_COMPONENT);
    let dhcp_name = child_name(&name, DHCP_COMPONENT);

    // Proxy first: its service ClusterIP feeds DNS's internal view.
    let mut proxy_status: Option<ProxyServerStatus> = None;
    if proxy_enabled {
        let server_ip = match &infra.spec.components.proxy {
            Some(c) if c.server_ip.is_some() => c.server_ip.clone().unwrap(),
            _ => default_server_ip(&infra.spec.network.cidr, 4)?,
        };
        let spec = derive_proxy_spec(
            &infra.spec,
            &name,
            &ns,
            &server_ip,
            component_image(&infra.spec.components.proxy, DEFAULT_PROXY_DATA_PLANE_IMAGE),
            DEFAULT_PROXY_CONTROL_PLANE_IMAGE,
        );
        let meta = owned_meta(infra, &proxy_name, &ns, PROXY_COMPONENT);
        let value = json!({
            "apiVersion": format!("{}/{}", hcinfra_core::API_GROUP, hcinfra_core::API_VERSION),
            "kind": "ProxyServer",
            "metadata": { "name": meta.name, "namespace": meta.namespace, "labels": meta.labels, "ownerReferences": meta.owner_references },
            "spec": spec,
        });
        apply(&proxy_api, &proxy_name, value).await?;
        proxy_status = proxy_api.get_status(&proxy_name).await.ok().and_then(|p| p.status);
    }

    let internal_proxy_ip = proxy_status
        .as_ref()
        .and_then(|s| s.service_cluster_ip.clone());

    if dns_enabled {
        let server_ip = match &infra.spec.components.dns {
            Some(c) if c.server_ip.is_some() => c.server_ip.clone().unwrap(),
            _ => default_server_ip(&infra.spec.network.cidr, 3)?,
        };
        let external_proxy_ip = match &infra.spec.components.proxy {
            Some(c) if c.server_ip.is_some() => c.server_ip.clone().unwrap(),
            _ => default_server_ip(&infra.spec.network.cidr, 4)?,
        };
        let spec = derive_dns_spec(&infra.spec, &ns, &server_ip, &external_proxy_ip, internal_proxy_ip.as_deref());
        let meta = owned_meta(infra, &dns_name, &ns, DNS_COMPONENT);
        let value = json!({
            "apiVersion": format!("{}/{}", hcinfra_core::API_GROUP, hcinfra_core::API_VERSION),
            "kind": "DNSServer",
            "metadata": { "name": meta.name, "namespace": meta.namespace, "labels": meta.labels, "ownerReferences": meta.owner_references },
            "spec": spec,
        });
        apply(&dns_api, &dns_name, value).await?;
    }

    if dhcp_enabled {
        let server_ip = match &infra.spec.components.dhcp {
            Some(c) if c.server_ip.is_some() => c.server_ip.clone().unwrap(),
            _ => default_server_ip(&infra.spec.network.cidr, 2)?,
        };
        let spec = derive_dhcp_spec(
            &infra.spec,
            &ns,
            &server_ip,
            component_image(&infra.spec.components.dhcp, DEFAULT_DHCP_IMAGE),
        )?;
        let meta = owned_meta(infra, &dhcp_name, &ns, DHCP_COMPONENT);
        let value = json!({
            "apiVersion": format!("{}/{}", hcinfra_core::API_GROUP, hcinfra_core::API_VERSION),
            "kind": "DHCPServer",
            "metadata": { "name": meta.name, "namespace": meta.namespace, "labels": meta.labels, "ownerReferences": meta.owner_references },
            "spec": spec,
        });
        apply(&dhcp_api, &dhcp_name, value).await?;
    }

    let dhcp_ready = !dhcp_enabled
        || dhcp_api
            .get_status(&dhcp_name)
            .await
            .ok()
            .and_then(|d| d.status)
            .map(|s: DHCPServerStatus| s.conditions.iter().any(|c| c.type_ == "Ready" && c.status == "True"))
            .unwrap_or(false);
    let dns_ready = !dns_enabled
        || dns_api
            .get_status(&dns_name)
            .await
            .ok()
            .and_then(|d| d.status)
            .map(|s: DNSServerStatus| s.conditions.iter().any(|c| c.type_ == "Ready" && c.status == "True"))
            .unwrap_or(false);
    let proxy_ready = !proxy_enabled
        || proxy_status
            .as_ref()
            .map(|s| s.conditions.iter().any(|c| c.type_ == "Ready" && c.status == "True"))
            .unwrap_or(false);

    let apps_ingress_status = if let Some(spec) = &infra.spec.apps_ingress {
        if spec.enabled {
            Some(crate::apps_ingress::reconcile(infra, spec, ctx.clone()).await?)
        } else {
            None
        }
    } else {
        None
    };
    let apps_ingress_ready = apps_ingress_status
        .as_ref()
        .map(|s: &AppsIngressStatus| s.phase == "Ready")
        .unwrap_or(true);

    let all_ready = dhcp_ready && dns_ready && proxy_ready && apps_ingress_ready;
    let condition = Condition::ready(
        all_ready,
        if all_ready { "AllComponentsReady" } else { "ComponentsNotReady" },
        if all_ready {
            "dhcp, dns, proxy and apps-ingress all report ready".to_owned()
        } else {
            format!(
                "dhcpReady={dhcp_ready} dnsReady={dns_ready} proxyReady={proxy_ready} appsIngressReady={apps_ingress_ready}"
            )
        }
        .as_str(),
        generation,
    );

    let status = InfraStatus {
        dhcp_ready,
        dns_ready,
        proxy_ready,
        conditions: vec![condition],
        observed_generation: generation,
        apps_ingress: apps_ingress_status,
    };
    let infra_api: Api<Infra> = Api::namespaced(client, &ns);
    let patch = Patch::Merge(json!({ "status": status }));
    infra_api
        .patch_status(&name, &PatchParams::default(), &patch)
        .await
        .map_err(Error::KubeError)?;

    Ok(Action::requeue(Duration::from_secs(30)))
}

async fn cleanup(infra: &Infra, ctx: Arc<Context>) -> Result<Action> {
    if let Some(spec) = &infra.spec.apps_ingress {
        crate::apps_ingress::cleanup(infra, spec, ctx.clone()).await?;
    }
    Ok(Action::await_change())
}

fn error_policy(infra: Arc<Infra>, error: &Error, ctx: Arc<Context>) -> Action {
    warn!(infra = %infra.name_any(), "infra reconcile failed: {error:?}");
    ctx.metrics.record_failure("infra", error.metric_label());
    Action::requeue(Duration::from_secs(5 * 60))
}

pub async fn init(client: Client) -> (BoxFuture<'static, ()>, State) {
    let state = State::default();
    let api = Api::<Infra>::all(client.clone());
    if let Err(e) = api.list(&ListParams::default().limit(1)).await {
        error!("Infra CRD is not queryable; {e:?}. Is the CRD installed?");
        info!("Installation: controller crdgen | kubectl apply -f -");
        std::process::exit(1);
    }
    let controller = Controller::new(api, ListParams::default())
        .owns(Api::<DHCPServer>::all(client.clone()), ListParams::default())
        .owns(Api::<DNSServer>::all(client.clone()), ListParams::default())
        .owns(Api::<ProxyServer>::all(client.clone()), ListParams::default())
        .run(reconcile, error_policy, state.create_context(client))
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .boxed();
    (controller, state)
}
