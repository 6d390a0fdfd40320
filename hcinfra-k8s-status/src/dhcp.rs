//! The DHCP child reconciler (§4.3): renders the engine's text config into a
//! mounted `ConfigMap`, materializes the workload and its RBAC, and leaves
//! `activeLeases`/`totalLeases` to the running engine's own status-patch
//! (§9 "DHCP plugin shared-state": the lease store lives inside the running
//! pod; the reconciler never opens the SQLite file itself).

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

use hcinfra_dhcp::config::render as render_dhcp_config;
use hcinfra_k8s_api::common::Condition;
use hcinfra_k8s_api::dhcpserver::{DHCPServer, DHCPServerStatus};

use crate::apply::apply;
use crate::context::{Context, State};
use crate::error::{Error, Result};
use crate::labels::owned_meta;
use crate::workloads::{cluster_role_and_binding, config_map, persistent_volume_claim, privileged_binding, service_account, ContainerSpec};

pub static FINALIZER: &str = "dhcpserver.hostedcluster.densityops.com";
const CONFIG_KEY: &str = "config.yaml";
const LEASE_DB_PATH: &str = "/var/lib/dhcp/leases.db";

async fn reconcile(dhcp: Arc<DHCPServer>, ctx: Arc<Context>) -> Result<Action> {
    let _timer = ctx.metrics.count_and_measure("dhcp");
    ctx.diagnostics.write().await.last_event = Utc::now();
    let ns = dhcp.namespace().ok_or_else(|| Error::MissingField {
        resource: "DHCPServer",
        name: dhcp.name_any(),
        field: "namespace",
    })?;
    let api: Api<DHCPServer> = Api::namespaced(ctx.client.clone(), &ns);

    info!("reconciling DHCPServer {}/{}", ns, dhcp.name_any());
    finalizer(&api, FINALIZER, dhcp, |event| async {
        match event {
            FinalizerEvent::Apply(dhcp) => apply_dhcp(&dhcp, ctx.clone()).await,
            FinalizerEvent::Cleanup(dhcp) => cleanup(&dhcp, ctx.clone()).await,
        }
    })
    .await
    .map_err(|e| Error::FinalizerError(Box::new(e)))
}

async fn apply_dhcp(dhcp: &DHCPServer, ctx: Arc<Context>) -> Result<Action> {
    let ns = dhcp.namespace().unwrap();
    let name = dhcp.name_any();
    let generation = dhcp.meta().generation.unwrap_or_default();
    let client = ctx.client.clone();

    let server_ip: std::net::Ipv4Addr = hcinfra_core::net::parse_ipv4(&dhcp.spec.network.server_ip)?.into();
    let gateway: std::net::Ipv4Addr = hcinfra_core::net::parse_ipv4(&dhcp.spec.network.gateway)?.into();
    let first_resolver = dhcp
        .spec
        .network
        .upstream_resolvers
        .first()
        .and_then(|s| hcinfra_core::net::parse_ipv4(s).ok());
    let range_start: std::net::Ipv4Addr = hcinfra_core::net::parse_ipv4(&dhcp.spec.lease.range_start)?.into();
    let range_end: std::net::Ipv4Addr = hcinfra_core::net::parse_ipv4(&dhcp.spec.lease.range_end)?.into();

    let cfg = render_dhcp_config(
        server_ip,
        gateway,
        first_resolver,
        LEASE_DB_PATH,
        range_start,
        range_end,
        Some(&dhcp.spec.lease.lease_duration),
    );
    let config_text = hcinfra_dhcp::config::render_text(&cfg);

    let config_map_name = format!("{name}-config");
    let sa_name = format!("{name}-sa");
    let pvc_name = format!("{name}-leases");

    let cm = config_map(dhcp, &config_map_name, &ns, "dhcp", CONFIG_KEY, config_text);
    apply(
        &Api::namespaced(client.clone(), &ns),
        &config_map_name,
        serde_json::to_value(&cm).map_err(Error::SerializationError)?,
    )
    .await?;

    let sa = service_account(dhcp, &sa_name, &ns, "dhcp");
    apply(
        &Api::namespaced(client.clone(), &ns),
        &sa_name,
        serde_json::to_value(&sa).map_err(Error::SerializationError)?,
    )
    .await?;

    let pvc = persistent_volume_claim(dhcp, &pvc_name, &ns, "dhcp", "1Gi");
    apply(
        &Api::namespaced(client.clone(), &ns),
        &pvc_name,
        serde_json::to_value(&pvc).map_err(Error::SerializationError)?,
    )
    .await?;

    let network_annotation = hcinfra_core::net::attachment_annotation(
        &dhcp.spec.network.attachment.name,
        dhcp.spec.network.attachment.namespace.as_deref(),
        &dhcp.spec.network.server_ip,
        Some(&dhcp.spec.network.cidr),
    );

    let deploy = crate::workloads::deployment(
        dhcp,
        &name,
        &ns,
        "dhcp",
        network_annotation,
        Some(&sa_name),
        vec![ContainerSpec {
            name: "dhcp".to_owned(),
            image: dhcp.spec.image.clone(),
            args: vec!["dhcp".to_owned(), "--config-file".to_owned(), format!("/etc/hcinfra/{CONFIG_KEY}")],
            ports: vec![67],
            env: vec![("HCINFRA_DHCPSERVER_NAME".to_owned(), name.clone()), ("HCINFRA_NAMESPACE".to_owned(), ns.clone())],
            volume_mounts: vec![("config".to_owned(), "/etc/hcinfra".to_owned()), ("leases".to_owned(), "/var/lib/dhcp".to_owned())],
        }],
        vec![("config".to_owned(), config_map_name)],
        vec![("leases".to_owned(), pvc_name)],
    );
    apply(
        &Api::namespaced(client.clone(), &ns),
        &name,
        serde_json::to_value(&deploy).map_err(Error::SerializationError)?,
    )
    .await?;

    let (role, binding) = crate::workloads::role_and_binding(
        dhcp,
        &ns,
        "dhcp",
        &name,
        "hostedcluster.densityops.com",
        vec!["dhcpservers".to_owned(), "dhcpservers/status".to_owned()],
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

    let (cluster_role, cluster_binding) = cluster_role_and_binding(
        &format!("hcinfra-dhcp-{ns}-{name}"),
        "kubevirt.io",
        vec!["virtualmachineinstances".to_owned()],
        &sa_name,
        &ns,
    );
    apply(&Api::all(client.clone()), cluster_role.name_any().as_str(), serde_json::to_value(&cluster_role).map_err(Error::SerializationError)?).await?;
    apply(&Api::all(client.clone()), cluster_binding.name_any().as_str(), serde_json::to_value(&cluster_binding).map_err(Error::SerializationError)?).await?;

    let privileged = privileged_binding(&format!("hcinfra-dhcp-{ns}-{name}"), &sa_name, &ns);
    apply(&Api::all(client.clone()), privileged.name_any().as_str(), serde_json::to_value(&privileged).map_err(Error::SerializationError)?).await?;

    let current = Api::<DHCPServer>::namespaced(client.clone(), &ns)
        .get_status(&name)
        .await
        .ok()
        .and_then(|d| d.status)
        .unwrap_or_default();

    let condition = Condition::ready(true, "WorkloadApplied", "config, deployment and RBAC applied", generation);
    let status = DHCPServerStatus {
        active_leases: current.active_leases,
        total_leases: current.total_leases,
        conditions: vec![condition],
        observed_generation: generation,
    };
    let api: Api<DHCPServer> = Api::namespaced(client, &ns);
    api.patch_status(&name, &PatchParams::default(), &Patch::Merge(json!({ "status": status })))
        .await
        .map_err(Error::KubeError)?;

    Ok(Action::requeue(Duration::from_secs(60)))
}

async fn cleanup(dhcp: &DHCPServer, ctx: Arc<Context>) -> Result<Action> {
    let ns = dhcp.namespace().unwrap();
    let name = dhcp.name_any();
    let cluster_roles: Api<k8s_openapi::api::rbac::v1::ClusterRole> = Api::all(ctx.client.clone());
    let cluster_bindings: Api<k8s_openapi::api::rbac::v1::ClusterRoleBinding> = Api::all(ctx.client.clone());
    let dp = kube::api::DeleteParams::default();
    let _ = cluster_bindings.delete(&format!("hcinfra-dhcp-{ns}-{name}-clusterrolebinding"), &dp).await;
    let _ = cluster_roles.delete(&format!("hcinfra-dhcp-{ns}-{name}-clusterrole"), &dp).await;
    let _ = cluster_bindings.delete(&format!("hcinfra-dhcp-{ns}-{name}-privileged"), &dp).await;
    Ok(Action::await_change())
}

fn error_policy(dhcp: Arc<DHCPServer>, error: &Error, ctx: Arc<Context>) -> Action {
    warn!(dhcpserver = %dhcp.name_any(), "dhcp reconcile failed: {error:?}");
    ctx.metrics.record_failure("dhcp", error.metric_label());
    Action::requeue(Duration::from_secs(5 * 60))
}

pub async fn init(client: Client) -> (BoxFuture<'static, ()>, State) {
    let state = State::default();
    let api = Api::<DHCPServer>::all(client.clone());
    if let Err(e) = api.list(&ListParams::default().limit(1)).await {
        error!("DHCPServer CRD is not queryable; {e:?}. Is the CRD installed?");
        std::process::exit(1);
    }
    let controller = Controller::new(api, ListParams::default())
        .run(reconcile, error_policy, state.create_context(client))
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .boxed();
    (controller, state)
}
