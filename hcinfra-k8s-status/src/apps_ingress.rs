//! The apps-ingress sub-reconciler (§4.2): reads the admin kubeconfig for
//! the referenced hosted cluster, opens a second `kube::Client` against it,
//! and ensures the LB-operator's address pool / L2 advertisement plus the
//! ingress `Service` exist there. Called from [`crate::infra`] rather than
//! run as its own `Controller` — it has no CRD of its own, only the
//! `AppsIngressStatus` folded into `InfraStatus`.

use std::sync::Arc;

use chrono::Utc;
use kube::api::{Api, DynamicObject, GroupVersionKind, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::ApiResource;
use kube::{Client, Config, ResourceExt};
use serde_json::json;

use hcinfra_k8s_api::infra::{AppsIngressSpec, AppsIngressStatus, Infra};

use crate::context::Context;
use crate::error::{Error, Result};

const FIELD_MANAGER: &str = "hcinfra-controller";

/// Convention this rewrite adopts for where a hosted cluster's admin
/// kubeconfig lives (§9, Open Question "apps-ingress optionality" left the
/// exact secret shape undefined): `<hostedClusterRef.name>-admin-kubeconfig`
/// in `hostedClusterRef.namespace`, under the `kubeconfig` data key —
/// recorded as a derivation decision in DESIGN.md.
fn kubeconfig_secret_name(hosted_cluster_name: &str) -> String {
    format!("{hosted_cluster_name}-admin-kubeconfig")
}

async fn hosted_cluster_client(spec: &AppsIngressSpec, local_client: &Client) -> Result<Client> {
    let secret_name = kubeconfig_secret_name(&spec.hosted_cluster_ref.name);
    let secrets: Api<k8s_openapi::api::core::v1::Secret> =
        Api::namespaced(local_client.clone(), &spec.hosted_cluster_ref.namespace);
    let secret = secrets.get(&secret_name).await.map_err(|e| {
        Error::HostedClusterAccessFailed(format!("fetching secret {secret_name}: {e}"))
    })?;
    let kubeconfig_bytes = secret
        .data
        .as_ref()
        .and_then(|d| d.get("kubeconfig"))
        .ok_or_else(|| Error::HostedClusterAccessFailed(format!("secret {secret_name} has no 'kubeconfig' key")))?;
    let kubeconfig_text = String::from_utf8(kubeconfig_bytes.0.clone())
        .map_err(|e| Error::HostedClusterAccessFailed(format!("kubeconfig is not valid UTF-8: {e}")))?;

    let kubeconfig = Kubeconfig::from_yaml(&kubeconfig_text)
        .map_err(|e| Error::HostedClusterAccessFailed(format!("parsing kubeconfig: {e}")))?;
    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| Error::HostedClusterAccessFailed(format!("building client config: {e}")))?;
    Client::try_from(config).map_err(|e| Error::HostedClusterAccessFailed(format!("building client: {e}")))
}

fn lb_resource(kind: &str) -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind {
        group: "metallb.io".to_owned(),
        version: "v1beta1".to_owned(),
        kind: kind.to_owned(),
    })
}

pub async fn reconcile(infra: &Infra, spec: &AppsIngressSpec, ctx: Arc<Context>) -> Result<AppsIngressStatus> {
    let hosted = match hosted_cluster_client(spec, &ctx.client).await {
        Ok(c) => c,
        Err(e) => {
            return Ok(AppsIngressStatus {
                phase: "Degraded".to_owned(),
                reason: Some("HostedClusterAccessFailed".to_owned()),
                message: Some(e.to_string()),
                last_sync_time: Some(Utc::now().to_rfc3339()),
            })
        }
    };

    let pool_resource = lb_resource("IPAddressPool");
    let pool_api: Api<DynamicObject> = Api::namespaced_with(hosted.clone(), "metallb-system", &pool_resource);
    let pool = DynamicObject::new(&spec.pool_name, &pool_resource).data(json!({
        "spec": { "addresses": [spec.ip_range.clone()] }
    }));
    pool_api
        .patch(&spec.pool_name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&pool))
        .await
        .map_err(Error::KubeError)?;

    let adv_resource = lb_resource("L2Advertisement");
    let adv_api: Api<DynamicObject> = Api::namespaced_with(hosted.clone(), "metallb-system", &adv_resource);
    let adv = DynamicObject::new(&spec.l2_advertisement_name, &adv_resource).data(json!({
        "spec": { "ipAddressPools": [spec.pool_name.clone()] }
    }));
    adv_api
        .patch(
            &spec.l2_advertisement_name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&adv),
        )
        .await
        .map_err(Error::KubeError)?;

    let svc_api: Api<k8s_openapi::api::core::v1::Service> = Api::namespaced(hosted, &spec.service_namespace);
    let svc = json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": { "name": spec.service_name, "namespace": spec.service_namespace },
        "spec": {
            "type": "LoadBalancer",
            "selector": { "ingresscontroller.operator.openshift.io/deployment-ingresscontroller": "default" },
            "ports": [
                { "name": "http", "port": spec.http_port as i32, "targetPort": spec.http_port as i32 },
                { "name": "https", "port": spec.https_port as i32, "targetPort": spec.https_port as i32 },
            ],
        },
    });
    let applied_svc = svc_api
        .patch(&spec.service_name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&svc))
        .await
        .map_err(Error::KubeError)?;

    tracing::info!(infra = %infra.name_any(), "apps-ingress resources reconciled in hosted cluster");

    let external_ip = applied_svc
        .status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .and_then(|ingress| ingress.first())
        .and_then(|i| i.ip.clone().or_else(|| i.hostname.clone()));

    // §4.2 "On success but before an external IP is observed, phase is
    // Pending with reason WaitingForExternalIP."
    match external_ip {
        Some(ip) => Ok(AppsIngressStatus {
            phase: "Ready".to_owned(),
            reason: Some("AppsIngressReconciled".to_owned()),
            message: Some(format!("{} / {} applied, external IP {ip}", spec.pool_name, spec.l2_advertisement_name)),
            last_sync_time: Some(Utc::now().to_rfc3339()),
        }),
        None => Ok(AppsIngressStatus {
            phase: "Pending".to_owned(),
            reason: Some("WaitingForExternalIP".to_owned()),
            message: Some(format!("{} / {} applied, waiting for LoadBalancer external IP", spec.pool_name, spec.l2_advertisement_name)),
            last_sync_time: Some(Utc::now().to_rfc3339()),
        }),
    }
}

/// §9 "cross-namespace ownership": the hosted-cluster-side objects cannot
/// carry an owner reference back to `Infra` at all (different cluster), so
/// their teardown is entirely this explicit path, run from Infra's own
/// finalizer cleanup.
pub async fn cleanup(infra: &Infra, spec: &AppsIngressSpec, ctx: Arc<Context>) -> Result<()> {
    let hosted = match hosted_cluster_client(spec, &ctx.client).await {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(infra = %infra.name_any(), "could not reach hosted cluster during cleanup: {e}");
            return Ok(());
        }
    };
    let dp = kube::api::DeleteParams::default();

    let svc_api: Api<k8s_openapi::api::core::v1::Service> = Api::namespaced(hosted.clone(), &spec.service_namespace);
    let _ = svc_api.delete(&spec.service_name, &dp).await;

    let adv_api: Api<DynamicObject> = Api::namespaced_with(hosted.clone(), "metallb-system", &lb_resource("L2Advertisement"));
    let _ = adv_api.delete(&spec.l2_advertisement_name, &dp).await;

    let pool_api: Api<DynamicObject> = Api::namespaced_with(hosted, "metallb-system", &lb_resource("IPAddressPool"));
    let _ = pool_api.delete(&spec.pool_name, &dp).await;

    Ok(())
}
