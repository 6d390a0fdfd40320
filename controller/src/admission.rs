//! The validating admission webhook (§6 "Validation rules" enforced at
//! admission): parse an `AdmissionReview<DynamicObject>`, dispatch on the
//! request's `kind`, run the matching
//! `hcinfra_k8s_api::validation::validate_*` function, and turn any
//! `ValidationError` into a `deny()` response so invalid specs are
//! rejected before they are ever persisted, not just reported in `status`
//! by the reconciler.
//!
//! Wired as a plain `actix-web` handler rather than a bespoke
//! `tower::Service`, since this binary already runs one `actix-web` server
//! for `/healthz`, `/readyz` and `/metrics` (§NEW "Metrics").

use actix_web::{web, HttpResponse};
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use kube::core::DynamicObject;
use tracing::{debug, warn};

use hcinfra_k8s_api::validation::{validate_dhcpserver, validate_dnsserver, validate_infra, validate_proxyserver};
use hcinfra_k8s_api::{DHCPServerSpec, DNSServerSpec, InfraSpec, ProxyServerSpec};

type Review = AdmissionReview<DynamicObject>;

pub async fn review(body: web::Bytes) -> HttpResponse {
    let review: Review = match serde_json::from_slice(&body) {
        Ok(review) => review,
        Err(error) => {
            warn!(%error, "admission review body did not parse");
            return json_response(AdmissionResponse::invalid(error).into_review());
        }
    };

    let request: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(req) => req,
        Err(error) => {
            warn!(%error, "admission review carried no request");
            return json_response(AdmissionResponse::invalid(error).into_review());
        }
    };

    let response = admit(request);
    debug!(?response, "admission decision");
    json_response(response.into_review())
}

fn admit(req: AdmissionRequest<DynamicObject>) -> AdmissionResponse {
    let response = AdmissionResponse::from(&req);
    let Some(object) = &req.object else {
        return response;
    };

    let result = match req.kind.kind.as_str() {
        "Infra" => parse_and_validate::<InfraSpec, _>(object, validate_infra),
        "DHCPServer" => parse_and_validate::<DHCPServerSpec, _>(object, validate_dhcpserver),
        "DNSServer" => parse_and_validate::<DNSServerSpec, _>(object, validate_dnsserver),
        "ProxyServer" => parse_and_validate::<ProxyServerSpec, _>(object, validate_proxyserver),
        other => {
            debug!(kind = other, "admission webhook has no validator for this kind, admitting");
            Ok(())
        }
    };

    match result {
        Ok(()) => response,
        Err(message) => response.deny(message),
    }
}

fn parse_and_validate<S, F>(object: &DynamicObject, validate: F) -> Result<(), String>
where
    S: serde::de::DeserializeOwned,
    F: Fn(&S) -> Result<(), hcinfra_k8s_api::validation::ValidationError>,
{
    let spec_value = object.data.get("spec").cloned().unwrap_or(serde_json::Value::Null);
    let spec: S = serde_json::from_value(spec_value).map_err(|e| format!("spec did not match schema: {e}"))?;
    validate(&spec).map_err(|e| e.to_string())
}

fn json_response(review: Review) -> HttpResponse {
    HttpResponse::Ok().json(review)
}
