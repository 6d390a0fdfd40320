//! The shared create-or-update/retry utility (§2 table, "Shared utilities").
//! Every SSA patch call in this crate goes through [`apply`], which wraps
//! it in the `tokio-retry` exponential-backoff strategy the reconciler
//! crate's dependency table already carries but never wires up (§7 NEW),
//! and which first compares the observed object against the desired one
//! so a no-op reconciliation issues zero PATCH calls (§3 "compare each
//! against the observed form by structural equality over the spec,
//! create if absent, update if different, leave alone if equal"; §8
//! idempotence property).

use std::fmt::Debug;
use std::time::Duration;

use kube::api::{Api, Patch, PatchParams};
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::Retry;
use tracing::debug;

use crate::error::{Error, Result};

/// Field manager used for every server-side-apply patch this crate issues.
pub const FIELD_MANAGER: &str = "hcinfra-controller";

const MAX_ATTEMPTS: usize = 5;
const BASE_DELAY_MS: u64 = 100;
const MAX_DELAY: Duration = Duration::from_secs(5);

/// True when every field named in `desired` already holds the same value
/// in `current` (recursively), ignoring anything `current` carries that
/// `desired` doesn't mention — the fields a server-side-apply owner never
/// set (status, managedFields, defaulted fields, resourceVersion, ...).
/// This is the "structural equality over the spec" comparison §4.1 and §3
/// call for, applied generically to the desired-value shape every
/// reconciler in this crate already builds for its SSA patches.
///
/// `top` is only true for the outermost object: the typed `K` structs this
/// crate fetches and re-serializes never carry `apiVersion`/`kind` as struct
/// fields (those are `Resource::kind`/`api_version` constants, not data), but
/// some call sites build `desired` by hand with those two keys present at
/// the top level so the apply server can tell the GVK from the patch body.
/// Skipping them only at depth zero leaves nested same-named fields — an
/// `ownerReferences[].kind`, a `RoleRef.kind` — subject to the normal check.
fn matches_desired_at(current: &serde_json::Value, desired: &serde_json::Value, top: bool) -> bool {
    use serde_json::Value;
    match (current, desired) {
        (Value::Object(current), Value::Object(desired)) => desired.iter().all(|(k, v)| {
            if top && (k == "apiVersion" || k == "kind") {
                return true;
            }
            current.get(k).is_some_and(|cv| matches_desired_at(cv, v, false))
        }),
        (Value::Array(current), Value::Array(desired)) => {
            current.len() == desired.len()
                && current.iter().zip(desired).all(|(c, d)| matches_desired_at(c, d, false))
        }
        _ => current == desired,
    }
}

fn matches_desired(current: &serde_json::Value, desired: &serde_json::Value) -> bool {
    matches_desired_at(current, desired, true)
}

/// Applies `value` as a server-side-apply patch to `name`, but only after
/// fetching the current object and confirming it differs from `value` —
/// an equal object is left alone and returned as-is, with no PATCH issued.
/// Conflict/transient failures on the patch path retry with exponential
/// backoff (§7: "Conflict on update: retry with exponential backoff...
/// AlreadyExists on create is treated as a conflict and retried").
pub async fn apply<K>(api: &Api<K>, name: &str, value: serde_json::Value) -> Result<K>
where
    K: Clone + Debug + DeserializeOwned + Serialize + Resource,
{
    if let Some(current) = api.get_opt(name).await.map_err(Error::KubeError)? {
        let current_value = serde_json::to_value(&current).map_err(Error::SerializationError)?;
        if matches_desired(&current_value, &value) {
            debug!(name = %name, "observed object already matches desired spec, skipping patch");
            return Ok(current);
        }
    }

    let strategy = ExponentialBackoff::from_millis(BASE_DELAY_MS)
        .max_delay(MAX_DELAY)
        .take(MAX_ATTEMPTS);
    let params = PatchParams::apply(FIELD_MANAGER).force();

    Retry::spawn(strategy, || async {
        api.patch(name, &params, &Patch::Apply(&value)).await
    })
    .await
    .map_err(Error::KubeError)
}

/// Applies a status-subresource patch the same way, used by every
/// reconciler's final status write (§4.1 "status update failure is retried
/// on the next reconciliation" — this retries within the same tick first).
pub async fn apply_status<K>(api: &Api<K>, name: &str, value: serde_json::Value) -> Result<K>
where
    K: Clone + Debug + DeserializeOwned + Serialize + Resource,
{
    let strategy = ExponentialBackoff::from_millis(BASE_DELAY_MS)
        .max_delay(MAX_DELAY)
        .take(MAX_ATTEMPTS);
    let params = PatchParams::apply(FIELD_MANAGER).force();

    Retry::spawn(strategy, || async {
        api.patch_status(name, &params, &Patch::Apply(&value)).await
    })
    .await
    .map_err(Error::KubeError)
}
