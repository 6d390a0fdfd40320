//! Shared reconciler context and web-server-visible state: a `Context`
//! handed to every reconcile function, and a `State` shared between all
//! four controllers and the admin HTTP server.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use kube::runtime::events::Reporter;
use kube::Client;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::metrics::Metrics;

/// Context handed to every reconcile function (§4.1-§4.6).
#[derive(Clone)]
pub struct Context {
    pub client: Client,
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    pub metrics: Metrics,
}

#[derive(Clone, Serialize)]
pub struct Diagnostics {
    #[serde(deserialize_with = "from_ts", skip_serializing)]
    pub last_event: DateTime<Utc>,
    #[serde(skip)]
    pub reporter: Reporter,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Diagnostics {
            last_event: Utc::now(),
            reporter: "hcinfra-controller".into(),
        }
    }
}

fn from_ts<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(DateTime::deserialize(deserializer).unwrap_or_else(|_| Utc::now()))
}

/// State shared between the four controllers and the `manager`
/// subcommand's admin HTTP server.
#[derive(Clone)]
pub struct State {
    diagnostics: Arc<RwLock<Diagnostics>>,
    registry: prometheus::Registry,
}

impl Default for State {
    fn default() -> Self {
        State {
            diagnostics: Arc::new(RwLock::new(Diagnostics::default())),
            registry: prometheus::Registry::new(),
        }
    }
}

impl State {
    pub fn metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }

    pub fn create_context(&self, client: Client) -> Arc<Context> {
        Arc::new(Context {
            client,
            diagnostics: self.diagnostics.clone(),
            metrics: Metrics::new(&self.registry),
        })
    }
}
