//! The four child/parent reconcilers (§4.1, §4.3, §4.5, §4.6), the
//! apps-ingress sub-reconciler (§4.2), and the shared plumbing they all
//! build on: derivation (`derive`), create-or-update/retry (`apply`),
//! label/ownership conventions (`labels`), metrics (`metrics`), and
//! workload rendering (`workloads`).
//!
//! Each reconciler module exposes an `init(client) -> (BoxFuture<'static,
//! ()>, State)` pair, so the `controller` binary's `manager` subcommand
//! only has to `tokio::select!` across them.

pub mod apply;
pub mod apps_ingress;
pub mod context;
pub mod derive;
pub mod dhcp;
pub mod dns;
pub mod error;
pub mod infra;
pub mod labels;
pub mod metrics;
pub mod proxy;
pub mod workloads;

pub use context::{Context, Diagnostics, State};
pub use error::{Error, Result};
