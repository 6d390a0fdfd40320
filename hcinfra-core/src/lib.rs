//! Shared domain model: CIDR/duration parsing, the proxy snapshot
//! compilation algorithm, the error taxonomy, and the logging setup reused
//! by every subcommand and every other crate in this workspace.

pub mod duration;
pub mod error;
pub mod logging;
pub mod net;
pub mod snapshot;

pub const API_GROUP: &str = "hostedcluster.densityops.com";
pub const API_VERSION: &str = "v1alpha1";

/// The fixed set of static DNS/proxy entries synthesized for every Infra
/// whose DNS component is enabled (§4.1 "Derivation rules").
pub const STATIC_HOSTNAME_PREFIXES: &[&str] = &["api", "api-int", "oauth", "ignition", "konnectivity"];
