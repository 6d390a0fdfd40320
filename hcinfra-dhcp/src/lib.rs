//! The DHCP engine's plugin chain (§4.4): a config format (`config`) parsed
//! from the ConfigMap the reconciler renders, a SQLite-backed lease store
//! (`lease`) for the `range` plugin, and a KubeVirt-backed tenant-VM lookup
//! (`tenant_vm`) for the `kubevirt` plugin. Packet parsing itself is out of
//! scope (§1, Non-goals); this crate only owns what the chain decides once a
//! request has already been parsed.

pub mod config;
pub mod lease;
pub mod tenant_vm;

pub use config::{ConfigParseError, DhcpConfig, Plugin, RangePlugin};
pub use lease::{LeaseError, LeaseRecord, LeaseStore};
pub use tenant_vm::KubeVirtInventory;
