//! The DHCP engine's tenant-VM plugin state (§4.4): a live snapshot of
//! tenant VM interfaces, keyed for O(1) MAC lookup, refreshed from a full
//! inventory listing before every lookup. §9 notes this re-list-per-packet
//! shape is itself a known-sharp-edge the original design accepted; we keep
//! the behavior exactly but isolate it behind a trait (`Inventory`) so a
//! watch-fed cache can be substituted without touching the plugin.

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VmInterface {
    pub mac: String,
    pub ip: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TenantVm {
    pub name: String,
    pub namespace: String,
    pub interfaces: Vec<VmInterface>,
}

fn normalize_mac(mac: &str) -> String {
    mac.to_ascii_lowercase()
}

/// Anything that can produce the current full tenant VM inventory. The real
/// implementation lists a cluster-scoped custom resource; tests supply a
/// fixed `Vec<TenantVm>`.
pub trait Inventory: Send + Sync {
    fn list(&self) -> Result<Vec<TenantVm>, String>;
}

pub struct StaticInventory(pub Vec<TenantVm>);

impl Inventory for StaticInventory {
    fn list(&self) -> Result<Vec<TenantVm>, String> {
        Ok(self.0.clone())
    }
}

struct Snapshot {
    by_mac: HashMap<String, String>,
}

/// Mutex-guarded across refresh-then-lookup (§4.4, §5 "Shared resources"):
/// the refresh and the lookup that follows it are atomic with respect to
/// concurrent requests.
pub struct TenantVmIndex {
    inventory: Box<dyn Inventory>,
    snapshot: Mutex<Snapshot>,
}

impl TenantVmIndex {
    pub fn new(inventory: Box<dyn Inventory>) -> Self {
        TenantVmIndex {
            inventory,
            snapshot: Mutex::new(Snapshot { by_mac: HashMap::new() }),
        }
    }

    /// Refreshes the snapshot from the full inventory, then looks up `mac`.
    /// Returns `Ok(None)` on a clean miss, `Err(_)` on a refresh failure —
    /// both map to "no answer, stop" in the plugin chain (§4.4).
    pub fn refresh_and_lookup(&self, mac: &str) -> Result<Option<String>, String> {
        let vms = self.inventory.list()?;

        let mut by_mac = HashMap::new();
        for vm in &vms {
            for iface in &vm.interfaces {
                by_mac.insert(normalize_mac(&iface.mac), vm.name.clone());
            }
        }

        let mut snapshot = self.snapshot.lock().expect("tenant vm snapshot lock poisoned");
        snapshot.by_mac = by_mac;
        Ok(snapshot.by_mac.get(&normalize_mac(mac)).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vm(name: &str, mac: &str) -> TenantVm {
        TenantVm {
            name: name.to_owned(),
            namespace: "default".to_owned(),
            interfaces: vec![VmInterface {
                mac: mac.to_owned(),
                ip: None,
            }],
        }
    }

    #[test]
    fn empty_inventory_yields_no_hit() {
        let idx = TenantVmIndex::new(Box::new(StaticInventory(vec![])));
        assert_eq!(idx.refresh_and_lookup("aa:bb:cc:dd:ee:ff").unwrap(), None);
    }

    #[test]
    fn matching_vm_resolves_by_mac_case_insensitively() {
        let idx = TenantVmIndex::new(Box::new(StaticInventory(vec![vm("vm-1", "AA:BB:CC:DD:EE:FF")])));
        assert_eq!(
            idx.refresh_and_lookup("aa:bb:cc:dd:ee:ff").unwrap(),
            Some("vm-1".to_owned())
        );
    }

    #[test]
    fn refresh_error_propagates_as_err() {
        struct Failing;
        impl Inventory for Failing {
            fn list(&self) -> Result<Vec<TenantVm>, String> {
                Err("listing failed".to_owned())
            }
        }
        let idx = TenantVmIndex::new(Box::new(Failing));
        assert!(idx.refresh_and_lookup("aa:bb:cc:dd:ee:ff").is_err());
    }
}
