//! Bridges the tenant-VM plugin's synchronous [`Inventory`] trait
//! (`hcinfra-k8s-index`) to a live cluster-wide KubeVirt
//! `VirtualMachineInstance` listing (§4.4). The DHCP engine is documented
//! as single-threaded per packet (§5), so blocking the handling thread for
//! the duration of one list call is the intended shape, not a workaround;
//! `block_in_place` is the idiomatic way to do that from within a
//! multi-threaded Tokio runtime without spawning a nested reactor.

use hcinfra_k8s_index::tenant_vm::{Inventory, TenantVm, VmInterface};
use kube::api::{Api, DynamicObject, ListParams};
use kube::core::{ApiResource, GroupVersionKind};
use kube::Client;

const VMI_GVK_GROUP: &str = "kubevirt.io";
const VMI_GVK_VERSION: &str = "v1";
const VMI_GVK_KIND: &str = "VirtualMachineInstance";

pub struct KubeVirtInventory {
    client: Client,
    resource: ApiResource,
}

impl KubeVirtInventory {
    pub fn new(client: Client) -> Self {
        let gvk = GroupVersionKind::gvk(VMI_GVK_GROUP, VMI_GVK_VERSION, VMI_GVK_KIND);
        let resource = ApiResource::from_gvk(&gvk);
        KubeVirtInventory { client, resource }
    }

    async fn list_async(&self) -> Result<Vec<TenantVm>, String> {
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &self.resource);
        let objs = api
            .list(&ListParams::default())
            .await
            .map_err(|e| format!("failed to list tenant VM inventory: {e}"))?;

        Ok(objs.items.iter().filter_map(vm_from_dynamic_object).collect())
    }
}

fn vm_from_dynamic_object(obj: &DynamicObject) -> Option<TenantVm> {
    let name = obj.metadata.name.clone()?;
    let namespace = obj.metadata.namespace.clone().unwrap_or_default();
    let interfaces = obj
        .data
        .get("status")
        .and_then(|s| s.get("interfaces"))
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|iface| {
                    let mac = iface.get("mac")?.as_str()?.to_owned();
                    let ip = iface.get("ipAddress").and_then(|v| v.as_str()).map(str::to_owned);
                    Some(VmInterface { mac, ip })
                })
                .collect()
        })
        .unwrap_or_default();

    Some(TenantVm {
        name,
        namespace,
        interfaces,
    })
}

impl Inventory for KubeVirtInventory {
    fn list(&self) -> Result<Vec<TenantVm>, String> {
        tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(self.list_async()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_mac_and_ip_from_status_interfaces() {
        let obj: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "kubevirt.io/v1",
            "kind": "VirtualMachineInstance",
            "metadata": { "name": "vm-1", "namespace": "tenant-ns" },
            "status": {
                "interfaces": [
                    { "mac": "AA:BB:CC:DD:EE:FF", "ipAddress": "10.1.2.3" }
                ]
            }
        }))
        .unwrap();

        let vm = vm_from_dynamic_object(&obj).unwrap();
        assert_eq!(vm.name, "vm-1");
        assert_eq!(vm.namespace, "tenant-ns");
        assert_eq!(vm.interfaces.len(), 1);
        assert_eq!(vm.interfaces[0].mac, "AA:BB:CC:DD:EE:FF");
        assert_eq!(vm.interfaces[0].ip.as_deref(), Some("10.1.2.3"));
    }

    #[test]
    fn missing_status_yields_no_interfaces() {
        let obj: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "kubevirt.io/v1",
            "kind": "VirtualMachineInstance",
            "metadata": { "name": "vm-1" },
        }))
        .unwrap();

        let vm = vm_from_dynamic_object(&obj).unwrap();
        assert!(vm.interfaces.is_empty());
        assert_eq!(vm.namespace, "");
    }
}
