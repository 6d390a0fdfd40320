pub mod proxy_cache;
pub mod tenant_vm;

pub use proxy_cache::{pair as proxy_cache_pair, Reader as ProxyCacheReader, Writer as ProxyCacheWriter};
pub use tenant_vm::{Inventory, TenantVm, TenantVmIndex, VmInterface};
