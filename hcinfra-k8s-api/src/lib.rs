pub mod common;
pub mod dhcpserver;
pub mod dnsserver;
pub mod infra;
pub mod proxyserver;
pub mod validation;

pub use dhcpserver::{DHCPServer, DHCPServerSpec, DHCPServerStatus};
pub use dnsserver::{DNSServer, DNSServerSpec, DNSServerStatus};
pub use infra::{Infra, InfraSpec, InfraStatus};
pub use proxyserver::{ProxyServer, ProxyServerSpec, ProxyServerStatus};
