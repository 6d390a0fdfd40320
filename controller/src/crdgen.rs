//! Prints the four CRDs' OpenAPI-validated YAML to stdout.
//!
//! Usage: `controller crdgen | kubectl apply -f -`

use hcinfra_k8s_api::{DHCPServer, DNSServer, Infra, ProxyServer};
use kube::CustomResourceExt;

fn main() {
    for crd in [
        serde_yaml::to_string(&Infra::crd()).expect("Infra CRD always serializes"),
        serde_yaml::to_string(&DHCPServer::crd()).expect("DHCPServer CRD always serializes"),
        serde_yaml::to_string(&DNSServer::crd()).expect("DNSServer CRD always serializes"),
        serde_yaml::to_string(&ProxyServer::crd()).expect("ProxyServer CRD always serializes"),
    ] {
        println!("---");
        print!("{crd}");
    }
}
