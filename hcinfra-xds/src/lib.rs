//! The Dynamic Proxy Configurator's wire layer (§4.7, §6 "Wire protocol"):
//! a minimal Aggregated Discovery Service v3 schema generated by
//! `tonic-build` at compile time, a translation from the domain-level
//! snapshot model to that schema (`convert`), and the streaming gRPC
//! service that serves it off a watched snapshot cache (`server`).

pub mod proto {
    tonic::include_proto!("hcinfra.xds.v3");
}

pub mod convert;
pub mod server;
pub mod watch;

pub use server::AdsService;
