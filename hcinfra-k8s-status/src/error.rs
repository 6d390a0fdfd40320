use thiserror::Error;

/// Error taxonomy for the four reconcilers and the apps-ingress
/// sub-reconciler (§7). `FinalizerError` boxes `kube::runtime::finalizer`'s
/// own error (which embeds this `Error`) to break the type cycle.
#[derive(Error, Debug)]
pub enum Error {
    #[error("kube error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("finalizer error: {0}")]
    FinalizerError(#[source] Box<kube::runtime::finalizer::Error<Error>>),

    #[error("spec validation error: {0}")]
    Validation(#[from] hcinfra_k8s_api::validation::ValidationError),

    #[error("proxy snapshot compilation error: {0}")]
    Compile(#[from] hcinfra_core::snapshot::CompileError),

    #[error("net error: {0}")]
    Net(#[from] hcinfra_core::net::NetError),

    #[error("failed to access hosted cluster: {0}")]
    HostedClusterAccessFailed(String),

    #[error("{resource} '{name}' has no {field}")]
    MissingField {
        resource: &'static str,
        name: String,
        field: &'static str,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Low-cardinality label for the failure-counter metric (§NEW "Metrics").
    pub fn metric_label(&self) -> &'static str {
        match self {
            Error::KubeError(_) => "kube_error",
            Error::SerializationError(_) => "serialization_error",
            Error::FinalizerError(_) => "finalizer_error",
            Error::Validation(_) => "validation_error",
            Error::Compile(_) => "compile_error",
            Error::Net(_) => "net_error",
            Error::HostedClusterAccessFailed(_) => "hosted_cluster_access_failed",
            Error::MissingField { .. } => "missing_field",
        }
    }
}
