/// Error taxonomy shared across crates (§7), independent of any particular
/// transport's error type. Reconciler-level code maps `kube::Error` onto
/// this before deciding whether to retry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Root object is gone; log and return, no retry.
    NotFound,
    /// Optimistic-concurrency conflict or create-on-existing; retry with
    /// backoff.
    Conflict,
    /// Spec failed validation; surface in status, do not retry
    /// automatically.
    Validation,
    /// Any other transient I/O failure; retry, and mark Degraded if
    /// persistent.
    Transient,
}

impl ErrorClass {
    pub fn retryable(self) -> bool {
        matches!(self, ErrorClass::Conflict | ErrorClass::Transient)
    }
}
