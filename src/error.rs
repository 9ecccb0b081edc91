use thiserror::Error;

/// Conditions that cannot be recovered from by waiting or retrying.
///
/// These surface as [`Interrupt::Fatal`](crate::Interrupt::Fatal) and are
/// meant to reach the nearest error boundary rather than be handled by the
/// component that triggered them.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum FlowError {
    /// A flow with no data was still pending when its accessor was called
    /// during hydration.  Suspending here would render something different
    /// from what the server sent.
    #[error("flow `{id}` was read while hydrating but had no data at server render time")]
    PendingDuringHydration { id: String },
    #[error("the number of parallel flows changed from {previous} to {current} between renders")]
    ArityChanged { previous: usize, current: usize },
    #[error("failed to serialize the hydration value for `{id}`: {message}")]
    Serialize { id: String, message: String },
    #[error("malformed hydration script: {0}")]
    MalformedScript(String),
    #[cfg(feature = "ssr")]
    #[error("timed out waiting for suspended flows to settle")]
    Timeout,
}
