use thiserror::Error;

/// Unified error taxonomy for the capture pipeline.
///
/// The split that matters operationally is recoverable vs. terminal:
///
/// - Recoverable errors count against a collector's retry budget and
///   route the task through `RetryWait`.
/// - Terminal errors send the task straight to `Failed`, bypassing
///   retries entirely.
/// - `ShutdownRequested` is neither: it is the cooperative cancellation
///   signal and always succeeds.
///
/// IMPORTANT:
/// - A malformed payload is never retried. Re-fetching does not fix
///   bad upstream data, so interceptors log and drop instead of
///   surfacing it to the state machine.
#[derive(Debug, Error)]
pub enum CollectError {
    /// Transient network-level fault (connection reset, engine hiccup).
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// Navigation did not settle within the configured timeout.
    #[error("navigation timed out after {0:?}: {1}")]
    NavigationTimeout(std::time::Duration, String),

    /// Upstream payload could not be parsed. Logged and dropped at the
    /// interception site; never routed through the retry envelope.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// Unrecoverable engine-side failure (browser crash, context
    /// acquisition permanently failing).
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// A browser context handle already exists for this source key.
    #[error("context already active for source '{0}'")]
    AlreadyActive(String),

    /// The source configuration is invalid (unknown sport, bad URL).
    /// Retrying cannot fix configuration.
    #[error("invalid source configuration: {0}")]
    InvalidSource(String),

    /// Cooperative cancellation. Not a fault.
    #[error("shutdown requested")]
    ShutdownRequested,

    /// Pattern registry misuse (duplicate name, unknown pattern).
    #[error("pattern registry error: {0}")]
    PatternRegistry(String),
}

impl CollectError {
    /// Whether this failure may be retried under the collector's
    /// backoff envelope.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CollectError::TransientNetwork(_)
                | CollectError::NavigationTimeout(_, _)
                | CollectError::AlreadyActive(_)
        )
    }

    pub fn is_shutdown(&self) -> bool {
        matches!(self, CollectError::ShutdownRequested)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn recoverable_classification() {
        assert!(CollectError::TransientNetwork("reset".into()).is_recoverable());
        assert!(
            CollectError::NavigationTimeout(Duration::from_secs(60), "live".into())
                .is_recoverable()
        );
        assert!(!CollectError::InvalidSource("curling".into()).is_recoverable());
        assert!(!CollectError::ResourceExhausted("crash".into()).is_recoverable());
        assert!(!CollectError::MalformedPayload("not json".into()).is_recoverable());
        assert!(!CollectError::ShutdownRequested.is_recoverable());
    }
}
