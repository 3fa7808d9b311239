use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BrowserError>;

/// Errors produced by the perception and action engine.
///
/// Soft conditions (`NavigationTimeout`, `SnapshotExtractionFailed`,
/// `HashComputationFailed`) are recoverable: callers keep the last known
/// good state and may continue. Everything else ends the operation that
/// raised it.
#[derive(Debug, Error)]
pub enum BrowserError {
    /// Chrome could not be started.
    #[error("failed to launch browser: {0}")]
    LaunchFailed(String),

    /// The WebSocket endpoint of an existing browser could not be reached.
    #[error("failed to connect to browser: {0}")]
    ConnectionFailed(String),

    /// An action was requested before `attach()` opened the transport.
    #[error("browser transport is not connected")]
    TransportNotConnected,

    /// Tab bookkeeping (enumeration, creation, closing) failed.
    #[error("tab operation failed: {0}")]
    TabOperationFailed(String),

    /// Page load did not finish inside the configured window. Soft: the
    /// page may still be usable.
    #[error("navigation timed out: {0}")]
    NavigationTimeout(String),

    /// Navigation could not be issued at all.
    #[error("navigation failed: {0}")]
    NavigationFailed(String),

    /// In-page script evaluation failed at the transport level.
    #[error("script evaluation failed: {0}")]
    EvaluationFailed(String),

    /// The extraction script produced no usable tree. Soft: the previous
    /// `PageState` is retained.
    #[error("snapshot extraction failed: {0}")]
    SnapshotExtractionFailed(String),

    /// Every locate strategy was exhausted without a unique match.
    #[error("element not found: {0}")]
    ElementNotFound(String),

    /// The element never reached a stable, visible, in-viewport state
    /// within the stabilization window.
    #[error("element did not stabilize: {0}")]
    VisibilityTimeout(String),

    /// Every rung of an interaction fallback ladder failed.
    #[error("{action} failed on <{tag}> index {index} (attempted: {attempted})")]
    ActionFailed {
        action: &'static str,
        tag: String,
        index: usize,
        attempted: String,
    },

    /// A dropdown operation was requested on something that is not a
    /// `<select>`. Raised before any resolution is attempted.
    #[error("element at index {index} is <{actual}>, expected <select>")]
    NotADropdown { index: usize, actual: String },

    /// Identity hashing failed. Soft: the cache slot is reset so the next
    /// call retries.
    #[error("hash computation failed for <{tag}>: {reason}")]
    HashComputationFailed { tag: String, reason: String },

    /// The attached document vanished and no other open page could be
    /// adopted. Fatal.
    #[error("no valid pages remain")]
    NoValidPages,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_failed_message_carries_context() {
        let err = BrowserError::ActionFailed {
            action: "click",
            tag: "button".to_string(),
            index: 7,
            attempted: "native-click -> script-click".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("click failed"));
        assert!(msg.contains("<button>"));
        assert!(msg.contains("index 7"));
        assert!(msg.contains("native-click"));
    }

    #[test]
    fn dropdown_mismatch_names_actual_tag() {
        let err = BrowserError::NotADropdown {
            index: 3,
            actual: "div".to_string(),
        };
        assert!(err.to_string().contains("<div>"));
        assert!(err.to_string().contains("expected <select>"));
    }
}
