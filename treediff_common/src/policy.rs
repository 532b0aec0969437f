use crate::TreeDiffError;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

/// Decides how a recoverable per-entry I/O fault is handled during a
/// comparison or tree build.
///
/// The policy is passed explicitly to every operation that can hit such
/// faults; there is no ambient global handler. Both methods latch a sticky
/// flag the caller can poll afterwards to learn whether results are
/// approximate.
pub trait ErrorPolicy: Send + Sync {
    /// Ask whether to proceed past a recoverable fault. Returning `false`
    /// aborts the surrounding operation.
    fn handle_error(&self, error: &TreeDiffError) -> bool;

    /// Record a fault without asking for a decision.
    fn log_error(&self, error: &TreeDiffError);

    /// True once any fault has been routed through this policy.
    fn encountered_error(&self) -> bool;

    /// Clear the sticky fault flag.
    fn reset(&self);
}

/// Aborts the whole operation on the first recoverable fault.
#[derive(Debug, Default)]
pub struct AbortPolicy {
    encountered: AtomicBool,
}

impl AbortPolicy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ErrorPolicy for AbortPolicy {
    fn handle_error(&self, error: &TreeDiffError) -> bool {
        self.encountered.store(true, Ordering::Relaxed);
        warn!("aborting on error: {}", error);
        false
    }

    fn log_error(&self, error: &TreeDiffError) {
        self.encountered.store(true, Ordering::Relaxed);
        warn!("{}", error);
    }

    fn encountered_error(&self) -> bool {
        self.encountered.load(Ordering::Relaxed)
    }

    fn reset(&self) {
        self.encountered.store(false, Ordering::Relaxed);
    }
}

/// Logs recoverable faults and keeps going; affected entries end up marked
/// not-same or absent.
#[derive(Debug, Default)]
pub struct ContinuePolicy {
    encountered: AtomicBool,
}

impl ContinuePolicy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ErrorPolicy for ContinuePolicy {
    fn handle_error(&self, error: &TreeDiffError) -> bool {
        self.encountered.store(true, Ordering::Relaxed);
        warn!("continuing past error: {}", error);
        true
    }

    fn log_error(&self, error: &TreeDiffError) {
        self.encountered.store(true, Ordering::Relaxed);
        warn!("{}", error);
    }

    fn encountered_error(&self) -> bool {
        self.encountered.load(Ordering::Relaxed)
    }

    fn reset(&self) {
        self.encountered.store(false, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn io_error() -> TreeDiffError {
        TreeDiffError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "denied",
        ))
    }

    #[test]
    fn test_abort_policy_refuses_and_latches() {
        let policy = AbortPolicy::new();
        assert!(!policy.encountered_error());

        assert!(!policy.handle_error(&io_error()));
        assert!(policy.encountered_error());

        policy.reset();
        assert!(!policy.encountered_error());
    }

    #[test]
    fn test_continue_policy_allows_and_latches() {
        let policy = ContinuePolicy::new();

        assert!(policy.handle_error(&io_error()));
        assert!(policy.encountered_error());
    }

    #[test]
    fn test_log_error_latches_without_deciding() {
        let policy = ContinuePolicy::new();
        policy.log_error(&io_error());
        assert!(policy.encountered_error());
    }
}
