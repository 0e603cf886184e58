//! Cooperative cancellation for in-flight requests
//!
//! Cancelling a pending request sets its token. The worker checks the token
//! after the transport returns and before merging; merges that already
//! committed remain valid.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cooperative cancellation token.
///
/// Shared between the dispatcher, which sets it, and the request's worker
/// task, which checks it.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Signal cancellation. Returns true if this call flipped the token.
    pub fn cancel(&self) -> bool {
        !self.cancelled.swap(true, Ordering::AcqRel)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}
