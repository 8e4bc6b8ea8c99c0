//! Progress observers and cooperative cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::autoindex::AutoindexAttempt;
use super::{Stage, StageOutcome};

/// Receives progress callbacks from a running pipeline.
///
/// All methods have empty defaults; implement only what you need.
pub trait ProgressObserver: Send + Sync {
    fn stage_started(&self, _stage: Stage) {}

    fn stage_finished(&self, _outcome: &StageOutcome) {}

    /// A stage was skipped because its artifact already exists (resume).
    fn stage_skipped(&self, _stage: Stage) {}

    fn autoindex_attempt(&self, _attempt: &AutoindexAttempt) {}
}

/// Shared flag checked by the pipeline before every stage.
///
/// Cloning shares the flag, so a signal handler can hold one clone while the
/// pipeline holds another.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
