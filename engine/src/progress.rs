//! Progress reporting and cooperative cancellation.
//!
//! The orchestrator never depends on a particular UI or dispatch runtime:
//! callers implement [`ProgressCallback`] (the worker forwards into a
//! channel, the CLI draws a progress bar, tests record calls).

use std::ops::ControlFlow;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::model::{ProgressEvent, TransferResult};

/// Receives notifications while a batch runs.
///
/// Methods are called synchronously on the thread running the batch.
pub trait ProgressCallback {
    /// Called after every block written, with aggregate progress.
    ///
    /// Returning `ControlFlow::Break` cancels the batch at this point.
    fn on_progress(&self, event: &ProgressEvent) -> ControlFlow<()>;

    /// Called once an item has been fully transferred (or skipped).
    fn on_item_done(&self, _index: usize, _result: &TransferResult) {}

    /// Called once, before the batch is handed to a privileged executor,
    /// with the first destination that could not be written. No progress
    /// events follow.
    fn on_elevation(&self, _destination: &Path) {}
}

/// Shared cancellation flag checked at each progress point.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Break` once cancellation has been requested.
    pub fn check(&self) -> ControlFlow<()> {
        if self.is_cancelled() {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_flag_is_shared_between_clones() {
        let flag = CancelFlag::new();
        let other = flag.clone();
        assert_eq!(flag.check(), ControlFlow::Continue(()));

        other.cancel();
        assert!(flag.is_cancelled());
        assert_eq!(flag.check(), ControlFlow::Break(()));
    }
}
