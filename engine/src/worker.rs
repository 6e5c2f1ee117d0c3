//! Background execution of a batch.
//!
//! The batch runs on its own thread so a front end never blocks on I/O.
//! Notifications arrive in order on a channel: progress and per-item
//! events (or a single `Elevating` when the batch leaves the process), then
//! exactly one `Done` or `Failed`.

use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::elevation::PrivilegedExecutor;
use crate::error::EngineError;
use crate::job::execute_batch;
use crate::model::{BatchSummary, ProgressEvent, TransferItem, TransferOptions, TransferResult};
use crate::progress::{CancelFlag, ProgressCallback};

#[derive(Debug)]
pub enum BatchEvent {
    Progress(ProgressEvent),
    ItemDone {
        index: usize,
        result: TransferResult,
    },
    /// The batch was handed to the privileged executor because
    /// `destination` is not writable.
    Elevating {
        destination: PathBuf,
    },
    Done(BatchSummary),
    Failed(EngineError),
}

/// Forwards orchestrator callbacks into the event channel.
struct ChannelProgress {
    sender: Sender<BatchEvent>,
    cancel: CancelFlag,
}

impl ProgressCallback for ChannelProgress {
    fn on_progress(&self, event: &ProgressEvent) -> ControlFlow<()> {
        if self.cancel.is_cancelled() {
            return ControlFlow::Break(());
        }
        let _ = self.sender.send(BatchEvent::Progress(event.clone()));
        ControlFlow::Continue(())
    }

    fn on_item_done(&self, index: usize, result: &TransferResult) {
        let _ = self.sender.send(BatchEvent::ItemDone {
            index,
            result: result.clone(),
        });
    }

    fn on_elevation(&self, destination: &Path) {
        let _ = self.sender.send(BatchEvent::Elevating {
            destination: destination.to_path_buf(),
        });
    }
}

/// A running batch.
pub struct BatchHandle {
    events: Receiver<BatchEvent>,
    cancel: CancelFlag,
    thread: JoinHandle<()>,
}

impl BatchHandle {
    pub fn events(&self) -> &Receiver<BatchEvent> {
        &self.events
    }

    /// Request cancellation; observed at the next block boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Wait for the worker thread to exit.
    pub fn join(self) -> thread::Result<()> {
        self.thread.join()
    }
}

/// Spawn a worker thread running the batch.
///
/// With an `executor`, destinations that need elevation send the whole
/// batch through it; otherwise such a batch fails with `PermissionDenied`.
pub fn spawn_batch(
    items: Vec<TransferItem>,
    options: TransferOptions,
    executor: Option<Box<dyn PrivilegedExecutor + Send>>,
) -> BatchHandle {
    spawn_batch_with_cancel(items, options, executor, CancelFlag::new())
}

/// Like [`spawn_batch`], observing an existing cancellation flag.
pub fn spawn_batch_with_cancel(
    items: Vec<TransferItem>,
    options: TransferOptions,
    executor: Option<Box<dyn PrivilegedExecutor + Send>>,
    cancel: CancelFlag,
) -> BatchHandle {
    let (sender, events) = unbounded();
    let progress = ChannelProgress {
        sender: sender.clone(),
        cancel: cancel.clone(),
    };

    let thread = thread::spawn(move || {
        let executor = executor
            .as_deref()
            .map(|e| e as &dyn PrivilegedExecutor);
        let event = match execute_batch(&items, &options, Some(&progress), executor) {
            Ok(summary) => BatchEvent::Done(summary),
            Err(e) => BatchEvent::Failed(e),
        };
        let _ = sender.send(event);
    });

    BatchHandle {
        events,
        cancel,
        thread,
    }
}
