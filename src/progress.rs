//! Progress and completion reporting for long-running operations.
//!
//! Every pack/unpack/list run can be driven inline (pass a [`Reporter`]) or
//! as a background [`Task`].  Progress goes through a bounded queue with
//! non-blocking sends; when the queue is full the update is dropped.  Only
//! the single completion message carries the result.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::warn;

use crate::error::{Error, Result};

/// Capacity of the progress queue handed out by [`Task`].
pub const PROGRESS_CAPACITY: usize = 10;
/// Progress is reported before every `PROGRESS_EVERY`th item.
pub const PROGRESS_EVERY: usize = 100;

#[derive(Debug)]
pub struct ProgressState {
    /// Set when one item failed; the run continues with the next item.
    pub error:        Option<Error>,
    pub total:        usize,
    pub index:        usize,
    pub current_file: String,
}

impl ProgressState {
    pub fn is_done(&self) -> bool {
        self.error.is_none() && self.index == self.total
    }
}

/// Result of a pack run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PackSummary {
    pub file_count: u64,
    /// Final container size in bytes.
    pub byte_size:  u64,
    pub dup_count:  u64,
    /// Stored (post-transform) bytes skipped by dedup.
    pub dup_size:   u64,
}

/// Result of an unpack run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnpackSummary {
    pub file_count: u64,
    /// Restored (original) bytes.
    pub byte_size:  u64,
}

// ── Cancellation ─────────────────────────────────────────────────────────────

/// Cooperative cancellation flag, checked between items.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

// ── Reporter ─────────────────────────────────────────────────────────────────

/// Sending half handed to the drivers.
#[derive(Debug, Clone, Default)]
pub struct Reporter {
    progress: Option<SyncSender<ProgressState>>,
    cancel:   CancelToken,
}

impl Reporter {
    /// A reporter that discards progress and is never cancelled.
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn new(progress: SyncSender<ProgressState>, cancel: CancelToken) -> Self {
        Self { progress: Some(progress), cancel }
    }

    pub fn progress(&self, total: usize, index: usize, current_file: &str) {
        self.send(ProgressState {
            error: None,
            total,
            index,
            current_file: current_file.to_owned(),
        });
    }

    pub fn progress_error(&self, error: Error, current_file: &str) {
        warn!("{current_file}: {error}");
        self.send(ProgressState {
            error: Some(error),
            total: 0,
            index: 0,
            current_file: current_file.to_owned(),
        });
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    fn send(&self, state: ProgressState) {
        if let Some(tx) = &self.progress {
            // Full: coalesced away.  Disconnected: nobody is listening.
            let _ = tx.try_send(state);
        }
    }
}

// ── Task ─────────────────────────────────────────────────────────────────────

/// A driver running on its own thread.
pub struct Task<T> {
    progress: Receiver<ProgressState>,
    finish:   Receiver<Result<T>>,
    cancel:   CancelToken,
    handle:   Option<JoinHandle<()>>,
}

impl<T: Send + 'static> Task<T> {
    pub fn spawn<F>(f: F) -> Self
    where
        F: FnOnce(&Reporter) -> Result<T> + Send + 'static,
    {
        let (progress_tx, progress) = mpsc::sync_channel(PROGRESS_CAPACITY);
        let (finish_tx, finish) = mpsc::sync_channel(1);
        let cancel = CancelToken::new();
        let reporter = Reporter::new(progress_tx, cancel.clone());
        let handle = thread::spawn(move || {
            let result = f(&reporter);
            drop(reporter);
            let _ = finish_tx.send(result);
        });
        Self { progress, finish, cancel, handle: Some(handle) }
    }
}

impl<T> Task<T> {
    pub fn progress(&self) -> &Receiver<ProgressState> {
        &self.progress
    }

    /// Next queued progress update, if any.
    pub fn try_progress(&self) -> Option<ProgressState> {
        match self.progress.try_recv() {
            Ok(state) => Some(state),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Request cancellation; the driver stops at the next item boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Block until the completion message arrives.
    pub fn wait(mut self) -> Result<T> {
        let result = self.finish.recv().unwrap_or(Err(Error::TaskLost));
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        result
    }

    /// Drain progress into `on_progress` until the task completes.
    pub fn wait_with<F: FnMut(ProgressState)>(self, mut on_progress: F) -> Result<T> {
        for state in self.progress.iter() {
            on_progress(state);
        }
        self.wait()
    }
}
