//! Typed bounded channel between two nodes.
//!
//! `Write` blocks when full in `Block` mode, applying back-pressure
//! upstream; in `DropLatest` mode a write that would block instead drops the
//! newly-arriving tuple and counts it. `Read` blocks when empty. Both
//! unblock promptly when the pipe closes.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::DropMode;
use crate::error::PipeClosedError;
use crate::tuple::Tuple;

/// Per-edge counters, surfaced for the ambient observability stack. Only
/// meaningful for `DropMode::DropLatest` edges — `Block` edges never drop.
#[derive(Debug, Default)]
pub struct PipeMetrics {
    dropped: AtomicU64,
}

impl PipeMetrics {
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }
}

/// A human-readable label for a pipe, used in log lines and
/// [`PipeClosedError`].
#[derive(Debug, Clone)]
pub struct EdgeLabel {
    pub from: String,
    pub to: String,
    pub input_name: String,
}

impl EdgeLabel {
    pub fn render(&self) -> String {
        format!("{}->{}:{}", self.from, self.to, self.input_name)
    }
}

struct PipeShared {
    label: EdgeLabel,
    drop_mode: DropMode,
    metrics: PipeMetrics,
    /// Guards against the owning side calling `close()` more than once;
    /// close is idempotent but the contract expects a single call.
    closed_by_owner: AtomicBool,
}

/// The producing side of a pipe, handed to a [`crate::writer::Writer`].
///
/// Why: a node's writer logic (fan-out, pause gating) needs to address an
/// edge without knowing or caring whether the reading side still exists;
/// `PipeWriter` is that handle, kept alive independently of `PipeReader`.
/// What: wraps an `mpsc::Sender<Tuple>` plus the label/metrics/drop-mode
/// state shared with the reader through `PipeShared`.
/// How: `write` behaves differently per `DropMode` — `Block` awaits
/// `Sender::send`, `DropLatest` uses `try_send` and counts a full channel
/// as a drop rather than backpressure; both report a closed channel the
/// same way, via `PipeClosedError`.
/// Trade-offs: the drop-mode branch lives on the hot `write` path rather
/// than behind a trait object, since a pipe's mode never changes after
/// construction and a match is cheaper than a dynamic dispatch per tuple.
pub struct PipeWriter {
    tx: mpsc::Sender<Tuple>,
    shared: Arc<PipeShared>,
}

/// The consuming side of a pipe, read from a node's fan-in loop.
pub struct PipeReader {
    rx: mpsc::Receiver<Tuple>,
    shared: Arc<PipeShared>,
}

/// Constructs a connected writer/reader pair with the given capacity and
/// drop policy.
pub fn pipe(label: EdgeLabel, capacity: usize, drop_mode: DropMode) -> (PipeWriter, PipeReader) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let shared = Arc::new(PipeShared {
        label,
        drop_mode,
        metrics: PipeMetrics::default(),
        closed_by_owner: AtomicBool::new(false),
    });
    (
        PipeWriter {
            tx,
            shared: shared.clone(),
        },
        PipeReader { rx, shared },
    )
}

impl PipeWriter {
    pub fn label(&self) -> &EdgeLabel {
        &self.shared.label
    }

    pub fn metrics(&self) -> &PipeMetrics {
        &self.shared.metrics
    }

    /// Enqueues `tuple` downstream. Blocks (in `Block` mode) until there is
    /// room or the pipe closes; in `DropLatest` mode, returns immediately,
    /// silently dropping `tuple` if the pipe is momentarily full.
    ///
    /// Returns [`PipeClosedError`] once the consumer has closed its side —
    /// this is the normal signal a producing worker uses to terminate.
    pub async fn write(&self, tuple: Tuple) -> Result<(), PipeClosedError> {
        match self.shared.drop_mode {
            DropMode::Block => self.tx.send(tuple).await.map_err(|_| self.closed_error()),
            DropMode::DropLatest => match self.tx.try_send(tuple) {
                Ok(()) => Ok(()),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.shared.metrics.record_drop();
                    Ok(())
                }
                Err(mpsc::error::TrySendError::Closed(_)) => Err(self.closed_error()),
            },
        }
    }

    /// Marks this pipe closed from the owning (producer) side, after it has
    /// finished emitting. Idempotent: a second call is a no-op rather than a
    /// panic, though the contract expects it to be called at most once.
    pub fn close(&self) {
        self.shared.closed_by_owner.store(true, Ordering::Relaxed);
        // Dropping the Sender is what actually closes the channel; the
        // PipeWriter handle is consumed by the owning worker's shutdown
        // path, so there is nothing further to do here besides bookkeeping.
    }

    fn closed_error(&self) -> PipeClosedError {
        PipeClosedError {
            edge: self.shared.label.render(),
        }
    }
}

impl PipeReader {
    pub fn label(&self) -> &EdgeLabel {
        &self.shared.label
    }

    pub fn metrics(&self) -> &PipeMetrics {
        &self.shared.metrics
    }

    /// Reads the next tuple, or `None` once the pipe is closed and drained.
    pub async fn read(&mut self) -> Option<Tuple> {
        self.rx.recv().await
    }

    /// Closes this pipe from the consumer side: the producer's next `write`
    /// observes the pipe as closed and returns [`PipeClosedError`], which is
    /// the mechanism used when a downstream input is removed while the
    /// upstream is still running.
    pub fn close_from_consumer(&mut self) {
        self.rx.close();
    }
}
