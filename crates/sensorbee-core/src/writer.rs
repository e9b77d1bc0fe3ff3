//! The fan-out [`Writer`] implementation shared by source and box nodes.
//!
//! Writing appends the `OutputEv` trace event tagged with the emitting
//! node's own name, then hands a copy to each currently-connected output
//! pipe — deep-copying for every branch but the last. A write that finds
//! its target pipe closed removes that pipe from the output set and logs
//! at `debug`; the error never propagates past the writer.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::{watch, Notify};

use crate::context::Context;
use crate::contract::Writer;
use crate::error::PipeClosedError;
use crate::node::state::NodeState;
use crate::pipe::PipeWriter;
use crate::tuple::{Tuple, TraceEventType};

/// The mutable set of a node's output pipes.
///
/// Why: wiring can attach a new downstream, or a downstream's disconnect
/// can prune a pipe, at any point in a node's lifetime — the set has to be
/// reachable from the topology's wiring calls without routing through the
/// node worker's own task.
/// What: a `Vec<Arc<PipeWriter>>` behind a lock, plus a `Notify` that fires
/// whenever the set transitions to empty, for outbound stop-on-disconnect
/// watchdogs to wait on.
/// How: cloning the handle (`#[derive(Clone)]` over `Arc` fields) gives
/// every caller — the node worker, wiring code, a watchdog task — the same
/// underlying set; `snapshot` hands the fan-out writer a point-in-time
/// `Vec` so it isn't holding the lock across any `.await`.
/// Trade-offs: `parking_lot::RwLock` instead of an async lock, since every
/// critical section here is a short, synchronous `Vec` operation.
#[derive(Clone, Default)]
pub struct OutputSet {
    pipes: Arc<RwLock<Vec<Arc<PipeWriter>>>>,
    went_empty: Arc<Notify>,
}

impl OutputSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, pipe: Arc<PipeWriter>) {
        self.pipes.write().push(pipe);
    }

    pub fn len(&self) -> usize {
        self.pipes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipes.read().is_empty()
    }

    fn snapshot(&self) -> Vec<Arc<PipeWriter>> {
        self.pipes.read().clone()
    }

    /// A point-in-time copy of the connected pipes, for metrics snapshots.
    pub fn pipes(&self) -> Vec<Arc<PipeWriter>> {
        self.snapshot()
    }

    fn remove(&self, target: &Arc<PipeWriter>) {
        let mut pipes = self.pipes.write();
        pipes.retain(|p| !Arc::ptr_eq(p, target));
        if pipes.is_empty() {
            self.went_empty.notify_waiters();
        }
    }

    /// Drops every output pipe this node holds, closing each one from the
    /// producer side.
    pub fn close_all(&self) {
        self.pipes.write().clear();
        self.went_empty.notify_waiters();
    }

    /// Resolves once the output set has no connected pipes, whether it
    /// started that way or every pipe was pruned one at a time.
    pub async fn wait_until_empty(&self) {
        loop {
            if self.is_empty() {
                return;
            }
            let notified = self.went_empty.notified();
            tokio::pin!(notified);
            if self.is_empty() {
                return;
            }
            notified.await;
        }
    }
}

/// Fans a tuple out to every currently-connected output pipe.
pub struct FanOutWriter {
    node_name: String,
    outputs: OutputSet,
}

impl FanOutWriter {
    pub fn new(node_name: impl Into<String>, outputs: OutputSet) -> Self {
        Self {
            node_name: node_name.into(),
            outputs,
        }
    }

    pub fn outputs(&self) -> &OutputSet {
        &self.outputs
    }
}

#[async_trait]
impl Writer for FanOutWriter {
    async fn write(&self, ctx: &Context, tuple: Tuple) -> Result<(), PipeClosedError> {
        let targets = self.outputs.snapshot();
        if targets.is_empty() {
            return Ok(());
        }
        let trace_on = ctx.flags().tuple_trace();
        let copies = tuple.fan_out(targets.len());
        for (pipe, mut copy) in targets.into_iter().zip(copies) {
            copy.trace(trace_on, TraceEventType::Output, &self.node_name);
            if let Err(_closed) = pipe.write(copy).await {
                tracing::debug!(
                    node = %self.node_name,
                    edge = %pipe.label().render(),
                    "downstream pipe closed; dropping it from this node's output set"
                );
                self.outputs.remove(&pipe);
            }
        }
        Ok(())
    }
}

/// Wraps a [`FanOutWriter`] with the pause gate described for sources:
/// before forwarding each tuple, the writer waits for the node's lifecycle
/// to leave `Paused`.
pub struct SourceWriter {
    inner: FanOutWriter,
    state: watch::Receiver<NodeState>,
}

impl SourceWriter {
    pub fn new(inner: FanOutWriter, state: watch::Receiver<NodeState>) -> Self {
        Self { inner, state }
    }

    async fn await_running_gate(&self) {
        let mut rx = self.state.clone();
        loop {
            match *rx.borrow() {
                NodeState::Paused => {}
                _ => return,
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[async_trait]
impl Writer for SourceWriter {
    async fn write(&self, ctx: &Context, tuple: Tuple) -> Result<(), PipeClosedError> {
        self.await_running_gate().await;
        self.inner.write(ctx, tuple).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DropMode;
    use crate::data::Data;
    use crate::pipe::{pipe, EdgeLabel};

    fn label(to: &str) -> EdgeLabel {
        EdgeLabel {
            from: "src".into(),
            to: to.into(),
            input_name: "src".into(),
        }
    }

    #[tokio::test]
    async fn fan_out_tags_output_event_with_writer_node_name() {
        let outputs = OutputSet::new();
        let (w1, mut r1) = pipe(label("b1"), 8, DropMode::Block);
        outputs.add(Arc::new(w1));
        let writer = FanOutWriter::new("so1", outputs);
        let ctx = Context::new("t");
        ctx.flags().set_tuple_trace(true);
        writer.write(&ctx, Tuple::new(Data::Null)).await.unwrap();
        let received = r1.read().await.unwrap();
        assert_eq!(received.route(), "output so1");
    }

    #[tokio::test]
    async fn write_with_no_outputs_is_a_noop() {
        let writer = FanOutWriter::new("so1", OutputSet::new());
        let ctx = Context::new("t");
        writer.write(&ctx, Tuple::new(Data::Null)).await.unwrap();
    }

    #[tokio::test]
    async fn closed_downstream_is_pruned_from_output_set() {
        let outputs = OutputSet::new();
        let (w1, mut r1) = pipe(label("b1"), 8, DropMode::Block);
        r1.close_from_consumer();
        outputs.add(Arc::new(w1));
        assert_eq!(outputs.len(), 1);
        let writer = FanOutWriter::new("so1", outputs.clone());
        let ctx = Context::new("t");
        writer.write(&ctx, Tuple::new(Data::Null)).await.unwrap();
        assert_eq!(outputs.len(), 0);
    }
}
