//! The source node: runs a user [`Source`]'s `generate_stream` on its own
//! worker task for the lifetime of the node.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::config::{SourceConfig, StopOnDisconnect};
use crate::context::Context;
use crate::contract::{Rewindable, Source};
use crate::error::SensorBeeError;
use crate::node::state::{NodeLifecycle, NodeState};
use crate::node::{NodeControl, NodeKind};
use crate::pipe::PipeWriter;
use crate::writer::{FanOutWriter, OutputSet, SourceWriter};

pub struct SourceNode {
    name: String,
    lifecycle: Arc<NodeLifecycle>,
    outputs: OutputSet,
    source: Arc<dyn Source>,
    rewindable: Option<Arc<dyn Rewindable>>,
    stop_on_disconnect: StopOnDisconnect,
    worker: JoinHandle<()>,
}

impl SourceNode {
    /// Starts the node: spawns the worker task that drives `generate_stream`
    /// to completion. `rewindable` should be a clone of the same
    /// allocation as `source`, coerced to the narrower trait object, when
    /// the concrete type supports rewinding.
    pub fn spawn(
        name: impl Into<String>,
        ctx: Context,
        source: Arc<dyn Source>,
        rewindable: Option<Arc<dyn Rewindable>>,
        cfg: SourceConfig,
        stop_on_disconnect: StopOnDisconnect,
        initial_outputs: Vec<Arc<PipeWriter>>,
    ) -> Arc<Self> {
        let name = name.into();
        let lifecycle = Arc::new(NodeLifecycle::new(name.clone(), NodeState::Initialized));
        let outputs = OutputSet::new();
        for pipe in initial_outputs {
            outputs.add(pipe);
        }

        lifecycle
            .begin_starting()
            .expect("freshly constructed lifecycle starts Initialized");
        let ready_state = if cfg.paused_on_startup {
            NodeState::Paused
        } else {
            NodeState::Running
        };
        lifecycle
            .mark_ready(ready_state)
            .expect("lifecycle was just moved to Starting");

        let writer = SourceWriter::new(
            FanOutWriter::new(name.clone(), outputs.clone()),
            lifecycle.subscribe(),
        );

        let worker_name = name.clone();
        let worker_lifecycle = lifecycle.clone();
        let worker_source = source.clone();
        let worker_ctx = ctx.clone();
        let worker_outputs = outputs.clone();
        let worker = tokio::spawn(async move {
            if let Err(err) = worker_source.generate_stream(&worker_ctx, &writer).await {
                tracing::debug!(node = %worker_name, error = %err, "source generate_stream returned an error");
            }
            worker_lifecycle.begin_stopping().ok();
            worker_outputs.close_all();
            worker_lifecycle.mark_stopped();
        });

        Arc::new(Self {
            name,
            lifecycle,
            outputs,
            source,
            rewindable,
            stop_on_disconnect,
            worker,
        })
    }

    pub fn outputs(&self) -> &OutputSet {
        &self.outputs
    }

    pub fn stop_on_disconnect(&self) -> StopOnDisconnect {
        self.stop_on_disconnect
    }

    /// Restarts `generate_stream` from the beginning, for the one case this
    /// node can actually support: the node is `Paused`, `generate_stream` is
    /// still alive (blocked at the writer's pause gate), and the underlying
    /// `Rewindable` implementation resets its own stream position before the
    /// gate reopens on the next `resume`.
    ///
    /// A rewind requested once the stream has run to completion is rejected
    /// instead of restarting the node: by the time `generate_stream` returns,
    /// the worker task has exited and the lifecycle has already reached
    /// `Stopped`, which every other exit path (`Stop()`, stop-on-disconnect,
    /// a fatal user error) treats as a dead end. Carving out an exception
    /// here would mean `Stopped` is no longer terminal for this one path
    /// while staying terminal for all the others, so a rewind from anything
    /// but `Paused` returns a `StateError` instead. Restarting a finished
    /// source is left to the caller, who can always `add_source` a fresh
    /// instance.
    pub async fn rewind(&self, ctx: &Context) -> Result<(), SensorBeeError> {
        if self.lifecycle.current() != NodeState::Paused {
            return Err(SensorBeeError::State(crate::error::StateError {
                node: self.name.clone(),
                operation: "rewind",
                state: self.lifecycle.current().label(),
            }));
        }
        match &self.rewindable {
            Some(rewindable) => rewindable.rewind(ctx).await,
            None => Err(SensorBeeError::User(crate::error::UserError::new(
                self.name.clone(),
                RewindUnsupported,
            ))),
        }
    }

    /// Spawns a background task that stops this node once its output set
    /// becomes empty, if `stop_on_disconnect` watches outbound edges.
    pub fn spawn_outbound_watchdog(self: &Arc<Self>, ctx: Context) {
        if !self.stop_on_disconnect.watches_outbound() {
            return;
        }
        let node = self.clone();
        tokio::spawn(async move {
            node.outputs.wait_until_empty().await;
            if node.state() != NodeState::Stopped {
                node.stop(&ctx).await;
            }
        });
    }
}

#[derive(Debug)]
struct RewindUnsupported;

impl std::fmt::Display for RewindUnsupported {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "this source does not implement Rewindable")
    }
}

impl std::error::Error for RewindUnsupported {}

#[async_trait]
impl NodeControl for SourceNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Source
    }

    fn lifecycle(&self) -> &NodeLifecycle {
        &self.lifecycle
    }

    fn output_set(&self) -> Option<&OutputSet> {
        Some(&self.outputs)
    }

    async fn stop(&self, ctx: &Context) {
        self.lifecycle.begin_stopping().ok();
        self.source.stop(ctx).await;
        self.lifecycle.wait(NodeState::Stopped).await;
    }
}

impl Drop for SourceNode {
    fn drop(&mut self) {
        self.worker.abort();
    }
}
