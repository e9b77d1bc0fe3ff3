//! The box node: fans in from one or more named inputs, hands each tuple to
//! a user [`BoxOp`], and fans the results back out.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::config::StopOnDisconnect;
use crate::context::Context;
use crate::contract::BoxOp;
use crate::node::fan_in::{FanIn, FanInEvent, FanInHandle, NamedInput};
use crate::node::state::{NodeLifecycle, NodeState};
use crate::node::{wait_for_stop_request, NodeControl, NodeKind};
use crate::pipe::PipeWriter;
use crate::tuple::TraceEventType;
use crate::writer::{FanOutWriter, OutputSet};

pub struct BoxNode {
    name: String,
    lifecycle: Arc<NodeLifecycle>,
    outputs: OutputSet,
    fan_in_handle: FanInHandle,
    stop_on_disconnect: StopOnDisconnect,
    worker: JoinHandle<()>,
}

impl BoxNode {
    pub fn spawn(
        name: impl Into<String>,
        ctx: Context,
        box_impl: Arc<dyn BoxOp>,
        initial_inputs: Vec<NamedInput>,
        stop_on_disconnect: StopOnDisconnect,
        initial_outputs: Vec<Arc<PipeWriter>>,
    ) -> Arc<Self> {
        let name = name.into();
        let lifecycle = Arc::new(NodeLifecycle::new(name.clone(), NodeState::Initialized));
        let outputs = OutputSet::new();
        for pipe in initial_outputs {
            outputs.add(pipe);
        }
        let (fan_in, fan_in_handle) = FanIn::new(initial_inputs);

        lifecycle
            .begin_starting()
            .expect("freshly constructed lifecycle starts Initialized");
        lifecycle
            .mark_running()
            .expect("lifecycle was just moved to Starting");

        let worker = tokio::spawn(run_worker(
            name.clone(),
            ctx,
            lifecycle.clone(),
            outputs.clone(),
            box_impl,
            fan_in,
            stop_on_disconnect,
        ));

        Arc::new(Self {
            name,
            lifecycle,
            outputs,
            fan_in_handle,
            stop_on_disconnect,
            worker,
        })
    }

    pub fn outputs(&self) -> &OutputSet {
        &self.outputs
    }

    pub fn add_input(&self, input: NamedInput) {
        self.fan_in_handle.add(input);
    }

    pub fn remove_input(&self, name: Arc<str>) {
        self.fan_in_handle.remove(name);
    }

    pub fn stop_on_disconnect(&self) -> StopOnDisconnect {
        self.stop_on_disconnect
    }

    /// Spawns a background task that stops this node once its output set
    /// becomes empty, if `stop_on_disconnect` watches outbound edges. A
    /// box's worker loop already checks inbound disconnection on every
    /// fan-in round; outbound disconnection has no equivalent "next poll"
    /// to hook into, since a box with no more consumers may still be
    /// sitting idle on a slow upstream, so it is watched the same way a
    /// source's outbound disconnection is.
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

async fn run_worker(
    name: String,
    ctx: Context,
    lifecycle: Arc<NodeLifecycle>,
    outputs: OutputSet,
    box_impl: Arc<dyn BoxOp>,
    mut fan_in: FanIn,
    stop_on_disconnect: StopOnDisconnect,
) {
    if let Err(err) = box_impl.init(&ctx).await {
        tracing::debug!(node = %name, error = %err, "box init failed; node will not process any tuples");
    } else {
        let writer = FanOutWriter::new(name.clone(), outputs.clone());
        loop {
            if stop_on_disconnect.watches_inbound() && fan_in.input_count() == 0 {
                break;
            }
            tokio::select! {
                biased;
                _ = wait_for_stop_request(&lifecycle) => break,
                event = fan_in.next() => match event {
                    FanInEvent::Tuple(input_name, mut tuple) => {
                        let trace_on = ctx.flags().tuple_trace();
                        tuple.trace(trace_on, TraceEventType::Input, &name);
                        if let Err(err) = box_impl.process(&ctx, &input_name, tuple, &writer).await {
                            tracing::debug!(node = %name, error = %err, "box process returned an error; tuple dropped");
                            if let crate::error::SensorBeeError::User(user_err) = &err {
                                if user_err.fatal {
                                    break;
                                }
                            }
                        }
                    }
                    FanInEvent::Exhausted => break,
                },
            }
        }
    }

    box_impl.terminate(&ctx).await.ok();
    outputs.close_all();
    lifecycle.begin_stopping().ok();
    lifecycle.mark_stopped();
}

#[async_trait]
impl NodeControl for BoxNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Box
    }

    fn lifecycle(&self) -> &NodeLifecycle {
        &self.lifecycle
    }

    fn output_set(&self) -> Option<&OutputSet> {
        Some(&self.outputs)
    }

    fn fan_in_handle(&self) -> Option<&FanInHandle> {
        Some(&self.fan_in_handle)
    }

    async fn stop(&self, _ctx: &Context) {
        self.lifecycle.begin_stopping().ok();
        self.lifecycle.wait(NodeState::Stopped).await;
    }
}

impl Drop for BoxNode {
    fn drop(&mut self) {
        self.worker.abort();
    }
}
