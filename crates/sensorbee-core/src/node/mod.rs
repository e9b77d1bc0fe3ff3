//! Worker-side node scaffolding: the lifecycle state machine, the fan-in
//! multiplexer shared by box and sink nodes, and the three concrete node
//! kinds that bridge user contracts onto the wiring layer.

pub mod box_node;
pub mod fan_in;
pub mod sink;
pub mod source;
pub mod state;

use async_trait::async_trait;

use crate::context::Context;
use crate::writer::OutputSet;

use self::fan_in::FanInHandle;
use self::state::{NodeLifecycle, NodeState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Source,
    Box,
    Sink,
}

impl NodeKind {
    pub fn label(self) -> &'static str {
        match self {
            NodeKind::Source => "source",
            NodeKind::Box => "box",
            NodeKind::Sink => "sink",
        }
    }
}

/// The uniform control surface the topology supervisor drives every running
/// node through, regardless of kind. Wiring operations that only make sense
/// for some kinds (an output set to fan into, an input set to fan out of)
/// are exposed as `Option`s the supervisor checks before using.
#[async_trait]
pub trait NodeControl: Send + Sync {
    fn name(&self) -> &str;
    fn kind(&self) -> NodeKind;
    fn lifecycle(&self) -> &NodeLifecycle;

    /// `Some` for sources and boxes: the set of downstream pipes wiring
    /// code can append a new edge to.
    fn output_set(&self) -> Option<&OutputSet> {
        None
    }

    /// `Some` for boxes and sinks: the handle used to add or remove a named
    /// input on an already-running node.
    fn fan_in_handle(&self) -> Option<&FanInHandle> {
        None
    }

    /// Requests termination and waits for the worker task to actually
    /// exit. Idempotent.
    async fn stop(&self, ctx: &Context);

    fn state(&self) -> NodeState {
        self.lifecycle().current()
    }

    fn pause(&self) -> Result<(), crate::error::StateError> {
        self.lifecycle().pause()
    }

    fn resume(&self) -> Result<(), crate::error::StateError> {
        self.lifecycle().resume()
    }

    async fn wait(&self, target: NodeState) {
        self.lifecycle().wait(target).await;
    }
}

/// Blocks until the node's lifecycle leaves `Running`/`Paused` for
/// `Stopping` (or later). Used by box and sink worker loops as the second
/// arm of a `select!` against their fan-in, so a stop request preempts an
/// otherwise-idle read.
pub(crate) async fn wait_for_stop_request(lifecycle: &NodeLifecycle) {
    let mut rx = lifecycle.subscribe();
    loop {
        let current = *rx.borrow();
        if matches!(current, NodeState::Stopping | NodeState::Stopped) {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
