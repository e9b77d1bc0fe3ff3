//! The sink node: fans in from one or more named inputs and hands each
//! tuple to a user [`Sink`]. Sinks have no outputs, so only inbound
//! disconnection is meaningful for their stop-on-disconnect setting.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::config::StopOnDisconnect;
use crate::context::Context;
use crate::contract::Sink;
use crate::node::fan_in::{FanIn, FanInEvent, FanInHandle, NamedInput};
use crate::node::state::{NodeLifecycle, NodeState};
use crate::node::{wait_for_stop_request, NodeControl, NodeKind};
use crate::tuple::TraceEventType;

pub struct SinkNode {
    name: String,
    lifecycle: Arc<NodeLifecycle>,
    fan_in_handle: FanInHandle,
    stop_on_disconnect: StopOnDisconnect,
    worker: JoinHandle<()>,
}

impl SinkNode {
    pub fn spawn(
        name: impl Into<String>,
        ctx: Context,
        sink_impl: Arc<dyn Sink>,
        initial_inputs: Vec<NamedInput>,
        stop_on_disconnect: StopOnDisconnect,
    ) -> Arc<Self> {
        let name = name.into();
        let lifecycle = Arc::new(NodeLifecycle::new(name.clone(), NodeState::Initialized));
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
            sink_impl,
            fan_in,
            stop_on_disconnect,
        ));

        Arc::new(Self {
            name,
            lifecycle,
            fan_in_handle,
            stop_on_disconnect,
            worker,
        })
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
}

async fn run_worker(
    name: String,
    ctx: Context,
    lifecycle: Arc<NodeLifecycle>,
    sink_impl: Arc<dyn Sink>,
    mut fan_in: FanIn,
    stop_on_disconnect: StopOnDisconnect,
) {
    loop {
        if stop_on_disconnect.watches_inbound() && fan_in.input_count() == 0 {
            break;
        }
        tokio::select! {
            biased;
            _ = wait_for_stop_request(&lifecycle) => break,
            event = fan_in.next() => match event {
                FanInEvent::Tuple(_input_name, mut tuple) => {
                    let trace_on = ctx.flags().tuple_trace();
                    tuple.trace(trace_on, TraceEventType::Input, &name);
                    if let Err(err) = sink_impl.write(&ctx, tuple).await {
                        tracing::debug!(node = %name, error = %err, "sink write returned an error; tuple dropped");
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

    sink_impl.close(&ctx).await.ok();
    lifecycle.begin_stopping().ok();
    lifecycle.mark_stopped();
}

#[async_trait]
impl NodeControl for SinkNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Sink
    }

    fn lifecycle(&self) -> &NodeLifecycle {
        &self.lifecycle
    }

    fn fan_in_handle(&self) -> Option<&FanInHandle> {
        Some(&self.fan_in_handle)
    }

    async fn stop(&self, _ctx: &Context) {
        self.lifecycle.begin_stopping().ok();
        self.lifecycle.wait(NodeState::Stopped).await;
    }
}

impl Drop for SinkNode {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DropMode;
    use crate::data::Data;
    use crate::pipe::{pipe, EdgeLabel};
    use crate::tuple::Tuple;
    use std::sync::Mutex;

    struct Collecting {
        received: Arc<Mutex<Vec<i64>>>,
    }

    #[async_trait]
    impl Sink for Collecting {
        async fn write(&self, _ctx: &Context, tuple: Tuple) -> Result<(), crate::error::SensorBeeError> {
            self.received.lock().unwrap().push(tuple.data.as_int().unwrap_or(0));
            Ok(())
        }
    }

    fn label(from: &str) -> EdgeLabel {
        EdgeLabel {
            from: from.into(),
            to: "si".into(),
            input_name: from.into(),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn writes_every_received_tuple_to_the_sink() {
        let ctx = Context::new("t");
        let received = Arc::new(Mutex::new(Vec::new()));
        let (w, r) = pipe(label("b1"), 4, DropMode::Block);
        let node = SinkNode::spawn(
            "si",
            ctx.clone(),
            Arc::new(Collecting {
                received: received.clone(),
            }),
            vec![NamedInput {
                name: "b1".into(),
                reader: r,
            }],
            StopOnDisconnect::default(),
        );

        w.write(Tuple::new(Data::Int64(7))).await.unwrap();
        w.write(Tuple::new(Data::Int64(8))).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(*received.lock().unwrap(), vec![7, 8]);
        let _ = node;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn inbound_stop_on_disconnect_stops_once_last_input_closes() {
        let ctx = Context::new("t");
        let (w, r) = pipe(label("b1"), 4, DropMode::Block);
        let node = SinkNode::spawn(
            "si",
            ctx.clone(),
            Arc::new(Collecting {
                received: Arc::new(Mutex::new(Vec::new())),
            }),
            vec![NamedInput {
                name: "b1".into(),
                reader: r,
            }],
            StopOnDisconnect::Inbound,
        );
        drop(w);
        node.lifecycle().wait(NodeState::Stopped).await;
        assert_eq!(node.state(), NodeState::Stopped);
    }

    struct AlwaysFatal;

    #[async_trait]
    impl Sink for AlwaysFatal {
        async fn write(&self, _ctx: &Context, _tuple: Tuple) -> Result<(), crate::error::SensorBeeError> {
            Err(crate::error::SensorBeeError::User(
                crate::error::UserError::new("si", FatalWriteFailed).fatal(),
            ))
        }
    }

    #[derive(Debug)]
    struct FatalWriteFailed;

    impl std::fmt::Display for FatalWriteFailed {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "write failed fatally")
        }
    }

    impl std::error::Error for FatalWriteFailed {}

    #[tokio::test(flavor = "multi_thread")]
    async fn fatal_user_error_stops_the_node() {
        let ctx = Context::new("t");
        let (w, r) = pipe(label("b1"), 4, DropMode::Block);
        let node = SinkNode::spawn(
            "si",
            ctx.clone(),
            Arc::new(AlwaysFatal),
            vec![NamedInput {
                name: "b1".into(),
                reader: r,
            }],
            StopOnDisconnect::default(),
        );
        w.write(Tuple::new(Data::Int64(1))).await.unwrap();
        node.lifecycle().wait(NodeState::Stopped).await;
        assert_eq!(node.state(), NodeState::Stopped);
    }
}
