//! The Builder + Supervisor: registers nodes, wires edges between them with
//! cycle rejection, and drives topology-wide start/stop.
//!
//! Node registration is two-phase. A node added before [`Topology::run`] is
//! held as a [`PendingNode`] — its pipes can already be wired to other
//! nodes, pending or live — and is only actually spawned (its worker task
//! started) once `run` executes or, for nodes added afterward, immediately.
//! This mirrors the "registered at build time, started at run time" split
//! real dataflow builders use, without needing the node itself to know
//! whether its neighbors exist yet.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;

use crate::config::{BoxConfig, EdgeConfig, SinkConfig, SourceConfig, StopOnDisconnect};
use crate::context::{Context, ContextFlags};
use crate::contract::{BoxOp, Rewindable, Sink, Source};
use crate::error::{SensorBeeError, StateError, WiringError};
use crate::node::box_node::BoxNode;
use crate::node::fan_in::NamedInput;
use crate::node::sink::SinkNode;
use crate::node::source::SourceNode;
use crate::node::state::{NodeLifecycle, NodeState};
use crate::node::{NodeControl, NodeKind};
use crate::pipe::{pipe, EdgeLabel, PipeWriter};

struct PendingSource {
    source: Arc<dyn Source>,
    rewindable: Option<Arc<dyn Rewindable>>,
    cfg: SourceConfig,
    stop_on_disconnect: StopOnDisconnect,
    pending_outputs: Vec<Arc<PipeWriter>>,
}

struct PendingBox {
    box_impl: Arc<dyn BoxOp>,
    #[allow(dead_code)]
    cfg: BoxConfig,
    stop_on_disconnect: StopOnDisconnect,
    pending_outputs: Vec<Arc<PipeWriter>>,
    pending_inputs: Vec<NamedInput>,
}

struct PendingSink {
    sink_impl: Arc<dyn Sink>,
    #[allow(dead_code)]
    cfg: SinkConfig,
    stop_on_disconnect: StopOnDisconnect,
    pending_inputs: Vec<NamedInput>,
}

enum RegisteredNode {
    PendingSource(PendingSource),
    PendingBox(PendingBox),
    PendingSink(PendingSink),
    Live(Arc<dyn NodeControl>),
}

impl RegisteredNode {
    fn kind(&self) -> NodeKind {
        match self {
            RegisteredNode::PendingSource(_) => NodeKind::Source,
            RegisteredNode::PendingBox(_) => NodeKind::Box,
            RegisteredNode::PendingSink(_) => NodeKind::Sink,
            RegisteredNode::Live(node) => node.kind(),
        }
    }
}

/// Wiring-time bookkeeping shared by every `add_*`/`input` call.
///
/// Why: cycle rejection and duplicate-input rejection both need a view of
/// the whole graph that spans pending and live nodes alike, but the nodes
/// themselves (`RegisteredNode`) don't know about each other. Keeping that
/// view here, under its own lock, means wiring can be validated without
/// touching `registry` at all.
/// What: `adjacency` is upstream -> downstream name edges, consulted only
/// to answer "does this edge close a cycle"; `input_names` is the set of
/// input names already claimed per downstream node.
/// How: both maps are populated incrementally inside `Topology::input`,
/// under a single write-lock acquisition per call, so a rejected edge never
/// leaves partial state behind.
/// Trade-offs: `RwLock<EdgeBook>` instead of two `DashMap`s — wiring is a
/// setup-time operation, not a hot path, so a single lock covering both
/// maps is simpler than coordinating two independently-locked structures.
#[derive(Default)]
struct EdgeBook {
    /// upstream node name -> downstream node names, used for cycle
    /// detection only.
    adjacency: HashMap<String, Vec<String>>,
    /// node name -> input names already claimed on that node.
    input_names: HashMap<String, HashSet<String>>,
}

fn would_create_cycle(adjacency: &HashMap<String, Vec<String>>, from: &str, to: &str) -> bool {
    let mut stack = vec![to.to_string()];
    let mut seen = HashSet::new();
    while let Some(node) = stack.pop() {
        if node == from {
            return true;
        }
        if !seen.insert(node.clone()) {
            continue;
        }
        if let Some(next) = adjacency.get(&node) {
            stack.extend(next.iter().cloned());
        }
    }
    false
}

/// The dataflow graph plus its lifecycle supervisor.
///
/// Why: nodes can be wired together before the topology runs and after, and
/// callers need one handle that answers both "build this graph" and
/// "supervise it while it's live" without switching types partway through.
/// What: `registry` holds every node by name, each either `Pending*` (not
/// yet spawned) or `Live`; `edges` tracks the graph shape independently of
/// node state so wiring validation works the same before and after `run`.
/// How: `add_source`/`add_box`/`add_sink` reserve a name and either spawn a
/// worker immediately (topology already `Running`) or stash a `Pending*`
/// payload; `run` walks the registry once and promotes every pending node
/// to `Live` via `spawn_pending`.
/// Trade-offs: `DashMap` over the registry lets `add_*` calls from
/// different tasks interleave safely without a topology-wide lock, at the
/// cost of per-entry rather than whole-map atomicity — callers that need a
/// consistent snapshot across multiple names still go through `edges`.
pub struct Topology {
    name: String,
    ctx: Context,
    lifecycle: Arc<NodeLifecycle>,
    registry: DashMap<String, RegisteredNode>,
    edges: RwLock<EdgeBook>,
}

impl Topology {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_flags(name, ContextFlags::default())
    }

    pub fn with_flags(name: impl Into<String>, flags: ContextFlags) -> Self {
        let name = name.into();
        let ctx = Context::with_flags(name.clone(), flags);
        Self {
            name: name.clone(),
            ctx,
            lifecycle: Arc::new(NodeLifecycle::new(name, NodeState::Initialized)),
            registry: DashMap::new(),
            edges: RwLock::new(EdgeBook::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn state(&self) -> NodeState {
        self.lifecycle.current()
    }

    fn is_running(&self) -> bool {
        self.lifecycle.current() == NodeState::Running
    }

    pub fn add_source(
        &self,
        name: impl Into<String>,
        source: Arc<dyn Source>,
        rewindable: Option<Arc<dyn Rewindable>>,
        cfg: SourceConfig,
        stop_on_disconnect: StopOnDisconnect,
    ) -> Result<(), WiringError> {
        let name = name.into();
        match self.registry.entry(name.clone()) {
            Entry::Occupied(_) => Err(WiringError::DuplicateName(name)),
            Entry::Vacant(slot) => {
                let registered = if self.is_running() {
                    let node = SourceNode::spawn(
                        name,
                        self.ctx.clone(),
                        source,
                        rewindable,
                        cfg,
                        stop_on_disconnect,
                        Vec::new(),
                    );
                    node.spawn_outbound_watchdog(self.ctx.clone());
                    RegisteredNode::Live(node)
                } else {
                    RegisteredNode::PendingSource(PendingSource {
                        source,
                        rewindable,
                        cfg,
                        stop_on_disconnect,
                        pending_outputs: Vec::new(),
                    })
                };
                slot.insert(registered);
                Ok(())
            }
        }
    }

    pub fn add_box(
        &self,
        name: impl Into<String>,
        box_impl: Arc<dyn BoxOp>,
        cfg: BoxConfig,
        stop_on_disconnect: StopOnDisconnect,
    ) -> Result<(), WiringError> {
        let name = name.into();
        match self.registry.entry(name.clone()) {
            Entry::Occupied(_) => Err(WiringError::DuplicateName(name)),
            Entry::Vacant(slot) => {
                let registered = if self.is_running() {
                    let node = BoxNode::spawn(
                        name,
                        self.ctx.clone(),
                        box_impl,
                        Vec::new(),
                        stop_on_disconnect,
                        Vec::new(),
                    );
                    node.spawn_outbound_watchdog(self.ctx.clone());
                    RegisteredNode::Live(node)
                } else {
                    RegisteredNode::PendingBox(PendingBox {
                        box_impl,
                        cfg,
                        stop_on_disconnect,
                        pending_outputs: Vec::new(),
                        pending_inputs: Vec::new(),
                    })
                };
                slot.insert(registered);
                Ok(())
            }
        }
    }

    pub fn add_sink(
        &self,
        name: impl Into<String>,
        sink_impl: Arc<dyn Sink>,
        cfg: SinkConfig,
        stop_on_disconnect: StopOnDisconnect,
    ) -> Result<(), WiringError> {
        let name = name.into();
        match self.registry.entry(name.clone()) {
            Entry::Occupied(_) => Err(WiringError::DuplicateName(name)),
            Entry::Vacant(slot) => {
                let registered = if self.is_running() {
                    let node = SinkNode::spawn(
                        name,
                        self.ctx.clone(),
                        sink_impl,
                        Vec::new(),
                        stop_on_disconnect,
                    );
                    RegisteredNode::Live(node)
                } else {
                    RegisteredNode::PendingSink(PendingSink {
                        sink_impl,
                        cfg,
                        stop_on_disconnect,
                        pending_inputs: Vec::new(),
                    })
                };
                slot.insert(registered);
                Ok(())
            }
        }
    }

    /// Wires `downstream` to read from `upstream`, creating a new bounded
    /// pipe between them.
    ///
    /// Why: edges are the one piece of topology state that must be
    /// consistent across both pending and live nodes at once — a cycle or a
    /// duplicate input name is just as illegal before `run` as after.
    /// What: rejects the edge if either node is missing, if it would create
    /// a cycle, if `downstream` is a source, or if the resolved input name
    /// is already taken on `downstream`.
    /// How: validates and records the edge in `edges` under one lock
    /// acquisition, then attaches the new pipe's writer/reader half to
    /// whichever form (`Live` or `Pending*`) each endpoint is currently in.
    /// Trade-offs: the pipe is constructed even when later steps could
    /// still fail validation differently, but allocation only happens after
    /// every `WiringError` check has already passed.
    pub fn input(
        &self,
        downstream: &str,
        upstream: &str,
        cfg: EdgeConfig,
    ) -> Result<(), WiringError> {
        let input_name = cfg
            .input_name
            .clone()
            .unwrap_or_else(|| upstream.to_string());

        {
            if !self.registry.contains_key(upstream) {
                return Err(WiringError::UnknownUpstream(upstream.to_string()));
            }
            let downstream_kind = self
                .registry
                .get(downstream)
                .ok_or_else(|| WiringError::UnknownUpstream(downstream.to_string()))?
                .kind();
            if downstream_kind == NodeKind::Source {
                return Err(WiringError::SourceAsDownstream(downstream.to_string()));
            }

            let mut book = self.edges.write();
            if would_create_cycle(&book.adjacency, upstream, downstream) {
                return Err(WiringError::Cycle {
                    from: upstream.to_string(),
                    to: downstream.to_string(),
                });
            }
            let names = book.input_names.entry(downstream.to_string()).or_default();
            if !names.insert(input_name.clone()) {
                return Err(WiringError::DuplicateInputName {
                    node: downstream.to_string(),
                    input_name,
                });
            }
            book.adjacency
                .entry(upstream.to_string())
                .or_default()
                .push(downstream.to_string());
        }

        let label = EdgeLabel {
            from: upstream.to_string(),
            to: downstream.to_string(),
            input_name: input_name.clone(),
        };
        let (writer, reader) = pipe(label, cfg.capacity, cfg.drop_mode);
        let writer = Arc::new(writer);

        if let Some(mut entry) = self.registry.get_mut(upstream) {
            match entry.value_mut() {
                RegisteredNode::Live(node) => {
                    if let Some(outputs) = node.output_set() {
                        outputs.add(writer);
                    }
                }
                RegisteredNode::PendingSource(p) => p.pending_outputs.push(writer),
                RegisteredNode::PendingBox(p) => p.pending_outputs.push(writer),
                RegisteredNode::PendingSink(_) => unreachable!("sinks cannot be an upstream"),
            }
        }

        let named_input = NamedInput {
            name: input_name.into(),
            reader,
        };
        if let Some(mut entry) = self.registry.get_mut(downstream) {
            match entry.value_mut() {
                RegisteredNode::Live(node) => {
                    if let Some(handle) = node.fan_in_handle() {
                        handle.add(named_input);
                    }
                }
                RegisteredNode::PendingBox(p) => p.pending_inputs.push(named_input),
                RegisteredNode::PendingSink(p) => p.pending_inputs.push(named_input),
                RegisteredNode::PendingSource(_) => unreachable!("sources cannot be a downstream"),
            }
        }

        Ok(())
    }

    /// Transitions every pending node to live and marks the topology
    /// `Running`. A no-op if already running.
    pub fn run(&self) -> Result<(), StateError> {
        if self.lifecycle.current() == NodeState::Running {
            return Ok(());
        }
        self.lifecycle.begin_starting()?;
        let names: Vec<String> = self.registry.iter().map(|e| e.key().clone()).collect();
        for name in names {
            self.spawn_pending(&name);
        }
        self.lifecycle.mark_running()
    }

    fn spawn_pending(&self, name: &str) {
        let Some((_, pending)) = self.registry.remove(name) else {
            return;
        };
        let live = match pending {
            RegisteredNode::Live(node) => node,
            RegisteredNode::PendingSource(p) => {
                let node = SourceNode::spawn(
                    name.to_string(),
                    self.ctx.clone(),
                    p.source,
                    p.rewindable,
                    p.cfg,
                    p.stop_on_disconnect,
                    p.pending_outputs,
                );
                node.spawn_outbound_watchdog(self.ctx.clone());
                node as Arc<dyn NodeControl>
            }
            RegisteredNode::PendingBox(p) => {
                let node = BoxNode::spawn(
                    name.to_string(),
                    self.ctx.clone(),
                    p.box_impl,
                    p.pending_inputs,
                    p.stop_on_disconnect,
                    p.pending_outputs,
                );
                node.spawn_outbound_watchdog(self.ctx.clone());
                node as Arc<dyn NodeControl>
            }
            RegisteredNode::PendingSink(p) => SinkNode::spawn(
                name.to_string(),
                self.ctx.clone(),
                p.sink_impl,
                p.pending_inputs,
                p.stop_on_disconnect,
            ) as Arc<dyn NodeControl>,
        };
        self.registry
            .insert(name.to_string(), RegisteredNode::Live(live));
    }

    pub fn node_state(&self, name: &str) -> Option<NodeState> {
        match &*self.registry.get(name)? {
            RegisteredNode::Live(node) => Some(node.state()),
            _ => Some(NodeState::Initialized),
        }
    }

    pub fn pause(&self, name: &str) -> Result<(), SensorBeeError> {
        match &*self
            .registry
            .get(name)
            .ok_or_else(|| WiringError::UnknownUpstream(name.to_string()))?
        {
            RegisteredNode::Live(node) => Ok(node.pause()?),
            _ => Ok(()),
        }
    }

    pub fn resume(&self, name: &str) -> Result<(), SensorBeeError> {
        match &*self
            .registry
            .get(name)
            .ok_or_else(|| WiringError::UnknownUpstream(name.to_string()))?
        {
            RegisteredNode::Live(node) => Ok(node.resume()?),
            _ => Ok(()),
        }
    }

    /// Stops every node: sources first, so they stop producing, then waits
    /// for the natural close-cascade to drain boxes and sinks. If `timeout`
    /// elapses before every node reaches `Stopped`, forcibly closes the
    /// output pipes of every node still running so the cascade is forced
    /// through.
    pub async fn stop(&self, timeout: Duration) {
        self.lifecycle.begin_stopping().ok();

        let live_nodes: Vec<Arc<dyn NodeControl>> = self
            .registry
            .iter()
            .filter_map(|e| match e.value() {
                RegisteredNode::Live(node) => Some(node.clone()),
                _ => None,
            })
            .collect();

        let sources: Vec<_> = live_nodes
            .iter()
            .filter(|n| n.kind() == NodeKind::Source)
            .cloned()
            .collect();
        let rest: Vec<_> = live_nodes
            .iter()
            .filter(|n| n.kind() != NodeKind::Source)
            .cloned()
            .collect();

        let ctx = self.ctx.clone();
        for source in &sources {
            source.stop(&ctx).await;
        }

        let drain = async {
            for node in &rest {
                node.lifecycle().wait(NodeState::Stopped).await;
            }
        };
        if tokio::time::timeout(timeout, drain).await.is_err() {
            for node in &rest {
                if let Some(outputs) = node.output_set() {
                    outputs.close_all();
                }
                node.stop(&ctx).await;
            }
        }

        self.lifecycle.mark_stopped();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Data;
    use crate::tuple::Tuple;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Never;
    #[async_trait]
    impl Source for Never {
        async fn generate_stream(
            &self,
            _ctx: &Context,
            _writer: &dyn crate::contract::Writer,
        ) -> Result<(), SensorBeeError> {
            std::future::pending::<()>().await;
            Ok(())
        }
        async fn stop(&self, _ctx: &Context) {}
    }

    struct Identity;
    #[async_trait]
    impl BoxOp for Identity {
        async fn process(
            &self,
            ctx: &Context,
            _input_name: &str,
            tuple: Tuple,
            writer: &dyn crate::contract::Writer,
        ) -> Result<(), SensorBeeError> {
            writer.write(ctx, tuple).await.ok();
            Ok(())
        }
    }

    struct Collecting {
        out: Arc<Mutex<Vec<i64>>>,
    }
    #[async_trait]
    impl Sink for Collecting {
        async fn write(&self, _ctx: &Context, tuple: Tuple) -> Result<(), SensorBeeError> {
            self.out.lock().unwrap().push(tuple.data.as_int().unwrap_or(0));
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cycle_attempt_is_rejected_and_topology_unaffected() {
        let topo = Topology::new("t");
        topo.add_box("b1", Arc::new(Identity), BoxConfig::default(), StopOnDisconnect::default())
            .unwrap();
        topo.add_box("b2", Arc::new(Identity), BoxConfig::default(), StopOnDisconnect::default())
            .unwrap();
        topo.add_box("b3", Arc::new(Identity), BoxConfig::default(), StopOnDisconnect::default())
            .unwrap();
        topo.input("b2", "b1", EdgeConfig::default()).unwrap();
        topo.input("b3", "b2", EdgeConfig::default()).unwrap();

        let err = topo.input("b2", "b3", EdgeConfig::default()).unwrap_err();
        assert!(matches!(err, WiringError::Cycle { .. }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn source_as_downstream_is_rejected() {
        let topo = Topology::new("t");
        topo.add_source(
            "so1",
            Arc::new(Never),
            None,
            SourceConfig::default(),
            StopOnDisconnect::default(),
        )
        .unwrap();
        topo.add_source(
            "so2",
            Arc::new(Never),
            None,
            SourceConfig::default(),
            StopOnDisconnect::default(),
        )
        .unwrap();
        let err = topo.input("so2", "so1", EdgeConfig::default()).unwrap_err();
        assert!(matches!(err, WiringError::SourceAsDownstream(_)));
    }

    struct OneShot {
        value: i64,
    }
    #[async_trait]
    impl Source for OneShot {
        async fn generate_stream(
            &self,
            ctx: &Context,
            writer: &dyn crate::contract::Writer,
        ) -> Result<(), SensorBeeError> {
            writer.write(ctx, Tuple::new(Data::Int64(self.value))).await.ok();
            Ok(())
        }
        async fn stop(&self, _ctx: &Context) {}
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pre_run_wiring_flows_once_run_starts_everything() {
        let topo = Topology::new("t");
        let out = Arc::new(Mutex::new(Vec::new()));
        topo.add_source(
            "so1",
            Arc::new(OneShot { value: 99 }),
            None,
            SourceConfig::default(),
            StopOnDisconnect::default(),
        )
        .unwrap();
        topo.add_box("b1", Arc::new(Identity), BoxConfig::default(), StopOnDisconnect::default())
            .unwrap();
        topo.add_sink(
            "si",
            Arc::new(Collecting { out: out.clone() }),
            SinkConfig::default(),
            StopOnDisconnect::default(),
        )
        .unwrap();
        topo.input("b1", "so1", EdgeConfig::default()).unwrap();
        topo.input("si", "b1", EdgeConfig::default()).unwrap();

        topo.run().unwrap();
        assert_eq!(topo.state(), NodeState::Running);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*out.lock().unwrap(), vec![99]);

        topo.stop(Duration::from_millis(200)).await;
        assert_eq!(topo.state(), NodeState::Stopped);
    }
}
