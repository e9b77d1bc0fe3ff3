//! A concurrent streaming dataflow engine: sources generate tuples, boxes
//! transform them, sinks consume them, wired into an acyclic graph that
//! routes tuples with back-pressure and per-node lifecycle control.

pub mod config;
pub mod context;
pub mod contract;
pub mod data;
pub mod error;
pub mod metrics;
pub mod node;
pub mod pipe;
pub mod topology;
pub mod tuple;
pub mod writer;

pub use config::{BoxConfig, DropMode, EdgeConfig, SinkConfig, SourceConfig, StopOnDisconnect};
pub use context::{Context, ContextFlags};
pub use contract::{BoxOp, Rewindable, Sink, Source, Writer};
pub use data::Data;
pub use error::{PipeClosedError, SensorBeeError, StateError, UserError, WiringError};
pub use node::state::NodeState;
pub use node::NodeControl;
pub use topology::Topology;
pub use tuple::{TraceEvent, TraceEventType, Tuple};
