//! Capability contracts sources, boxes, and sinks implement.
//!
//! These are the only traits external collaborators (the BQL planner's
//! lowering, concrete source/sink implementations) need to satisfy; the
//! runtime itself is the sole caller of every method here.

use async_trait::async_trait;

use crate::context::Context;
use crate::error::{PipeClosedError, SensorBeeError};
use crate::tuple::Tuple;

/// The object handed to sources and boxes for emitting tuples downstream.
/// `write` is the single suspension / back-pressure point in the whole
/// engine.
#[async_trait]
pub trait Writer: Send + Sync {
    async fn write(&self, ctx: &Context, tuple: Tuple) -> Result<(), PipeClosedError>;
}

/// A tuple producer. `generate_stream` runs for the node's entire lifetime
/// on its own worker and must return once `stop` has been observed or its
/// writer returns a terminal [`PipeClosedError`].
#[async_trait]
pub trait Source: Send + Sync + 'static {
    async fn generate_stream(
        &self,
        ctx: &Context,
        writer: &dyn Writer,
    ) -> Result<(), SensorBeeError>;

    /// Requests termination. Called from a different task than the one
    /// running `generate_stream`; implementations typically flip an
    /// internal flag or cancellation token that `generate_stream` polls.
    async fn stop(&self, ctx: &Context);
}

/// Optional extension for sources that can restart their stream from the
/// beginning. Valid only while the owning node is `Paused` or after the
/// stream has completed naturally.
#[async_trait]
pub trait Rewindable: Source {
    async fn rewind(&self, ctx: &Context) -> Result<(), SensorBeeError>;
}

/// A tuple transformer. `process` may emit zero or many tuples per input via
/// `writer`, and must be safe to call sequentially from a single worker —
/// the engine guarantees it is never invoked concurrently with itself on
/// the same node, so implementations need no internal locking for state
/// touched only from `process`.
#[async_trait]
pub trait BoxOp: Send + Sync + 'static {
    async fn init(&self, _ctx: &Context) -> Result<(), SensorBeeError> {
        Ok(())
    }

    async fn process(
        &self,
        ctx: &Context,
        input_name: &str,
        tuple: Tuple,
        writer: &dyn Writer,
    ) -> Result<(), SensorBeeError>;

    async fn terminate(&self, _ctx: &Context) -> Result<(), SensorBeeError> {
        Ok(())
    }
}

/// A tuple consumer at the edge of the topology.
#[async_trait]
pub trait Sink: Send + Sync + 'static {
    async fn write(&self, ctx: &Context, tuple: Tuple) -> Result<(), SensorBeeError>;
    async fn close(&self, _ctx: &Context) -> Result<(), SensorBeeError> {
        Ok(())
    }
}
