//! Read-only snapshots of per-edge counters, for callers that want to
//! surface drop counts or pipe depth without reaching into node internals.

use crate::pipe::PipeWriter;

/// A point-in-time snapshot of one edge's counters.
#[derive(Debug, Clone)]
pub struct EdgeSnapshot {
    pub label: String,
    pub dropped: u64,
}

/// Builds a snapshot of every pipe in a node's output set.
pub fn snapshot_edges(outputs: &crate::writer::OutputSet) -> Vec<EdgeSnapshot> {
    outputs
        .pipes()
        .iter()
        .map(|p: &std::sync::Arc<PipeWriter>| EdgeSnapshot {
            label: p.label().render(),
            dropped: p.metrics().dropped(),
        })
        .collect()
}
