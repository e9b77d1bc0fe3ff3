//! Process-wide dynamic flags, logger handle, and shared services plumbed
//! through every worker entry point.
//!
//! `Context` is explicitly passed around rather than reached for as a
//! singleton: no process-wide statics or thread-locals back it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Dynamic flags a running topology can flip without a restart.
#[derive(Debug, Default)]
pub struct ContextFlags {
    tuple_trace: AtomicBool,
}

impl ContextFlags {
    pub fn new(tuple_trace: bool) -> Self {
        Self {
            tuple_trace: AtomicBool::new(tuple_trace),
        }
    }

    /// Read with `Relaxed` ordering: this is a hot-path check performed once
    /// per pipe traversal, and callers only need the flag's value at the
    /// moment of the check — not a happens-before relationship with
    /// whoever flipped it.
    pub fn tuple_trace(&self) -> bool {
        self.tuple_trace.load(Ordering::Relaxed)
    }

    pub fn set_tuple_trace(&self, enabled: bool) {
        self.tuple_trace.store(enabled, Ordering::Relaxed);
    }
}

/// Shared, process-wide handle threaded through sources, boxes, and sinks.
///
/// Cheap to clone: the inner state lives behind an `Arc`.
#[derive(Clone, Debug)]
pub struct Context {
    inner: Arc<ContextInner>,
}

#[derive(Debug)]
struct ContextInner {
    flags: ContextFlags,
    topology_name: String,
}

impl Context {
    pub fn new(topology_name: impl Into<String>) -> Self {
        Self::with_flags(topology_name, ContextFlags::default())
    }

    pub fn with_flags(topology_name: impl Into<String>, flags: ContextFlags) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                flags,
                topology_name: topology_name.into(),
            }),
        }
    }

    pub fn flags(&self) -> &ContextFlags {
        &self.inner.flags
    }

    pub fn topology_name(&self) -> &str {
        &self.inner.topology_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tuple_trace_toggles_independent_of_construction_value() {
        let ctx = Context::with_flags("t", ContextFlags::new(false));
        assert!(!ctx.flags().tuple_trace());
        ctx.flags().set_tuple_trace(true);
        assert!(ctx.flags().tuple_trace());
    }

    #[test]
    fn cloned_context_shares_flag_state() {
        let ctx = Context::new("t");
        let clone = ctx.clone();
        clone.flags().set_tuple_trace(true);
        assert!(ctx.flags().tuple_trace());
    }
}
