//! Tuple and trace types.
//!
//! A `Tuple` is copy-on-fan-out: whenever a node hands a tuple to more than
//! one downstream consumer, every consumer but the last gets an independent
//! deep copy, so that per-branch trace accumulation never cross-contaminates
//! a sibling branch. See [`Tuple::fan_out`].

use std::time::SystemTime;

use crate::data::Data;

/// Which side of a pipe traversal a [`TraceEvent`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceEventType {
    Output,
    Input,
}

impl TraceEventType {
    /// Renders as `"input"`/`"output"`, the text form external observers and
    /// tests match against.
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceEventType::Output => "output",
            TraceEventType::Input => "input",
        }
    }
}

/// One hop of a tuple's route through the topology.
#[derive(Debug, Clone)]
pub struct TraceEvent {
    pub event_type: TraceEventType,
    pub timestamp: SystemTime,
    /// Name of the node the event occurred at.
    pub node_name: String,
}

impl TraceEvent {
    pub fn new(event_type: TraceEventType, node_name: impl Into<String>) -> Self {
        Self {
            event_type,
            timestamp: SystemTime::now(),
            node_name: node_name.into(),
        }
    }

    /// Renders as `"<input|output> <node_name>"`.
    pub fn render(&self) -> String {
        format!("{} {}", self.event_type.as_str(), self.node_name)
    }
}

/// A record flowing through the topology.
#[derive(Debug, Clone)]
pub struct Tuple {
    pub data: Data,
    pub timestamp: SystemTime,
    pub proc_timestamp: SystemTime,
    pub batch_id: i64,
    pub trace: Vec<TraceEvent>,
}

impl Tuple {
    pub fn new(data: Data) -> Self {
        let now = SystemTime::now();
        Self {
            data,
            timestamp: now,
            proc_timestamp: now,
            batch_id: 0,
            trace: Vec::new(),
        }
    }

    /// Appends a trace event if `enabled`. The flag is checked per call, at
    /// the moment of the pipe traversal — not cached for the tuple's
    /// lifetime — so toggling tracing mid-run produces partially-traced
    /// tuples by design.
    pub fn trace(&mut self, enabled: bool, event_type: TraceEventType, node_name: &str) {
        if enabled {
            self.trace.push(TraceEvent::new(event_type, node_name));
        }
    }

    /// Joins this tuple's trace as `"ev1->ev2->..."`.
    pub fn route(&self) -> String {
        self.trace
            .iter()
            .map(TraceEvent::render)
            .collect::<Vec<_>>()
            .join("->")
    }

    /// Produces `count` independent tuples for fan-out to `count` downstream
    /// pipes. For `count <= 1` the original value moves by reference (no
    /// copy); for `count > 1`, `count - 1` deep copies are made and the
    /// original is reused for the last branch — one fewer copy than the
    /// downstream count.
    pub fn fan_out(self, count: usize) -> Vec<Tuple> {
        if count == 0 {
            return Vec::new();
        }
        let mut out = Vec::with_capacity(count);
        for _ in 1..count {
            out.push(self.clone());
        }
        out.push(self);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_map;

    #[test]
    fn fan_out_produces_independent_copies() {
        let t = Tuple::new(data_map! { "int" => 1i64 });
        let mut copies = t.fan_out(3);
        assert_eq!(copies.len(), 3);
        copies[0].trace(true, TraceEventType::Output, "a");
        assert!(copies[1].trace.is_empty());
        assert!(copies[2].trace.is_empty());
    }

    #[test]
    fn fan_out_single_consumer_moves_without_extra_copies() {
        let t = Tuple::new(data_map! { "int" => 1i64 });
        let copies = t.fan_out(1);
        assert_eq!(copies.len(), 1);
    }

    #[test]
    fn route_renders_in_original_text_form() {
        let mut t = Tuple::new(Data::Null);
        t.trace(true, TraceEventType::Output, "so1");
        t.trace(true, TraceEventType::Input, "box1");
        assert_eq!(t.route(), "output so1->input box1");
    }
}
