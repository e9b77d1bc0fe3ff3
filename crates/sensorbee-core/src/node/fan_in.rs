//! Fair, round-robin-biased, non-starving merge of a node's named input
//! pipes, with support for wiring new inputs onto an already-running node.
//!
//! Each poll round rotates the input list by one position before building
//! the selection set, so a burst of traffic on one input cannot starve the
//! others: every input gets first crack at the selector once every `n`
//! rounds. `tokio::sync::mpsc::Receiver::recv` is cancel-safe, so dropping
//! the losing branches of a round costs nothing.

use std::pin::Pin;

use futures::future::{select_all, Future};
use tokio::sync::mpsc;

use crate::pipe::PipeReader;
use crate::tuple::Tuple;

/// One named, readable input a box or sink node has been wired to.
pub struct NamedInput {
    pub name: std::sync::Arc<str>,
    pub reader: PipeReader,
}

/// A request to change a running [`FanIn`]'s input set, submitted from
/// outside the node's worker task.
pub enum FanInControl {
    Add(NamedInput),
    Remove(std::sync::Arc<str>),
}

/// Handle used by wiring code (the topology, or a node's own `Input`
/// method) to reach a running fan-in loop.
#[derive(Clone)]
pub struct FanInHandle {
    tx: mpsc::UnboundedSender<FanInControl>,
}

impl FanInHandle {
    pub fn add(&self, input: NamedInput) {
        let _ = self.tx.send(FanInControl::Add(input));
    }

    pub fn remove(&self, name: std::sync::Arc<str>) {
        let _ = self.tx.send(FanInControl::Remove(name));
    }
}

pub enum FanInEvent {
    Tuple(std::sync::Arc<str>, Tuple),
    /// Every known input has closed and drained, and no control handle can
    /// add more: the fan-in is permanently exhausted.
    Exhausted,
}

pub struct FanIn {
    control_rx: mpsc::UnboundedReceiver<FanInControl>,
    inputs: Vec<NamedInput>,
    control_dropped: bool,
}

impl FanIn {
    pub fn new(initial: Vec<NamedInput>) -> (Self, FanInHandle) {
        let (tx, control_rx) = mpsc::unbounded_channel();
        (
            Self {
                control_rx,
                inputs: initial,
                control_dropped: false,
            },
            FanInHandle { tx },
        )
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    /// Waits for the next tuple across every wired input, or for the input
    /// set to become permanently empty.
    pub async fn next(&mut self) -> FanInEvent {
        loop {
            if !self.inputs.is_empty() {
                self.inputs.rotate_left(1);
            }

            if self.inputs.is_empty() {
                if self.control_dropped {
                    return FanInEvent::Exhausted;
                }
                match self.control_rx.recv().await {
                    Some(ctrl) => {
                        apply(&mut self.inputs, ctrl);
                        continue;
                    }
                    None => {
                        self.control_dropped = true;
                        return FanInEvent::Exhausted;
                    }
                }
            }

            // Split into disjoint field borrows so the control-channel
            // future and the per-input read futures can be polled
            // concurrently without aliasing `self`.
            let Self {
                control_rx, inputs, ..
            } = self;

            let read_futs: Vec<Pin<Box<dyn Future<Output = (std::sync::Arc<str>, Option<Tuple>)> + Send + '_>>> =
                inputs
                    .iter_mut()
                    .map(|input| {
                        Box::pin(async move {
                            let name = input.name.clone();
                            let tuple = input.reader.read().await;
                            (name, tuple)
                        }) as Pin<Box<dyn Future<Output = (std::sync::Arc<str>, Option<Tuple>)> + Send + '_>>
                    })
                    .collect();

            let outcome = tokio::select! {
                biased;
                ctrl = control_rx.recv() => Outcome::Control(ctrl),
                (item, _idx, _rest) = select_all(read_futs) => Outcome::Read(item),
            };

            match outcome {
                Outcome::Control(Some(ctrl)) => apply(&mut self.inputs, ctrl),
                Outcome::Control(None) => self.control_dropped = true,
                Outcome::Read((name, Some(t))) => return FanInEvent::Tuple(name, t),
                Outcome::Read((name, None)) => self.inputs.retain(|i| i.name != name),
            }
        }
    }
}

enum Outcome {
    Control(Option<FanInControl>),
    Read((std::sync::Arc<str>, Option<Tuple>)),
}

fn apply(inputs: &mut Vec<NamedInput>, ctrl: FanInControl) {
    match ctrl {
        FanInControl::Add(input) => inputs.push(input),
        FanInControl::Remove(name) => {
            if let Some(pos) = inputs.iter().position(|i| i.name == name) {
                let mut removed = inputs.remove(pos);
                removed.reader.close_from_consumer();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DropMode;
    use crate::data::Data;
    use crate::pipe::{pipe, EdgeLabel};

    fn label(input_name: &str) -> EdgeLabel {
        EdgeLabel {
            from: "up".into(),
            to: "down".into(),
            input_name: input_name.into(),
        }
    }

    fn named(name: &str, capacity: usize) -> (crate::pipe::PipeWriter, NamedInput) {
        let (w, r) = pipe(label(name), capacity, DropMode::Block);
        (
            w,
            NamedInput {
                name: name.into(),
                reader: r,
            },
        )
    }

    #[tokio::test]
    async fn merges_tuples_from_every_wired_input() {
        let (w1, n1) = named("a", 4);
        let (w2, n2) = named("b", 4);
        let (mut fan_in, _handle) = FanIn::new(vec![n1, n2]);

        w1.write(Tuple::new(Data::Int64(1))).await.unwrap();
        w2.write(Tuple::new(Data::Int64(2))).await.unwrap();

        let mut seen = Vec::new();
        for _ in 0..2 {
            match fan_in.next().await {
                FanInEvent::Tuple(_, t) => seen.push(t.data.as_int().unwrap()),
                FanInEvent::Exhausted => panic!("unexpected exhaustion"),
            }
        }
        seen.sort();
        assert_eq!(seen, vec![1, 2]);
    }

    #[tokio::test]
    async fn dynamically_added_input_is_picked_up() {
        let (_w1, n1) = named("a", 4);
        let (fan_in_initial, handle) = FanIn::new(vec![n1]);
        let mut fan_in = fan_in_initial;

        let (w2, n2) = named("b", 4);
        handle.add(n2);
        w2.write(Tuple::new(Data::Int64(9))).await.unwrap();

        match fan_in.next().await {
            FanInEvent::Tuple(name, t) => {
                assert_eq!(&*name, "b");
                assert_eq!(t.data.as_int(), Some(9));
            }
            FanInEvent::Exhausted => panic!("unexpected exhaustion"),
        }
    }

    #[tokio::test]
    async fn empty_input_set_reports_exhausted_once_control_handle_drops() {
        let (fan_in_initial, handle) = FanIn::new(vec![]);
        let mut fan_in = fan_in_initial;
        drop(handle);
        matches!(fan_in.next().await, FanInEvent::Exhausted);
    }

    #[tokio::test]
    async fn closed_upstream_removes_input_and_keeps_others_flowing() {
        let (w1, n1) = named("a", 4);
        let (w2, n2) = named("b", 4);
        let (mut fan_in, _handle) = FanIn::new(vec![n1, n2]);
        drop(w1);
        w2.write(Tuple::new(Data::Int64(7))).await.unwrap();

        match fan_in.next().await {
            FanInEvent::Tuple(name, t) => {
                assert_eq!(&*name, "b");
                assert_eq!(t.data.as_int(), Some(7));
            }
            FanInEvent::Exhausted => panic!("unexpected exhaustion"),
        }
        assert_eq!(fan_in.input_count(), 1);
    }
}
