//! Per-node lifecycle state machine.
//!
//! ```text
//! Initialized ──start──▶ Starting ──ready──▶ Running ⇄ Paused
//!                                               │        │
//!                                               └──stop──▶ Stopping ──drained──▶ Stopped
//! ```
//!
//! Transitions publish through a `tokio::sync::watch` channel, which is this
//! crate's broadcast primitive: every `Wait` caller holds its own receiver
//! and wakes independently when the state changes.

use tokio::sync::watch;

use crate::error::StateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Initialized,
    Starting,
    Running,
    Paused,
    Stopping,
    Stopped,
}

impl NodeState {
    pub fn label(self) -> &'static str {
        match self {
            NodeState::Initialized => "Initialized",
            NodeState::Starting => "Starting",
            NodeState::Running => "Running",
            NodeState::Paused => "Paused",
            NodeState::Stopping => "Stopping",
            NodeState::Stopped => "Stopped",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, NodeState::Stopped)
    }
}

/// The lifecycle state machine owned by a node.
#[derive(Debug)]
pub struct NodeLifecycle {
    node_name: String,
    tx: watch::Sender<NodeState>,
}

impl NodeLifecycle {
    pub fn new(node_name: impl Into<String>, initial: NodeState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self {
            node_name: node_name.into(),
            tx,
        }
    }

    pub fn current(&self) -> NodeState {
        *self.tx.borrow()
    }

    fn transition(&self, to: NodeState) {
        self.tx.send_replace(to);
    }

    fn illegal(&self, operation: &'static str) -> StateError {
        StateError {
            node: self.node_name.clone(),
            operation,
            state: self.current().label(),
        }
    }

    /// `Initialized` -> `Starting`.
    pub fn begin_starting(&self) -> Result<(), StateError> {
        if self.current() != NodeState::Initialized {
            return Err(self.illegal("start"));
        }
        self.transition(NodeState::Starting);
        Ok(())
    }

    /// `Starting` -> `Running`.
    pub fn mark_running(&self) -> Result<(), StateError> {
        self.mark_ready(NodeState::Running)
    }

    /// `Starting` -> `target`, where `target` is `Running` or `Paused`.
    /// Used by sources created with `paused_on_startup` to skip straight to
    /// `Paused` without passing through an observable `Running` tick.
    pub fn mark_ready(&self, target: NodeState) -> Result<(), StateError> {
        if self.current() != NodeState::Starting {
            return Err(self.illegal("become ready"));
        }
        self.transition(target);
        Ok(())
    }

    /// `Running` -> `Paused`. A no-op if already `Paused`, or if the node is
    /// already on its way out (`Stopping`/`Stopped`); an error from any
    /// other state.
    pub fn pause(&self) -> Result<(), StateError> {
        match self.current() {
            NodeState::Paused | NodeState::Stopping | NodeState::Stopped => Ok(()),
            NodeState::Running => {
                self.transition(NodeState::Paused);
                Ok(())
            }
            NodeState::Initialized | NodeState::Starting => Err(self.illegal("pause")),
        }
    }

    /// `Paused` -> `Running`. A no-op if already `Running`, or if the node
    /// is already on its way out; an error from any other state.
    pub fn resume(&self) -> Result<(), StateError> {
        match self.current() {
            NodeState::Running | NodeState::Stopping | NodeState::Stopped => Ok(()),
            NodeState::Paused => {
                self.transition(NodeState::Running);
                Ok(())
            }
            NodeState::Initialized | NodeState::Starting => Err(self.illegal("resume")),
        }
    }

    /// Any non-terminal state -> `Stopping`. A no-op from `Stopped`.
    pub fn begin_stopping(&self) -> Result<(), StateError> {
        match self.current() {
            NodeState::Stopped | NodeState::Stopping => Ok(()),
            _ => {
                self.transition(NodeState::Stopping);
                Ok(())
            }
        }
    }

    /// `Stopping` -> `Stopped`, once drain has completed.
    pub fn mark_stopped(&self) {
        self.transition(NodeState::Stopped);
    }

    pub fn subscribe(&self) -> watch::Receiver<NodeState> {
        self.tx.subscribe()
    }

    /// Blocks until the node reaches `target` or a later terminal state —
    /// `Stopped` always satisfies any wait.
    pub async fn wait(&self, target: NodeState) {
        let mut rx = self.subscribe();
        loop {
            let current = *rx.borrow();
            if current == target || current.is_terminal() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender dropped: the node is gone, which is at least as
                // terminal as `Stopped`.
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pause_resume_are_noops_in_target_state() {
        let fsm = NodeLifecycle::new("n", NodeState::Running);
        fsm.pause().unwrap();
        assert_eq!(fsm.current(), NodeState::Paused);
        fsm.pause().unwrap(); // no-op
        assert_eq!(fsm.current(), NodeState::Paused);
        fsm.resume().unwrap();
        assert_eq!(fsm.current(), NodeState::Running);
        fsm.resume().unwrap(); // no-op
    }

    #[tokio::test]
    async fn pause_from_initialized_is_an_error() {
        let fsm = NodeLifecycle::new("n", NodeState::Initialized);
        assert!(fsm.pause().is_err());
    }

    #[tokio::test]
    async fn stop_from_stopped_is_a_noop() {
        let fsm = NodeLifecycle::new("n", NodeState::Stopped);
        fsm.begin_stopping().unwrap();
        assert_eq!(fsm.current(), NodeState::Stopped);
    }

    #[tokio::test]
    async fn wait_unblocks_on_target_reached() {
        let fsm = std::sync::Arc::new(NodeLifecycle::new("n", NodeState::Running));
        let waiter = {
            let fsm = fsm.clone();
            tokio::spawn(async move { fsm.wait(NodeState::Stopped).await })
        };
        tokio::task::yield_now().await;
        fsm.begin_stopping().unwrap();
        fsm.mark_stopped();
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("wait should unblock promptly")
            .unwrap();
    }
}
