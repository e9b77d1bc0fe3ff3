//! Error taxonomy.
//!
//! `SensorBeeError` is the unified error type returned across the Builder
//! API and node workers. `PipeClosed` is the normal signal a producing
//! worker uses to notice a downstream consumer went away — it is not
//! treated as an anomaly.

use std::error::Error as StdError;
use std::fmt;

/// Reasons a wiring operation can be rejected.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WiringError {
    #[error("node `{0}` already exists in this topology")]
    DuplicateName(String),

    #[error("upstream node `{0}` not found")]
    UnknownUpstream(String),

    #[error("connecting `{from}` -> `{to}` would create a cycle")]
    Cycle { from: String, to: String },

    #[error("node `{0}` is a Source and cannot be used as a downstream")]
    SourceAsDownstream(String),

    #[error("node `{node}` already has an input named `{input_name}`")]
    DuplicateInputName { node: String, input_name: String },

    #[error("cannot wire `{from}` -> `{to}`: {reason}")]
    TypeMismatch {
        from: String,
        to: String,
        reason: String,
    },
}

/// A lifecycle operation attempted from a state that does not permit it.
#[derive(Debug, Clone, thiserror::Error)]
#[error("node `{node}` cannot {operation} while {state}")]
pub struct StateError {
    pub node: String,
    pub operation: &'static str,
    pub state: &'static str,
}

/// A write was attempted on a pipe whose consuming side has closed it.
/// This is the expected termination signal for a producing worker, not a
/// fault.
#[derive(Debug, Clone, thiserror::Error)]
#[error("pipe `{edge}` is closed")]
pub struct PipeClosedError {
    pub edge: String,
}

/// An error raised from inside user `Source`/`Box`/`Sink` code.
///
/// By default this does not kill the owning node: the offending tuple is
/// dropped and processing continues. Setting `fatal` signals the node
/// should stop.
#[derive(Debug)]
pub struct UserError {
    pub node: String,
    pub fatal: bool,
    pub source: Box<dyn StdError + Send + Sync + 'static>,
}

impl UserError {
    pub fn new(node: impl Into<String>, source: impl StdError + Send + Sync + 'static) -> Self {
        Self {
            node: node.into(),
            fatal: false,
            source: Box::new(source),
        }
    }

    pub fn fatal(mut self) -> Self {
        self.fatal = true;
        self
    }
}

impl fmt::Display for UserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "user code in node `{}` raised an error (fatal={}): {}",
            self.node, self.fatal, self.source
        )
    }
}

impl StdError for UserError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.source.as_ref())
    }
}

/// The unified error surface of the engine.
#[derive(Debug, thiserror::Error)]
pub enum SensorBeeError {
    #[error(transparent)]
    Wiring(#[from] WiringError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    PipeClosed(#[from] PipeClosedError),

    #[error(transparent)]
    User(#[from] UserError),

    #[error("operation canceled")]
    Canceled,
}

pub type Result<T> = std::result::Result<T, SensorBeeError>;
