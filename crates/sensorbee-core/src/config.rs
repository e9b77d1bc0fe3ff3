//! Builder-API configuration structs. Parsing these from an on-disk format
//! is out of scope; these are the programmatic config values the Builder
//! API accepts directly.

/// Default pipe buffer size.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Per-edge drop policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DropMode {
    #[default]
    Block,
    DropLatest,
}

/// Per-source configuration.
#[derive(Debug, Clone, Default)]
pub struct SourceConfig {
    /// If set, the source is created `Paused` rather than `Running`.
    pub paused_on_startup: bool,
}

/// Per-box configuration. Reserved for future box-level tuning; currently
/// carries nothing beyond the default, matching how the Builder API accepts
/// a config value per node kind even when today it is empty.
#[derive(Debug, Clone, Default)]
pub struct BoxConfig {}

/// Per-sink configuration.
#[derive(Debug, Clone, Default)]
pub struct SinkConfig {}

/// Per-edge configuration, supplied to a node's `Input()` wiring call.
#[derive(Debug, Clone)]
pub struct EdgeConfig {
    /// Label the consumer sees for this input; defaults to the upstream
    /// node's name when `None`.
    pub input_name: Option<String>,
    pub capacity: usize,
    pub drop_mode: DropMode,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            input_name: None,
            capacity: DEFAULT_CAPACITY,
            drop_mode: DropMode::default(),
        }
    }
}

/// Which side(s) of a node's connections trigger an automatic stop when
/// fully disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopOnDisconnect {
    #[default]
    None,
    Inbound,
    Outbound,
    Both,
}

impl StopOnDisconnect {
    pub fn watches_inbound(self) -> bool {
        matches!(self, StopOnDisconnect::Inbound | StopOnDisconnect::Both)
    }

    pub fn watches_outbound(self) -> bool {
        matches!(self, StopOnDisconnect::Outbound | StopOnDisconnect::Both)
    }
}
