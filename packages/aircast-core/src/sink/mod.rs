//! Sink supervision: per-sink encoder child processes and their registry.
//!
//! A sink is either a network output (SRT destination) or a local file
//! recorder. Each is driven by exactly one encoder child at a time, owned by
//! a [`SinkSupervisor`]; the [`SinkManager`] keeps the typed registry and
//! fans PCM out to every running sink.

pub mod manager;
pub(crate) mod recorder;
pub mod supervisor;

use serde::Serialize;

pub use manager::SinkManager;
pub use supervisor::{SinkHooks, SinkSupervisor};

/// Sink flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Output,
    Recording,
}

impl SinkKind {
    /// Log label prefix.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Output => "Output",
            Self::Recording => "Recording",
        }
    }
}

/// Operator-facing snapshot of one sink supervisor.
#[derive(Debug, Clone, Serialize)]
pub struct SinkStatus {
    /// Whether an encoder child is currently attached.
    pub running: bool,
    /// Running and the current child has lived at least 10 s.
    pub stable: bool,
    /// Last human-readable failure, empty when healthy.
    pub last_error: String,
    /// Restart attempts since the last successful run.
    pub retry_count: u32,
    /// Effective retry budget.
    pub max_retries: u32,
    /// The budget is exhausted; only an operator restart revives the sink.
    pub given_up: bool,
}
