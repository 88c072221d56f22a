//! Error types for the sync controller and its simulation driver.

use std::path::PathBuf;

use thiserror::Error;

use crate::hs_interface::{GridPos, NodeId, PeerHandle, Phase, SimTime};

/// Setup-time registry violations (configuration bugs, not runtime conditions)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("node {node} is already registered")]
    DuplicatePeer { node: NodeId },

    #[error("cell {}-{} cannot be both point and pivot", .pos.row, .pos.col)]
    InvalidRole { pos: GridPos },

    #[error("center cell {}-{} cannot carry a point or pivot role", .pos.row, .pos.col)]
    CenterRole { pos: GridPos },

    #[error("unknown peer handle {0:?}")]
    UnknownPeer(PeerHandle),
}

/// Invalid construction parameters
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("grid must have at least one row and column, got {rows}x{cols}")]
    EmptyGrid { rows: u32, cols: u32 },

    #[error("version range {min}..={max} is invalid (versions start at 1)")]
    VersionRange { min: u64, max: u64 },

    #[error("{field} must be non-negative and finite, got {value}")]
    Negative { field: &'static str, value: f64 },

    #[error("poll interval must be positive, got {0}")]
    PollInterval(SimTime),

    #[error("drop rate must be within 0..=1, got {0}")]
    DropRate(f64),

    #[error("unknown option '{0}'")]
    UnknownOption(String),

    #[error("invalid value '{value}' for option '{name}'")]
    InvalidValue { name: String, value: String },
}

/// Metrics persistence and external analysis failures (always recovered)
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("failed to write metrics to {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn analysis command '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("analysis command exited with {0}")]
    AnalysisFailed(std::process::ExitStatus),
}

/// Errors surfaced by the controller while handling events
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ControllerError {
    #[error("convergence not reached in {phase} after {attempts} polls ({waited:.3}s)")]
    ConvergenceTimeout {
        phase: Phase,
        attempts: u32,
        waited: SimTime,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Errors from building or running a simulation
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("registry setup failed: {0}")]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Controller(#[from] ControllerError),
}
