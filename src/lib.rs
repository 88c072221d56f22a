//! # hs_rust - Hierarchical Sync Convergence Controller
//!
//! Drives a grid of peers holding versioned state to a common version.
//! Peers on the center row and column are split into *points* (far from the
//! rendezvous) and *pivots* (adjacent to it). Two strategies are provided:
//!
//! - **Staged**: three explicit phases. Points push to pivots, pivots
//!   equalise among themselves, pivots push back to points.
//! - **Organic**: each point syncs as it arrives at the rendezvous; the
//!   first arrival opens the window.
//!
//! ## Core Components
//!
//! - **PeerRegistry**: peers, roles and versions (versions never decrease)
//! - **VersionOracle**: how convergence checks read versions
//! - **PhaseMachine**: forward-only phase progression per strategy
//! - **ConvergencePoller**: recurring checks with a per-phase budget
//! - **SyncReporter**: sync window, metrics file, reconciliation, analysis
//! - **SyncController**: ties the above together behind a `Clock`
//!
//! ## Usage with a Scheduler
//!
//! The controller never blocks. Feed it `ControllerEvent`s from any
//! discrete-event scheduler implementing `Clock`; `hs_simulation` provides a
//! complete grid simulation on top of `hs_scheduler::EventQueue`.
//!
//! ```no_run
//! use hs_rust::{Simulation, SyncConfig};
//!
//! let result = Simulation::new(SyncConfig::organic())?.run()?;
//! result.print_summary();
//! # Ok::<(), hs_rust::SimError>(())
//! ```

// Core controller modules
pub mod hs_interface;
pub mod hs_error;
pub mod hs_registry;
pub mod hs_oracle;
pub mod hs_phase;
pub mod hs_poller;
pub mod hs_arrival;
pub mod hs_metrics;
pub mod hs_controller;
pub mod hs_event_sinks;

// Simulation driver
pub mod hs_config;
pub mod hs_scheduler;
pub mod hs_simulation;

// Re-export commonly used types
pub use hs_interface::{
    Clock, ControllerEvent, EventSink, GridPos, NoOpSink, NodeId, PeerHandle, Phase, Position,
    Role, RoleFlags, SimTime, SyncEvent, Topology, Version,
};
pub use hs_error::{ConfigError, ControllerError, MetricsError, RegistryError, SimError};
pub use hs_registry::{GridLayout, Peer, PeerRegistry};
pub use hs_oracle::{DirectOracle, VersionOracle};
pub use hs_phase::{ConvergenceStrategy, PhaseMachine, SyncMode};
pub use hs_controller::{ControllerConfig, SyncController};
pub use hs_config::SyncConfig;
pub use hs_simulation::{Simulation, SimulationResult};
