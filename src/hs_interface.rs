// all the same numeric types so the simulator and the controller can interop
pub type NodeId = u32;
pub type Version = u64;

/// Simulated time in seconds
pub type SimTime = f64;

/// Stable handle into the peer registry (arena index)
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerHandle(pub(crate) usize);

impl PeerHandle {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Logical grid cell of a node
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct GridPos {
    pub row: u32,
    pub col: u32,
}

impl GridPos {
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }
}

/// Physical position as handed to the topology/mobility layer
#[derive(Copy, Clone, Debug, PartialEq, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Plain,
    Point,
    Pivot,
}

impl Role {
    pub fn label(&self) -> &'static str {
        match self {
            Role::Plain => "PLAIN",
            Role::Point => "POINT",
            Role::Pivot => "PIVOT",
        }
    }
}

/// Role flags as supplied at registration time
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct RoleFlags {
    pub point: bool,
    pub pivot: bool,
}

impl RoleFlags {
    pub const PLAIN: RoleFlags = RoleFlags {
        point: false,
        pivot: false,
    };
    pub const POINT: RoleFlags = RoleFlags {
        point: true,
        pivot: false,
    };
    pub const PIVOT: RoleFlags = RoleFlags {
        point: false,
        pivot: true,
    };
}

// ============================================================================
// Protocol Phases
// ============================================================================

/// Protocol phase. Staged mode walks Idle -> LeavesToPivots -> PivotInterSync
/// -> PivotsToLeaves -> Finished, organic mode Idle -> Converging -> Finished.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    Idle,
    LeavesToPivots,
    PivotInterSync,
    PivotsToLeaves,
    Converging,
    Finished,
}

impl Phase {
    /// Position in the forward order; transitions must strictly increase it
    pub fn rank(&self) -> u8 {
        match self {
            Phase::Idle => 0,
            Phase::LeavesToPivots => 1,
            Phase::PivotInterSync => 2,
            Phase::PivotsToLeaves => 3,
            Phase::Converging => 1,
            Phase::Finished => 4,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::LeavesToPivots => "phase 1 (points -> pivots)",
            Phase::PivotInterSync => "phase 2 (pivots <-> pivots)",
            Phase::PivotsToLeaves => "phase 3 (pivots -> points)",
            Phase::Converging => "organic convergence",
            Phase::Finished => "finished",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Clock / Topology Boundary
// ============================================================================

/// Callbacks the controller schedules for itself
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ControllerEvent {
    /// A point reached the rendezvous
    Arrive(PeerHandle),
    /// External "begin synchronization" trigger
    Begin,
    /// Convergence poll tick
    Poll,
}

/// The only timing primitive the controller relies on
pub trait Clock {
    fn now(&self) -> SimTime;

    fn schedule(&mut self, delay: SimTime, event: ControllerEvent);
}

/// Topology provider: node lookup and position updates
pub trait Topology {
    fn node_at(&self, pos: GridPos) -> Option<NodeId>;

    fn set_position(&mut self, node: NodeId, position: Position);
}

// ============================================================================
// Event Logging System
// ============================================================================

/// Events emitted by the controller for debugging and analysis
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A point arrived at the rendezvous for the first time
    Arrived {
        peer: PeerHandle,
        count: usize,
        expected: usize,
    },
    /// Synchronization window opened
    WindowStarted,
    /// Phase entered (its action already ran)
    PhaseEntered { phase: Phase },
    /// Phase predicate satisfied
    Converged { phase: Phase, attempts: u32 },
    /// Poll budget exhausted
    TimedOut { phase: Phase, attempts: u32 },
    /// Synchronization window closed
    WindowEnded {
        start: SimTime,
        end: SimTime,
        duration: SimTime,
    },
    /// Reconciliation finished
    Reconciled {
        final_version: Version,
        ok: usize,
        failed: usize,
    },
}

/// Trait for consuming events from the controller
pub trait EventSink {
    fn log(&mut self, time: SimTime, event: SyncEvent);
}

/// No-op event sink (zero overhead)
pub struct NoOpSink;

impl EventSink for NoOpSink {
    #[inline(always)]
    fn log(&mut self, _time: SimTime, _event: SyncEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staged_phase_ranks_increase() {
        let order = [
            Phase::Idle,
            Phase::LeavesToPivots,
            Phase::PivotInterSync,
            Phase::PivotsToLeaves,
            Phase::Finished,
        ];
        for pair in order.windows(2) {
            assert!(pair[0].rank() < pair[1].rank(), "{} !< {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_organic_phase_ranks_increase() {
        assert!(Phase::Idle.rank() < Phase::Converging.rank());
        assert!(Phase::Converging.rank() < Phase::Finished.rank());
    }
}
