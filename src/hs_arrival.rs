use log::{info, warn};

use crate::hs_interface::{PeerHandle, Role, SimTime};
use crate::hs_registry::PeerRegistry;

/// What opens the synchronization window
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StartTrigger {
    /// External scheduler begins at a fixed simulated time
    At { time: SimTime },
    /// Begin once this many points reached the rendezvous
    Arrivals { count: usize },
}

/// Result of reporting an arrival
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    /// First arrival of this point; `count` includes it
    New { count: usize },
    /// Already counted
    Repeat,
    /// Not a point (or unknown); never counted
    Ignored,
}

/// Counts points reaching the rendezvous and fires the start trigger once
#[derive(Debug, Clone)]
pub struct ArrivalTracker {
    expected: usize,
    arrived: usize,
    threshold: Option<usize>,
    fired: bool,
}

impl ArrivalTracker {
    pub fn new(expected: usize, trigger: StartTrigger) -> Self {
        let threshold = match trigger {
            StartTrigger::Arrivals { count } => Some(count.max(1)),
            StartTrigger::At { .. } => None,
        };
        Self {
            expected,
            arrived: 0,
            threshold,
            fired: false,
        }
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    pub fn arrived(&self) -> usize {
        self.arrived
    }

    pub fn all_arrived(&self) -> bool {
        self.arrived >= self.expected
    }

    pub fn mark(&mut self, registry: &mut PeerRegistry, peer: PeerHandle) -> Arrival {
        let Some(role) = registry.peer(peer).map(|p| p.role()) else {
            warn!("[MOVE] arrival of unknown peer {:?}", peer);
            return Arrival::Ignored;
        };
        if role != Role::Point {
            warn!("[MOVE] ignoring arrival of non-point peer {:?}", peer);
            return Arrival::Ignored;
        }
        if !registry.mark_arrived(peer) {
            return Arrival::Repeat;
        }

        self.arrived += 1;
        if let Some(p) = registry.peer(peer) {
            info!(
                "[MOVE] {} reached the center ({}/{})",
                p.name(),
                self.arrived,
                self.expected
            );
        }
        Arrival::New {
            count: self.arrived,
        }
    }

    /// True exactly once, the first time the arrival threshold is met
    pub fn take_trigger(&mut self) -> bool {
        match self.threshold {
            Some(threshold) if !self.fired && self.arrived >= threshold => {
                self.fired = true;
                true
            }
            _ => false,
        }
    }
}
