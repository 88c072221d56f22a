use log::{error, info};

use crate::hs_interface::{PeerHandle, Phase, Version};
use crate::hs_oracle::VersionOracle;
use crate::hs_registry::PeerRegistry;

// ============================================================================
// Modes and Snapshots
// ============================================================================

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Three explicit phases: points -> pivots, pivots <-> pivots, pivots -> points
    #[default]
    Staged,
    /// Single wave driven by arrivals at the rendezvous
    Organic,
}

impl SyncMode {
    pub fn strategy(&self) -> Box<dyn ConvergenceStrategy> {
        match self {
            SyncMode::Staged => Box::new(StagedStrategy),
            SyncMode::Organic => Box::new(OrganicStrategy::default()),
        }
    }
}

/// Readings taken at one poll tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConvergenceSnapshot {
    pub max_point: Version,
    pub max_pivot: Version,
    pub min_pivot: Version,
}

impl ConvergenceSnapshot {
    pub fn capture(registry: &PeerRegistry, oracle: &dyn VersionOracle) -> Self {
        Self {
            max_point: oracle.max_version(registry, registry.points()),
            max_pivot: oracle.max_version(registry, registry.pivots()),
            min_pivot: oracle.min_version(registry, registry.pivots()),
        }
    }
}

/// Highest stored version, read straight from the registry
fn max_current(registry: &PeerRegistry, peers: &[PeerHandle]) -> Version {
    peers
        .iter()
        .filter_map(|peer| registry.current_version(*peer))
        .max()
        .unwrap_or(0)
}

fn raise_all(registry: &mut PeerRegistry, peers: &[PeerHandle], version: Version) -> usize {
    peers
        .iter()
        .filter(|peer| registry.raise_version(**peer, version))
        .count()
}

// ============================================================================
// Strategy Interface
// ============================================================================

/// One way of driving peers to convergence. The registry, poller and
/// reporter are shared; only phase order, actions and predicates differ.
pub trait ConvergenceStrategy {
    fn mode(&self) -> SyncMode;

    fn first_phase(&self) -> Phase;

    fn next_phase(&self, current: Phase) -> Phase;

    /// Propagation action, run once and synchronously on entering `phase`
    fn enter(&mut self, phase: Phase, registry: &mut PeerRegistry);

    fn is_converged(
        &self,
        phase: Phase,
        snapshot: &ConvergenceSnapshot,
        registry: &PeerRegistry,
    ) -> bool;

    /// Called once per peer on its first arrival at the rendezvous
    fn on_arrival(
        &mut self,
        _peer: PeerHandle,
        _registry: &mut PeerRegistry,
        _oracle: &dyn VersionOracle,
    ) {
    }

    /// Peers covered by the final reconciliation, in report order
    fn tracked(&self, registry: &PeerRegistry) -> Vec<PeerHandle>;
}

// ============================================================================
// Staged Strategy
// ============================================================================

#[derive(Debug, Default, Clone, Copy)]
pub struct StagedStrategy;

impl ConvergenceStrategy for StagedStrategy {
    fn mode(&self) -> SyncMode {
        SyncMode::Staged
    }

    fn first_phase(&self) -> Phase {
        Phase::LeavesToPivots
    }

    fn next_phase(&self, current: Phase) -> Phase {
        match current {
            Phase::Idle => Phase::LeavesToPivots,
            Phase::LeavesToPivots => Phase::PivotInterSync,
            Phase::PivotInterSync => Phase::PivotsToLeaves,
            _ => Phase::Finished,
        }
    }

    fn enter(&mut self, phase: Phase, registry: &mut PeerRegistry) {
        match phase {
            Phase::LeavesToPivots => {
                // points are never pivots, so this is the leaf maximum
                let max_leaf = max_current(registry, registry.points());
                let pivots = registry.pivots().to_vec();
                let raised = raise_all(registry, &pivots, max_leaf);
                info!(
                    "[INST] {}: points instruct pivots to sync v{} ({} raised)",
                    phase, max_leaf, raised
                );
            }
            Phase::PivotInterSync => {
                let pivots = registry.pivots().to_vec();
                let max_pivot = max_current(registry, &pivots);
                let raised = raise_all(registry, &pivots, max_pivot);
                info!(
                    "[INST] {}: pivots sync v{} among themselves ({} raised)",
                    phase, max_pivot, raised
                );
            }
            Phase::PivotsToLeaves => {
                let pivot_max = max_current(registry, registry.pivots());
                let points = registry.points().to_vec();
                let raised = raise_all(registry, &points, pivot_max);
                info!(
                    "[INST] {}: pivots instruct points to sync v{} ({} raised)",
                    phase, pivot_max, raised
                );
            }
            _ => {}
        }
    }

    fn is_converged(
        &self,
        phase: Phase,
        snapshot: &ConvergenceSnapshot,
        _registry: &PeerRegistry,
    ) -> bool {
        let s = snapshot;
        match phase {
            // all pivots are raised together, so the max pivot stands in for all of them
            Phase::LeavesToPivots => s.max_pivot >= s.max_point && s.max_point > 0,
            Phase::PivotInterSync => s.min_pivot == s.max_pivot && s.max_pivot > 0,
            Phase::PivotsToLeaves => s.max_point >= s.max_pivot && s.max_pivot > 0,
            _ => false,
        }
    }

    fn tracked(&self, registry: &PeerRegistry) -> Vec<PeerHandle> {
        registry
            .points()
            .iter()
            .chain(registry.pivots())
            .copied()
            .collect()
    }
}

// ============================================================================
// Organic Strategy
// ============================================================================

/// Single-wave convergence: each point syncs with the rendezvous on arrival
#[derive(Debug, Default, Clone)]
pub struct OrganicStrategy {
    /// Reference version and its holder, fixed at the first arrival
    reference: Option<(Version, PeerHandle)>,
}

impl OrganicStrategy {
    pub fn reference_version(&self) -> Option<Version> {
        self.reference.map(|(version, _)| version)
    }

    fn resolve_reference(
        &mut self,
        registry: &PeerRegistry,
        oracle: &dyn VersionOracle,
    ) -> Option<Version> {
        if self.reference.is_none() {
            let points = registry.points();
            let max = oracle.max_version(registry, points);
            let holder = points
                .iter()
                .copied()
                .find(|peer| oracle.version_of(registry, *peer) == Some(max))?;

            if let Some(peer) = registry.peer(holder) {
                info!(
                    "{} holds the reference version ({}) among {} points",
                    peer.name(),
                    max,
                    points.len()
                );
            }
            self.reference = Some((max, holder));
        }
        self.reference_version()
    }
}

impl ConvergenceStrategy for OrganicStrategy {
    fn mode(&self) -> SyncMode {
        SyncMode::Organic
    }

    fn first_phase(&self) -> Phase {
        Phase::Converging
    }

    fn next_phase(&self, current: Phase) -> Phase {
        match current {
            Phase::Idle => Phase::Converging,
            _ => Phase::Finished,
        }
    }

    fn enter(&mut self, _phase: Phase, _registry: &mut PeerRegistry) {}

    fn is_converged(
        &self,
        phase: Phase,
        _snapshot: &ConvergenceSnapshot,
        registry: &PeerRegistry,
    ) -> bool {
        if phase != Phase::Converging || registry.points().is_empty() {
            return false;
        }
        registry
            .points()
            .iter()
            .all(|peer| registry.peer(*peer).map_or(false, |p| p.sync_completed()))
    }

    fn on_arrival(
        &mut self,
        peer: PeerHandle,
        registry: &mut PeerRegistry,
        oracle: &dyn VersionOracle,
    ) {
        if !registry.points().contains(&peer) {
            return;
        }
        let Some(reference) = self.resolve_reference(registry, oracle) else {
            return;
        };
        registry.raise_version(peer, reference);
        registry.mark_sync_completed(peer);
    }

    fn tracked(&self, registry: &PeerRegistry) -> Vec<PeerHandle> {
        registry.points().to_vec()
    }
}

// ============================================================================
// Phase Machine
// ============================================================================

/// Active phase plus the strategy that defines the order. Transitions are
/// strictly forward and `Finished` is terminal.
pub struct PhaseMachine {
    phase: Phase,
    strategy: Box<dyn ConvergenceStrategy>,
}

impl PhaseMachine {
    pub fn new(strategy: Box<dyn ConvergenceStrategy>) -> Self {
        Self {
            phase: Phase::Idle,
            strategy,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn mode(&self) -> SyncMode {
        self.strategy.mode()
    }

    pub fn strategy(&self) -> &dyn ConvergenceStrategy {
        self.strategy.as_ref()
    }

    pub fn strategy_mut(&mut self) -> &mut dyn ConvergenceStrategy {
        self.strategy.as_mut()
    }

    /// Leave `Idle`. No-op once started.
    pub fn start(&mut self, registry: &mut PeerRegistry) -> Phase {
        if self.phase == Phase::Idle {
            let first = self.strategy.first_phase();
            self.enter(first, registry);
        }
        self.phase
    }

    /// Move to the next phase and run its action. No-op once finished, and a
    /// strategy that names an earlier phase is refused with an error log.
    pub fn advance(&mut self, registry: &mut PeerRegistry) -> Phase {
        if self.phase != Phase::Finished {
            let next = self.strategy.next_phase(self.phase);
            self.enter(next, registry);
        }
        self.phase
    }

    pub fn is_converged(&self, snapshot: &ConvergenceSnapshot, registry: &PeerRegistry) -> bool {
        self.strategy.is_converged(self.phase, snapshot, registry)
    }

    // a strategy that steps backwards (or sideways) leaves the phase unchanged
    fn enter(&mut self, next: Phase, registry: &mut PeerRegistry) {
        if next.rank() <= self.phase.rank() {
            error!(
                "refusing phase transition {} -> {}, staying in {}",
                self.phase, next, self.phase
            );
            return;
        }
        self.phase = next;
        self.strategy.enter(next, registry);
    }
}
