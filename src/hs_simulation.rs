//! Discrete-event driver: builds the grid, moves points to the rendezvous
//! and feeds scheduled callbacks to the controller one at a time.

use hashbrown::{HashMap, HashSet};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::hs_arrival::StartTrigger;
use crate::hs_config::{seed_to_hex, GridConfig, ProtocolParams, SyncConfig};
use crate::hs_controller::{PhaseTransition, SyncController};
use crate::hs_error::SimError;
use crate::hs_event_sinks::{CsvEventSink, LoggingEventSink, MultiEventSink};
use crate::hs_interface::{
    ControllerEvent, EventSink, GridPos, NoOpSink, NodeId, PeerHandle, Position, SimTime,
    Topology,
};
use crate::hs_metrics::{format_seconds, ReconcileStatus, Reconciliation, SyncWindow};
use crate::hs_oracle::DirectOracle;
use crate::hs_phase::SyncMode;
use crate::hs_registry::{GridLayout, PeerRegistry};
use crate::hs_scheduler::EventQueue;

// ============================================================================
// Grid Topology
// ============================================================================

/// Row-major grid of nodes; node id `r * cols + c` sits at cell `r-c`
pub struct GridTopology {
    layout: GridLayout,
    spacing: f64,
    offset: f64,
    nodes: HashMap<GridPos, NodeId>,
    positions: Vec<Position>,
    fast_publishers: HashSet<NodeId>,
}

impl GridTopology {
    pub fn new(grid: &GridConfig) -> Self {
        let layout = GridLayout::new(grid.rows, grid.cols, grid.pivot_radius);
        let mut topology = Self {
            layout,
            spacing: grid.spacing,
            offset: grid.offset,
            nodes: HashMap::new(),
            positions: Vec::new(),
            fast_publishers: HashSet::new(),
        };

        for (index, pos) in layout.cells().enumerate() {
            let node = index as NodeId;
            let position = topology.cell_position(pos);
            topology.nodes.insert(pos, node);
            topology.positions.push(position);
            // every other node publishes fast, the rendezvous never does
            if index % 2 == 0 && !layout.is_center(pos) {
                topology.fast_publishers.insert(node);
            }
        }
        topology
    }

    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    pub fn node_count(&self) -> usize {
        self.positions.len()
    }

    /// Initial placement of a cell
    pub fn cell_position(&self, pos: GridPos) -> Position {
        Position {
            x: pos.col as f64 * self.spacing + self.offset,
            y: pos.row as f64 * self.spacing + self.offset,
        }
    }

    pub fn rendezvous(&self) -> Position {
        self.cell_position(self.layout.center())
    }

    pub fn position_of(&self, node: NodeId) -> Option<Position> {
        self.positions.get(node as usize).copied()
    }

    pub fn is_fast_publisher(&self, node: NodeId) -> bool {
        self.fast_publishers.contains(&node)
    }

    pub fn publish_interval_ms(&self, node: NodeId, protocol: &ProtocolParams) -> u64 {
        if self.is_fast_publisher(node) {
            protocol.inter_pub_ms_fast
        } else {
            protocol.inter_pub_ms_slow
        }
    }
}

impl Topology for GridTopology {
    fn node_at(&self, pos: GridPos) -> Option<NodeId> {
        self.nodes.get(&pos).copied()
    }

    fn set_position(&mut self, node: NodeId, position: Position) {
        match self.positions.get_mut(node as usize) {
            Some(slot) => *slot = position,
            None => warn!("set_position on unknown node {}", node),
        }
    }
}

// ============================================================================
// Simulation
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SimEvent {
    /// Teleport a point onto the rendezvous cell
    MoveToRendezvous(PeerHandle),
    Controller(ControllerEvent),
}

impl From<ControllerEvent> for SimEvent {
    fn from(event: ControllerEvent) -> Self {
        SimEvent::Controller(event)
    }
}

pub struct Simulation {
    config: SyncConfig,
    seed: [u8; 32],
    topology: GridTopology,
    controller: SyncController<DirectOracle>,
    queue: EventQueue<SimEvent>,
}

impl Simulation {
    pub fn new(config: SyncConfig) -> Result<Self, SimError> {
        config.validate()?;

        let seed = config.resolve_seed();
        let mut rng = StdRng::from_seed(seed);
        let topology = GridTopology::new(&config.grid);
        let layout = *topology.layout();

        let mut registry = PeerRegistry::new(
            layout.center(),
            config.versions.min,
            config.versions.max,
        );
        for pos in layout.cells() {
            let Some(node) = topology.node_at(pos) else {
                continue;
            };
            registry.register(node, pos, layout.flags_for(pos), &mut rng)?;
        }
        log_protocol(&config.protocol, &topology);

        let mut queue = EventQueue::new();
        for peer in registry.points() {
            let Some(node) = registry.peer(*peer).map(|p| p.node()) else {
                continue;
            };
            let at = config.schedule.move_at + node as SimTime * config.schedule.move_stagger;
            queue.schedule_at(at, SimEvent::MoveToRendezvous(*peer));
        }
        if let StartTrigger::At { time } = config.schedule.start {
            queue.schedule_at(time, SimEvent::Controller(ControllerEvent::Begin));
        }

        let controller = SyncController::new(
            registry,
            DirectOracle,
            config.mode.strategy(),
            config.controller_config(),
        )
        .with_sink(build_sink(&config));

        Ok(Self {
            config,
            seed,
            topology,
            controller,
            queue,
        })
    }

    pub fn seed(&self) -> [u8; 32] {
        self.seed
    }

    pub fn topology(&self) -> &GridTopology {
        &self.topology
    }

    pub fn controller(&self) -> &SyncController<DirectOracle> {
        &self.controller
    }

    /// Run until the controller finishes or nothing is left to happen
    pub fn run(mut self) -> Result<SimulationResult, SimError> {
        info!(
            "[SIM] {:?} run on a {}x{} grid, seed {}",
            self.config.mode,
            self.config.grid.rows,
            self.config.grid.cols,
            seed_to_hex(&self.seed)
        );

        while let Some((time, event)) = self.queue.pop() {
            match event {
                SimEvent::MoveToRendezvous(peer) => {
                    self.move_to_rendezvous(peer, time);
                    self.controller
                        .handle(ControllerEvent::Arrive(peer), &mut self.queue)?;
                }
                SimEvent::Controller(event) => self.controller.handle(event, &mut self.queue)?,
            }

            if self.controller.is_finished() {
                break;
            }
        }

        if !self.controller.is_finished() {
            warn!(
                "[SIM] event queue drained in {} before synchronization finished",
                self.controller.phase()
            );
        }

        Ok(self.into_result())
    }

    fn move_to_rendezvous(&mut self, peer: PeerHandle, time: SimTime) {
        let Some(node) = self.controller.registry().peer(peer).map(|p| p.node()) else {
            return;
        };
        let target = self.topology.rendezvous();
        self.topology.set_position(node, target);
        debug!(
            "node {} moved to ({}, {}) at t={}s",
            node,
            target.x,
            target.y,
            format_seconds(time)
        );
    }

    fn into_result(self) -> SimulationResult {
        let controller = &self.controller;
        SimulationResult {
            mode: controller.mode(),
            seed_used: self.seed,
            config_summary: format!(
                "{}x{} grid, {} points, {} pivots, versions {}..={}",
                self.config.grid.rows,
                self.config.grid.cols,
                controller.registry().points().len(),
                controller.registry().pivots().len(),
                self.config.versions.min,
                self.config.versions.max
            ),
            finished: controller.is_finished(),
            end_time: self.queue.now(),
            events_processed: self.queue.delivered(),
            arrivals: controller.arrivals().arrived(),
            expected_arrivals: controller.arrivals().expected(),
            phase_log: controller.phase_log().to_vec(),
            window: *controller.window(),
            reconciliation: controller.reconciliation().cloned(),
        }
    }
}

fn build_sink(config: &SyncConfig) -> Box<dyn EventSink> {
    let mut multi = MultiEventSink::new();
    if config.output.log_events {
        multi.add_sink(Box::new(LoggingEventSink::new(true)));
    }
    if let Some(path) = &config.output.events_csv {
        match CsvEventSink::new(path) {
            Ok(sink) => multi.add_sink(Box::new(sink)),
            Err(e) => warn!("event CSV {} disabled: {}", path.display(), e),
        }
    }

    if multi.is_empty() {
        Box::new(NoOpSink)
    } else {
        Box::new(multi)
    }
}

fn log_protocol(protocol: &ProtocolParams, topology: &GridTopology) {
    let fast = (0..topology.node_count() as NodeId)
        .filter(|node| topology.is_fast_publisher(*node))
        .count();
    info!(
        "[PROTO] publishers: {} fast ({} ms), {} slow ({} ms)",
        fast,
        protocol.inter_pub_ms_fast,
        topology.node_count() - fast,
        protocol.inter_pub_ms_slow
    );
    info!(
        "[PROTO] nRecent={} nRandom={} dropRate={} mtu={}",
        protocol.n_recent,
        protocol.n_random,
        protocol.drop_rate,
        protocol
            .mtu()
            .map_or_else(|| "default".to_string(), |mtu| mtu.to_string())
    );
}

// ============================================================================
// Results
// ============================================================================

#[derive(Debug, Clone)]
pub struct SimulationResult {
    pub mode: SyncMode,
    pub seed_used: [u8; 32],
    pub config_summary: String,
    pub finished: bool,
    /// Simulated time of the last processed event
    pub end_time: SimTime,
    pub events_processed: u64,
    pub arrivals: usize,
    pub expected_arrivals: usize,
    pub phase_log: Vec<PhaseTransition>,
    pub window: SyncWindow,
    pub reconciliation: Option<Reconciliation>,
}

impl SimulationResult {
    pub fn print_summary(&self) {
        println!("\n╔════════════════════════════════════════════════════════╗");
        println!("║    HIERARCHICAL SYNC RESULTS                           ║");
        println!("╚════════════════════════════════════════════════════════╝\n");

        println!("Configuration: {} ({:?} mode)", self.config_summary, self.mode);
        println!("Seed: {}", seed_to_hex(&self.seed_used));
        println!(
            "Events: {} processed, last at t={}s",
            self.events_processed,
            format_seconds(self.end_time)
        );
        println!("Arrivals: {}/{}", self.arrivals, self.expected_arrivals);
        println!();

        println!("═══ Phases ═══");
        for transition in &self.phase_log {
            println!(
                "  t={:>9}s  {}",
                format_seconds(transition.entered_at),
                transition.phase
            );
        }
        println!();

        println!("═══ Sync Window ═══");
        if self.window.ended {
            println!(
                "  {}s -> {}s, duration {}s",
                format_seconds(self.window.start_time),
                format_seconds(self.window.end_time),
                format_seconds(self.window.duration)
            );
        } else if self.window.started {
            println!(
                "  opened at {}s, never closed",
                format_seconds(self.window.start_time)
            );
        } else {
            println!("  never opened");
        }
        println!();

        let Some(report) = &self.reconciliation else {
            println!("No reconciliation (synchronization did not finish)");
            return;
        };

        println!(
            "═══ Final Summary (reference v{}, {:?}) ═══",
            report.final_version, report.mode
        );
        for entry in &report.entries {
            println!(
                "  {:<5} {:<10} initial={:<3} observed={:<3} final={:<3} {}",
                entry.role.label(),
                entry.name,
                entry.initial,
                entry.observed,
                entry.final_version,
                match entry.status {
                    ReconcileStatus::Ok => "OK",
                    ReconcileStatus::Fail => "FAIL",
                }
            );
        }
        println!(
            "\n  {}/{} peers converged",
            report.ok_count(),
            report.entries.len()
        );
    }
}
