//! Convergence-orchestration controller.
//!
//! The controller owns the registry, phase machine, poller, arrival tracker
//! and reporter. It is driven one event at a time through [`SyncController::handle`]
//! and only ever "waits" by scheduling a future event on the [`Clock`].
//!
//! ```
//! use hs_rust::hs_controller::{ControllerConfig, SyncController};
//! use hs_rust::hs_interface::{ControllerEvent, GridPos, RoleFlags};
//! use hs_rust::hs_metrics::MetricsConfig;
//! use hs_rust::hs_oracle::DirectOracle;
//! use hs_rust::hs_phase::SyncMode;
//! use hs_rust::hs_registry::PeerRegistry;
//! use hs_rust::hs_scheduler::EventQueue;
//!
//! let mut registry = PeerRegistry::new(GridPos::new(2, 2), 1, 15);
//! registry.register_with_version(0, GridPos::new(0, 2), RoleFlags::POINT, 9)?;
//! registry.register_with_version(1, GridPos::new(1, 2), RoleFlags::PIVOT, 4)?;
//!
//! let config = ControllerConfig {
//!     metrics: MetricsConfig { path: None, analysis: None, ..Default::default() },
//!     ..Default::default()
//! };
//! let mut controller =
//!     SyncController::new(registry, DirectOracle, SyncMode::Staged.strategy(), config);
//!
//! let mut queue: EventQueue<ControllerEvent> = EventQueue::new();
//! queue.schedule_at(11.0, ControllerEvent::Begin);
//! while let Some((_, event)) = queue.pop() {
//!     controller.handle(event, &mut queue)?;
//! }
//! assert!(controller.is_finished());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use log::{debug, error, info};

use crate::hs_arrival::{Arrival, ArrivalTracker, StartTrigger};
use crate::hs_error::{ControllerError, RegistryError};
use crate::hs_interface::{
    Clock, ControllerEvent, EventSink, NoOpSink, PeerHandle, Phase, SimTime, SyncEvent,
};
use crate::hs_metrics::{format_seconds, MetricsConfig, Reconciliation, SyncReporter, SyncWindow};
use crate::hs_oracle::VersionOracle;
use crate::hs_phase::{ConvergenceSnapshot, ConvergenceStrategy, PhaseMachine, SyncMode};
use crate::hs_poller::{ConvergencePoller, PollOutcome, PollerConfig};
use crate::hs_registry::PeerRegistry;

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    pub poll: PollerConfig,
    pub metrics: MetricsConfig,
    pub start: StartTrigger,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            poll: PollerConfig::default(),
            metrics: MetricsConfig::default(),
            start: StartTrigger::At { time: 11.0 },
        }
    }
}

/// When a phase became active
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseTransition {
    pub phase: Phase,
    pub entered_at: SimTime,
}

pub struct SyncController<O: VersionOracle> {
    registry: PeerRegistry,
    oracle: O,
    machine: PhaseMachine,
    poller: ConvergencePoller,
    arrivals: ArrivalTracker,
    reporter: SyncReporter,
    sink: Box<dyn EventSink>,
    phase_log: Vec<PhaseTransition>,
    timed_out: bool,
}

impl<O: VersionOracle> SyncController<O> {
    pub fn new(
        registry: PeerRegistry,
        oracle: O,
        strategy: Box<dyn ConvergenceStrategy>,
        config: ControllerConfig,
    ) -> Self {
        let arrivals = ArrivalTracker::new(registry.points().len(), config.start);
        info!(
            "[MANAGER] {:?} controller waiting for {} points ({} pivots, {} peers)",
            strategy.mode(),
            registry.points().len(),
            registry.pivots().len(),
            registry.len()
        );

        Self {
            registry,
            oracle,
            machine: PhaseMachine::new(strategy),
            poller: ConvergencePoller::new(config.poll),
            arrivals,
            reporter: SyncReporter::new(config.metrics),
            sink: Box::new(NoOpSink),
            phase_log: Vec::new(),
            timed_out: false,
        }
    }

    pub fn with_sink(mut self, sink: Box<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    pub fn phase(&self) -> Phase {
        self.machine.phase()
    }

    pub fn mode(&self) -> SyncMode {
        self.machine.mode()
    }

    pub fn window(&self) -> &SyncWindow {
        self.reporter.window()
    }

    pub fn reconciliation(&self) -> Option<&Reconciliation> {
        self.reporter.reconciliation()
    }

    pub fn phase_log(&self) -> &[PhaseTransition] {
        &self.phase_log
    }

    pub fn arrivals(&self) -> &ArrivalTracker {
        &self.arrivals
    }

    pub fn is_started(&self) -> bool {
        self.machine.phase() != Phase::Idle
    }

    pub fn is_finished(&self) -> bool {
        self.machine.phase() == Phase::Finished
    }

    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    /// Dispatch one scheduled callback
    pub fn handle<C: Clock + ?Sized>(
        &mut self,
        event: ControllerEvent,
        clock: &mut C,
    ) -> Result<(), ControllerError> {
        match event {
            ControllerEvent::Arrive(peer) => self.arrive(peer, clock).map(|_| ()),
            ControllerEvent::Begin => {
                self.begin(clock);
                Ok(())
            }
            ControllerEvent::Poll => self.poll(clock),
        }
    }

    /// A point reached the rendezvous
    pub fn arrive<C: Clock + ?Sized>(
        &mut self,
        peer: PeerHandle,
        clock: &mut C,
    ) -> Result<Arrival, ControllerError> {
        if self.is_finished() {
            return Ok(Arrival::Ignored);
        }
        if self.registry.peer(peer).is_none() {
            return Err(RegistryError::UnknownPeer(peer).into());
        }

        let arrival = self.arrivals.mark(&mut self.registry, peer);
        if let Arrival::New { count } = arrival {
            self.machine
                .strategy_mut()
                .on_arrival(peer, &mut self.registry, &self.oracle);
            self.sink.log(
                clock.now(),
                SyncEvent::Arrived {
                    peer,
                    count,
                    expected: self.arrivals.expected(),
                },
            );

            if self.arrivals.take_trigger() {
                self.begin(clock);
            }
        }
        Ok(arrival)
    }

    /// "Begin synchronization": open the window, enter the first phase and
    /// schedule the first poll. Returns false when already started.
    pub fn begin<C: Clock + ?Sized>(&mut self, clock: &mut C) -> bool {
        if self.is_started() || self.reporter.window().started {
            debug!("begin ignored, synchronization already started");
            return false;
        }

        let now = clock.now();
        self.reporter.start(now);
        self.sink.log(now, SyncEvent::WindowStarted);

        let phase = self.machine.start(&mut self.registry);
        self.entered(phase, now);
        self.poller.reset(now);
        clock.schedule(self.poller.config().entry_delay, ControllerEvent::Poll);
        true
    }

    /// One convergence check
    pub fn poll<C: Clock + ?Sized>(&mut self, clock: &mut C) -> Result<(), ControllerError> {
        if self.timed_out || !self.is_started() || self.is_finished() {
            debug!("stray poll ignored in {}", self.machine.phase());
            return Ok(());
        }

        let now = clock.now();
        let phase = self.machine.phase();
        let snapshot = ConvergenceSnapshot::capture(&self.registry, &self.oracle);
        let converged = self.machine.is_converged(&snapshot, &self.registry);

        match self.poller.record(converged, now) {
            PollOutcome::Converged { attempts } => {
                info!(
                    "[CONVERGENCE] {} complete at t={}s after {} checks",
                    phase,
                    format_seconds(now),
                    attempts
                );
                self.sink.log(now, SyncEvent::Converged { phase, attempts });

                let next = self.machine.advance(&mut self.registry);
                self.entered(next, now);
                if next == Phase::Finished {
                    self.finish(now);
                } else {
                    self.poller.reset(now);
                    clock.schedule(0.0, ControllerEvent::Poll);
                }
                Ok(())
            }
            PollOutcome::Retry { delay } => {
                debug!(
                    "{} not converged at t={}s (points max {}, pivots {}..{})",
                    phase,
                    format_seconds(now),
                    snapshot.max_point,
                    snapshot.min_pivot,
                    snapshot.max_pivot
                );
                clock.schedule(delay, ControllerEvent::Poll);
                Ok(())
            }
            PollOutcome::TimedOut { attempts, waited } => {
                self.timed_out = true;
                error!(
                    "convergence not reached in {} after {} checks ({}s)",
                    phase,
                    attempts,
                    format_seconds(waited)
                );
                self.sink.log(now, SyncEvent::TimedOut { phase, attempts });
                Err(ControllerError::ConvergenceTimeout {
                    phase,
                    attempts,
                    waited,
                })
            }
        }
    }

    fn entered(&mut self, phase: Phase, now: SimTime) {
        info!("[SYNC] entering {} at t={}s", phase, format_seconds(now));
        self.phase_log.push(PhaseTransition {
            phase,
            entered_at: now,
        });
        self.sink.log(now, SyncEvent::PhaseEntered { phase });
    }

    fn finish(&mut self, now: SimTime) {
        if self.reporter.end(now) {
            let window = *self.reporter.window();
            self.sink.log(
                now,
                SyncEvent::WindowEnded {
                    start: window.start_time,
                    end: window.end_time,
                    duration: window.duration,
                },
            );
        }

        if let Err(e) = self.reporter.persist() {
            error!("[METRICS] {}", e);
        }

        let tracked = self.machine.strategy().tracked(&self.registry);
        let report = self.reporter.finalize(&mut self.registry, &tracked);
        let event = SyncEvent::Reconciled {
            final_version: report.final_version,
            ok: report.ok_count(),
            failed: report.entries.len() - report.ok_count(),
        };
        info!(
            "final summary: reference v{}, {}/{} peers OK",
            report.final_version,
            report.ok_count(),
            report.entries.len()
        );
        self.sink.log(now, event);

        self.reporter.run_analysis();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hs_event_sinks::CollectorEventSink;
    use crate::hs_interface::{GridPos, RoleFlags, Version};
    use crate::hs_metrics::ReconcileStatus;
    use crate::hs_oracle::DirectOracle;
    use crate::hs_scheduler::EventQueue;

    fn quiet_config() -> ControllerConfig {
        ControllerConfig {
            metrics: MetricsConfig {
                path: None,
                analysis: None,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Points {5, 12, 3}, pivots {1, 1}, plus the center and a plain node
    fn scenario_registry() -> PeerRegistry {
        let mut reg = PeerRegistry::new(GridPos::new(2, 2), 1, 15);
        reg.register_with_version(0, GridPos::new(0, 2), RoleFlags::POINT, 5).unwrap();
        reg.register_with_version(1, GridPos::new(2, 0), RoleFlags::POINT, 12).unwrap();
        reg.register_with_version(2, GridPos::new(2, 4), RoleFlags::POINT, 3).unwrap();
        reg.register_with_version(3, GridPos::new(1, 2), RoleFlags::PIVOT, 1).unwrap();
        reg.register_with_version(4, GridPos::new(3, 2), RoleFlags::PIVOT, 1).unwrap();
        reg.register_with_version(5, GridPos::new(2, 2), RoleFlags::PLAIN, 15).unwrap();
        reg.register_with_version(6, GridPos::new(0, 0), RoleFlags::PLAIN, 14).unwrap();
        reg
    }

    fn drive<O: VersionOracle>(
        controller: &mut SyncController<O>,
        queue: &mut EventQueue<ControllerEvent>,
    ) -> Result<(), ControllerError> {
        while let Some((_, event)) = queue.pop() {
            controller.handle(event, queue)?;
            if controller.is_finished() {
                break;
            }
        }
        Ok(())
    }

    /// Reports stale versions forever: pivots never appear to move
    struct FrozenOracle;

    impl VersionOracle for FrozenOracle {
        fn version_of(&self, registry: &PeerRegistry, peer: PeerHandle) -> Option<Version> {
            if registry.is_center(peer) {
                return None;
            }
            registry.peer(peer).map(|p| p.initial_version())
        }
    }

    #[test]
    fn test_staged_run_converges_to_max() {
        let mut controller = SyncController::new(
            scenario_registry(),
            DirectOracle,
            SyncMode::Staged.strategy(),
            quiet_config(),
        );
        let mut queue: EventQueue<ControllerEvent> = EventQueue::new();
        queue.schedule_at(11.0, ControllerEvent::Begin);

        drive(&mut controller, &mut queue).unwrap();

        assert!(controller.is_finished());
        let phases: Vec<_> = controller.phase_log().iter().map(|t| t.phase).collect();
        assert_eq!(
            phases,
            vec![
                Phase::LeavesToPivots,
                Phase::PivotInterSync,
                Phase::PivotsToLeaves,
                Phase::Finished
            ]
        );

        let report = controller.reconciliation().unwrap();
        assert_eq!(report.final_version, 12);
        assert_eq!(report.entries.len(), 5);
        assert!(report.entries.iter().all(|e| e.status == ReconcileStatus::Ok && e.final_version == 12));

        // plain peers and the center are left alone
        assert_eq!(controller.registry().current_version(PeerHandle(5)), Some(15));
        assert_eq!(controller.registry().current_version(PeerHandle(6)), Some(14));

        let window = controller.window();
        assert_eq!(window.start_time, 11.0);
        // first check after the entry delay, the next two at the same instant
        assert!((window.end_time - 11.1).abs() < 1e-9);
        assert!((window.duration - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_begin_twice_is_noop() {
        let mut controller = SyncController::new(
            scenario_registry(),
            DirectOracle,
            SyncMode::Staged.strategy(),
            quiet_config(),
        );
        let mut queue: EventQueue<ControllerEvent> = EventQueue::new();
        assert!(controller.begin(&mut queue));
        assert!(!controller.begin(&mut queue));
        assert_eq!(queue.len(), 1);
        assert_eq!(controller.phase_log().len(), 1);
    }

    #[test]
    fn test_stray_polls_are_ignored() {
        let mut controller = SyncController::new(
            scenario_registry(),
            DirectOracle,
            SyncMode::Staged.strategy(),
            quiet_config(),
        );
        let mut queue: EventQueue<ControllerEvent> = EventQueue::new();

        // before start
        controller.poll(&mut queue).unwrap();
        assert!(queue.is_empty());
        assert_eq!(controller.phase(), Phase::Idle);

        controller.begin(&mut queue);
        drive(&mut controller, &mut queue).unwrap();
        let before = controller.window().end_time;

        // after finish
        queue.schedule_at(50.0, ControllerEvent::Poll);
        drive(&mut controller, &mut queue).unwrap();
        assert_eq!(controller.window().end_time, before);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_unopenable_metrics_sink_still_finishes() {
        let mut config = quiet_config();
        config.metrics.path = Some(
            std::env::temp_dir()
                .join("hs-controller-no-such-dir")
                .join("deeper")
                .join("sync_metrics.txt"),
        );
        let mut controller = SyncController::new(
            scenario_registry(),
            DirectOracle,
            SyncMode::Staged.strategy(),
            config,
        );
        let mut queue: EventQueue<ControllerEvent> = EventQueue::new();
        queue.schedule_at(11.0, ControllerEvent::Begin);

        assert!(drive(&mut controller, &mut queue).is_ok());
        assert!(controller.is_finished());
        assert!(controller.reconciliation().unwrap().all_ok());
    }

    #[test]
    fn test_never_converging_phase_times_out() {
        let mut config = quiet_config();
        config.poll.max_attempts = Some(25);
        let (sink, events) = CollectorEventSink::shared();
        let mut controller = SyncController::new(
            scenario_registry(),
            FrozenOracle,
            SyncMode::Staged.strategy(),
            config,
        )
        .with_sink(Box::new(sink));
        let mut queue: EventQueue<ControllerEvent> = EventQueue::new();
        queue.schedule_at(11.0, ControllerEvent::Begin);

        let err = drive(&mut controller, &mut queue).unwrap_err();
        match err {
            ControllerError::ConvergenceTimeout {
                phase,
                attempts,
                waited,
            } => {
                assert_eq!(phase, Phase::LeavesToPivots);
                assert_eq!(attempts, 25);
                // first check at +0.1, then 24 more every 0.05
                assert!((waited - (0.1 + 24.0 * 0.05)).abs() < 1e-6);
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(controller.timed_out());
        assert!(!controller.is_finished());
        // nothing further is scheduled once the budget is gone
        assert!(queue.is_empty());

        let timeouts = events
            .borrow()
            .iter()
            .filter(|r| matches!(r.event, SyncEvent::TimedOut { .. }))
            .count();
        assert_eq!(timeouts, 1);
    }

    #[test]
    fn test_organic_first_arrival_starts_window() {
        let mut config = quiet_config();
        config.start = StartTrigger::Arrivals { count: 1 };
        config.poll.entry_delay = 0.5;
        config.poll.interval = 0.5;

        let mut controller = SyncController::new(
            scenario_registry(),
            DirectOracle,
            SyncMode::Organic.strategy(),
            config,
        );
        let points = controller.registry().points().to_vec();
        let mut queue: EventQueue<ControllerEvent> = EventQueue::new();
        for (i, p) in points.iter().enumerate() {
            queue.schedule_at(10.0 + i as f64 * 0.1, ControllerEvent::Arrive(*p));
        }
        // repeated arrival must not count twice
        queue.schedule_at(10.05, ControllerEvent::Arrive(points[0]));

        drive(&mut controller, &mut queue).unwrap();

        assert!(controller.is_finished());
        assert_eq!(controller.arrivals().arrived(), 3);
        assert_eq!(controller.window().start_time, 10.0);
        // last arrival at 10.2, checks at 10.5 succeed
        assert!((controller.window().end_time - 10.5).abs() < 1e-9);

        let report = controller.reconciliation().unwrap();
        assert_eq!(report.entries.len(), 3);
        assert_eq!(report.final_version, 12);
        assert!(report.all_ok());
    }

    #[test]
    fn test_unknown_peer_arrival_is_an_error() {
        let mut controller = SyncController::new(
            scenario_registry(),
            DirectOracle,
            SyncMode::Organic.strategy(),
            quiet_config(),
        );
        let mut queue: EventQueue<ControllerEvent> = EventQueue::new();
        let result = controller.arrive(PeerHandle(99), &mut queue);
        assert_eq!(
            result,
            Err(ControllerError::Registry(RegistryError::UnknownPeer(PeerHandle(99))))
        );
    }
}
