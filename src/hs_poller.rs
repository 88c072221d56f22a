use crate::hs_interface::SimTime;

/// Poll pacing and the liveness budget
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    /// Delay between a failed check and the next one (seconds)
    pub interval: SimTime,

    /// Delay from the start trigger to the first check (seconds)
    pub entry_delay: SimTime,

    /// Failed checks allowed per phase before giving up (None = poll forever)
    pub max_attempts: Option<u32>,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: 0.05,
            entry_delay: 0.1,
            max_attempts: Some(2_400),
        }
    }
}

/// What the controller should do after a check
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PollOutcome {
    /// Predicate held after this many checks in the phase
    Converged { attempts: u32 },
    /// Check again after the delay
    Retry { delay: SimTime },
    /// Budget exhausted
    TimedOut { attempts: u32, waited: SimTime },
}

/// Per-phase attempt accounting for the recurring convergence check
#[derive(Debug, Clone)]
pub struct ConvergencePoller {
    config: PollerConfig,
    attempts: u32,
    phase_started_at: SimTime,
}

impl ConvergencePoller {
    pub fn new(config: PollerConfig) -> Self {
        Self {
            config,
            attempts: 0,
            phase_started_at: 0.0,
        }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Start counting for a freshly entered phase
    pub fn reset(&mut self, now: SimTime) {
        self.attempts = 0;
        self.phase_started_at = now;
    }

    pub fn record(&mut self, converged: bool, now: SimTime) -> PollOutcome {
        self.attempts += 1;

        if converged {
            return PollOutcome::Converged {
                attempts: self.attempts,
            };
        }

        match self.config.max_attempts {
            Some(max) if self.attempts >= max => PollOutcome::TimedOut {
                attempts: self.attempts,
                waited: now - self.phase_started_at,
            },
            _ => PollOutcome::Retry {
                delay: self.config.interval,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_converged_reports_attempts() {
        let mut poller = ConvergencePoller::new(PollerConfig::default());
        poller.reset(11.0);
        assert_eq!(poller.record(false, 11.1), PollOutcome::Retry { delay: 0.05 });
        assert_eq!(poller.record(true, 11.15), PollOutcome::Converged { attempts: 2 });
    }

    #[test]
    fn test_times_out_after_budget() {
        let mut poller = ConvergencePoller::new(PollerConfig {
            max_attempts: Some(3),
            ..Default::default()
        });
        poller.reset(1.0);
        assert!(matches!(poller.record(false, 1.1), PollOutcome::Retry { .. }));
        assert!(matches!(poller.record(false, 1.15), PollOutcome::Retry { .. }));
        match poller.record(false, 1.2) {
            PollOutcome::TimedOut { attempts, waited } => {
                assert_eq!(attempts, 3);
                assert!((waited - 0.2).abs() < 1e-9);
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[test]
    fn test_reset_restores_budget() {
        let mut poller = ConvergencePoller::new(PollerConfig {
            max_attempts: Some(2),
            ..Default::default()
        });
        poller.record(false, 0.0);
        poller.reset(5.0);
        assert_eq!(poller.attempts(), 0);
        assert!(matches!(poller.record(false, 5.05), PollOutcome::Retry { .. }));
    }

    #[test]
    fn test_unbounded_never_times_out() {
        let mut poller = ConvergencePoller::new(PollerConfig {
            max_attempts: None,
            ..Default::default()
        });
        for i in 0..10_000 {
            assert!(matches!(
                poller.record(false, i as f64 * 0.05),
                PollOutcome::Retry { .. }
            ));
        }
    }
}
