use std::path::PathBuf;
use std::str::FromStr;

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use crate::hs_arrival::StartTrigger;
use crate::hs_controller::ControllerConfig;
use crate::hs_error::ConfigError;
use crate::hs_interface::{SimTime, Version};
use crate::hs_metrics::{AnalysisCommand, MetricsConfig, ReconcileMode};
use crate::hs_phase::SyncMode;
use crate::hs_poller::PollerConfig;

/// Full configuration of one synchronization run
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    pub mode: SyncMode,

    /// Random seed for reproducibility
    pub seed: Option<[u8; 32]>,

    pub grid: GridConfig,
    pub versions: VersionRange,
    pub schedule: ScheduleConfig,
    pub poll: PollerConfig,
    pub metrics: MetricsConfig,
    pub protocol: ProtocolParams,
    pub output: OutputConfig,
}

/// Grid shape and physical placement
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub rows: u32,
    pub cols: u32,

    /// Cells on the center row or column at most this many steps from the
    /// center are pivots; farther cells on that cross are points
    pub pivot_radius: u32,

    /// Distance between neighbouring cells (m)
    pub spacing: f64,

    /// Position of cell 0-0 on both axes (m)
    pub offset: f64,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            rows: 5,
            cols: 5,
            pivot_radius: 1,
            spacing: 100.0,
            offset: 100.0,
        }
    }
}

/// Inclusive range initial versions are drawn from
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct VersionRange {
    pub min: Version,
    pub max: Version,
}

impl Default for VersionRange {
    fn default() -> Self {
        Self { min: 1, max: 15 }
    }
}

/// When points move and what opens the window
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Time the first point is moved to the rendezvous (s)
    pub move_at: SimTime,

    /// Extra delay per node id (s); 0 moves all points together
    pub move_stagger: SimTime,

    pub start: StartTrigger,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            move_at: 10.0,
            move_stagger: 0.0,
            start: StartTrigger::At { time: 11.0 },
        }
    }
}

/// Parameters of the underlying sync protocol, echoed for the record
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ProtocolParams {
    pub inter_pub_ms_slow: u64,
    pub inter_pub_ms_fast: u64,
    pub n_recent: u32,
    pub n_random: u32,
    pub drop_rate: f64,

    /// Fragmentation with a 1280 byte MTU
    pub frag: bool,
}

impl Default for ProtocolParams {
    fn default() -> Self {
        Self {
            inter_pub_ms_slow: 1500,
            inter_pub_ms_fast: 800,
            n_recent: 5,
            n_random: 3,
            drop_rate: 0.01,
            frag: false,
        }
    }
}

impl ProtocolParams {
    pub fn mtu(&self) -> Option<u32> {
        self.frag.then_some(1280)
    }
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Forward controller events to the log
    pub log_events: bool,

    /// Also write controller events as CSV
    pub events_csv: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::staged()
    }
}

impl SyncConfig {
    /// Three-phase run: every point moves at 10 s, the window opens at 11 s,
    /// checks every 50 ms
    pub fn staged() -> Self {
        Self {
            mode: SyncMode::Staged,
            seed: None,
            grid: GridConfig::default(),
            versions: VersionRange::default(),
            schedule: ScheduleConfig::default(),
            poll: PollerConfig::default(),
            metrics: MetricsConfig::default(),
            protocol: ProtocolParams::default(),
            output: OutputConfig::default(),
        }
    }

    /// Arrival-driven run: point `n` moves at 10 + 0.1·n s, the first arrival
    /// opens the window, checks every 500 ms
    pub fn organic() -> Self {
        Self {
            mode: SyncMode::Organic,
            // the whole center cross is points, no pivots
            grid: GridConfig {
                pivot_radius: 0,
                ..GridConfig::default()
            },
            schedule: ScheduleConfig {
                move_at: 10.0,
                move_stagger: 0.1,
                start: StartTrigger::Arrivals { count: 1 },
            },
            poll: PollerConfig {
                interval: 0.5,
                entry_delay: 0.5,
                max_attempts: Some(240),
            },
            ..Self::staged()
        }
    }

    pub fn for_mode(mode: SyncMode) -> Self {
        match mode {
            SyncMode::Staged => Self::staged(),
            SyncMode::Organic => Self::organic(),
        }
    }

    /// Build from `name=value` pairs. `mode` is applied first since it picks
    /// the preset the other options override.
    pub fn from_overrides<I>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let pairs: Vec<(String, String)> = pairs.into_iter().collect();
        let mode = match pairs.iter().rev().find(|(name, _)| name == "mode") {
            Some((name, value)) => parse_mode(name, value)?,
            None => SyncMode::default(),
        };

        let mut config = Self::for_mode(mode);
        for (name, value) in pairs.iter().filter(|(name, _)| name != "mode") {
            config.apply_override(name, value)?;
        }
        Ok(config)
    }

    /// Apply one command-line style override (`--name=value`)
    pub fn apply_override(&mut self, name: &str, value: &str) -> Result<(), ConfigError> {
        match name {
            "mode" => self.mode = parse_mode(name, value)?,
            "seed" => self.seed = Some(parse_seed_hex(value)?),
            "rows" => self.grid.rows = parse(name, value)?,
            "cols" => self.grid.cols = parse(name, value)?,
            "pivotRadius" => self.grid.pivot_radius = parse(name, value)?,
            "spacing" => self.grid.spacing = parse(name, value)?,
            "minVersion" => self.versions.min = parse(name, value)?,
            "maxVersion" => self.versions.max = parse(name, value)?,
            "moveAt" => self.schedule.move_at = parse(name, value)?,
            "moveStagger" => self.schedule.move_stagger = parse(name, value)?,
            "startAt" => {
                self.schedule.start = StartTrigger::At {
                    time: parse(name, value)?,
                }
            }
            "startArrivals" => {
                self.schedule.start = StartTrigger::Arrivals {
                    count: parse(name, value)?,
                }
            }
            "pollInterval" => self.poll.interval = parse(name, value)?,
            "entryDelay" => self.poll.entry_delay = parse(name, value)?,
            "maxAttempts" => {
                let max: u32 = parse(name, value)?;
                self.poll.max_attempts = (max > 0).then_some(max);
            }
            "metricsFile" => self.metrics.path = optional(value).map(PathBuf::from),
            "analysis" => {
                self.metrics.analysis = optional(value).and_then(|cmd| {
                    let mut words = cmd.split_whitespace().map(str::to_string);
                    words.next().map(|program| AnalysisCommand {
                        program,
                        args: words.collect(),
                    })
                })
            }
            "reconcile" => {
                self.metrics.reconcile = match value {
                    "verify" => ReconcileMode::Verify,
                    "cosmetic" => ReconcileMode::Cosmetic,
                    _ => return Err(invalid(name, value)),
                }
            }
            "interPubMsSlow" => self.protocol.inter_pub_ms_slow = parse(name, value)?,
            "interPubMsFast" => self.protocol.inter_pub_ms_fast = parse(name, value)?,
            "nRecent" => self.protocol.n_recent = parse(name, value)?,
            "nRandom" => self.protocol.n_random = parse(name, value)?,
            "dropRate" => self.protocol.drop_rate = parse(name, value)?,
            "frag" => self.protocol.frag = parse_bool(name, value)?,
            "logEvents" => self.output.log_events = parse_bool(name, value)?,
            "eventsCsv" => self.output.events_csv = optional(value).map(PathBuf::from),
            _ => return Err(ConfigError::UnknownOption(name.to_string())),
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.grid.rows == 0 || self.grid.cols == 0 {
            return Err(ConfigError::EmptyGrid {
                rows: self.grid.rows,
                cols: self.grid.cols,
            });
        }
        if self.versions.min == 0 || self.versions.min > self.versions.max {
            return Err(ConfigError::VersionRange {
                min: self.versions.min,
                max: self.versions.max,
            });
        }

        let mut times = vec![
            ("grid.spacing", self.grid.spacing),
            ("grid.offset", self.grid.offset),
            ("schedule.move_at", self.schedule.move_at),
            ("schedule.move_stagger", self.schedule.move_stagger),
            ("poll.entry_delay", self.poll.entry_delay),
        ];
        if let StartTrigger::At { time } = self.schedule.start {
            times.push(("schedule.start.time", time));
        }
        if let Some((field, value)) = times
            .into_iter()
            .find(|(_, value)| !value.is_finite() || *value < 0.0)
        {
            return Err(ConfigError::Negative { field, value });
        }

        if !self.poll.interval.is_finite() || self.poll.interval <= 0.0 {
            return Err(ConfigError::PollInterval(self.poll.interval));
        }
        if !(0.0..=1.0).contains(&self.protocol.drop_rate) {
            return Err(ConfigError::DropRate(self.protocol.drop_rate));
        }
        Ok(())
    }

    /// Resolve the seed, generating a random one if not specified
    pub fn resolve_seed(&self) -> [u8; 32] {
        self.seed.unwrap_or_else(|| {
            let mut temp_rng = StdRng::from_entropy();
            let mut seed = [0u8; 32];
            temp_rng.fill_bytes(&mut seed);
            seed
        })
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            poll: self.poll,
            metrics: self.metrics.clone(),
            start: self.schedule.start,
        }
    }
}

/// Parse a `0x`-prefixed (optional) hex seed; shorter input is zero-padded
pub fn parse_seed_hex(hex: &str) -> Result<[u8; 32], ConfigError> {
    let digits = hex.strip_prefix("0x").unwrap_or(hex);
    let mut seed = [0u8; 32];

    for (i, chunk) in digits.as_bytes().chunks(2).enumerate() {
        if i >= 32 {
            break;
        }
        seed[i] = std::str::from_utf8(chunk)
            .ok()
            .and_then(|byte| u8::from_str_radix(byte, 16).ok())
            .ok_or_else(|| invalid("seed", hex))?;
    }

    Ok(seed)
}

pub fn seed_to_hex(seed: &[u8; 32]) -> String {
    seed.iter().map(|b| format!("{:02x}", b)).collect()
}

fn invalid(name: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        value: value.to_string(),
    }
}

fn parse<T: FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| invalid(name, value))
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim() {
        "1" | "true" | "on" => Ok(true),
        "0" | "false" | "off" => Ok(false),
        _ => Err(invalid(name, value)),
    }
}

fn parse_mode(name: &str, value: &str) -> Result<SyncMode, ConfigError> {
    match value.trim() {
        "staged" | "large-grid" => Ok(SyncMode::Staged),
        "organic" | "simple" => Ok(SyncMode::Organic),
        _ => Err(invalid(name, value)),
    }
}

// empty or "none" disables an optional output
fn optional(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty() && value != "none").then_some(value)
}
