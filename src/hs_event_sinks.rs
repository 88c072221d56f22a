//! Event sinks for the sync controller

use std::cell::RefCell;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::rc::Rc;

use log::{error, info};

use crate::hs_interface::{EventSink, SimTime, SyncEvent};
use crate::hs_metrics::format_seconds;

// ============================================================================
// Logging Sink
// ============================================================================

/// Forwards every event to the `log` facade
pub struct LoggingEventSink {
    enabled: bool,
}

impl LoggingEventSink {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

impl EventSink for LoggingEventSink {
    fn log(&mut self, time: SimTime, event: SyncEvent) {
        if !self.enabled {
            return;
        }

        let t = format_seconds(time);
        match event {
            SyncEvent::Arrived {
                peer,
                count,
                expected,
            } => info!("{:>8} arrive   p:{} {}/{}", t, peer.index(), count, expected),
            SyncEvent::WindowStarted => info!("{:>8} window   start", t),
            SyncEvent::PhaseEntered { phase } => info!("{:>8} phase    {}", t, phase),
            SyncEvent::Converged { phase, attempts } => {
                info!("{:>8} conv     {} checks:{}", t, phase, attempts)
            }
            SyncEvent::TimedOut { phase, attempts } => {
                info!("{:>8} timeout  {} checks:{}", t, phase, attempts)
            }
            SyncEvent::WindowEnded {
                start,
                end,
                duration,
            } => info!(
                "{:>8} window   end {} -> {} ({}s)",
                t,
                format_seconds(start),
                format_seconds(end),
                format_seconds(duration)
            ),
            SyncEvent::Reconciled {
                final_version,
                ok,
                failed,
            } => info!(
                "{:>8} final    v{} ok:{} fail:{}",
                t, final_version, ok, failed
            ),
        }
    }
}

// ============================================================================
// CSV Event Sink
// ============================================================================

/// CSV event sink for structured data export
pub struct CsvEventSink {
    writer: BufWriter<File>,
}

impl CsvEventSink {
    pub fn new<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        writeln!(writer, "time,event,phase,peer,value1,value2")?;

        Ok(Self { writer })
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

impl EventSink for CsvEventSink {
    fn log(&mut self, time: SimTime, event: SyncEvent) {
        let t = format_seconds(time);
        let result = match event {
            SyncEvent::Arrived {
                peer,
                count,
                expected,
            } => writeln!(
                self.writer,
                "{},Arrived,,{},{},{}",
                t,
                peer.index(),
                count,
                expected
            ),
            SyncEvent::WindowStarted => writeln!(self.writer, "{},WindowStarted,,,,", t),
            SyncEvent::PhaseEntered { phase } => {
                writeln!(self.writer, "{},PhaseEntered,{},,,", t, phase.rank())
            }
            SyncEvent::Converged { phase, attempts } => writeln!(
                self.writer,
                "{},Converged,{},,{},",
                t,
                phase.rank(),
                attempts
            ),
            SyncEvent::TimedOut { phase, attempts } => writeln!(
                self.writer,
                "{},TimedOut,{},,{},",
                t,
                phase.rank(),
                attempts
            ),
            SyncEvent::WindowEnded { start, end, .. } => writeln!(
                self.writer,
                "{},WindowEnded,,,{},{}",
                t,
                format_seconds(start),
                format_seconds(end)
            ),
            SyncEvent::Reconciled {
                final_version,
                ok,
                failed,
            } => writeln!(
                self.writer,
                "{},Reconciled,,{},{},{}",
                t, final_version, ok, failed
            ),
        };

        if let Err(e) = result {
            error!("Error writing event CSV: {}", e);
        }
    }
}

impl Drop for CsvEventSink {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

// ============================================================================
// Collector Event Sink (In-Memory)
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub time: SimTime,
    pub event: SyncEvent,
}

pub type EventLog = Rc<RefCell<Vec<EventRecord>>>;

/// Collects events in memory. The log handle stays readable after the sink
/// itself was boxed into a controller.
#[derive(Default)]
pub struct CollectorEventSink {
    events: EventLog,
}

impl CollectorEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink plus a handle to the records it collects
    pub fn shared() -> (Self, EventLog) {
        let sink = Self::new();
        let handle = Rc::clone(&sink.events);
        (sink, handle)
    }

    pub fn events(&self) -> EventLog {
        Rc::clone(&self.events)
    }
}

impl EventSink for CollectorEventSink {
    fn log(&mut self, time: SimTime, event: SyncEvent) {
        self.events.borrow_mut().push(EventRecord { time, event });
    }
}

// ============================================================================
// Multi Sink
// ============================================================================

/// Combines multiple event sinks
#[derive(Default)]
pub struct MultiEventSink {
    sinks: Vec<Box<dyn EventSink>>,
}

impl MultiEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sink(&mut self, sink: Box<dyn EventSink>) {
        self.sinks.push(sink);
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for MultiEventSink {
    fn log(&mut self, time: SimTime, event: SyncEvent) {
        for sink in &mut self.sinks {
            sink.log(time, event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hs_interface::Phase;

    #[test]
    fn test_collector_handle_sees_events() {
        let (mut sink, log) = CollectorEventSink::shared();
        sink.log(11.0, SyncEvent::WindowStarted);
        sink.log(
            11.0,
            SyncEvent::PhaseEntered {
                phase: Phase::LeavesToPivots,
            },
        );
        assert_eq!(log.borrow().len(), 2);
        assert_eq!(log.borrow()[0].event, SyncEvent::WindowStarted);
    }

    #[test]
    fn test_multi_sink_fans_out() {
        let (a, log_a) = CollectorEventSink::shared();
        let (b, log_b) = CollectorEventSink::shared();
        let mut multi = MultiEventSink::new();
        assert!(multi.is_empty());
        multi.add_sink(Box::new(a));
        multi.add_sink(Box::new(b));

        multi.log(1.0, SyncEvent::WindowStarted);
        assert_eq!(log_a.borrow().len(), 1);
        assert_eq!(log_b.borrow().len(), 1);
    }

    #[test]
    fn test_csv_sink_writes_header_and_rows() {
        let path = std::env::temp_dir().join(format!("hs_events_{}.csv", std::process::id()));
        {
            let mut sink = CsvEventSink::new(&path).unwrap();
            sink.log(11.0, SyncEvent::WindowStarted);
            sink.log(
                11.1,
                SyncEvent::Converged {
                    phase: Phase::PivotInterSync,
                    attempts: 3,
                },
            );
        }
        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines[0], "time,event,phase,peer,value1,value2");
        assert_eq!(lines[1], "11,WindowStarted,,,,");
        assert_eq!(lines[2], "11.1,Converged,2,,3,");
        let _ = std::fs::remove_file(&path);
    }
}
