//! Discrete-event queue: one callback at a time, ordered by (deadline, sequence)

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::hs_interface::{Clock, ControllerEvent, SimTime};

struct Scheduled<E> {
    deadline: SimTime,
    seq: u64,
    event: E,
}

// reversed so the BinaryHeap pops the earliest deadline, FIFO on ties
impl<E> Ord for Scheduled<E> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .total_cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<E> PartialOrd for Scheduled<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> PartialEq for Scheduled<E> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<E> Eq for Scheduled<E> {}

pub struct EventQueue<E> {
    now: SimTime,
    seq: u64,
    delivered: u64,
    events: BinaryHeap<Scheduled<E>>,
}

impl<E> EventQueue<E> {
    pub fn new() -> Self {
        Self {
            now: 0.0,
            seq: 0,
            delivered: 0,
            events: BinaryHeap::new(),
        }
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Schedule at an absolute time; the past is clamped to now
    pub fn schedule_at(&mut self, time: SimTime, event: E) {
        self.seq += 1;
        self.events.push(Scheduled {
            deadline: time.max(self.now),
            seq: self.seq,
            event,
        });
    }

    pub fn schedule_after(&mut self, delay: SimTime, event: E) {
        self.schedule_at(self.now + delay.max(0.0), event);
    }

    /// Next due event; advances the clock to its deadline
    pub fn pop(&mut self) -> Option<(SimTime, E)> {
        let next = self.events.pop()?;
        self.now = next.deadline;
        self.delivered += 1;
        Some((next.deadline, next.event))
    }

    pub fn peek_time(&self) -> Option<SimTime> {
        self.events.peek().map(|s| s.deadline)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of events handed out so far
    pub fn delivered(&self) -> u64 {
        self.delivered
    }
}

impl<E> Default for EventQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: From<ControllerEvent>> Clock for EventQueue<E> {
    fn now(&self) -> SimTime {
        self.now
    }

    fn schedule(&mut self, delay: SimTime, event: ControllerEvent) {
        self.schedule_after(delay, E::from(event));
    }
}
