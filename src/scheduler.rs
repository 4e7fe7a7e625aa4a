//! Event scheduler: a min-heap of future events keyed by virtual cycle.
//!
//! All device activity outside the CPU's own instruction stream is
//! modelled as an event on this heap: PPU line-start/H-blank, APU
//! sample ticks, timer overflows, DMA completion. The CPU's inner loop
//! asks `cycles_until_next()` for how far it may run unattended, then
//! calls `drain_due()` once it gets there.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// The closed set of things that can happen on the scheduler.
///
/// A tagged payload replaces the source's function-pointer-plus-void-
/// pointer callback; `Emu::dispatch_event` is the single match that
/// used to live behind each raw callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    PpuLineStart,
    PpuHBlank,
    ApuSample,
    ApuFrameSequencer,
    TimerOverflow(u8),
    DmaImmediateStart(u8),
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Event {
    timestamp: u64,
    // Insertion order, used to break ties FIFO (lower = earlier).
    seq: u64,
    kind: EventKind,
    important: bool,
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse both fields so the earliest
        // timestamp (and, on a tie, the earliest insertion) pops first.
        other
            .timestamp
            .cmp(&self.timestamp)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug)]
pub struct Scheduler {
    pub current_time: u64,
    queue: BinaryHeap<Event>,
    next_seq: u64,
    /// Set whenever a callback schedules something sooner than what the
    /// CPU's inner loop had already committed to running; the only
    /// permitted interruption of the tight execution loop.
    pub recalculate: bool,
}

impl Scheduler {
    pub fn new() -> Self {
        let mut s = Self {
            current_time: 0,
            queue: BinaryHeap::new(),
            next_seq: 0,
            recalculate: false,
        };
        s.reset();
        s
    }

    pub fn reset(&mut self) {
        self.current_time = 0;
        self.queue.clear();
        self.next_seq = 0;
        self.recalculate = false;
    }

    /// Schedule `kind` to fire `cycles` from now.
    pub fn add(&mut self, cycles: u64, kind: EventKind, important: bool) {
        let timestamp = self.current_time + cycles;
        self.queue.push(Event {
            timestamp,
            seq: self.next_seq,
            kind,
            important,
        });
        self.next_seq += 1;
        self.recalculate = true;
    }

    /// How many cycles the CPU may run before the next event is due.
    /// Zero if an event is already due.
    pub fn cycles_until_next(&self) -> u64 {
        match self.queue.peek() {
            Some(ev) => ev.timestamp.saturating_sub(self.current_time),
            None => u64::MAX,
        }
    }

    /// Advance the virtual clock. Does not fire callbacks.
    pub fn advance(&mut self, cycles: u64) {
        self.current_time += cycles;
    }

    /// Pop and return every event with `timestamp <= current_time`, in
    /// the order they should be dispatched.
    pub fn drain_due(&mut self) -> Vec<EventKind> {
        let mut due = Vec::new();
        while let Some(ev) = self.queue.peek() {
            if ev.timestamp > self.current_time {
                break;
            }
            let ev = self.queue.pop().unwrap();
            due.push(ev.kind);
        }
        due
    }

    pub fn is_event_pending(&self, kind: EventKind) -> bool {
        self.queue.iter().any(|e| e.kind == kind)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_in_timestamp_order() {
        let mut s = Scheduler::new();
        s.add(100, EventKind::PpuLineStart, false);
        s.add(50, EventKind::PpuHBlank, false);
        s.add(200, EventKind::ApuSample, false);

        assert_eq!(s.cycles_until_next(), 50);
        s.advance(50);
        let due = s.drain_due();
        assert_eq!(due, vec![EventKind::PpuHBlank]);

        s.advance(50);
        let due = s.drain_due();
        assert_eq!(due, vec![EventKind::PpuLineStart]);
    }

    #[test]
    fn ties_break_fifo() {
        let mut s = Scheduler::new();
        s.add(10, EventKind::PpuLineStart, false);
        s.add(10, EventKind::PpuHBlank, false);
        s.advance(10);
        let due = s.drain_due();
        assert_eq!(due, vec![EventKind::PpuLineStart, EventKind::PpuHBlank]);
    }

    #[test]
    fn monotonic_dispatch_order() {
        let mut s = Scheduler::new();
        s.add(5, EventKind::TimerOverflow(0), false);
        s.add(3, EventKind::TimerOverflow(1), false);
        s.add(9, EventKind::TimerOverflow(2), false);

        let mut fired = Vec::new();
        let mut last_time = 0u64;
        while s.cycles_until_next() != u64::MAX {
            let n = s.cycles_until_next();
            s.advance(n);
            assert!(s.current_time >= last_time);
            last_time = s.current_time;
            fired.extend(s.drain_due());
        }
        assert_eq!(fired.len(), 3);
    }

    #[test]
    fn recalculate_set_on_add() {
        let mut s = Scheduler::new();
        s.recalculate = false;
        s.add(1, EventKind::Stop, false);
        assert!(s.recalculate);
    }
}
