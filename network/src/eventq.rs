// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Discrete event queue driving all network consumers.
//!
//! Simulated time is a monotonically non-decreasing cycle count. Consumers
//! (throttles, switches, routers, network interfaces) register once and are
//! woken by scheduled events; all events at cycle `t` are dispatched before
//! any event at `t + 1`, and events scheduled for the same cycle fire in
//! scheduling order.

use std::cell::{Cell, RefCell};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::fmt;

use crate::Cycle;

/// Opaque handle for a registered consumer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConsumerId(usize);

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "consumer_{}", self.0)
    }
}

#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct PendingEvent {
    time: Cycle,
    seq: u64,
    consumer: ConsumerId,
}

/// Single-threaded event queue with stable same-cycle ordering.
///
/// A consumer is woken at most once per cycle: scheduling the same
/// `(consumer, cycle)` pair twice coalesces into one wakeup. Wakeups with no
/// pending work are legal and expected to be no-ops.
pub struct EventQueue {
    now: Cell<Cycle>,
    next_consumer: Cell<usize>,
    next_seq: Cell<u64>,
    pending: RefCell<BinaryHeap<Reverse<PendingEvent>>>,
    scheduled: RefCell<HashSet<(ConsumerId, Cycle)>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self {
            now: Cell::new(0),
            next_consumer: Cell::new(0),
            next_seq: Cell::new(0),
            pending: RefCell::new(BinaryHeap::new()),
            scheduled: RefCell::new(HashSet::new()),
        }
    }

    /// The current simulated cycle.
    pub fn now(&self) -> Cycle {
        self.now.get()
    }

    /// Hand out a fresh consumer handle.
    pub fn register_consumer(&self) -> ConsumerId {
        let id = ConsumerId(self.next_consumer.get());
        self.next_consumer.set(id.0 + 1);
        id
    }

    /// Schedule a wakeup `delta` cycles from now.
    pub fn schedule(&self, consumer: ConsumerId, delta: Cycle) {
        self.schedule_at(consumer, self.now.get() + delta);
    }

    /// Schedule a wakeup at an absolute cycle (>= now).
    pub fn schedule_at(&self, consumer: ConsumerId, time: Cycle) {
        assert!(
            time >= self.now.get(),
            "event scheduled in the past: {} < {}",
            time,
            self.now.get()
        );
        if !self.scheduled.borrow_mut().insert((consumer, time)) {
            return;
        }
        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);
        log::trace!("schedule {} @cycle {}", consumer, time);
        self.pending.borrow_mut().push(Reverse(PendingEvent {
            time,
            seq,
            consumer,
        }));
    }

    /// Pop the next event, advancing the clock to its cycle.
    pub fn next_event(&self) -> Option<(Cycle, ConsumerId)> {
        let Reverse(event) = self.pending.borrow_mut().pop()?;
        self.scheduled
            .borrow_mut()
            .remove(&(event.consumer, event.time));
        debug_assert!(event.time >= self.now.get());
        self.now.set(event.time);
        Some((event.time, event.consumer))
    }

    /// Pop the next event only if it fires at or before `deadline`.
    pub fn next_event_before(&self, deadline: Cycle) -> Option<(Cycle, ConsumerId)> {
        {
            let pending = self.pending.borrow();
            let Reverse(head) = pending.peek()?;
            if head.time > deadline {
                return None;
            }
        }
        self.next_event()
    }

    /// Number of events still waiting to fire.
    pub fn pending_events(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Advance the clock without dispatching (used to settle at a horizon).
    pub fn advance_to(&self, time: Cycle) {
        if time > self.now.get() {
            self.now.set(time);
        }
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_cycle_events_fire_in_schedule_order() {
        let queue = EventQueue::new();
        let a = queue.register_consumer();
        let b = queue.register_consumer();
        let c = queue.register_consumer();
        queue.schedule(b, 5);
        queue.schedule(a, 5);
        queue.schedule(c, 2);

        assert_eq!(queue.next_event(), Some((2, c)));
        assert_eq!(queue.next_event(), Some((5, b)));
        assert_eq!(queue.next_event(), Some((5, a)));
        assert_eq!(queue.next_event(), None);
        assert_eq!(queue.now(), 5);
    }

    #[test]
    fn duplicate_schedules_coalesce() {
        let queue = EventQueue::new();
        let a = queue.register_consumer();
        queue.schedule(a, 1);
        queue.schedule(a, 1);
        queue.schedule(a, 2);
        assert_eq!(queue.pending_events(), 2);
        assert_eq!(queue.next_event(), Some((1, a)));
        // The slot is free again once the event has fired.
        queue.schedule(a, 0);
        assert_eq!(queue.next_event(), Some((1, a)));
        assert_eq!(queue.next_event(), Some((2, a)));
    }

    #[test]
    fn deadline_bounds_dispatch() {
        let queue = EventQueue::new();
        let a = queue.register_consumer();
        queue.schedule(a, 10);
        assert_eq!(queue.next_event_before(9), None);
        assert_eq!(queue.next_event_before(10), Some((10, a)));
    }

    #[test]
    #[should_panic(expected = "scheduled in the past")]
    fn scheduling_in_the_past_is_fatal() {
        let queue = EventQueue::new();
        let a = queue.register_consumer();
        queue.schedule(a, 3);
        queue.next_event();
        queue.schedule_at(a, 1);
    }
}
