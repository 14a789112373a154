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

//! Bounded FIFO of in-flight messages.
//!
//! A buffer has at most one consumer. Enqueueing makes the message visible
//! `latency` cycles later and schedules the consumer's wakeup at that cycle.

use std::collections::VecDeque;
use std::rc::Rc;

use crate::eventq::{ConsumerId, EventQueue};
use crate::message::MsgPtr;
use crate::Cycle;

/// A queued message plus the timestamps needed for latency accounting.
#[derive(Clone, Debug)]
pub struct BufferSlot {
    pub msg: MsgPtr,
    /// Cycle at which the message becomes visible to the consumer.
    pub arrival: Cycle,
    /// Cycle at which this enqueue/forward happened.
    pub enqueued_at: Cycle,
    /// Cycle the message entered its source-side protocol queue. Preserved
    /// across hops.
    pub injected_at: Cycle,
    /// Cycle the message left its source-side protocol queue. Preserved
    /// across hops.
    pub departed_at: Cycle,
}

pub struct MessageBuffer {
    queue: VecDeque<BufferSlot>,
    /// Maximum occupancy; 0 means unbounded.
    max_slots: usize,
    consumer: Option<ConsumerId>,
    scheduler: Rc<EventQueue>,
    description: String,
}

impl MessageBuffer {
    pub fn new(scheduler: &Rc<EventQueue>, max_slots: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            max_slots,
            consumer: None,
            scheduler: Rc::clone(scheduler),
            description: String::new(),
        }
    }

    /// Register the single consumer woken by arrivals.
    pub fn set_consumer(&mut self, consumer: ConsumerId) {
        assert!(
            self.consumer.is_none() || self.consumer == Some(consumer),
            "buffer {} already has a consumer",
            self.description
        );
        self.consumer = Some(consumer);
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }

    /// True when the head message has arrived.
    pub fn is_ready(&self, now: Cycle) -> bool {
        self.queue.front().map_or(false, |slot| slot.arrival <= now)
    }

    /// True when `n` more messages would fit.
    pub fn are_n_slots_available(&self, n: usize) -> bool {
        self.max_slots == 0 || self.queue.len() + n <= self.max_slots
    }

    /// Enqueue a fresh protocol message, visible after `latency` cycles.
    pub fn enqueue(&mut self, msg: MsgPtr, latency: Cycle) {
        let now = self.scheduler.now();
        let arrival = now + latency;
        self.insert(BufferSlot {
            msg,
            arrival,
            enqueued_at: now,
            injected_at: arrival,
            departed_at: arrival,
        });
    }

    /// Relay an in-flight message, keeping its injection bookkeeping.
    pub fn forward(&mut self, mut slot: BufferSlot, latency: Cycle) {
        let now = self.scheduler.now();
        slot.enqueued_at = now;
        slot.arrival = now + latency;
        self.insert(slot);
    }

    fn insert(&mut self, slot: BufferSlot) {
        assert!(
            self.are_n_slots_available(1),
            "buffer {} overflow ({} slots)",
            self.description,
            self.max_slots
        );
        log::trace!(
            "enqueue into {} arrival {} ({} queued)",
            self.description,
            slot.arrival,
            self.queue.len() + 1
        );
        if let Some(consumer) = self.consumer {
            self.scheduler.schedule_at(consumer, slot.arrival);
        }
        // Arrivals with differing latencies keep visibility order; equal
        // arrivals keep enqueue order.
        let at = self
            .queue
            .iter()
            .rposition(|queued| queued.arrival <= slot.arrival)
            .map_or(0, |i| i + 1);
        self.queue.insert(at, slot);
    }

    /// The head slot; the buffer must be non-empty.
    pub fn peek(&self) -> &BufferSlot {
        self.queue
            .front()
            .unwrap_or_else(|| panic!("peek on empty buffer {}", self.description))
    }

    /// Remove and return the head slot; the buffer must be non-empty.
    pub fn pop(&mut self) -> BufferSlot {
        self.queue
            .pop_front()
            .unwrap_or_else(|| panic!("pop on empty buffer {}", self.description))
    }

    /// Drop all pending messages. Already-scheduled wakeups are left to fire
    /// as no-ops.
    pub fn clear(&mut self) {
        self.queue.clear();
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageSizeType, NetDest, NetworkMessage};

    #[derive(Debug)]
    struct Probe {
        dest: NetDest,
    }

    impl NetworkMessage for Probe {
        fn destination(&self) -> &NetDest {
            &self.dest
        }
        fn message_size(&self) -> MessageSizeType {
            MessageSizeType::Control
        }
    }

    fn probe() -> MsgPtr {
        Rc::new(Probe {
            dest: NetDest::unicast(2, 1),
        })
    }

    #[test]
    fn head_is_ready_once_latency_elapses() {
        let queue = Rc::new(EventQueue::new());
        let consumer = queue.register_consumer();
        let mut buffer = MessageBuffer::new(&queue, 0);
        buffer.set_consumer(consumer);
        buffer.enqueue(probe(), 3);

        assert!(!buffer.is_ready(0));
        assert!(!buffer.is_ready(2));
        assert!(buffer.is_ready(3));
        // The consumer was scheduled at the arrival cycle.
        assert_eq!(queue.next_event(), Some((3, consumer)));
    }

    #[test]
    fn slot_accounting_is_monotone() {
        let queue = Rc::new(EventQueue::new());
        let mut buffer = MessageBuffer::new(&queue, 2);
        assert!(buffer.are_n_slots_available(2));
        buffer.enqueue(probe(), 1);
        assert!(buffer.are_n_slots_available(1));
        assert!(!buffer.are_n_slots_available(2));
        buffer.enqueue(probe(), 1);
        assert!(!buffer.are_n_slots_available(1));
        buffer.pop();
        assert!(buffer.are_n_slots_available(1));
    }

    #[test]
    fn clear_empties_without_rescheduling() {
        let queue = Rc::new(EventQueue::new());
        let consumer = queue.register_consumer();
        let mut buffer = MessageBuffer::new(&queue, 0);
        buffer.set_consumer(consumer);
        buffer.enqueue(probe(), 1);
        let pending = queue.pending_events();
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(queue.pending_events(), pending);
    }

    #[test]
    fn forward_preserves_injection_stamps() {
        let queue = Rc::new(EventQueue::new());
        let mut from = MessageBuffer::new(&queue, 0);
        let mut to = MessageBuffer::new(&queue, 0);
        from.enqueue(probe(), 0);
        let mut slot = from.pop();
        slot.departed_at = queue.now();
        to.forward(slot, 4);
        let relayed = to.peek();
        assert_eq!(relayed.injected_at, 0);
        assert_eq!(relayed.arrival, 4);
    }
}
