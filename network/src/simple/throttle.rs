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

//! Per-link bandwidth metering.
//!
//! A throttle models one directed link. It owns a pair of (in, out) buffers
//! per virtual network and moves at most `link_bandwidth()` units per cycle
//! across all of them, where one byte of message costs
//! [`MESSAGE_SIZE_MULTIPLIER`] units. Virtual networks are drained
//! head-first, so per-VN FIFO order is preserved end to end; cross-VN order
//! is deliberately varied by the priority-inversion scheduler.

use std::fmt;

use crate::config::NetworkConfiguration;
use crate::error::Error;
use crate::eventq::{ConsumerId, EventQueue};
use crate::message::{MessageSizeType, MsgPtr};
use crate::network::BufferRef;
use crate::{Cycle, SwitchId, VNet};

/// Upper bound of the adaptive bandwidth counter.
pub const HIGH_RANGE: i32 = 256;
/// Cycles between samples of the adaptive bandwidth counter.
const ADJUST_INTERVAL: Cycle = 50000;
/// Bandwidth units per byte of message.
pub const MESSAGE_SIZE_MULTIPLIER: u64 = 1000;
/// Wakeups before the VN service order is inverted once.
const PRIORITY_SWITCH_LIMIT: u32 = 128;

pub struct Throttle {
    switch: SwitchId,
    /// Node or switch on the far side of the link.
    peer: usize,
    consumer: ConsumerId,
    link_latency: Cycle,
    link_bandwidth_multiplier: u64,
    endpoint_bandwidth: u64,
    broadcast_scaling: u64,
    /// The far side is a protocol endpoint, so deliveries count as received.
    delivers_to_endpoint: bool,

    in_queues: Vec<BufferRef>,
    out_queues: Vec<BufferRef>,
    units_remaining: Vec<u64>,
    /// Moved messages per (size class, vnet).
    message_counters: Vec<Vec<u64>>,

    wakeups_wo_switch: u32,

    adaptive_bash: bool,
    bash_threshold: f64,
    bash_counter: i32,
    bandwidth_since_sample: u64,
    last_bandwidth_sample: Cycle,

    /// Fractional cycles during which the link carried traffic.
    links_utilized: f64,
    stats_start: Cycle,
    messages_delivered: u64,
    network_latency_sum: u64,
}

impl Throttle {
    pub fn new(
        switch: SwitchId,
        peer: usize,
        consumer: ConsumerId,
        link_latency: Cycle,
        link_bandwidth_multiplier: u64,
        config: &NetworkConfiguration,
        delivers_to_endpoint: bool,
    ) -> Result<Self, Error> {
        if link_bandwidth_multiplier == 0 || config.endpoint_bandwidth == 0 {
            return Err(Error::InvalidBandwidth(
                link_bandwidth_multiplier * config.endpoint_bandwidth,
            ));
        }
        Ok(Self {
            switch,
            peer,
            consumer,
            link_latency,
            link_bandwidth_multiplier,
            endpoint_bandwidth: config.endpoint_bandwidth,
            broadcast_scaling: config.broadcast_scaling,
            delivers_to_endpoint,
            in_queues: Vec::new(),
            out_queues: Vec::new(),
            units_remaining: Vec::new(),
            message_counters: vec![Vec::new(); MessageSizeType::ALL.len()],
            wakeups_wo_switch: 0,
            adaptive_bash: config.adaptive_bash,
            bash_threshold: config.bandwidth_adaptive_threshold,
            bash_counter: HIGH_RANGE,
            bandwidth_since_sample: 0,
            last_bandwidth_sample: 0,
            links_utilized: 0.0,
            stats_start: 0,
            messages_delivered: 0,
            network_latency_sum: 0,
        })
    }

    /// Attach one virtual network's (in, out) buffer pair. The in buffer's
    /// consumer becomes this throttle.
    pub fn add_virtual_network(&mut self, in_ptr: BufferRef, out_ptr: BufferRef) {
        let vnet = self.in_queues.len();
        in_ptr.borrow_mut().set_consumer(self.consumer);
        in_ptr
            .borrow_mut()
            .set_description(format!("[queue to throttle {} {}]", self.switch, self.peer));
        self.in_queues.push(in_ptr);
        self.out_queues.push(out_ptr);
        self.units_remaining.push(0);
        for counters in self.message_counters.iter_mut() {
            counters.push(0);
        }
        debug_assert_eq!(self.in_queues.len(), vnet + 1);
    }

    pub fn vnets(&self) -> usize {
        self.in_queues.len()
    }

    pub fn consumer(&self) -> ConsumerId {
        self.consumer
    }

    /// Units the link can move per cycle.
    pub fn link_bandwidth(&self) -> u64 {
        self.link_bandwidth_multiplier * self.endpoint_bandwidth
    }

    /// Bandwidth units a message costs on the wire.
    fn message_units(&self, msg: &MsgPtr) -> u64 {
        let units = msg.message_size().size_in_bytes() * MESSAGE_SIZE_MULTIPLIER;
        // Artificially inflate broadcasts when scaling is configured.
        if self.broadcast_scaling > 1 && msg.destination().is_broadcast() {
            units * self.broadcast_scaling
        } else {
            units
        }
    }

    /// Move messages for one cycle within the bandwidth budget.
    pub fn wakeup(&mut self, now: Cycle, scheduler: &EventQueue) {
        let bandwidth = self.link_bandwidth();
        assert!(bandwidth > 0);
        let mut bw_remaining = bandwidth as i64;

        // Give the highest numbered vnet priority most of the time, and
        // invert the order once the switch limit is hit so low vnets are
        // not starved.
        self.wakeups_wo_switch += 1;
        let inverted = self.wakeups_wo_switch > PRIORITY_SWITCH_LIMIT;
        if inverted {
            self.wakeups_wo_switch = 0;
        }
        let order: Vec<VNet> = if inverted {
            (0..self.vnets()).collect()
        } else {
            (0..self.vnets()).rev().collect()
        };

        let mut schedule_wakeup = false;
        for vnet in order {
            loop {
                let in_ready = self.in_queues[vnet].borrow().is_ready(now);
                let out_has_slot = self.out_queues[vnet].borrow().are_n_slots_available(1);
                if !(bw_remaining > 0
                    && (in_ready || self.units_remaining[vnet] > 0)
                    && out_has_slot)
                {
                    break;
                }

                // Done with the previous message on this vnet; start the
                // next one and move it across the link.
                if self.units_remaining[vnet] == 0 && in_ready {
                    let slot = self.in_queues[vnet].borrow_mut().pop();
                    self.units_remaining[vnet] += self.message_units(&slot.msg);
                    self.message_counters[slot.msg.message_size().index()][vnet] += 1;
                    log::trace!(
                        "throttle {}->{}: bw {} spent {} units on vnet {} @cycle {}",
                        self.switch,
                        self.peer,
                        bandwidth,
                        self.units_remaining[vnet],
                        vnet,
                        now
                    );
                    if self.delivers_to_endpoint {
                        self.messages_delivered += 1;
                        self.network_latency_sum += now + self.link_latency - slot.departed_at;
                    }
                    self.out_queues[vnet]
                        .borrow_mut()
                        .forward(slot, self.link_latency);
                }

                // Pay for this message out of the cycle's budget.
                let diff = self.units_remaining[vnet] as i64 - bw_remaining;
                self.units_remaining[vnet] = diff.max(0) as u64;
                bw_remaining = (-diff).max(0);
            }

            let in_ready = self.in_queues[vnet].borrow().is_ready(now);
            let out_has_slot = self.out_queues[vnet].borrow().are_n_slots_available(1);
            if bw_remaining > 0
                && (in_ready || self.units_remaining[vnet] > 0)
                && !out_has_slot
            {
                // Waiting for the output queue to free a slot.
                schedule_wakeup = true;
            }
        }

        // Record how much of the link this cycle used: 0 = idle, 1 = fully
        // occupied.
        let ratio = 1.0 - bw_remaining as f64 / bandwidth as f64;
        self.links_utilized += ratio;

        let bw_used = bandwidth - bw_remaining as u64;
        self.bandwidth_since_sample += bw_used;

        if self.adaptive_bash {
            // Sample utilization over fixed windows and steer the counter.
            while now - self.last_bandwidth_sample > ADJUST_INTERVAL {
                let utilization = self.bandwidth_since_sample as f64
                    / (ADJUST_INTERVAL as f64 * bandwidth as f64);
                if utilization > self.bash_threshold {
                    self.bash_counter += 1;
                } else {
                    self.bash_counter -= 1;
                }
                self.bash_counter = self.bash_counter.clamp(0, HIGH_RANGE);
                self.last_bandwidth_sample += ADJUST_INTERVAL;
                self.bandwidth_since_sample = 0;
            }
        }

        if bw_remaining > 0 && !schedule_wakeup {
            // Bandwidth to spare and the output had room: nothing more to do
            // until another message arrives.
            log::trace!("{} not scheduled again", self);
        } else {
            // Out of bandwidth for this cycle; continue next cycle.
            log::trace!("{} scheduled again", self);
            scheduler.schedule(self.consumer, 1);
        }
    }

    /// Whether a broadcast should be admitted given a caller-supplied random
    /// draw. Admission probability falls as observed utilization rises.
    pub fn broadcast_bandwidth_available(&self, rand: u64) -> bool {
        let cutoff = HIGH_RANGE / 4 + (rand % (HIGH_RANGE as u64 / 2)) as i32;
        !(self.bash_counter > cutoff)
    }

    pub fn bash_counter(&self) -> i32 {
        self.bash_counter
    }

    /// Percentage of cycles the link was busy since the last stats clear.
    pub fn utilization(&self, now: Cycle) -> f64 {
        100.0 * self.links_utilized / (now - self.stats_start) as f64
    }

    /// Busy fraction in [0, 1] since the last stats clear.
    pub fn utilization_fraction(&self, now: Cycle) -> f64 {
        self.links_utilized / (now - self.stats_start) as f64
    }

    pub fn messages_moved(&self, size: MessageSizeType, vnet: VNet) -> u64 {
        self.message_counters[size.index()][vnet]
    }

    /// Messages moved on a vnet across all size classes.
    pub fn vnet_messages_moved(&self, vnet: VNet) -> u64 {
        self.message_counters.iter().map(|row| row[vnet]).sum()
    }

    pub fn messages_delivered(&self) -> u64 {
        self.messages_delivered
    }

    pub fn network_latency_sum(&self) -> u64 {
        self.network_latency_sum
    }

    /// Drop in-flight state on every vnet.
    pub fn clear(&mut self) {
        for vnet in 0..self.vnets() {
            self.in_queues[vnet].borrow_mut().clear();
            self.out_queues[vnet].borrow_mut().clear();
            self.units_remaining[vnet] = 0;
        }
    }

    pub fn clear_stats(&mut self, now: Cycle) {
        self.stats_start = now;
        self.links_utilized = 0.0;
        self.messages_delivered = 0;
        self.network_latency_sum = 0;
        for counters in self.message_counters.iter_mut() {
            for count in counters.iter_mut() {
                *count = 0;
            }
        }
    }

    pub fn print_stats(&self, out: &mut dyn std::io::Write, now: Cycle) -> std::io::Result<()> {
        writeln!(out, "utilized_percent: {}", self.utilization(now))
    }
}

impl fmt::Display for Throttle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "[throttle: {} {} bw: {}]",
            self.switch,
            self.peer,
            self.link_bandwidth()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::MessageBuffer;
    use crate::message::{NetDest, NetworkMessage};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug)]
    struct Probe {
        dest: NetDest,
        size: MessageSizeType,
    }

    impl NetworkMessage for Probe {
        fn destination(&self) -> &NetDest {
            &self.dest
        }
        fn message_size(&self) -> MessageSizeType {
            self.size
        }
    }

    fn throttle_pair(
        config: &NetworkConfiguration,
    ) -> (Rc<EventQueue>, Throttle, BufferRef, BufferRef) {
        let scheduler = Rc::new(EventQueue::new());
        let consumer = scheduler.register_consumer();
        let mut throttle = Throttle::new(0, 1, consumer, 1, 1, config, true).unwrap();
        let in_q = Rc::new(RefCell::new(MessageBuffer::new(&scheduler, 0)));
        let out_q = Rc::new(RefCell::new(MessageBuffer::new(&scheduler, 0)));
        throttle.add_virtual_network(Rc::clone(&in_q), Rc::clone(&out_q));
        (scheduler, throttle, in_q, out_q)
    }

    #[test]
    fn zero_bandwidth_is_rejected() {
        let scheduler = Rc::new(EventQueue::new());
        let consumer = scheduler.register_consumer();
        let config = NetworkConfiguration::default();
        assert_eq!(
            Throttle::new(0, 1, consumer, 1, 0, &config, false).err(),
            Some(Error::InvalidBandwidth(0))
        );
    }

    #[test]
    fn broadcast_size_scales_only_when_configured() {
        let mut config = NetworkConfiguration::default();
        let (_, throttle, _, _) = throttle_pair(&config);
        let unicast: MsgPtr = Rc::new(Probe {
            dest: NetDest::unicast(2, 1),
            size: MessageSizeType::Control,
        });
        let broadcast: MsgPtr = Rc::new(Probe {
            dest: NetDest::broadcast(2),
            size: MessageSizeType::Control,
        });
        assert_eq!(throttle.message_units(&unicast), 8 * MESSAGE_SIZE_MULTIPLIER);
        assert_eq!(
            throttle.message_units(&broadcast),
            8 * MESSAGE_SIZE_MULTIPLIER
        );

        config.broadcast_scaling = 4;
        let (_, throttle, _, _) = throttle_pair(&config);
        assert_eq!(
            throttle.message_units(&broadcast),
            4 * 8 * MESSAGE_SIZE_MULTIPLIER
        );
        assert_eq!(throttle.message_units(&unicast), 8 * MESSAGE_SIZE_MULTIPLIER);
    }

    #[test]
    fn broadcast_admission_tracks_counter_extremes() {
        let config = NetworkConfiguration::default();
        let (scheduler, mut throttle, in_q, _out_q) = throttle_pair(&config);

        // The counter starts saturated, so every draw is rejected.
        assert_eq!(throttle.bash_counter(), HIGH_RANGE);
        for rand in 0..512 {
            assert!(!throttle.broadcast_bandwidth_available(rand));
        }

        // One wakeup after a long idle stretch catches up on every sample
        // window and walks the counter down to zero.
        let idle = ADJUST_INTERVAL * (HIGH_RANGE as u64 + 2);
        in_q.borrow_mut().enqueue(
            Rc::new(Probe {
                dest: NetDest::unicast(2, 1),
                size: MessageSizeType::Control,
            }),
            idle,
        );
        scheduler.advance_to(idle);
        throttle.wakeup(idle, &scheduler);
        assert_eq!(throttle.bash_counter(), 0);
        for rand in 0..512 {
            assert!(throttle.broadcast_bandwidth_available(rand));
        }
    }
}
