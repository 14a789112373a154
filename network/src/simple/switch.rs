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

//! Routing core of the simple network.
//!
//! A switch drains its input ports (endpoint injection queues or
//! inter-switch link queues), picks the minimal-weight output port per
//! destination, and hands messages to the per-output-port throttle through a
//! zero-latency staging buffer. Routing itself costs no cycles; all latency
//! and bandwidth effects live in the throttles.

use std::cell::RefCell;
use std::rc::Rc;

use crate::buffer::MessageBuffer;
use crate::config::NetworkConfiguration;
use crate::error::Error;
use crate::eventq::{ConsumerId, EventQueue};
use crate::message::NetDest;
use crate::network::BufferRef;
use crate::simple::throttle::Throttle;
use crate::topology::BasicLink;
use crate::{Cycle, SwitchId};

struct InPort {
    /// One buffer per virtual network.
    buffers: Vec<BufferRef>,
    /// Input comes straight from a protocol endpoint.
    from_endpoint: bool,
}

struct OutPort {
    routing_table_entry: NetDest,
    weight: u32,
    /// Staging buffers feeding this port's throttle, one per vnet.
    buffers: Vec<BufferRef>,
}

pub struct Switch {
    id: SwitchId,
    consumer: ConsumerId,
    vnets: usize,
    in_ports: Vec<InPort>,
    out_ports: Vec<OutPort>,
    throttles: Vec<Throttle>,
    /// Rotating input priority so no input port starves.
    round_robin: usize,
    messages_injected: u64,
    queueing_latency_sum: u64,
}

impl Switch {
    pub fn new(id: SwitchId, consumer: ConsumerId, vnets: usize) -> Self {
        Self {
            id,
            consumer,
            vnets,
            in_ports: Vec::new(),
            out_ports: Vec::new(),
            throttles: Vec::new(),
            round_robin: 0,
            messages_injected: 0,
            queueing_latency_sum: 0,
        }
    }

    pub fn consumer(&self) -> ConsumerId {
        self.consumer
    }

    /// Wire a set of per-vnet buffers as an input port. The buffers'
    /// consumer becomes this switch.
    pub fn add_in_port(&mut self, buffers: Vec<BufferRef>, from_endpoint: bool) {
        assert_eq!(buffers.len(), self.vnets);
        for buffer in &buffers {
            buffer.borrow_mut().set_consumer(self.consumer);
        }
        self.in_ports.push(InPort {
            buffers,
            from_endpoint,
        });
    }

    /// Create an output port: staging buffers, a throttle metering the link,
    /// and the far side's buffers as the throttle's outputs.
    #[allow(clippy::too_many_arguments)]
    pub fn add_out_port(
        &mut self,
        scheduler: &Rc<EventQueue>,
        throttle_consumer: ConsumerId,
        out_buffers: Vec<BufferRef>,
        routing_table_entry: NetDest,
        link: &BasicLink,
        config: &NetworkConfiguration,
        delivers_to_endpoint: bool,
        peer: usize,
    ) -> Result<usize, Error> {
        assert_eq!(out_buffers.len(), self.vnets);
        let mut throttle = Throttle::new(
            self.id,
            peer,
            throttle_consumer,
            link.config.latency,
            link.config.bandwidth_multiplier,
            config,
            delivers_to_endpoint,
        )?;
        let mut staging = Vec::with_capacity(self.vnets);
        for (vnet, out_buffer) in out_buffers.into_iter().enumerate() {
            let mut buffer = MessageBuffer::new(scheduler, config.buffer_size);
            buffer.set_description(format!(
                "[switch {} port {} vnet {}]",
                self.id,
                self.out_ports.len(),
                vnet
            ));
            let buffer = Rc::new(RefCell::new(buffer));
            throttle.add_virtual_network(Rc::clone(&buffer), out_buffer);
            staging.push(buffer);
        }
        self.out_ports.push(OutPort {
            routing_table_entry,
            weight: link.config.weight,
            buffers: staging,
        });
        self.throttles.push(throttle);
        Ok(self.out_ports.len() - 1)
    }

    pub fn throttle_mut(&mut self, port: usize) -> &mut Throttle {
        &mut self.throttles[port]
    }

    pub fn throttles(&self) -> &[Throttle] {
        &self.throttles
    }

    pub fn messages_injected(&self) -> u64 {
        self.messages_injected
    }

    pub fn queueing_latency_sum(&self) -> u64 {
        self.queueing_latency_sum
    }

    /// Output ports serving a destination set: the minimal-weight port per
    /// member, lowest port index on ties. Ascending and duplicate-free.
    fn route(&self, destination: &NetDest) -> Vec<usize> {
        assert!(
            !destination.is_empty(),
            "switch {}: message with no destination",
            self.id
        );
        let mut chosen = vec![false; self.out_ports.len()];
        for node in destination.iter() {
            let best = self
                .out_ports
                .iter()
                .enumerate()
                .filter(|(_, port)| port.routing_table_entry.contains(node))
                .min_by_key(|(index, port)| (port.weight, *index));
            match best {
                Some((index, _)) => chosen[index] = true,
                None => panic!(
                    "switch {}: no route for destination node {}",
                    self.id, node
                ),
            }
        }
        chosen
            .iter()
            .enumerate()
            .filter_map(|(index, &picked)| picked.then_some(index))
            .collect()
    }

    /// Route every ready message that has somewhere to go.
    pub fn wakeup(&mut self, now: Cycle, scheduler: &EventQueue) {
        let ports = self.in_ports.len();
        if ports == 0 {
            return;
        }
        self.round_robin = (self.round_robin + 1) % ports;
        let mut stalled = false;

        for vnet in 0..self.vnets {
            for offset in 0..ports {
                let in_port = (self.round_robin + offset) % ports;
                loop {
                    if !self.in_ports[in_port].buffers[vnet].borrow().is_ready(now) {
                        break;
                    }
                    let destination = self.in_ports[in_port].buffers[vnet]
                        .borrow()
                        .peek()
                        .msg
                        .destination()
                        .clone();
                    let outputs = self.route(&destination);
                    let blocked = outputs.iter().any(|&port| {
                        !self.out_ports[port].buffers[vnet]
                            .borrow()
                            .are_n_slots_available(1)
                    });
                    if blocked {
                        // Head-of-line: leave this vnet's input alone and
                        // retry next cycle.
                        stalled = true;
                        break;
                    }

                    let mut slot = self.in_ports[in_port].buffers[vnet].borrow_mut().pop();
                    if self.in_ports[in_port].from_endpoint {
                        self.messages_injected += 1;
                        self.queueing_latency_sum += now - slot.injected_at;
                        slot.departed_at = now;
                    }
                    log::trace!(
                        "switch {}: vnet {} dest {} -> ports {:?} @cycle {}",
                        self.id,
                        vnet,
                        destination,
                        outputs,
                        now
                    );
                    for &port in &outputs {
                        self.out_ports[port].buffers[vnet]
                            .borrow_mut()
                            .forward(slot.clone(), 0);
                    }
                }
            }
        }

        if stalled {
            scheduler.schedule(self.consumer, 1);
        }
    }

    /// Drop in-flight messages in the staging buffers and throttles.
    pub fn reset(&mut self) {
        for port in &self.in_ports {
            for buffer in &port.buffers {
                buffer.borrow_mut().clear();
            }
        }
        for throttle in self.throttles.iter_mut() {
            throttle.clear();
        }
    }

    pub fn clear_stats(&mut self, now: Cycle) {
        self.messages_injected = 0;
        self.queueing_latency_sum = 0;
        for throttle in self.throttles.iter_mut() {
            throttle.clear_stats(now);
        }
    }
}
