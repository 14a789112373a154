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

//! Adapter between one protocol endpoint and the routed network.
//!
//! On the way in, ready protocol messages are packetized (one flit per
//! message) and placed on the outgoing link; ordered virtual networks always
//! use the first VC of their class so their FIFO order survives, unordered
//! ones round-robin across the class. On the way out, arrived flits are
//! unpacked into the endpoint's delivery queues and the latency statistics
//! are settled.

use crate::buffer::BufferSlot;
use crate::eventq::{ConsumerId, EventQueue};
use crate::network::BufferRef;
use crate::routed::link::{Flit, LinkId, NetworkLink};
use crate::{Cycle, NodeId, VNet};

pub struct NetworkInterface {
    node: NodeId,
    consumer: ConsumerId,
    vnets: usize,
    vcs_per_class: usize,
    out_link: Option<LinkId>,
    in_link: Option<LinkId>,
    to_net: Vec<BufferRef>,
    from_net: Vec<BufferRef>,
    /// Next VC offset per vnet for unordered traffic.
    vc_round_robin: Vec<usize>,
    flits_injected: u64,
    flits_received: u64,
    queueing_latency_sum: u64,
    network_latency_sum: u64,
}

impl NetworkInterface {
    pub fn new(node: NodeId, consumer: ConsumerId, vnets: usize, vcs_per_class: usize) -> Self {
        Self {
            node,
            consumer,
            vnets,
            vcs_per_class,
            out_link: None,
            in_link: None,
            to_net: Vec::new(),
            from_net: Vec::new(),
            vc_round_robin: vec![0; vnets],
            flits_injected: 0,
            flits_received: 0,
            queueing_latency_sum: 0,
            network_latency_sum: 0,
        }
    }

    pub fn consumer(&self) -> ConsumerId {
        self.consumer
    }

    /// Bind the endpoint's protocol queues. The injection side's consumer
    /// becomes this interface.
    pub fn add_node(&mut self, to_net: Vec<BufferRef>, from_net: Vec<BufferRef>) {
        assert_eq!(to_net.len(), self.vnets);
        assert_eq!(from_net.len(), self.vnets);
        for buffer in &to_net {
            buffer.borrow_mut().set_consumer(self.consumer);
        }
        self.to_net = to_net;
        self.from_net = from_net;
    }

    pub fn add_out_port(&mut self, link: LinkId) {
        assert!(self.out_link.is_none(), "interface {} already wired", self.node);
        self.out_link = Some(link);
    }

    pub fn add_in_port(&mut self, link: LinkId) {
        assert!(self.in_link.is_none(), "interface {} already wired", self.node);
        self.in_link = Some(link);
    }

    pub fn flits_injected(&self) -> u64 {
        self.flits_injected
    }

    pub fn flits_received(&self) -> u64 {
        self.flits_received
    }

    pub fn queueing_latency_sum(&self) -> u64 {
        self.queueing_latency_sum
    }

    pub fn network_latency_sum(&self) -> u64 {
        self.network_latency_sum
    }

    pub fn wakeup(
        &mut self,
        links: &mut [NetworkLink],
        ordered: &[bool],
        now: Cycle,
        scheduler: &EventQueue,
    ) {
        self.eject(links, now);
        self.inject(links, ordered, now, scheduler);
    }

    fn eject(&mut self, links: &mut [NetworkLink], now: Cycle) {
        let Some(in_link) = self.in_link else {
            return;
        };
        for vc in 0..links[in_link].num_vcs() {
            while links[in_link].is_ready(vc, now) {
                let flit = links[in_link].pop(vc);
                self.flits_received += 1;
                self.network_latency_sum += now - flit.departed_at;
                self.queueing_latency_sum += flit.departed_at - flit.injected_at;
                log::trace!(
                    "interface {}: delivered vnet {} flit @cycle {}",
                    self.node,
                    flit.vnet,
                    now
                );
                self.from_net[flit.vnet].borrow_mut().forward(
                    BufferSlot {
                        msg: flit.msg,
                        arrival: now,
                        enqueued_at: now,
                        injected_at: flit.injected_at,
                        departed_at: flit.departed_at,
                    },
                    0,
                );
            }
        }
    }

    fn inject(
        &mut self,
        links: &mut [NetworkLink],
        ordered: &[bool],
        now: Cycle,
        scheduler: &EventQueue,
    ) {
        let Some(out_link) = self.out_link else {
            return;
        };
        let mut stalled = false;
        for vnet in 0..self.vnets {
            while self.to_net[vnet].borrow().is_ready(now) {
                let vc = self.select_vc(vnet, ordered[vnet]);
                if !(links[out_link].can_accept(now) && links[out_link].has_capacity(vc)) {
                    stalled = true;
                    break;
                }
                let slot = self.to_net[vnet].borrow_mut().pop();
                self.flits_injected += 1;
                let flit = Flit {
                    msg: slot.msg,
                    vnet,
                    vc,
                    ready_at: now,
                    injected_at: slot.injected_at,
                    departed_at: now,
                };
                links[out_link].push(flit, now, scheduler);
                if !ordered[vnet] {
                    self.vc_round_robin[vnet] =
                        (self.vc_round_robin[vnet] + 1) % self.vcs_per_class;
                }
            }
        }
        if stalled {
            scheduler.schedule(self.consumer, 1);
        }
    }

    fn select_vc(&self, vnet: VNet, ordered: bool) -> usize {
        let base = vnet * self.vcs_per_class;
        if ordered {
            base
        } else {
            base + self.vc_round_robin[vnet]
        }
    }

    pub fn clear_stats(&mut self) {
        self.flits_injected = 0;
        self.flits_received = 0;
        self.queueing_latency_sum = 0;
        self.network_latency_sum = 0;
    }
}
