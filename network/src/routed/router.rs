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

//! Flit forwarding between links.
//!
//! The router keeps the contract small: flits move from an input link's VC
//! straight to the matching VC of the chosen output link, so a virtual
//! network pinned to one VC stays in order end to end. Any finer-grained
//! pipeline can be slotted in behind this interface.

use crate::eventq::{ConsumerId, EventQueue};
use crate::message::NetDest;
use crate::routed::link::{LinkId, NetworkLink};
use crate::{Cycle, SwitchId};

struct OutPort {
    link: LinkId,
    routing_table_entry: NetDest,
    weight: u32,
}

pub struct Router {
    id: SwitchId,
    consumer: ConsumerId,
    in_links: Vec<LinkId>,
    out_ports: Vec<OutPort>,
}

impl Router {
    pub fn new(id: SwitchId, consumer: ConsumerId) -> Self {
        Self {
            id,
            consumer,
            in_links: Vec::new(),
            out_ports: Vec::new(),
        }
    }

    pub fn consumer(&self) -> ConsumerId {
        self.consumer
    }

    pub fn add_in_port(&mut self, link: LinkId) {
        self.in_links.push(link);
    }

    pub fn add_out_port(&mut self, link: LinkId, routing_table_entry: NetDest, weight: u32) {
        self.out_ports.push(OutPort {
            link,
            routing_table_entry,
            weight,
        });
    }

    /// Minimal-weight output port per destination member; lowest port index
    /// wins ties. Ascending and duplicate-free.
    fn route(&self, destination: &NetDest) -> Vec<usize> {
        assert!(
            !destination.is_empty(),
            "router {}: message with no destination",
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
                    "router {}: no route for destination node {}",
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

    /// Forward every arrived flit whose output link has budget and buffer
    /// space; otherwise retry next cycle.
    pub fn wakeup(&mut self, links: &mut [NetworkLink], now: Cycle, scheduler: &EventQueue) {
        let mut stalled = false;
        for &in_link in &self.in_links {
            for vc in 0..links[in_link].num_vcs() {
                'vc: while links[in_link].is_ready(vc, now) {
                    let destination = links[in_link].peek(vc).msg.destination().clone();
                    let outputs = self.route(&destination);
                    for &port in &outputs {
                        let out = self.out_ports[port].link;
                        if !(links[out].can_accept(now) && links[out].has_capacity(vc)) {
                            stalled = true;
                            break 'vc;
                        }
                    }
                    let flit = links[in_link].pop(vc);
                    log::trace!(
                        "router {}: vc {} dest {} -> ports {:?} @cycle {}",
                        self.id,
                        vc,
                        destination,
                        outputs,
                        now
                    );
                    for &port in &outputs {
                        let out = self.out_ports[port].link;
                        links[out].push(flit.clone(), now, scheduler);
                    }
                }
            }
        }
        if stalled {
            scheduler.schedule(self.consumer, 1);
        }
    }
}
