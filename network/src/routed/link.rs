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

//! A unidirectional wire with per-virtual-channel flit buffers.

use std::collections::VecDeque;

use crate::eventq::{ConsumerId, EventQueue};
use crate::message::MsgPtr;
use crate::topology::BasicLink;
use crate::{Cycle, VNet};

/// Index of a link in the network's link arena.
pub type LinkId = usize;

/// Atomic transport unit on a link. One message packetizes into one flit.
#[derive(Clone, Debug)]
pub struct Flit {
    pub msg: MsgPtr,
    pub vnet: VNet,
    pub vc: usize,
    /// Cycle the flit finishes traversing the wire.
    pub ready_at: Cycle,
    /// Cycle the message entered its source protocol queue.
    pub injected_at: Cycle,
    /// Cycle the message left its source protocol queue.
    pub departed_at: Cycle,
}

pub struct NetworkLink {
    id: LinkId,
    latency: Cycle,
    /// Flits the wire accepts per cycle.
    flits_per_cycle: u64,
    /// Consumer on the receiving end (router or network interface).
    dest: ConsumerId,
    vc_buffers: Vec<VecDeque<Flit>>,
    /// Per-VC buffer capacity in flits; 0 = unbounded.
    vc_capacity: usize,
    link_utilization: u64,
    vc_load: Vec<u64>,
    stats_start: Cycle,
    last_push_cycle: Cycle,
    pushed_this_cycle: u64,
}

impl NetworkLink {
    pub fn new(
        id: LinkId,
        link: &BasicLink,
        num_vcs: usize,
        vc_capacity: usize,
        dest: ConsumerId,
    ) -> Self {
        assert!(link.config.bandwidth_multiplier > 0);
        Self {
            id,
            latency: link.config.latency,
            flits_per_cycle: link.config.bandwidth_multiplier,
            dest,
            vc_buffers: (0..num_vcs).map(|_| VecDeque::new()).collect(),
            vc_capacity,
            link_utilization: 0,
            vc_load: vec![0; num_vcs],
            stats_start: 0,
            last_push_cycle: 0,
            pushed_this_cycle: 0,
        }
    }

    pub fn id(&self) -> LinkId {
        self.id
    }

    pub fn num_vcs(&self) -> usize {
        self.vc_buffers.len()
    }

    /// The wire still has flit slots left this cycle.
    pub fn can_accept(&self, now: Cycle) -> bool {
        now != self.last_push_cycle || self.pushed_this_cycle < self.flits_per_cycle
    }

    /// The virtual channel's buffer has room for another flit.
    pub fn has_capacity(&self, vc: usize) -> bool {
        self.vc_capacity == 0 || self.vc_buffers[vc].len() < self.vc_capacity
    }

    /// Put a flit on the wire and wake the receiving side at arrival.
    pub fn push(&mut self, mut flit: Flit, now: Cycle, scheduler: &EventQueue) {
        assert!(self.can_accept(now), "link {} over budget @cycle {}", self.id, now);
        assert!(self.has_capacity(flit.vc));
        if now != self.last_push_cycle {
            self.last_push_cycle = now;
            self.pushed_this_cycle = 0;
        }
        self.pushed_this_cycle += 1;
        self.link_utilization += 1;
        self.vc_load[flit.vc] += 1;
        flit.ready_at = now + self.latency;
        log::trace!(
            "link {}: vc {} flit arrives @cycle {}",
            self.id,
            flit.vc,
            flit.ready_at
        );
        scheduler.schedule_at(self.dest, flit.ready_at);
        self.vc_buffers[flit.vc].push_back(flit);
    }

    pub fn is_ready(&self, vc: usize, now: Cycle) -> bool {
        self.vc_buffers[vc]
            .front()
            .map_or(false, |flit| flit.ready_at <= now)
    }

    pub fn peek(&self, vc: usize) -> &Flit {
        self.vc_buffers[vc]
            .front()
            .unwrap_or_else(|| panic!("peek on empty vc {} of link {}", vc, self.id))
    }

    pub fn pop(&mut self, vc: usize) -> Flit {
        self.vc_buffers[vc]
            .pop_front()
            .unwrap_or_else(|| panic!("pop on empty vc {} of link {}", vc, self.id))
    }

    /// Flits per cycle carried since the last stats clear.
    pub fn utilization(&self, now: Cycle) -> f64 {
        self.link_utilization as f64 / (now - self.stats_start) as f64
    }

    pub fn vc_load(&self) -> &[u64] {
        &self.vc_load
    }

    pub fn reset(&mut self) {
        for buffer in self.vc_buffers.iter_mut() {
            buffer.clear();
        }
    }

    pub fn clear_stats(&mut self, now: Cycle) {
        self.stats_start = now;
        self.link_utilization = 0;
        for load in self.vc_load.iter_mut() {
            *load = 0;
        }
    }
}
