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

//! Common interface for network realizations.

use std::cell::RefCell;
use std::io;
use std::rc::Rc;

use crate::buffer::MessageBuffer;
use crate::error::Error;
use crate::eventq::{ConsumerId, EventQueue};
use crate::message::NetDest;
use crate::topology::{BasicLink, LinkDirection};
use crate::{Cycle, NodeId, SwitchId, VNet};

/// Shared handle to a message buffer. The protocol holds one end, the
/// network the other.
pub type BufferRef = Rc<RefCell<MessageBuffer>>;

/// Protocol-facing surface of a network realization.
pub trait Network {
    /// Wire an endpoint's injection side into a switch.
    fn make_in_link(
        &mut self,
        src: NodeId,
        dest: SwitchId,
        link: &BasicLink,
        direction: LinkDirection,
        routing_table_entry: NetDest,
        reconfigure: bool,
    ) -> Result<(), Error>;

    /// Wire a switch's delivery side into an endpoint.
    fn make_out_link(
        &mut self,
        src: SwitchId,
        dest: NodeId,
        link: &BasicLink,
        direction: LinkDirection,
        routing_table_entry: NetDest,
        reconfigure: bool,
    ) -> Result<(), Error>;

    /// Wire two switches together.
    fn make_internal_link(
        &mut self,
        src: SwitchId,
        dest: SwitchId,
        link: &BasicLink,
        direction: LinkDirection,
        routing_table_entry: NetDest,
        reconfigure: bool,
    ) -> Result<(), Error>;

    fn get_to_net_queue(
        &mut self,
        node: NodeId,
        ordered: bool,
        vnet: VNet,
    ) -> Result<BufferRef, Error>;

    fn get_from_net_queue(
        &mut self,
        node: NodeId,
        ordered: bool,
        vnet: VNet,
    ) -> Result<BufferRef, Error>;

    /// Run one consumer's wakeup at the given cycle.
    fn dispatch(&mut self, consumer: ConsumerId, now: Cycle);

    /// Drop all in-flight messages; structure and statistics survive.
    fn reset(&mut self);

    fn clear_stats(&mut self);

    fn print_stats(&self, out: &mut dyn io::Write) -> io::Result<()>;

    fn print_config(&self, out: &mut dyn io::Write) -> io::Result<()>;
}

/// Dispatch every event up to and including `deadline`, then settle the
/// clock there.
pub fn run_until<N: Network + ?Sized>(queue: &EventQueue, net: &mut N, deadline: Cycle) {
    while let Some((now, consumer)) = queue.next_event_before(deadline) {
        net.dispatch(consumer, now);
    }
    queue.advance_to(deadline);
}

/// The per-node, per-VN buffers at the protocol boundary, plus the VN
/// allocation bitmaps shared by every network realization.
pub struct EndpointQueues {
    to_net: Vec<Vec<BufferRef>>,
    from_net: Vec<Vec<BufferRef>>,
    in_use: Vec<bool>,
    ordered: Vec<bool>,
}

impl EndpointQueues {
    pub fn new(scheduler: &Rc<EventQueue>, nodes: usize, vnets: usize) -> Self {
        let make = |direction: &str| {
            (0..nodes)
                .map(|node| {
                    (0..vnets)
                        .map(|vnet| {
                            let mut buffer = MessageBuffer::new(scheduler, 0);
                            buffer
                                .set_description(format!("[{} node {} vnet {}]", direction, node, vnet));
                            Rc::new(RefCell::new(buffer))
                        })
                        .collect::<Vec<_>>()
                })
                .collect::<Vec<_>>()
        };
        Self {
            to_net: make("to_net"),
            from_net: make("from_net"),
            in_use: vec![false; vnets],
            ordered: vec![false; vnets],
        }
    }

    pub fn nodes(&self) -> usize {
        self.to_net.len()
    }

    pub fn vnets(&self) -> usize {
        self.in_use.len()
    }

    /// Record a VN claim. Ordering, once claimed, is permanent.
    pub fn check_network_allocation(
        &mut self,
        node: NodeId,
        ordered: bool,
        vnet: VNet,
    ) -> Result<(), Error> {
        if node >= self.nodes() {
            return Err(Error::InvalidNode(node));
        }
        if vnet >= self.vnets() {
            return Err(Error::InvalidVirtualNetwork(vnet));
        }
        if ordered {
            self.ordered[vnet] = true;
        }
        self.in_use[vnet] = true;
        Ok(())
    }

    pub fn to_net_queue(
        &mut self,
        node: NodeId,
        ordered: bool,
        vnet: VNet,
    ) -> Result<BufferRef, Error> {
        self.check_network_allocation(node, ordered, vnet)?;
        Ok(Rc::clone(&self.to_net[node][vnet]))
    }

    pub fn from_net_queue(
        &mut self,
        node: NodeId,
        ordered: bool,
        vnet: VNet,
    ) -> Result<BufferRef, Error> {
        self.check_network_allocation(node, ordered, vnet)?;
        Ok(Rc::clone(&self.from_net[node][vnet]))
    }

    pub fn to_net(&self, node: NodeId) -> &[BufferRef] {
        &self.to_net[node]
    }

    pub fn from_net(&self, node: NodeId) -> &[BufferRef] {
        &self.from_net[node]
    }

    pub fn in_use(&self, vnet: VNet) -> bool {
        self.in_use[vnet]
    }

    pub fn ordered(&self, vnet: VNet) -> bool {
        self.ordered[vnet]
    }

    /// Empty every protocol-boundary buffer.
    pub fn reset(&self) {
        for node in self.to_net.iter().chain(self.from_net.iter()) {
            for buffer in node {
                buffer.borrow_mut().clear();
            }
        }
    }

    /// The `virtual_net_i: ...` lines of the configuration dump.
    pub fn print_virtual_networks(&self, out: &mut dyn io::Write) -> io::Result<()> {
        for vnet in 0..self.vnets() {
            write!(out, "virtual_net_{}: ", vnet)?;
            if self.in_use[vnet] {
                if self.ordered[vnet] {
                    writeln!(out, "active, ordered")?;
                } else {
                    writeln!(out, "active, unordered")?;
                }
            } else {
                writeln!(out, "inactive")?;
            }
        }
        Ok(())
    }
}

/// The canonical stats block shared by both network realizations.
///
/// `vc_loads` holds `(vc index, flits per cycle)` for VCs whose VN is in
/// use. Latency averages divide by received flits; with nothing received
/// they print the float sentinel rather than faulting.
pub(crate) fn write_stats_block(
    out: &mut dyn io::Write,
    average_link_utilization: f64,
    vc_loads: &[(usize, f64)],
    flits_injected: u64,
    flits_received: u64,
    network_latency: u64,
    queueing_latency: u64,
) -> io::Result<()> {
    writeln!(out)?;
    writeln!(out, "Network Stats")?;
    writeln!(out, "-------------")?;
    writeln!(
        out,
        "Average Link Utilization :: {} flits/cycle",
        average_link_utilization
    )?;
    for (vc, load) in vc_loads {
        writeln!(out, "Average VC Load [{}] = {} flits/cycle", vc, load)?;
    }
    writeln!(out, "Total flits injected = {}", flits_injected)?;
    writeln!(out, "Total flits received = {}", flits_received)?;
    let received = flits_received as f64;
    writeln!(
        out,
        "Average network latency = {}",
        network_latency as f64 / received
    )?;
    writeln!(
        out,
        "Average queueing (at source NI) latency = {}",
        queueing_latency as f64 / received
    )?;
    writeln!(
        out,
        "Average latency = {}",
        (network_latency + queueing_latency) as f64 / received
    )?;
    Ok(())
}
