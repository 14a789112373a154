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

//! The routed network: flit-switched routers, links with virtual channels,
//! and per-endpoint network interfaces.

mod interface;
mod link;
mod router;

pub use interface::NetworkInterface;
pub use link::{Flit, LinkId, NetworkLink};
pub use router::Router;

use std::collections::HashMap;
use std::io;
use std::rc::Rc;

use crate::config::NetworkConfiguration;
use crate::error::Error;
use crate::eventq::{ConsumerId, EventQueue};
use crate::message::NetDest;
use crate::network::{write_stats_block, BufferRef, EndpointQueues, Network};
use crate::topology::{BasicLink, LinkDirection, Topology};
use crate::{Cycle, NodeId, SwitchId, VNet};

enum Target {
    Router(usize),
    Interface(usize),
}

/// Network realization where messages travel as flits over virtual channels.
pub struct RoutedNetwork {
    config: NetworkConfiguration,
    scheduler: Rc<EventQueue>,
    queues: EndpointQueues,
    routers: Vec<Router>,
    interfaces: Vec<NetworkInterface>,
    links: Vec<NetworkLink>,
    consumers: HashMap<ConsumerId, Target>,
    stats_start: Cycle,
}

impl RoutedNetwork {
    pub fn new(
        config: &NetworkConfiguration,
        topology: &Topology,
        scheduler: &Rc<EventQueue>,
    ) -> Result<Self, Error> {
        assert_eq!(
            config.nodes,
            topology.nodes(),
            "configuration and topology disagree on the endpoint count"
        );
        let queues = EndpointQueues::new(scheduler, config.nodes, config.virtual_networks);
        let mut consumers = HashMap::new();
        let routers = (0..topology.switches())
            .map(|id| {
                let consumer = scheduler.register_consumer();
                consumers.insert(consumer, Target::Router(id));
                Router::new(id, consumer)
            })
            .collect();
        let interfaces = (0..config.nodes)
            .map(|node| {
                let consumer = scheduler.register_consumer();
                consumers.insert(consumer, Target::Interface(node));
                let mut ni = NetworkInterface::new(
                    node,
                    consumer,
                    config.virtual_networks,
                    config.vcs_per_class,
                );
                ni.add_node(
                    queues.to_net(node).to_vec(),
                    queues.from_net(node).to_vec(),
                );
                ni
            })
            .collect();
        let mut net = Self {
            config: config.clone(),
            scheduler: Rc::clone(scheduler),
            queues,
            routers,
            interfaces,
            links: Vec::new(),
            consumers,
            stats_start: 0,
        };
        topology.create_links(&mut net)?;
        Ok(net)
    }

    fn num_vcs(&self) -> usize {
        self.config.virtual_networks * self.config.vcs_per_class
    }

    fn check_switch(&self, switch: SwitchId) -> Result<(), Error> {
        if switch >= self.routers.len() {
            return Err(Error::InvalidSwitch(switch));
        }
        Ok(())
    }

    fn check_node(&self, node: NodeId) -> Result<(), Error> {
        if node >= self.config.nodes {
            return Err(Error::InvalidNode(node));
        }
        Ok(())
    }

    /// Append a wire to the link arena, waking `dest` on arrivals.
    fn add_link(&mut self, link: &BasicLink, dest: ConsumerId) -> Result<LinkId, Error> {
        if link.config.bandwidth_multiplier == 0 {
            return Err(Error::InvalidBandwidth(0));
        }
        let id = self.links.len();
        self.links.push(NetworkLink::new(
            id,
            link,
            self.num_vcs(),
            self.config.vc_buffer_capacity,
            dest,
        ));
        Ok(id)
    }
}

impl Network for RoutedNetwork {
    fn make_in_link(
        &mut self,
        src: NodeId,
        dest: SwitchId,
        link: &BasicLink,
        _direction: LinkDirection,
        _routing_table_entry: NetDest,
        reconfigure: bool,
    ) -> Result<(), Error> {
        if reconfigure {
            return Err(Error::ReconfigurationUnsupported);
        }
        self.check_node(src)?;
        self.check_switch(dest)?;
        let id = self.add_link(link, self.routers[dest].consumer())?;
        self.routers[dest].add_in_port(id);
        self.interfaces[src].add_out_port(id);
        Ok(())
    }

    fn make_out_link(
        &mut self,
        src: SwitchId,
        dest: NodeId,
        link: &BasicLink,
        _direction: LinkDirection,
        routing_table_entry: NetDest,
        reconfigure: bool,
    ) -> Result<(), Error> {
        if reconfigure {
            return Err(Error::ReconfigurationUnsupported);
        }
        self.check_switch(src)?;
        self.check_node(dest)?;
        let id = self.add_link(link, self.interfaces[dest].consumer())?;
        self.routers[src].add_out_port(id, routing_table_entry, link.config.weight);
        self.interfaces[dest].add_in_port(id);
        Ok(())
    }

    fn make_internal_link(
        &mut self,
        src: SwitchId,
        dest: SwitchId,
        link: &BasicLink,
        _direction: LinkDirection,
        routing_table_entry: NetDest,
        reconfigure: bool,
    ) -> Result<(), Error> {
        if reconfigure {
            return Err(Error::ReconfigurationUnsupported);
        }
        self.check_switch(src)?;
        self.check_switch(dest)?;
        let id = self.add_link(link, self.routers[dest].consumer())?;
        self.routers[dest].add_in_port(id);
        self.routers[src].add_out_port(id, routing_table_entry, link.config.weight);
        Ok(())
    }

    fn get_to_net_queue(
        &mut self,
        node: NodeId,
        ordered: bool,
        vnet: VNet,
    ) -> Result<BufferRef, Error> {
        self.queues.to_net_queue(node, ordered, vnet)
    }

    fn get_from_net_queue(
        &mut self,
        node: NodeId,
        ordered: bool,
        vnet: VNet,
    ) -> Result<BufferRef, Error> {
        self.queues.from_net_queue(node, ordered, vnet)
    }

    fn dispatch(&mut self, consumer: ConsumerId, now: Cycle) {
        let scheduler = Rc::clone(&self.scheduler);
        match self.consumers.get(&consumer) {
            Some(&Target::Router(id)) => {
                self.routers[id].wakeup(&mut self.links, now, &scheduler)
            }
            Some(&Target::Interface(node)) => {
                let ordered: Vec<bool> = (0..self.config.virtual_networks)
                    .map(|vnet| self.queues.ordered(vnet))
                    .collect();
                self.interfaces[node].wakeup(&mut self.links, &ordered, now, &scheduler)
            }
            None => panic!("wakeup for unknown {}", consumer),
        }
    }

    fn reset(&mut self) {
        self.queues.reset();
        for link in self.links.iter_mut() {
            link.reset();
        }
    }

    fn clear_stats(&mut self) {
        let now = self.scheduler.now();
        self.stats_start = now;
        for link in self.links.iter_mut() {
            link.clear_stats(now);
        }
        for interface in self.interfaces.iter_mut() {
            interface.clear_stats();
        }
    }

    fn print_stats(&self, out: &mut dyn io::Write) -> io::Result<()> {
        let now = self.scheduler.now();
        let num_vcs = self.num_vcs();

        let average_link_utilization = self
            .links
            .iter()
            .map(|link| link.utilization(now))
            .sum::<f64>()
            / self.links.len() as f64;

        let mut vc_load_totals = vec![0u64; num_vcs];
        for link in &self.links {
            let load = link.vc_load();
            assert_eq!(load.len(), num_vcs, "inconsistent VC load vector");
            for (total, &count) in vc_load_totals.iter_mut().zip(load) {
                *total += count;
            }
        }
        let elapsed = (now - self.stats_start) as f64;
        let vc_loads: Vec<(usize, f64)> = vc_load_totals
            .iter()
            .enumerate()
            .filter(|(vc, _)| self.queues.in_use(vc / self.config.vcs_per_class))
            .map(|(vc, &total)| (vc, total as f64 / elapsed))
            .collect();

        let injected: u64 = self
            .interfaces
            .iter()
            .map(NetworkInterface::flits_injected)
            .sum();
        let received: u64 = self
            .interfaces
            .iter()
            .map(NetworkInterface::flits_received)
            .sum();
        let network_latency: u64 = self
            .interfaces
            .iter()
            .map(NetworkInterface::network_latency_sum)
            .sum();
        let queueing_latency: u64 = self
            .interfaces
            .iter()
            .map(NetworkInterface::queueing_latency_sum)
            .sum();
        write_stats_block(
            out,
            average_link_utilization,
            &vc_loads,
            injected,
            received,
            network_latency,
            queueing_latency,
        )
    }

    fn print_config(&self, out: &mut dyn io::Write) -> io::Result<()> {
        writeln!(out)?;
        writeln!(out, "Network Configuration")?;
        writeln!(out, "---------------------")?;
        writeln!(out, "network: ROUTED_NETWORK")?;
        writeln!(out)?;
        self.queues.print_virtual_networks(out)?;
        Ok(())
    }
}
