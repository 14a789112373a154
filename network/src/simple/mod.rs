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

//! The simple throttled network: perfect switches plus per-link throttles.

mod switch;
pub mod throttle;

pub use switch::Switch;
pub use throttle::Throttle;

use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::rc::Rc;

use crate::buffer::MessageBuffer;
use crate::config::NetworkConfiguration;
use crate::error::Error;
use crate::eventq::{ConsumerId, EventQueue};
use crate::message::NetDest;
use crate::network::{write_stats_block, BufferRef, EndpointQueues, Network};
use crate::topology::{BasicLink, LinkDirection, Topology};
use crate::{Cycle, NodeId, SwitchId, VNet};

enum Target {
    Switch(usize),
    Throttle { switch: usize, port: usize },
}

/// Network realization where bandwidth is metered by per-link throttles and
/// switches route in zero time.
pub struct SimpleNetwork {
    config: NetworkConfiguration,
    scheduler: Rc<EventQueue>,
    queues: EndpointQueues,
    switches: Vec<Switch>,
    consumers: HashMap<ConsumerId, Target>,
    stats_start: Cycle,
}

impl SimpleNetwork {
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
        let switches = (0..topology.switches())
            .map(|id| {
                let consumer = scheduler.register_consumer();
                consumers.insert(consumer, Target::Switch(id));
                Switch::new(id, consumer, config.virtual_networks)
            })
            .collect();
        let mut net = Self {
            config: config.clone(),
            scheduler: Rc::clone(scheduler),
            queues,
            switches,
            consumers,
            stats_start: 0,
        };
        topology.create_links(&mut net)?;
        Ok(net)
    }

    fn check_switch(&self, switch: SwitchId) -> Result<(), Error> {
        if switch >= self.switches.len() {
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

    fn check_link(&self, link: &BasicLink) -> Result<(), Error> {
        if link.config.bandwidth_multiplier == 0 {
            return Err(Error::InvalidBandwidth(0));
        }
        Ok(())
    }

    /// Iterate every throttle in the network.
    fn throttles(&self) -> impl Iterator<Item = &Throttle> {
        self.switches.iter().flat_map(|switch| switch.throttles().iter())
    }

    /// Direct handle to a switch, mainly for inspection in tests.
    pub fn switch(&self, switch: SwitchId) -> &Switch {
        &self.switches[switch]
    }
}

impl Network for SimpleNetwork {
    fn make_in_link(
        &mut self,
        src: NodeId,
        dest: SwitchId,
        _link: &BasicLink,
        _direction: LinkDirection,
        _routing_table_entry: NetDest,
        reconfigure: bool,
    ) -> Result<(), Error> {
        if reconfigure {
            return Err(Error::ReconfigurationUnsupported);
        }
        self.check_node(src)?;
        self.check_switch(dest)?;
        let buffers = self.queues.to_net(src).to_vec();
        self.switches[dest].add_in_port(buffers, true);
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
        self.check_link(link)?;
        let consumer = self.scheduler.register_consumer();
        let out_buffers = self.queues.from_net(dest).to_vec();
        let scheduler = Rc::clone(&self.scheduler);
        let port = self.switches[src].add_out_port(
            &scheduler,
            consumer,
            out_buffers,
            routing_table_entry,
            link,
            &self.config,
            true,
            dest,
        )?;
        self.consumers
            .insert(consumer, Target::Throttle { switch: src, port });
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
        self.check_link(link)?;

        // Wire queues crossing the link: filled by the source switch's
        // throttle, drained by the destination switch.
        let link_queues: Vec<BufferRef> = (0..self.config.virtual_networks)
            .map(|vnet| {
                let mut buffer = MessageBuffer::new(&self.scheduler, self.config.buffer_size);
                buffer.set_description(format!(
                    "[link switch {} -> switch {} vnet {}]",
                    src, dest, vnet
                ));
                Rc::new(RefCell::new(buffer))
            })
            .collect();
        self.switches[dest].add_in_port(link_queues.clone(), false);

        let consumer = self.scheduler.register_consumer();
        let scheduler = Rc::clone(&self.scheduler);
        let port = self.switches[src].add_out_port(
            &scheduler,
            consumer,
            link_queues,
            routing_table_entry,
            link,
            &self.config,
            false,
            dest,
        )?;
        self.consumers
            .insert(consumer, Target::Throttle { switch: src, port });
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
            Some(&Target::Switch(id)) => self.switches[id].wakeup(now, &scheduler),
            Some(&Target::Throttle { switch, port }) => {
                self.switches[switch].throttle_mut(port).wakeup(now, &scheduler)
            }
            None => panic!("wakeup for unknown {}", consumer),
        }
    }

    fn reset(&mut self) {
        self.queues.reset();
        for switch in self.switches.iter_mut() {
            switch.reset();
        }
    }

    fn clear_stats(&mut self) {
        let now = self.scheduler.now();
        self.stats_start = now;
        for switch in self.switches.iter_mut() {
            switch.clear_stats(now);
        }
    }

    fn print_stats(&self, out: &mut dyn io::Write) -> io::Result<()> {
        let now = self.scheduler.now();
        let links = self.throttles().count();
        let average_link_utilization = self
            .throttles()
            .map(|throttle| throttle.utilization_fraction(now))
            .sum::<f64>()
            / links as f64;

        // One VC per virtual network in this realization.
        let elapsed = (now - self.stats_start) as f64;
        let mut vc_loads = Vec::new();
        for vnet in 0..self.config.virtual_networks {
            if !self.queues.in_use(vnet) {
                continue;
            }
            let moved: u64 = self
                .throttles()
                .map(|throttle| throttle.vnet_messages_moved(vnet))
                .sum();
            vc_loads.push((vnet, moved as f64 / elapsed));
        }

        let injected: u64 = self.switches.iter().map(Switch::messages_injected).sum();
        let received: u64 = self.throttles().map(Throttle::messages_delivered).sum();
        let network_latency: u64 = self.throttles().map(Throttle::network_latency_sum).sum();
        let queueing_latency: u64 = self
            .switches
            .iter()
            .map(Switch::queueing_latency_sum)
            .sum();
        write_stats_block(
            out,
            average_link_utilization,
            &vc_loads,
            injected,
            received,
            network_latency,
            queueing_latency,
        )?;
        if self.config.print_topology {
            for throttle in self.throttles() {
                write!(out, "{} ", throttle)?;
                throttle.print_stats(out, now)?;
            }
        }
        Ok(())
    }

    fn print_config(&self, out: &mut dyn io::Write) -> io::Result<()> {
        writeln!(out)?;
        writeln!(out, "Network Configuration")?;
        writeln!(out, "---------------------")?;
        writeln!(out, "network: SIMPLE_NETWORK")?;
        writeln!(out)?;
        self.queues.print_virtual_networks(out)?;
        Ok(())
    }
}
