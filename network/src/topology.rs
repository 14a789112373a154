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

//! Topology construction and routing-table installation.
//!
//! A topology is a directed multigraph over protocol endpoints and switches.
//! Each physical link carries two unidirectional wires selected by
//! [`LinkDirection`]. Once built, [`Topology::create_links`] wires a network
//! by issuing `make_in_link` / `make_out_link` / `make_internal_link` calls
//! in a deterministic order; port and VC indexes are assigned implicitly by
//! that order, so it must not change between runs.

use std::collections::HashMap;
use std::fmt;

use petgraph::algo::dijkstra;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::config::LinkConfiguration;
use crate::error::Error;
use crate::message::NetDest;
use crate::network::Network;
use crate::{NodeId, SwitchId};

/// Selects one of the two unidirectional wires of a physical link.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkDirection {
    Forward,
    Backward,
}

/// A physical link as handed to the network's link-making calls.
#[derive(Clone, Copy, Debug)]
pub struct BasicLink {
    /// Position in the topology's link list.
    pub id: usize,
    pub config: LinkConfiguration,
}

#[derive(Clone, Copy, Debug)]
enum LinkKind {
    External { node: NodeId, switch: SwitchId },
    Internal { src: SwitchId, dst: SwitchId },
}

#[derive(Clone, Copy, Debug)]
struct TopoLink {
    kind: LinkKind,
    config: LinkConfiguration,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Vertex {
    Endpoint(NodeId),
    Switch(SwitchId),
}

pub struct Topology {
    nodes: usize,
    switches: usize,
    links: Vec<TopoLink>,
    graph: DiGraph<Vertex, u32>,
}

impl Topology {
    pub fn new(nodes: usize, switches: usize) -> Self {
        let mut graph = DiGraph::new();
        for n in 0..nodes {
            graph.add_node(Vertex::Endpoint(n));
        }
        for s in 0..switches {
            graph.add_node(Vertex::Switch(s));
        }
        Self {
            nodes,
            switches,
            links: Vec::new(),
            graph,
        }
    }

    pub fn nodes(&self) -> usize {
        self.nodes
    }

    pub fn switches(&self) -> usize {
        self.switches
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    fn endpoint_vertex(&self, node: NodeId) -> NodeIndex {
        NodeIndex::new(node)
    }

    fn switch_vertex(&self, switch: SwitchId) -> NodeIndex {
        NodeIndex::new(self.nodes + switch)
    }

    /// Attach an endpoint to a switch (both wires).
    pub fn add_external_link(
        &mut self,
        node: NodeId,
        switch: SwitchId,
        config: &LinkConfiguration,
    ) -> Result<(), Error> {
        if node >= self.nodes {
            return Err(Error::InvalidNode(node));
        }
        if switch >= self.switches {
            return Err(Error::InvalidSwitch(switch));
        }
        let (nv, sv) = (self.endpoint_vertex(node), self.switch_vertex(switch));
        self.graph.add_edge(nv, sv, config.weight);
        self.graph.add_edge(sv, nv, config.weight);
        self.links.push(TopoLink {
            kind: LinkKind::External { node, switch },
            config: *config,
        });
        Ok(())
    }

    /// Connect two switches (both wires).
    pub fn add_internal_link(
        &mut self,
        src: SwitchId,
        dst: SwitchId,
        config: &LinkConfiguration,
    ) -> Result<(), Error> {
        if src >= self.switches {
            return Err(Error::InvalidSwitch(src));
        }
        if dst >= self.switches {
            return Err(Error::InvalidSwitch(dst));
        }
        let (sv, dv) = (self.switch_vertex(src), self.switch_vertex(dst));
        self.graph.add_edge(sv, dv, config.weight);
        self.graph.add_edge(dv, sv, config.weight);
        self.links.push(TopoLink {
            kind: LinkKind::Internal { src, dst },
            config: *config,
        });
        Ok(())
    }

    /// Destinations for which the wire `from -> to` (weight `w`) lies on a
    /// minimal-weight path.
    fn wire_entry(
        &self,
        dist: &[HashMap<NodeIndex, u64>],
        from: NodeIndex,
        to: NodeIndex,
        weight: u64,
    ) -> NetDest {
        let mut entry = NetDest::new(self.nodes);
        for node in 0..self.nodes {
            let d = self.endpoint_vertex(node);
            let via = match dist[to.index()].get(&d) {
                Some(cost) => weight + cost,
                None => continue,
            };
            match dist[from.index()].get(&d) {
                Some(&best) if best == via => entry.add(node),
                _ => {}
            }
        }
        entry
    }

    /// Issue the link-making calls against a network, routing tables
    /// included. Links are visited in insertion order, forward wire first.
    pub fn create_links<N: Network + ?Sized>(&self, net: &mut N) -> Result<(), Error> {
        let dist: Vec<HashMap<NodeIndex, u64>> = self
            .graph
            .node_indices()
            .map(|v| dijkstra(&self.graph, v, None, |e| *e.weight() as u64))
            .collect();

        for (id, link) in self.links.iter().enumerate() {
            let basic = BasicLink {
                id,
                config: link.config,
            };
            let weight = link.config.weight as u64;
            match link.kind {
                LinkKind::External { node, switch } => {
                    let (nv, sv) = (self.endpoint_vertex(node), self.switch_vertex(switch));
                    log::debug!("external link {}: node {} <-> switch {}", id, node, switch);
                    net.make_in_link(
                        node,
                        switch,
                        &basic,
                        LinkDirection::Forward,
                        self.wire_entry(&dist, nv, sv, weight),
                        false,
                    )?;
                    net.make_out_link(
                        switch,
                        node,
                        &basic,
                        LinkDirection::Backward,
                        self.wire_entry(&dist, sv, nv, weight),
                        false,
                    )?;
                }
                LinkKind::Internal { src, dst } => {
                    let (sv, dv) = (self.switch_vertex(src), self.switch_vertex(dst));
                    log::debug!("internal link {}: switch {} <-> switch {}", id, src, dst);
                    net.make_internal_link(
                        src,
                        dst,
                        &basic,
                        LinkDirection::Forward,
                        self.wire_entry(&dist, sv, dv, weight),
                        false,
                    )?;
                    net.make_internal_link(
                        dst,
                        src,
                        &basic,
                        LinkDirection::Backward,
                        self.wire_entry(&dist, dv, sv, weight),
                        false,
                    )?;
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(
            f,
            "topology: {} nodes, {} switches, {} links",
            self.nodes, self.switches, self.links.len()
        )?;
        for (id, link) in self.links.iter().enumerate() {
            match link.kind {
                LinkKind::External { node, switch } => writeln!(
                    f,
                    "  link {}: node {} <-> switch {} (latency {}, weight {}, bw x{})",
                    id, node, switch, link.config.latency, link.config.weight,
                    link.config.bandwidth_multiplier
                )?,
                LinkKind::Internal { src, dst } => writeln!(
                    f,
                    "  link {}: switch {} <-> switch {} (latency {}, weight {}, bw x{})",
                    id, src, dst, link.config.latency, link.config.weight,
                    link.config.bandwidth_multiplier
                )?,
            }
        }
        Ok(())
    }
}

/// every endpoint on a single central switch
pub fn crossbar(nodes: usize, link_config: &LinkConfiguration) -> Topology {
    let mut topo = Topology::new(nodes, 1);
    for node in 0..nodes {
        topo.add_external_link(node, 0, link_config)
            .expect("crossbar indices are valid by construction");
    }
    topo
}

/// a switch per endpoint, switches chained end to end
///
/// An unrealistic topology, but its diameter makes latency easy to reason
/// about.
pub fn line(nodes: usize, link_config: &LinkConfiguration) -> Topology {
    let mut topo = Topology::new(nodes, nodes);
    for node in 0..nodes {
        topo.add_external_link(node, node, link_config)
            .expect("line indices are valid by construction");
    }
    for switch in 1..nodes {
        topo.add_internal_link(switch - 1, switch, link_config)
            .expect("line indices are valid by construction");
    }
    topo
}

/// a switch per endpoint, every switch pair linked directly
pub fn fully_connected(nodes: usize, link_config: &LinkConfiguration) -> Topology {
    let mut topo = Topology::new(nodes, nodes);
    for node in 0..nodes {
        topo.add_external_link(node, node, link_config)
            .expect("full-mesh indices are valid by construction");
    }
    for src in 0..nodes {
        for dst in src + 1..nodes {
            topo.add_internal_link(src, dst, link_config)
                .expect("full-mesh indices are valid by construction");
        }
    }
    topo
}
