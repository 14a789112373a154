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

//! Uniform-random traffic through a simulated network.
//!
//! Usage: traffic [nodes] [cycles] [seed] [topology]
//!
//! `topology` is `crossbar`, `line`, or `full`. Every node sends one control
//! message to a random other node each injection interval; stats are printed
//! at the end of the run.

use std::env;
use std::io::{stdout, Write};
use std::process;
use std::rc::Rc;

use anyhow::{bail, Context, Result};
use rand::Rng;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256StarStar;

use network::{
    crossbar, fully_connected, line, run_until, Cycle, EventQueue, LinkConfiguration,
    MessageSizeType, MsgPtr, NetDest, Network, NetworkConfiguration, NetworkMessage,
    SimpleNetwork,
};

/// Cycles between injection rounds.
const INJECTION_INTERVAL: Cycle = 4;

#[derive(Debug)]
struct TrafficMessage {
    dest: NetDest,
}

impl NetworkMessage for TrafficMessage {
    fn destination(&self) -> &NetDest {
        &self.dest
    }

    fn message_size(&self) -> MessageSizeType {
        MessageSizeType::Control
    }
}

struct Options {
    nodes: usize,
    cycles: Cycle,
    seed: u64,
    topology: String,
}

fn parse_options() -> Result<Options> {
    let args: Vec<String> = env::args().collect();
    let mut options = Options {
        nodes: 8,
        cycles: 100000,
        seed: 1,
        topology: "crossbar".to_string(),
    };
    if let Some(nodes) = args.get(1) {
        options.nodes = nodes.parse().context("nodes must be an integer")?;
    }
    if let Some(cycles) = args.get(2) {
        options.cycles = cycles.parse().context("cycles must be an integer")?;
    }
    if let Some(seed) = args.get(3) {
        options.seed = seed.parse().context("seed must be an integer")?;
    }
    if let Some(topology) = args.get(4) {
        options.topology = topology.clone();
    }
    if options.nodes < 2 {
        bail!("need at least two nodes to exchange traffic");
    }
    Ok(options)
}

fn main() -> Result<()> {
    env_logger::init();
    let options = parse_options().unwrap_or_else(|e| {
        eprintln!("{}", e);
        eprintln!("usage: traffic [nodes] [cycles] [seed] [crossbar|line|full]");
        process::exit(1);
    });

    let link_config = LinkConfiguration::default();
    let topology = match options.topology.as_str() {
        "crossbar" => crossbar(options.nodes, &link_config),
        "line" => line(options.nodes, &link_config),
        "full" => fully_connected(options.nodes, &link_config),
        other => bail!("unknown topology {}", other),
    };
    log::info!("{}", topology);

    let config = NetworkConfiguration {
        nodes: options.nodes,
        virtual_networks: 2,
        ..Default::default()
    };
    let scheduler = Rc::new(EventQueue::new());
    let mut net = SimpleNetwork::new(&config, &topology, &scheduler)
        .context("failed to build the network")?;

    let sources: Vec<_> = (0..options.nodes)
        .map(|node| net.get_to_net_queue(node, false, 0))
        .collect::<Result<_, _>>()?;
    let sinks: Vec<_> = (0..options.nodes)
        .map(|node| net.get_from_net_queue(node, false, 0))
        .collect::<Result<_, _>>()?;

    let mut rng = Xoshiro256StarStar::seed_from_u64(options.seed);
    let mut sent = 0u64;
    let mut round = 0;
    while round * INJECTION_INTERVAL < options.cycles {
        for (node, source) in sources.iter().enumerate() {
            let mut dest = rng.gen_range(0..options.nodes - 1);
            if dest >= node {
                dest += 1;
            }
            let msg: MsgPtr = Rc::new(TrafficMessage {
                dest: NetDest::unicast(options.nodes, dest),
            });
            source.borrow_mut().enqueue(msg, 0);
            sent += 1;
        }
        round += 1;
        run_until(&scheduler, &mut net, round * INJECTION_INTERVAL);
    }
    // Let the tail drain.
    run_until(&scheduler, &mut net, options.cycles + 10000);

    let delivered: usize = sinks.iter().map(|sink| sink.borrow().len()).sum();
    log::info!(
        "sent {} messages, delivered {} @cycle {}",
        sent,
        delivered,
        scheduler.now()
    );

    let mut out = stdout();
    net.print_config(&mut out)?;
    net.print_stats(&mut out)?;
    out.flush()?;
    Ok(())
}
