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

//! Virtual-network allocation, reset, and the fatal construction paths.

mod common;

use std::rc::Rc;

use network::{
    crossbar, run_until, BasicLink, Error, EventQueue, LinkConfiguration, LinkDirection, NetDest,
    Network, NetworkConfiguration, SimpleNetwork,
};

fn config_text(net: &SimpleNetwork) -> String {
    let mut out = Vec::new();
    net.print_config(&mut out).unwrap();
    String::from_utf8(out).unwrap()
}

fn build(config: &NetworkConfiguration) -> (Rc<EventQueue>, SimpleNetwork) {
    let topology = crossbar(config.nodes, &LinkConfiguration::default());
    let scheduler = Rc::new(EventQueue::new());
    let net = SimpleNetwork::new(config, &topology, &scheduler).unwrap();
    (scheduler, net)
}

#[test]
fn ordering_claims_are_permanent() {
    common::init_logging();
    let config = NetworkConfiguration::default();
    let (_scheduler, mut net) = build(&config);

    net.get_to_net_queue(0, true, 3).unwrap();
    let text = config_text(&net);
    assert!(text.contains("virtual_net_3: active, ordered"), "{}", text);

    // A later unordered request must not downgrade the claim.
    net.get_to_net_queue(1, false, 3).unwrap();
    net.get_from_net_queue(0, false, 3).unwrap();
    let text = config_text(&net);
    assert!(text.contains("virtual_net_3: active, ordered"), "{}", text);
    assert!(text.contains("virtual_net_0: inactive"), "{}", text);
}

#[test]
fn queue_requests_validate_their_arguments() {
    common::init_logging();
    let config = NetworkConfiguration::default();
    let (_scheduler, mut net) = build(&config);

    assert_eq!(
        net.get_to_net_queue(config.nodes, false, 0).err(),
        Some(Error::InvalidNode(config.nodes))
    );
    assert_eq!(
        net.get_from_net_queue(0, false, config.virtual_networks).err(),
        Some(Error::InvalidVirtualNetwork(config.virtual_networks))
    );
}

#[test]
fn reconfiguration_is_rejected_at_the_boundary() {
    common::init_logging();
    let config = NetworkConfiguration::default();
    let (_scheduler, mut net) = build(&config);

    let link = BasicLink {
        id: 99,
        config: LinkConfiguration::default(),
    };
    assert_eq!(
        net.make_in_link(
            0,
            0,
            &link,
            LinkDirection::Forward,
            NetDest::new(config.nodes),
            true,
        ),
        Err(Error::ReconfigurationUnsupported)
    );
    assert_eq!(
        net.make_out_link(
            0,
            0,
            &link,
            LinkDirection::Backward,
            NetDest::new(config.nodes),
            true,
        ),
        Err(Error::ReconfigurationUnsupported)
    );
    assert_eq!(
        net.make_internal_link(
            0,
            0,
            &link,
            LinkDirection::Forward,
            NetDest::new(config.nodes),
            true,
        ),
        Err(Error::ReconfigurationUnsupported)
    );
}

#[test]
fn zero_bandwidth_links_are_fatal() {
    common::init_logging();
    let config = NetworkConfiguration::default();
    let dead_link = LinkConfiguration {
        bandwidth_multiplier: 0,
        ..Default::default()
    };
    let topology = crossbar(config.nodes, &dead_link);
    let scheduler = Rc::new(EventQueue::new());
    assert!(matches!(
        SimpleNetwork::new(&config, &topology, &scheduler).err(),
        Some(Error::InvalidBandwidth(0))
    ));
}

#[test]
fn reset_drops_everything_in_flight() {
    common::init_logging();
    let config = NetworkConfiguration {
        nodes: 2,
        virtual_networks: 1,
        // A control message needs 8 cycles, so traffic stays in flight.
        endpoint_bandwidth: 1000,
        ..Default::default()
    };
    let (scheduler, mut net) = build(&config);
    let to_net = net.get_to_net_queue(0, false, 0).unwrap();
    let from_net = net.get_from_net_queue(1, false, 0).unwrap();

    for _ in 0..16 {
        to_net.borrow_mut().enqueue(common::control(2, 1), 0);
    }
    run_until(&scheduler, &mut net, 20);
    assert!(!from_net.borrow().is_empty() || !to_net.borrow().is_empty());

    net.reset();
    assert!(to_net.borrow().is_empty());
    assert!(from_net.borrow().is_empty());

    // Leftover wakeups must fire as no-ops: nothing is delivered afterwards.
    run_until(&scheduler, &mut net, 10000);
    assert!(from_net.borrow().is_empty());

    // The network is still usable after the reset.
    to_net.borrow_mut().enqueue(common::control(2, 1), 0);
    run_until(&scheduler, &mut net, scheduler.now() + 100);
    assert_eq!(from_net.borrow().len(), 1);
}

#[test]
fn clear_stats_is_idempotent_within_a_cycle() {
    common::init_logging();
    let config = NetworkConfiguration::default();
    let (scheduler, mut net) = build(&config);
    let to_net = net.get_to_net_queue(0, false, 0).unwrap();
    to_net.borrow_mut().enqueue(common::control(2, 1), 0);
    run_until(&scheduler, &mut net, 50);

    let mut first = Vec::new();
    net.clear_stats();
    net.print_stats(&mut first).unwrap();
    let mut second = Vec::new();
    net.clear_stats();
    net.print_stats(&mut second).unwrap();
    assert_eq!(first, second);
}
