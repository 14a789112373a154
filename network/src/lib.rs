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

//! Cycle-driven, event-scheduled on-chip network simulation.
//!
//! Protocol endpoints hand opaque messages to per-node, per-virtual-network
//! injection queues; a network realization transports them across a
//! topology with latency and bandwidth accounting and delivers them to the
//! far side's queues. Two realizations are provided: the
//! [simple](crate::simple) throttled network and the
//! [routed](crate::routed) flit-switched network.

mod buffer;
mod config;
mod error;
mod eventq;
mod message;
mod network;
pub mod routed;
pub mod simple;
mod topology;

// Public types
// type to use for cycles
pub type Cycle = u64;
/// identifies a protocol endpoint
pub type NodeId = usize;
/// identifies a switch/router
pub type SwitchId = usize;
/// indexes a virtual network
pub type VNet = usize;

pub use crate::buffer::{BufferSlot, MessageBuffer};
pub use crate::config::{LinkConfiguration, NetworkConfiguration, DEFAULT_ENDPOINT_BANDWIDTH};
pub use crate::error::Error;
pub use crate::eventq::{ConsumerId, EventQueue};
pub use crate::message::{MessageSizeType, MsgPtr, NetDest, NetworkMessage};
pub use crate::network::{run_until, BufferRef, EndpointQueues, Network};
pub use crate::routed::RoutedNetwork;
pub use crate::simple::SimpleNetwork;
pub use crate::topology::{
    crossbar, fully_connected, line, BasicLink, LinkDirection, Topology,
};
