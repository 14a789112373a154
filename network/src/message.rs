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

//! Protocol-facing message types.
//!
//! The network never looks inside a message; it only needs the destination
//! set and the size class. Messages travel as reference-counted trait
//! objects so multicast fan-out is a pointer copy.

use std::fmt;
use std::rc::Rc;

use bitvec::vec::BitVec;

use crate::NodeId;

/// Size classes a protocol message can carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageSizeType {
    Control,
    Request,
    Response,
    ResponseData,
    Data,
    WritebackData,
}

impl MessageSizeType {
    pub const ALL: [MessageSizeType; 6] = [
        MessageSizeType::Control,
        MessageSizeType::Request,
        MessageSizeType::Response,
        MessageSizeType::ResponseData,
        MessageSizeType::Data,
        MessageSizeType::WritebackData,
    ];

    /// Bytes-equivalent of the size class; always positive.
    pub fn size_in_bytes(self) -> u64 {
        match self {
            MessageSizeType::Control => 8,
            MessageSizeType::Request => 8,
            MessageSizeType::Response => 8,
            MessageSizeType::ResponseData => 72,
            MessageSizeType::Data => 72,
            MessageSizeType::WritebackData => 72,
        }
    }

    /// Dense index for per-size-class counters.
    pub fn index(self) -> usize {
        match self {
            MessageSizeType::Control => 0,
            MessageSizeType::Request => 1,
            MessageSizeType::Response => 2,
            MessageSizeType::ResponseData => 3,
            MessageSizeType::Data => 4,
            MessageSizeType::WritebackData => 5,
        }
    }
}

/// The set of endpoints an output port can reach, or a message targets.
///
/// Backed by one bit per endpoint so that routing tables and broadcast
/// checks stay cheap regardless of fan-out.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NetDest {
    members: BitVec,
}

impl NetDest {
    /// An empty destination set over `nodes` endpoints.
    pub fn new(nodes: usize) -> Self {
        Self {
            members: BitVec::repeat(false, nodes),
        }
    }

    /// A destination set holding exactly one endpoint.
    pub fn unicast(nodes: usize, node: NodeId) -> Self {
        let mut dest = Self::new(nodes);
        dest.add(node);
        dest
    }

    /// A destination set holding every endpoint.
    pub fn broadcast(nodes: usize) -> Self {
        Self {
            members: BitVec::repeat(true, nodes),
        }
    }

    pub fn add(&mut self, node: NodeId) {
        assert!(node < self.members.len(), "node {} out of range", node);
        self.members.set(node, true);
    }

    pub fn contains(&self, node: NodeId) -> bool {
        node < self.members.len() && self.members[node]
    }

    pub fn is_empty(&self) -> bool {
        self.members.not_any()
    }

    /// True when every endpoint is a destination.
    pub fn is_broadcast(&self) -> bool {
        !self.members.is_empty() && self.members.all()
    }

    pub fn count(&self) -> usize {
        self.members.count_ones()
    }

    pub fn intersects(&self, other: &NetDest) -> bool {
        self.iter().any(|node| other.contains(node))
    }

    /// Iterate over member endpoints in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.members.iter_ones()
    }
}

impl fmt::Display for NetDest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[")?;
        for (i, node) in self.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", node)?;
        }
        write!(f, "]")
    }
}

/// Opaque protocol message as seen by the transport layer.
pub trait NetworkMessage: fmt::Debug {
    fn destination(&self) -> &NetDest;
    fn message_size(&self) -> MessageSizeType;
}

/// Shared handle to a message; clones are cheap pointer copies.
pub type MsgPtr = Rc<dyn NetworkMessage>;
