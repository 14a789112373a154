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

//! Shared fixtures for the integration tests.

// Each test binary uses its own subset of these helpers.
#![allow(dead_code)]

use std::rc::Rc;

use network::{MessageSizeType, MsgPtr, NetDest, NetworkMessage};

#[derive(Debug)]
pub struct TestMessage {
    dest: NetDest,
    size: MessageSizeType,
}

impl NetworkMessage for TestMessage {
    fn destination(&self) -> &NetDest {
        &self.dest
    }

    fn message_size(&self) -> MessageSizeType {
        self.size
    }
}

/// A message for one destination node.
pub fn unicast(nodes: usize, dest: usize, size: MessageSizeType) -> MsgPtr {
    Rc::new(TestMessage {
        dest: NetDest::unicast(nodes, dest),
        size,
    })
}

/// A message for a set of destination nodes.
pub fn multicast(nodes: usize, dests: &[usize], size: MessageSizeType) -> MsgPtr {
    let mut dest = NetDest::new(nodes);
    for &node in dests {
        dest.add(node);
    }
    Rc::new(TestMessage { dest, size })
}

/// A message for every node.
pub fn broadcast(nodes: usize, size: MessageSizeType) -> MsgPtr {
    Rc::new(TestMessage {
        dest: NetDest::broadcast(nodes),
        size,
    })
}

/// Shorthand for the only size class most scenarios need.
pub fn control(nodes: usize, dest: usize) -> MsgPtr {
    unicast(nodes, dest, MessageSizeType::Control)
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
