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

use std::fmt;

use crate::{NodeId, SwitchId, VNet};

#[derive(Debug, Eq, PartialEq)]
pub enum Error {
    InvalidNode(NodeId),
    InvalidSwitch(SwitchId),
    InvalidVirtualNetwork(VNet),
    InvalidBandwidth(u64),
    ReconfigurationUnsupported,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::InvalidNode(n) => {
                write!(f, "ERROR: Invalid node {}", n)
            }
            Self::InvalidSwitch(s) => {
                write!(f, "ERROR: Invalid switch {}", s)
            }
            Self::InvalidVirtualNetwork(v) => {
                write!(f, "ERROR: Invalid virtual network {}", v)
            }
            Self::InvalidBandwidth(bw) => {
                write!(f, "ERROR: Invalid link bandwidth {}", bw)
            }
            Self::ReconfigurationUnsupported => {
                write!(f, "ERROR: Reconfiguration not allowed here")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}
