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

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::Cycle;

/// Bandwidth units one endpoint sources or sinks per cycle, before any
/// per-link multiplier.
pub const DEFAULT_ENDPOINT_BANDWIDTH: u64 = 1000;

/// parameters for one physical link (a pair of unidirectional wires)
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct LinkConfiguration {
    /// cycles a message spends on the wire
    pub latency: Cycle,
    /// routing weight; lower-weight paths are preferred
    pub weight: u32,
    /// multiplies the endpoint bandwidth to give the link bandwidth
    pub bandwidth_multiplier: u64,
}

impl Default for LinkConfiguration {
    fn default() -> Self {
        Self {
            latency: 1,
            weight: 1,
            bandwidth_multiplier: 1,
        }
    }
}

/// provides the set of parameters to configure a network
///
/// constructed programmatically or read from a config file.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct NetworkConfiguration {
    /// number of protocol endpoints
    pub nodes: usize,
    /// number of virtual networks
    pub virtual_networks: usize,
    /// virtual channels per virtual network (routed network only)
    pub vcs_per_class: usize,
    /// bandwidth units per cycle at a multiplier of 1
    pub endpoint_bandwidth: u64,
    /// capacity of in-network buffers, in messages; 0 = unbounded
    pub buffer_size: usize,
    /// capacity of one virtual-channel buffer, in flits
    pub vc_buffer_capacity: usize,
    /// utilization threshold steering the adaptive bandwidth counter
    pub bandwidth_adaptive_threshold: f64,
    /// run the adaptive bandwidth predictor
    pub adaptive_bash: bool,
    /// scale factor applied to the size of broadcast messages
    pub broadcast_scaling: u64,
    /// dump per-link queue detail when printing the configuration
    pub print_topology: bool,
}

impl Default for NetworkConfiguration {
    fn default() -> Self {
        Self {
            nodes: 2,
            virtual_networks: 4,
            vcs_per_class: 4,
            endpoint_bandwidth: DEFAULT_ENDPOINT_BANDWIDTH,
            buffer_size: 0,
            vc_buffer_capacity: 4,
            bandwidth_adaptive_threshold: 0.5,
            adaptive_bash: true,
            broadcast_scaling: 1,
            print_topology: false,
        }
    }
}

impl NetworkConfiguration {
    pub fn from_file(file_name: &str) -> Self {
        let file = File::open(Path::new(file_name))
            .unwrap_or_else(|e| panic!("File {} not found. {:?}", file_name, e));
        let reader = BufReader::new(file);
        serde_yaml::from_reader(reader).unwrap()
    }

    pub fn from_str(config: &str) -> Self {
        serde_yaml::from_str(config).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_yaml_config() {
        let conf_str = "---
nodes: 16
virtual_networks: 5
vcs_per_class: 2
endpoint_bandwidth: 1000
buffer_size: 8
vc_buffer_capacity: 4
bandwidth_adaptive_threshold: 0.3
adaptive_bash: false
broadcast_scaling: 4
print_topology: true
";
        let config = NetworkConfiguration::from_str(conf_str);
        assert_eq!(config.nodes, 16);
        assert_eq!(config.virtual_networks, 5);
        assert_eq!(config.vcs_per_class, 2);
        assert_eq!(config.buffer_size, 8);
        assert_eq!(config.bandwidth_adaptive_threshold, 0.3);
        assert!(!config.adaptive_bash);
        assert_eq!(config.broadcast_scaling, 4);
        assert!(config.print_topology);
    }

    #[test]
    fn write_yaml_config() {
        let mut config = NetworkConfiguration::default();
        config.nodes = 4;
        let text = serde_yaml::to_string(&config).unwrap();
        let back = NetworkConfiguration::from_str(&text);
        assert_eq!(back.nodes, 4);
        assert_eq!(back.endpoint_bandwidth, DEFAULT_ENDPOINT_BANDWIDTH);
    }

    #[test]
    fn link_defaults_are_unit_weight() {
        let link = LinkConfiguration::default();
        assert_eq!(link.latency, 1);
        assert_eq!(link.weight, 1);
        assert_eq!(link.bandwidth_multiplier, 1);
    }
}
