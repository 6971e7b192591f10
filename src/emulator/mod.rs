/*!
Emulator module

This module defines what a platform expects from a network emulator, and the
bookkeeping every Mininet-style emulator shares.

Structure:
- `Emulator` / `EmulatedNode`: object creation and command execution.
- `PortAllocator`: per-node port numbers, pinned or next-free.
- `HostAddressPool`: sequential host addresses out of an IP base.
- `graph`: a dry-run emulator recording the network as a graph.
- `netns`: an emulator built out of network namespaces and Open vSwitch.
*/

pub mod graph;
pub mod netns;

use std::{
    collections::{BTreeSet, HashMap},
    net::{Ipv4Addr, Ipv6Addr},
};

use ipnetwork::{IpNetwork, Ipv4Network, Ipv6Network};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{runner::RunnerError, topology::NodeKind};

pub use graph::GraphEmulator;
pub use netns::NetnsEmulator;

#[derive(Debug, Error)]
pub enum EmulatorError {
    #[error("Command `{command}` exited with status {status}: {stderr}")]
    Command {
        command: String,
        status: i32,
        stderr: String,
    },
    #[error("Runner error: {0}")]
    Runner(#[from] RunnerError),
    #[error("Unknown node {0}")]
    UnknownNode(String),
    #[error("Node {0} already exists")]
    DuplicateNode(String),
    #[error("Port {port} already in use on {node}")]
    PortInUse { node: String, port: u32 },
    #[error("No addresses left in {0}")]
    AddressPoolExhausted(IpNetwork),
    #[error("Invalid emulator state: {0}")]
    InvalidState(String),
}

pub type EmulatorResult<T> = Result<T, EmulatorError>;

/// Handle to a node living inside an emulator.
pub trait EmulatedNode: Clone {
    fn name(&self) -> &str;
    fn kind(&self) -> NodeKind;
    /// Runs a shell command on the node and returns everything it printed.
    fn cmd(&self, command: &str) -> EmulatorResult<String>;
}

/// A network emulator able to host switches, hosts and links between them.
pub trait Emulator {
    type Node: EmulatedNode;

    /// Prepares a fresh emulator instance.
    fn start_instance(&mut self) -> EmulatorResult<()>;
    fn add_controller(&mut self, name: &str) -> EmulatorResult<()>;
    fn add_switch(&mut self, name: &str, dpid: u64) -> EmulatorResult<Self::Node>;
    fn add_host(&mut self, name: &str, dpid: u64) -> EmulatorResult<Self::Node>;
    /// Connects two nodes. A `None` port takes the node's next free port.
    fn add_link(
        &mut self,
        node_a: &Self::Node,
        node_b: &Self::Node,
        port_a: Option<u32>,
        port_b: Option<u32>,
    ) -> EmulatorResult<EmulatedLink>;
    fn start(&mut self) -> EmulatorResult<()>;
    fn stop(&mut self) -> EmulatorResult<()>;
}

/// A link as materialized by an emulator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmulatedLink {
    pub node_a: String,
    pub port_a: u32,
    pub node_b: String,
    pub port_b: u32,
}

impl EmulatedLink {
    pub fn intf_a(&self) -> String {
        intf_name(&self.node_a, self.port_a)
    }

    pub fn intf_b(&self) -> String {
        intf_name(&self.node_b, self.port_b)
    }

    /// Port used on `node`, if the link touches it.
    pub fn port_of(&self, node: &str) -> Option<u32> {
        if self.node_a == node {
            Some(self.port_a)
        } else if self.node_b == node {
            Some(self.port_b)
        } else {
            None
        }
    }
}

/// Interface name of `port` on `node`, e.g. `h1-eth0`.
pub fn intf_name(node: &str, port: u32) -> String {
    format!("{}-eth{}", node, port)
}

/// Datapath id for a switch: the decimal count zero-padded to 16 characters,
/// which OVS then reads as hex. Node 10 is `0000000000000010`.
pub fn format_dpid(dpid: u64) -> String {
    format!("{:016}", dpid)
}

/// Tracks the port numbers in use on every node.
#[derive(Debug, Default)]
pub struct PortAllocator {
    used: HashMap<String, BTreeSet<u32>>,
}

impl PortAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `port` on `node`, or the next free one when `port` is `None`.
    /// The next free port is one past the highest in use, starting at the kind's port base.
    pub fn claim(&mut self, node: &str, kind: NodeKind, port: Option<u32>) -> EmulatorResult<u32> {
        let used = self.used.entry(node.to_string()).or_default();
        let port = match port {
            Some(port) => {
                if used.contains(&port) {
                    return Err(EmulatorError::PortInUse {
                        node: node.to_string(),
                        port,
                    });
                }
                port
            }
            None => used
                .iter()
                .next_back()
                .map(|max| max + 1)
                .unwrap_or_else(|| kind.port_base()),
        };
        used.insert(port);
        Ok(port)
    }

    /// Ports in use on `node`, in ascending order.
    pub fn ports(&self, node: &str) -> Vec<u32> {
        self.used
            .get(node)
            .map(|ports| ports.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.used.clear();
    }
}

/// Hands out host addresses from an IP base, `.1` first.
#[derive(Debug, Clone)]
pub struct HostAddressPool {
    base: IpNetwork,
    next: u128,
}

impl HostAddressPool {
    pub fn new(base: IpNetwork) -> Self {
        Self { base, next: 1 }
    }

    pub fn base(&self) -> IpNetwork {
        self.base
    }

    pub fn allocate(&mut self) -> EmulatorResult<IpNetwork> {
        let offset = self.next;
        let exhausted = EmulatorError::AddressPoolExhausted(self.base);
        let address = match self.base {
            IpNetwork::V4(net) => {
                let host_bits = 32 - u32::from(net.prefix());
                // Leave the broadcast address alone
                if host_bits < 2 || offset >= (1u128 << host_bits) - 1 {
                    return Err(exhausted);
                }
                let ip = Ipv4Addr::from(u32::from(net.network()) + offset as u32);
                Ipv4Network::new(ip, net.prefix()).map(IpNetwork::V4)
            }
            IpNetwork::V6(net) => {
                let host_bits = 128 - u32::from(net.prefix());
                if host_bits < 2 || (host_bits < 128 && offset >= (1u128 << host_bits) - 1) {
                    return Err(exhausted);
                }
                let ip = Ipv6Addr::from(u128::from(net.network()) + offset);
                Ipv6Network::new(ip, net.prefix()).map(IpNetwork::V6)
            }
        }
        .map_err(|e| EmulatorError::InvalidState(e.to_string()))?;
        self.next += 1;
        Ok(address)
    }

    pub fn reset(&mut self) {
        self.next = 1;
    }
}

impl Default for HostAddressPool {
    fn default() -> Self {
        HostAddressPool::new(IpNetwork::V4(
            Ipv4Network::new(Ipv4Addr::new(10, 0, 0, 0), 8).expect("valid default ip base"),
        ))
    }
}
