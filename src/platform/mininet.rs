/*!
Mininet platform.

`MininetPlatform` builds a topology on any [`Emulator`]: nodes become switches
or hosts, ports are numbered per node but stay virtual until a link uses them,
links are created right away.
*/

use std::collections::{HashMap, hash_map::Entry};

use log::{debug, info, warn};

use crate::{
    config::{ConfigError, PlatformConfig},
    emulator::{EmulatedNode, Emulator, NetnsEmulator},
    runner::CommandRunner,
    topology::{
        NmlLink, NmlNode, NmlPort, NodeKind, NodePort, Platform, PlatformError, PlatformNode,
        PlatformResult,
    },
};

/// Platform running on the namespace emulator from a [`PlatformConfig`].
pub type NetnsPlatform = MininetPlatform<NetnsEmulator<Box<dyn CommandRunner>>>;

/// Node handle of the Mininet platform. Switches and hosts behave the same.
#[derive(Debug, Clone)]
pub struct MininetNode<N> {
    identifier: String,
    kind: NodeKind,
    node: N,
    /// port identifier -> port number
    nmlport_port_map: HashMap<String, u32>,
}

impl<N: EmulatedNode> MininetNode<N> {
    fn new(identifier: &str, kind: NodeKind, node: N) -> Self {
        Self {
            identifier: identifier.to_string(),
            kind,
            node,
            nmlport_port_map: HashMap::new(),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// The emulator-side node.
    pub fn node(&self) -> &N {
        &self.node
    }

    pub fn port_number(&self, port: &str) -> Option<u32> {
        self.nmlport_port_map.get(port).copied()
    }

    /// Registered ports with their numbers, in port order.
    pub fn ports(&self) -> Vec<(&str, u32)> {
        let mut ports: Vec<_> = self
            .nmlport_port_map
            .iter()
            .map(|(id, number)| (id.as_str(), *number))
            .collect();
        ports.sort_by_key(|(_, number)| *number);
        ports
    }

    fn allocate_port(&mut self, port: &str) -> PlatformResult<u32> {
        let number = self.nmlport_port_map.len() as u32 + 1;
        match self.nmlport_port_map.entry(port.to_string()) {
            Entry::Occupied(_) => Err(PlatformError::DuplicatePort {
                node: self.identifier.clone(),
                port: port.to_string(),
            }),
            Entry::Vacant(entry) => Ok(*entry.insert(number)),
        }
    }

    fn resolve_port(&self, port: Option<&NmlPort>) -> PlatformResult<Option<u32>> {
        port.map(|port| {
            self.port_number(&port.identifier)
                .ok_or_else(|| PlatformError::UnknownPort {
                    node: self.identifier.clone(),
                    port: port.identifier.clone(),
                })
        })
        .transpose()
    }
}

impl<N: EmulatedNode> PlatformNode for MininetNode<N> {
    fn send_command(&self, command: &str, shell: Option<&str>) -> PlatformResult<String> {
        if let Some(shell) = shell {
            return Err(PlatformError::UnsupportedShell(shell.to_string()));
        }
        Ok(self.node.cmd(command)?)
    }

    fn send_data(&self, _data: &[u8], _function: Option<&str>) -> PlatformResult<Vec<u8>> {
        Err(PlatformError::UnsupportedInterface)
    }
}

/// Builds topologies on a Mininet-style emulator.
pub struct MininetPlatform<E: Emulator> {
    timestamp: String,
    controller: String,
    net: E,
    built: bool,
    nmlnode_node_map: HashMap<String, MininetNode<E::Node>>,
}

impl<E: Emulator> MininetPlatform<E> {
    pub fn new(timestamp: impl Into<String>, net: E) -> Self {
        Self {
            timestamp: timestamp.into(),
            controller: "c0".to_string(),
            net,
            built: false,
            nmlnode_node_map: HashMap::new(),
        }
    }

    /// Name of the controller installed by `pre_build`.
    pub fn with_controller(mut self, controller: impl Into<String>) -> Self {
        self.controller = controller.into();
        self
    }

    /// Timestamp of the build this platform belongs to.
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn emulator(&self) -> &E {
        &self.net
    }

    pub fn node(&self, identifier: &str) -> Option<&MininetNode<E::Node>> {
        self.nmlnode_node_map.get(identifier)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &MininetNode<E::Node>> {
        self.nmlnode_node_map.values()
    }

    fn ensure_built(&self) -> PlatformResult<()> {
        if self.built {
            Ok(())
        } else {
            Err(PlatformError::NotBuilt)
        }
    }

    fn lookup(&self, node: &NmlNode) -> PlatformResult<&MininetNode<E::Node>> {
        self.nmlnode_node_map
            .get(&node.identifier)
            .ok_or_else(|| PlatformError::UnknownNode(node.identifier.clone()))
    }
}

impl NetnsPlatform {
    /// Platform on the namespace emulator described by `config`.
    /// Connects to the emulation host right away when it is remote.
    pub fn from_config(timestamp: impl Into<String>, config: &PlatformConfig) -> Result<Self, ConfigError> {
        Ok(MininetPlatform::new(timestamp, config.netns_emulator()?).with_controller(config.controller.clone()))
    }
}

impl<E: Emulator> Platform for MininetPlatform<E> {
    type Node = MininetNode<E::Node>;

    /// Brings up an emulator instance with its controller; Mininet needs one for
    /// switches to forward anything.
    fn pre_build(&mut self) -> PlatformResult<()> {
        if self.built {
            return Err(PlatformError::AlreadyBuilt);
        }
        info!("[{}] starting emulator", self.timestamp);
        self.net.start_instance()?;
        if let Err(e) = self.net.add_controller(&self.controller) {
            // Leave no half-built instance behind, so pre_build can be retried
            if let Err(stop_err) = self.net.stop() {
                warn!("[{}] stopping emulator: {}", self.timestamp, stop_err);
            }
            return Err(e.into());
        }
        self.built = true;
        Ok(())
    }

    fn add_node(&mut self, node: &NmlNode) -> PlatformResult<&Self::Node> {
        self.ensure_built()?;
        let kind: NodeKind = node.node_type().parse()?;
        let dpid = self.nmlnode_node_map.len() as u64;
        match self.nmlnode_node_map.entry(node.identifier.clone()) {
            Entry::Occupied(_) => Err(PlatformError::DuplicateNode(node.identifier.clone())),
            Entry::Vacant(entry) => {
                let emulated = match kind {
                    NodeKind::Switch => self.net.add_switch(&node.identifier, dpid)?,
                    NodeKind::Host => self.net.add_host(&node.identifier, dpid)?,
                };
                debug!("added {} {} (dpid {})", kind, node.identifier, dpid);
                Ok(entry.insert(MininetNode::new(&node.identifier, kind, emulated)))
            }
        }
    }

    /// Ports only exist on the emulator once a link uses them.
    fn add_biport(&mut self, node: &NmlNode, port: &NmlPort) -> PlatformResult<u32> {
        self.ensure_built()?;
        let mn_node = self
            .nmlnode_node_map
            .get_mut(&node.identifier)
            .ok_or_else(|| PlatformError::UnknownNode(node.identifier.clone()))?;
        let number = mn_node.allocate_port(&port.identifier)?;
        debug!("port {} of {} is {}", port.identifier, node.identifier, number);
        Ok(number)
    }

    fn add_bilink(
        &mut self,
        nodeport_a: NodePort<'_>,
        nodeport_b: NodePort<'_>,
        link: &NmlLink,
    ) -> PlatformResult<()> {
        self.ensure_built()?;
        let node_a = self.lookup(nodeport_a.0)?;
        let port_a = node_a.resolve_port(nodeport_a.1)?;
        let node_b = self.lookup(nodeport_b.0)?;
        let port_b = node_b.resolve_port(nodeport_b.1)?;

        let (emulated_a, emulated_b) = (node_a.node.clone(), node_b.node.clone());
        let created = self.net.add_link(&emulated_a, &emulated_b, port_a, port_b)?;
        debug!(
            "link {}: {}:{} <-> {}:{}",
            link.identifier, created.node_a, created.port_a, created.node_b, created.port_b
        );
        Ok(())
    }

    fn post_build(&mut self) -> PlatformResult<()> {
        self.ensure_built()?;
        info!(
            "[{}] starting network with {} nodes",
            self.timestamp,
            self.nmlnode_node_map.len()
        );
        Ok(self.net.start()?)
    }

    fn destroy(&mut self) -> PlatformResult<()> {
        self.ensure_built()?;
        info!("[{}] stopping network", self.timestamp);
        let stopped = self.net.stop();
        self.built = false;
        self.nmlnode_node_map.clear();
        Ok(stopped?)
    }
}
