/*!
Dry-run emulator.

`GraphEmulator` accepts the same calls as a real emulator but only records the
resulting network: devices become graph nodes, links become undirected edges
carrying the ports on both ends. Commands sent to nodes are logged, not run.
*/

use std::{cell::RefCell, collections::HashMap, rc::Rc};

use ipnetwork::IpNetwork;
use log::{debug, info};
use petgraph::{
    Undirected,
    stable_graph::{NodeIndex, StableGraph},
    visit::EdgeRef,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    emulator::{
        EmulatedLink, EmulatedNode, Emulator, EmulatorError, EmulatorResult, HostAddressPool,
        PortAllocator,
    },
    topology::NodeKind,
};

/// A device recorded by the dry-run emulator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: Uuid,
    pub name: String,
    pub kind: NodeKind,
    pub dpid: u64,
    pub address: Option<IpNetwork>,
}

impl Device {
    fn new(name: &str, kind: NodeKind, dpid: u64, address: Option<IpNetwork>) -> Self {
        Self {
            id: Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()),
            name: name.to_string(),
            kind,
            dpid,
            address,
        }
    }
}

type CommandLog = Rc<RefCell<Vec<(String, String)>>>;

/// Node handle handed out by [`GraphEmulator`].
#[derive(Debug, Clone)]
pub struct GraphNode {
    name: String,
    kind: NodeKind,
    log: CommandLog,
}

impl EmulatedNode for GraphNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NodeKind {
        self.kind
    }

    fn cmd(&self, command: &str) -> EmulatorResult<String> {
        debug!("{} (dry run): {}", self.name, command);
        self.log
            .borrow_mut()
            .push((self.name.clone(), command.to_string()));
        Ok(String::new())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InstanceState {
    Absent,
    Created,
    Running,
}

/// Emulator that records the network instead of building it.
#[derive(Debug)]
pub struct GraphEmulator {
    graph: StableGraph<Device, EmulatedLink, Undirected>,
    name_to_index_map: HashMap<String, NodeIndex>,
    controllers: Vec<String>,
    ports: PortAllocator,
    addresses: HostAddressPool,
    log: CommandLog,
    state: InstanceState,
}

impl Default for GraphEmulator {
    fn default() -> Self {
        Self::new(HostAddressPool::default())
    }
}

impl GraphEmulator {
    pub fn new(addresses: HostAddressPool) -> Self {
        Self {
            graph: StableGraph::default(),
            name_to_index_map: HashMap::new(),
            controllers: Vec::new(),
            ports: PortAllocator::new(),
            addresses,
            log: Rc::new(RefCell::new(Vec::new())),
            state: InstanceState::Absent,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == InstanceState::Running
    }

    pub fn controllers(&self) -> &[String] {
        &self.controllers
    }

    pub fn device(&self, name: &str) -> Option<&Device> {
        self.name_to_index_map.get(name).map(|idx| &self.graph[*idx])
    }

    pub fn device_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn links(&self) -> Vec<&EmulatedLink> {
        self.graph.edge_weights().collect()
    }

    /// Links connecting `a` and `b`, in either direction.
    pub fn links_between(&self, a: &str, b: &str) -> Vec<&EmulatedLink> {
        let (Some(&ia), Some(&ib)) = (self.name_to_index_map.get(a), self.name_to_index_map.get(b)) else {
            return Vec::new();
        };
        self.graph
            .edges(ia)
            .filter(|edge| edge.target() == ib)
            .map(|edge| edge.weight())
            .collect()
    }

    /// Commands sent to `name` so far, oldest first.
    pub fn commands(&self, name: &str) -> Vec<String> {
        self.log
            .borrow()
            .iter()
            .filter(|(node, _)| node == name)
            .map(|(_, command)| command.clone())
            .collect()
    }

    fn ensure_created(&self) -> EmulatorResult<()> {
        match self.state {
            InstanceState::Absent => Err(EmulatorError::InvalidState(
                "emulator instance not started".to_string(),
            )),
            _ => Ok(()),
        }
    }

    fn add_device(&mut self, name: &str, kind: NodeKind, dpid: u64) -> EmulatorResult<GraphNode> {
        self.ensure_created()?;
        if self.name_to_index_map.contains_key(name) {
            return Err(EmulatorError::DuplicateNode(name.to_string()));
        }
        let address = match kind {
            NodeKind::Host => Some(self.addresses.allocate()?),
            NodeKind::Switch => None,
        };
        let index = self.graph.add_node(Device::new(name, kind, dpid, address));
        self.name_to_index_map.insert(name.to_string(), index);
        Ok(GraphNode {
            name: name.to_string(),
            kind,
            log: Rc::clone(&self.log),
        })
    }

    fn index_of(&self, node: &GraphNode) -> EmulatorResult<NodeIndex> {
        self.name_to_index_map
            .get(&node.name)
            .copied()
            .ok_or_else(|| EmulatorError::UnknownNode(node.name.clone()))
    }
}

impl Emulator for GraphEmulator {
    type Node = GraphNode;

    fn start_instance(&mut self) -> EmulatorResult<()> {
        self.graph.clear();
        self.name_to_index_map.clear();
        self.controllers.clear();
        self.ports.clear();
        self.addresses.reset();
        self.log.borrow_mut().clear();
        self.state = InstanceState::Created;
        Ok(())
    }

    fn add_controller(&mut self, name: &str) -> EmulatorResult<()> {
        self.ensure_created()?;
        if self.controllers.iter().any(|c| c == name) {
            return Err(EmulatorError::DuplicateNode(name.to_string()));
        }
        self.controllers.push(name.to_string());
        Ok(())
    }

    fn add_switch(&mut self, name: &str, dpid: u64) -> EmulatorResult<GraphNode> {
        self.add_device(name, NodeKind::Switch, dpid)
    }

    fn add_host(&mut self, name: &str, dpid: u64) -> EmulatorResult<GraphNode> {
        self.add_device(name, NodeKind::Host, dpid)
    }

    fn add_link(
        &mut self,
        node_a: &GraphNode,
        node_b: &GraphNode,
        port_a: Option<u32>,
        port_b: Option<u32>,
    ) -> EmulatorResult<EmulatedLink> {
        self.ensure_created()?;
        let ia = self.index_of(node_a)?;
        let ib = self.index_of(node_b)?;
        let link = EmulatedLink {
            node_a: node_a.name.clone(),
            port_a: self.ports.claim(&node_a.name, node_a.kind, port_a)?,
            node_b: node_b.name.clone(),
            port_b: self.ports.claim(&node_b.name, node_b.kind, port_b)?,
        };
        debug!("link {} <-> {}", link.intf_a(), link.intf_b());
        self.graph.add_edge(ia, ib, link.clone());
        Ok(link)
    }

    fn start(&mut self) -> EmulatorResult<()> {
        self.ensure_created()?;
        info!(
            "dry run: {} devices, {} links",
            self.graph.node_count(),
            self.graph.edge_count()
        );
        self.state = InstanceState::Running;
        Ok(())
    }

    fn stop(&mut self) -> EmulatorResult<()> {
        self.ensure_created()?;
        self.state = InstanceState::Created;
        Ok(())
    }
}
