/*!
Namespace-backed emulator.

`NetnsEmulator` builds a Mininet network on the emulation host:
- every host is a network namespace,
- every switch is an Open vSwitch bridge in the root namespace,
- every link is a veth pair named `<node>-eth<port>` on both ends,
- every controller is an `ovs-testcontroller` listening on consecutive ports.

All of it happens through a [`CommandRunner`], so the host can be local or remote.
*/

use std::{collections::HashMap, rc::Rc};

use ipnetwork::IpNetwork;
use log::{debug, info, warn};

use crate::{
    emulator::{
        EmulatedLink, EmulatedNode, Emulator, EmulatorError, EmulatorResult, HostAddressPool,
        PortAllocator, format_dpid, intf_name,
    },
    runner::{CommandOutput, CommandRunner, shell_quote},
    topology::NodeKind,
};

pub const DEFAULT_CONTROLLER_PORT: u16 = 6653;

/// Node handle handed out by [`NetnsEmulator`].
#[derive(Debug)]
pub struct NetnsNode<R> {
    name: String,
    kind: NodeKind,
    runner: Rc<R>,
}

impl<R> Clone for NetnsNode<R> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            kind: self.kind,
            runner: Rc::clone(&self.runner),
        }
    }
}

impl<R: CommandRunner> EmulatedNode for NetnsNode<R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Hosts run the command inside their namespace, switches in the root namespace.
    /// Like a terminal, the output is returned whatever the exit status.
    fn cmd(&self, command: &str) -> EmulatorResult<String> {
        let line = match self.kind {
            NodeKind::Host => format!(
                "ip netns exec {} sh -c {}",
                shell_quote(&self.name)?,
                shell_quote(command)?
            ),
            NodeKind::Switch => command.to_string(),
        };
        debug!("{}: {}", self.name, command);
        Ok(self.runner.run(&line)?.combined())
    }
}

#[derive(Debug, Clone)]
struct NodeState {
    kind: NodeKind,
    address: Option<IpNetwork>,
    /// (port, interface) pairs in link order
    intfs: Vec<(u32, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InstanceState {
    Absent,
    Created,
    Running,
}

/// Mininet-style emulator driving `ip` and `ovs-vsctl` on the emulation host.
pub struct NetnsEmulator<R> {
    runner: Rc<R>,
    controller_port: u16,
    order: Vec<String>,
    nodes: HashMap<String, NodeState>,
    links: Vec<EmulatedLink>,
    controllers: Vec<String>,
    /// Controllers whose process was launched, killed on stop whatever the state.
    started_controllers: Vec<String>,
    ports: PortAllocator,
    addresses: HostAddressPool,
    state: InstanceState,
}

impl<R: CommandRunner> NetnsEmulator<R> {
    pub fn new(runner: R, addresses: HostAddressPool, controller_port: u16) -> Self {
        Self {
            runner: Rc::new(runner),
            controller_port,
            order: Vec::new(),
            nodes: HashMap::new(),
            links: Vec::new(),
            controllers: Vec::new(),
            started_controllers: Vec::new(),
            ports: PortAllocator::new(),
            addresses,
            state: InstanceState::Absent,
        }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn links(&self) -> &[EmulatedLink] {
        &self.links
    }

    pub fn is_running(&self) -> bool {
        self.state == InstanceState::Running
    }

    /// Address assigned to host `name`.
    pub fn host_address(&self, name: &str) -> Option<IpNetwork> {
        self.nodes.get(name).and_then(|node| node.address)
    }

    fn exec(&self, command: &str) -> EmulatorResult<CommandOutput> {
        debug!("exec: {}", command);
        let output = self.runner.run(command)?;
        if !output.success() {
            return Err(EmulatorError::Command {
                command: command.to_string(),
                status: output.status,
                stderr: output.error_text().to_string(),
            });
        }
        Ok(output)
    }

    fn ensure_created(&self) -> EmulatorResult<()> {
        match self.state {
            InstanceState::Absent => Err(EmulatorError::InvalidState(
                "emulator instance not started".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Fails before anything is created on the host when `name` is taken.
    fn check_new(&self, name: &str) -> EmulatorResult<()> {
        self.ensure_created()?;
        if self.nodes.contains_key(name) {
            return Err(EmulatorError::DuplicateNode(name.to_string()));
        }
        Ok(())
    }

    fn insert(&mut self, name: &str, kind: NodeKind, address: Option<IpNetwork>) -> NetnsNode<R> {
        self.order.push(name.to_string());
        self.nodes.insert(
            name.to_string(),
            NodeState {
                kind,
                address,
                intfs: Vec::new(),
            },
        );
        NetnsNode {
            name: name.to_string(),
            kind,
            runner: Rc::clone(&self.runner),
        }
    }

    fn attach(&mut self, node: &str, port: u32) -> EmulatorResult<()> {
        let intf = intf_name(node, port);
        let state = self
            .nodes
            .get(node)
            .ok_or_else(|| EmulatorError::UnknownNode(node.to_string()))?;
        let command = match state.kind {
            NodeKind::Host => format!(
                "ip link set {} netns {}",
                shell_quote(&intf)?,
                shell_quote(node)?
            ),
            NodeKind::Switch => format!(
                "ovs-vsctl add-port {} {} -- set Interface {} ofport_request={}",
                shell_quote(node)?,
                shell_quote(&intf)?,
                shell_quote(&intf)?,
                port
            ),
        };
        self.exec(&command)?;
        if let Some(state) = self.nodes.get_mut(node) {
            state.intfs.push((port, intf));
        }
        Ok(())
    }

    fn pidfile(controller: &str) -> String {
        format!("/tmp/topology-mininet-{}.pid", controller)
    }

    fn controller_targets(&self) -> Vec<String> {
        (0..self.controllers.len())
            .map(|i| format!("tcp:127.0.0.1:{}", self.controller_port as usize + i))
            .collect()
    }

    fn controller_command(&self, index: usize, controller: &str) -> EmulatorResult<String> {
        Ok(format!(
            "ovs-testcontroller ptcp:{} --detach --pidfile={}",
            self.controller_port as usize + index,
            shell_quote(&Self::pidfile(controller))?
        ))
    }

    fn node_start_commands(&self) -> EmulatorResult<Vec<String>> {
        let mut commands = Vec::new();
        let targets = self.controller_targets().join(" ");
        for name in &self.order {
            let Some(state) = self.nodes.get(name) else {
                continue;
            };
            let q = shell_quote(name)?;
            match state.kind {
                NodeKind::Switch => {
                    for (_, intf) in &state.intfs {
                        commands.push(format!("ip link set {} up", shell_quote(intf)?));
                    }
                    if !targets.is_empty() {
                        commands.push(format!("ovs-vsctl set-controller {} {}", q, targets));
                    }
                }
                NodeKind::Host => {
                    for (_, intf) in &state.intfs {
                        commands.push(format!(
                            "ip netns exec {} ip link set {} up",
                            q,
                            shell_quote(intf)?
                        ));
                    }
                    // The address goes on the lowest-numbered interface
                    let default_intf = state.intfs.iter().min_by_key(|(port, _)| *port);
                    if let (Some(address), Some((_, intf))) = (state.address, default_intf) {
                        commands.push(format!(
                            "ip netns exec {} ip addr add {} dev {}",
                            q,
                            address,
                            shell_quote(intf)?
                        ));
                    }
                }
            }
        }
        Ok(commands)
    }

    fn stop_commands(&self) -> EmulatorResult<Vec<String>> {
        let mut commands = Vec::new();
        for name in &self.order {
            if let Some(NodeKind::Switch) = self.nodes.get(name).map(|s| s.kind) {
                commands.push(format!("ovs-vsctl --if-exists del-br {}", shell_quote(name)?));
            }
        }
        // veth pairs with no end inside a namespace survive the bridges
        for link in &self.links {
            let both_switches = [&link.node_a, &link.node_b]
                .iter()
                .all(|n| matches!(self.nodes.get(*n).map(|s| s.kind), Some(NodeKind::Switch)));
            if both_switches {
                commands.push(format!("ip link del {}", shell_quote(&link.intf_a())?));
            }
        }
        for name in &self.order {
            if let Some(NodeKind::Host) = self.nodes.get(name).map(|s| s.kind) {
                commands.push(format!("ip netns del {}", shell_quote(name)?));
            }
        }
        for controller in &self.started_controllers {
            commands.push(format!(
                "kill \"$(cat {})\"",
                shell_quote(&Self::pidfile(controller))?
            ));
        }
        Ok(commands)
    }

    fn reset(&mut self) {
        self.order.clear();
        self.nodes.clear();
        self.links.clear();
        self.controllers.clear();
        self.started_controllers.clear();
        self.ports.clear();
        self.addresses.reset();
    }
}

impl<R: CommandRunner> Emulator for NetnsEmulator<R> {
    type Node = NetnsNode<R>;

    fn start_instance(&mut self) -> EmulatorResult<()> {
        if self.state != InstanceState::Absent {
            return Err(EmulatorError::InvalidState(
                "emulator instance already started".to_string(),
            ));
        }
        // Fails when Open vSwitch is not installed or its daemon is down
        self.exec("ovs-vsctl show")?;
        self.reset();
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

    fn add_switch(&mut self, name: &str, dpid: u64) -> EmulatorResult<NetnsNode<R>> {
        self.check_new(name)?;
        let q = shell_quote(name)?;
        self.exec(&format!(
            "ovs-vsctl --may-exist add-br {} -- set bridge {} other_config:datapath-id={} fail_mode=secure",
            q,
            q,
            format_dpid(dpid)
        ))?;
        Ok(self.insert(name, NodeKind::Switch, None))
    }

    fn add_host(&mut self, name: &str, _dpid: u64) -> EmulatorResult<NetnsNode<R>> {
        self.check_new(name)?;
        // The address is only taken once the namespace exists
        let mut addresses = self.addresses.clone();
        let address = addresses.allocate()?;
        let q = shell_quote(name)?;
        self.exec(&format!("ip netns add {}", q))?;
        self.addresses = addresses;
        let node = self.insert(name, NodeKind::Host, Some(address));
        self.exec(&format!("ip netns exec {} ip link set lo up", q))?;
        Ok(node)
    }

    fn add_link(
        &mut self,
        node_a: &NetnsNode<R>,
        node_b: &NetnsNode<R>,
        port_a: Option<u32>,
        port_b: Option<u32>,
    ) -> EmulatorResult<EmulatedLink> {
        self.ensure_created()?;
        for node in [node_a, node_b] {
            if !self.nodes.contains_key(&node.name) {
                return Err(EmulatorError::UnknownNode(node.name.clone()));
            }
        }
        let link = EmulatedLink {
            node_a: node_a.name.clone(),
            port_a: self.ports.claim(&node_a.name, node_a.kind, port_a)?,
            node_b: node_b.name.clone(),
            port_b: self.ports.claim(&node_b.name, node_b.kind, port_b)?,
        };
        self.exec(&format!(
            "ip link add {} type veth peer name {}",
            shell_quote(&link.intf_a())?,
            shell_quote(&link.intf_b())?
        ))?;
        self.attach(&link.node_a, link.port_a)?;
        self.attach(&link.node_b, link.port_b)?;
        self.links.push(link.clone());
        Ok(link)
    }

    fn start(&mut self) -> EmulatorResult<()> {
        self.ensure_created()?;
        if self.state == InstanceState::Running {
            return Err(EmulatorError::InvalidState("network already running".to_string()));
        }
        info!(
            "starting {} controllers, {} nodes, {} links",
            self.controllers.len(),
            self.order.len(),
            self.links.len()
        );
        let controllers = self.controllers.clone();
        for (i, controller) in controllers.iter().enumerate() {
            if self.started_controllers.contains(controller) {
                continue;
            }
            let command = self.controller_command(i, controller)?;
            self.exec(&command)?;
            self.started_controllers.push(controller.clone());
        }
        for command in self.node_start_commands()? {
            self.exec(&command)?;
        }
        self.state = InstanceState::Running;
        Ok(())
    }

    /// Tears everything down. Every teardown command is attempted, the first failure is returned.
    fn stop(&mut self) -> EmulatorResult<()> {
        self.ensure_created()?;
        info!("stopping network");
        let mut first_error = None;
        let commands = match self.stop_commands() {
            Ok(commands) => commands,
            Err(e) => {
                first_error = Some(e);
                Vec::new()
            }
        };
        for command in commands {
            if let Err(e) = self.exec(&command) {
                warn!("teardown: {}", e);
                first_error.get_or_insert(e);
            }
        }
        self.reset();
        self.state = InstanceState::Absent;
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::testing::RecordingRunner;

    fn emulator(runner: RecordingRunner) -> NetnsEmulator<RecordingRunner> {
        let mut emulator = NetnsEmulator::new(runner, HostAddressPool::default(), DEFAULT_CONTROLLER_PORT);
        emulator.start_instance().unwrap();
        emulator.runner().take();
        emulator
    }

    #[test]
    fn test_start_instance_checks_ovs() {
        let mut emulator = NetnsEmulator::new(
            RecordingRunner::failing_on("ovs-vsctl show"),
            HostAddressPool::default(),
            DEFAULT_CONTROLLER_PORT,
        );
        let err = emulator.start_instance().unwrap_err();
        assert!(matches!(err, EmulatorError::Command { status: 1, ref stderr, .. } if stderr == "boom"));
    }

    #[test]
    fn test_build_commands() {
        let mut emulator = emulator(RecordingRunner::default());
        emulator.add_controller("c0").unwrap();
        let s1 = emulator.add_switch("s1", 0).unwrap();
        let h1 = emulator.add_host("h1", 1).unwrap();
        emulator.add_link(&h1, &s1, Some(1), None).unwrap();
        assert_eq!(
            emulator.runner().take(),
            vec![
                "ovs-vsctl --may-exist add-br s1 -- set bridge s1 other_config:datapath-id=0000000000000000 fail_mode=secure",
                "ip netns add h1",
                "ip netns exec h1 ip link set lo up",
                "ip link add h1-eth1 type veth peer name s1-eth1",
                "ip link set h1-eth1 netns h1",
                "ovs-vsctl add-port s1 s1-eth1 -- set Interface s1-eth1 ofport_request=1",
            ]
        );

        emulator.start().unwrap();
        assert!(emulator.is_running());
        assert_eq!(
            emulator.runner().take(),
            vec![
                "ovs-testcontroller ptcp:6653 --detach --pidfile=/tmp/topology-mininet-c0.pid",
                "ip link set s1-eth1 up",
                "ovs-vsctl set-controller s1 tcp:127.0.0.1:6653",
                "ip netns exec h1 ip link set h1-eth1 up",
                "ip netns exec h1 ip addr add 10.0.0.1/8 dev h1-eth1",
            ]
        );

        emulator.stop().unwrap();
        assert!(!emulator.is_running());
        assert_eq!(
            emulator.runner().take(),
            vec![
                "ovs-vsctl --if-exists del-br s1",
                "ip netns del h1",
                "kill \"$(cat /tmp/topology-mininet-c0.pid)\"",
            ]
        );
    }

    #[test]
    fn test_failed_start_still_kills_controller() {
        let mut emulator = emulator(RecordingRunner::failing_on("ip link set s1-eth1 up"));
        emulator.add_controller("c0").unwrap();
        let s1 = emulator.add_switch("s1", 0).unwrap();
        let h1 = emulator.add_host("h1", 1).unwrap();
        emulator.add_link(&h1, &s1, None, None).unwrap();
        emulator.runner().take();

        let err = emulator.start().unwrap_err();
        assert!(matches!(err, EmulatorError::Command { ref command, .. } if command == "ip link set s1-eth1 up"));
        assert!(!emulator.is_running());
        emulator.runner().take();

        emulator.stop().unwrap();
        let teardown = emulator.runner().take();
        assert_eq!(
            teardown.last().map(String::as_str),
            Some("kill \"$(cat /tmp/topology-mininet-c0.pid)\"")
        );
    }

    #[test]
    fn test_controller_not_started_is_not_killed() {
        let mut emulator = emulator(RecordingRunner::failing_on("ovs-testcontroller"));
        emulator.add_controller("c0").unwrap();
        emulator.add_switch("s1", 0).unwrap();
        emulator.runner().take();

        assert!(emulator.start().is_err());
        emulator.runner().take();
        emulator.stop().unwrap();
        assert_eq!(emulator.runner().take(), vec!["ovs-vsctl --if-exists del-br s1"]);
    }

    #[test]
    fn test_switch_to_switch_links_are_deleted() {
        let mut emulator = emulator(RecordingRunner::default());
        let s1 = emulator.add_switch("s1", 0).unwrap();
        let s2 = emulator.add_switch("s2", 1).unwrap();
        let link = emulator.add_link(&s1, &s2, None, None).unwrap();
        assert_eq!((link.port_a, link.port_b), (1, 1));
        emulator.runner().take();

        emulator.stop().unwrap();
        assert_eq!(
            emulator.runner().take(),
            vec![
                "ovs-vsctl --if-exists del-br s1",
                "ovs-vsctl --if-exists del-br s2",
                "ip link del s1-eth1",
            ]
        );
    }

    #[test]
    fn test_teardown_reports_first_error() {
        let mut emulator = emulator(RecordingRunner::failing_on("netns del h1"));
        emulator.add_host("h1", 0).unwrap();
        emulator.add_host("h2", 1).unwrap();
        emulator.runner().take();

        let err = emulator.stop().unwrap_err();
        assert!(matches!(err, EmulatorError::Command { ref command, .. } if command == "ip netns del h1"));
        assert_eq!(
            emulator.runner().take(),
            vec!["ip netns del h1", "ip netns del h2"]
        );
    }

    #[test]
    fn test_host_cmd_runs_in_namespace() {
        let mut emulator = emulator(RecordingRunner::default());
        let h1 = emulator.add_host("h1", 0).unwrap();
        let s1 = emulator.add_switch("s1", 1).unwrap();
        emulator.runner().take();

        assert_eq!(h1.cmd("ping -c 1 10.0.0.2").unwrap(), "out\n");
        s1.cmd("ovs-ofctl dump-flows s1").unwrap();
        let commands = emulator.runner().take();
        assert_eq!(
            shlex::split(&commands[0]).unwrap(),
            vec!["ip", "netns", "exec", "h1", "sh", "-c", "ping -c 1 10.0.0.2"]
        );
        assert_eq!(commands[1], "ovs-ofctl dump-flows s1");
    }

    #[test]
    fn test_cmd_with_nul_is_rejected() {
        let mut emulator = emulator(RecordingRunner::default());
        let h1 = emulator.add_host("h1", 0).unwrap();
        emulator.runner().take();

        assert!(matches!(h1.cmd("echo \0"), Err(EmulatorError::Runner(_))));
        assert!(emulator.runner().take().is_empty());
    }

    #[test]
    fn test_pinned_port_conflict() {
        let mut emulator = emulator(RecordingRunner::default());
        let s1 = emulator.add_switch("s1", 0).unwrap();
        let h1 = emulator.add_host("h1", 1).unwrap();
        let h2 = emulator.add_host("h2", 2).unwrap();
        emulator.add_link(&h1, &s1, None, Some(3)).unwrap();
        let err = emulator.add_link(&h2, &s1, None, Some(3)).unwrap_err();
        assert!(matches!(err, EmulatorError::PortInUse { port: 3, .. }));
        assert_eq!(emulator.host_address("h2").unwrap().to_string(), "10.0.0.2/8");
    }

    #[test]
    fn test_exhausted_pool_creates_no_namespace() {
        let mut emulator = NetnsEmulator::new(
            RecordingRunner::default(),
            HostAddressPool::new("192.168.1.0/30".parse().unwrap()),
            DEFAULT_CONTROLLER_PORT,
        );
        emulator.start_instance().unwrap();
        emulator.add_host("h1", 0).unwrap();
        emulator.add_host("h2", 1).unwrap();
        emulator.runner().take();

        let err = emulator.add_host("h3", 2).unwrap_err();
        assert!(matches!(err, EmulatorError::AddressPoolExhausted(_)));
        assert!(emulator.runner().take().is_empty());
        assert!(emulator.host_address("h3").is_none());
    }

    #[test]
    fn test_failed_namespace_keeps_address() {
        let mut emulator = emulator(RecordingRunner::failing_on("ip netns add h1"));
        assert!(emulator.add_host("h1", 0).is_err());
        emulator.add_host("h2", 1).unwrap();
        assert!(emulator.host_address("h1").is_none());
        assert_eq!(emulator.host_address("h2").unwrap().to_string(), "10.0.0.1/8");
    }

    #[test]
    fn test_duplicate_names_touch_nothing() {
        let mut emulator = emulator(RecordingRunner::default());
        emulator.add_switch("s1", 0).unwrap();
        emulator.add_host("h1", 1).unwrap();
        emulator.runner().take();

        assert!(matches!(emulator.add_switch("s1", 2), Err(EmulatorError::DuplicateNode(_))));
        assert!(matches!(emulator.add_host("h1", 3), Err(EmulatorError::DuplicateNode(_))));
        assert!(matches!(emulator.add_host("s1", 4), Err(EmulatorError::DuplicateNode(_))));
        assert!(emulator.runner().take().is_empty());
        assert_eq!(emulator.host_address("h1").unwrap().to_string(), "10.0.0.1/8");
    }

    #[test]
    fn test_dpid_past_nine() {
        let mut emulator = emulator(RecordingRunner::default());
        for dpid in 0..=10 {
            emulator.add_switch(&format!("s{}", dpid), dpid).unwrap();
        }
        let commands = emulator.runner().take();
        assert_eq!(commands.len(), 11);
        assert!(commands[10].contains("other_config:datapath-id=0000000000000010 "));
        assert!(commands[9].contains("other_config:datapath-id=0000000000000009 "));
    }
}
