/*!
Builder-facing platform interface.

This module defines:
- `PlatformError`: error type surfaced to the topology builder.
- `Platform`: the lifecycle a builder drives, in order
  `pre_build`, `add_node*`, `add_biport*`, `add_bilink*`, `post_build`, `destroy`.
- `PlatformNode`: the handle a builder gets back for every node it added.

Backends (e.g., Mininet) implement `Platform` and hide how they talk to their emulator.
*/

use thiserror::Error;

use crate::{
    emulator::EmulatorError,
    topology::model::{NmlLink, NmlNode, NmlPort, NodePort},
};

/// Error type for platform operations.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("Unsupported type {0}")]
    UnsupportedNodeType(String),
    #[error("Shell {0} is not supported for mininet")]
    UnsupportedShell(String),
    #[error("Unsupported interface")]
    UnsupportedInterface,
    #[error("Platform has not been built yet")]
    NotBuilt,
    #[error("Platform has already been built")]
    AlreadyBuilt,
    #[error("Node {0} already exists")]
    DuplicateNode(String),
    #[error("Port {port} already exists on node {node}")]
    DuplicatePort { node: String, port: String },
    #[error("Unknown node {0}")]
    UnknownNode(String),
    #[error("Unknown port {port} on node {node}")]
    UnknownPort { node: String, port: String },
    #[error("Emulator error: {0}")]
    Emulator(#[from] EmulatorError),
}

/// Convenience result alias for platform operations.
pub type PlatformResult<T> = Result<T, PlatformError>;

/// A backend able to materialize a topology.
pub trait Platform {
    type Node: PlatformNode;

    /// Brings up the backend. Runs once, before anything else.
    fn pre_build(&mut self) -> PlatformResult<()>;
    /// Materializes a node and returns its handle.
    fn add_node(&mut self, node: &NmlNode) -> PlatformResult<&Self::Node>;
    /// Registers a port on an already added node. Returns the port number.
    fn add_biport(&mut self, node: &NmlNode, port: &NmlPort) -> PlatformResult<u32>;
    /// Connects two endpoints.
    fn add_bilink(
        &mut self,
        nodeport_a: NodePort<'_>,
        nodeport_b: NodePort<'_>,
        link: &NmlLink,
    ) -> PlatformResult<()>;
    /// Starts the built topology.
    fn post_build(&mut self) -> PlatformResult<()>;
    /// Tears the topology down.
    fn destroy(&mut self) -> PlatformResult<()>;
}

/// Node handle returned by a platform.
pub trait PlatformNode {
    /// Runs a command on the node and returns its output.
    /// `shell` selects a non-default shell, if the backend has any.
    fn send_command(&self, command: &str, shell: Option<&str>) -> PlatformResult<String>;
    /// Sends raw data to the node, optionally through a named function.
    fn send_data(&self, data: &[u8], function: Option<&str>) -> PlatformResult<Vec<u8>>;
}
