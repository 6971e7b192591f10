use std::{collections::HashMap, fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::topology::platform::PlatformError;

/// Metadata key holding the node type discriminator.
pub const TYPE_KEY: &str = "type";

/// A node of the abstract topology, e.g. a switch or a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NmlNode {
    pub identifier: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl NmlNode {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// The raw `type` metadata. Nodes without one are switches.
    pub fn node_type(&self) -> &str {
        self.metadata
            .get(TYPE_KEY)
            .map(String::as_str)
            .unwrap_or("switch")
    }
}

/// A port owned by a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NmlPort {
    pub identifier: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl NmlPort {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            metadata: HashMap::new(),
        }
    }
}

/// A bidirectional link between two endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NmlLink {
    pub identifier: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl NmlLink {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            metadata: HashMap::new(),
        }
    }
}

/// One end of a link: a node and, optionally, one of its ports.
pub type NodePort<'a> = (&'a NmlNode, Option<&'a NmlPort>);

/// The kinds of device a node can be materialized as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Switch,
    Host,
}

impl NodeKind {
    /// First port number handed out when a link does not pin one.
    /// Switch ports start at 1, host interfaces at 0.
    pub fn port_base(&self) -> u32 {
        match self {
            NodeKind::Switch => 1,
            NodeKind::Host => 0,
        }
    }
}

impl FromStr for NodeKind {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "switch" => Ok(NodeKind::Switch),
            "host" => Ok(NodeKind::Host),
            other => Err(PlatformError::UnsupportedNodeType(other.to_string())),
        }
    }
}

impl Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeKind::Switch => write!(f, "switch"),
            NodeKind::Host => write!(f, "host"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_type_defaults_to_switch() {
        let node = NmlNode::new("s1");
        assert_eq!(node.node_type(), "switch");
        assert_eq!(node.node_type().parse::<NodeKind>().unwrap(), NodeKind::Switch);
    }

    #[test]
    fn test_node_kind_parsing() {
        assert_eq!("host".parse::<NodeKind>().unwrap(), NodeKind::Host);
        let err = "router".parse::<NodeKind>().unwrap_err();
        assert!(matches!(err, PlatformError::UnsupportedNodeType(t) if t == "router"));
    }

    #[test]
    fn test_node_deserialization() {
        let json = r#"{"identifier": "hs1", "metadata": {"type": "host", "name": "Host 1"}}"#;
        let node: NmlNode = serde_json::from_str(json).expect("Failed to deserialize node");
        assert_eq!(node.identifier, "hs1");
        assert_eq!(node.node_type(), "host");

        let bare: NmlPort = serde_json::from_str(r#"{"identifier": "p1"}"#).unwrap();
        assert!(bare.metadata.is_empty());
    }
}
