/*!
Mininet platform backend for topology builders.

A topology builder drives a [`topology::Platform`] through a fixed lifecycle:
`pre_build`, then any number of `add_node`, `add_biport` and `add_bilink`,
then `post_build` and finally `destroy`. [`platform::MininetPlatform`] maps
those calls onto an [`emulator::Emulator`].

Two emulators ship with the crate:
- [`emulator::NetnsEmulator`] builds the network out of network namespaces,
  veth pairs and Open vSwitch bridges, the same way Mininet does. Commands are
  executed through a [`runner::CommandRunner`], locally or over SSH.
- [`emulator::GraphEmulator`] only records the network in a graph. Useful for
  dry runs and tests.
*/

pub mod config;
pub mod emulator;
pub mod platform;
pub mod runner;
pub mod topology;

pub use config::{ConfigError, PlatformConfig, RunnerConfig};
pub use emulator::{EmulatedLink, EmulatedNode, Emulator, EmulatorError, GraphEmulator, NetnsEmulator};
pub use platform::{MininetNode, MininetPlatform};
pub use topology::{NmlLink, NmlNode, NmlPort, NodeKind, Platform, PlatformError, PlatformNode};
