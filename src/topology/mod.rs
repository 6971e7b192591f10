/*!
Topology module

This module defines the builder-facing side of a platform.

Structure:
- `model`: The abstract topology entities (`NmlNode`, `NmlPort`, `NmlLink`) handed
           over by the topology builder, plus the `NodeKind` discriminator.
- `platform`: The lifecycle traits (`Platform`, `PlatformNode`) every backend implements,
              plus the error type surfaced to the builder.

Re-exports:
- Everything a builder needs to drive a platform without reaching into submodules.
*/

pub mod model;
pub mod platform;

pub use model::{NmlLink, NmlNode, NmlPort, NodeKind, NodePort};
pub use platform::{Platform, PlatformError, PlatformNode, PlatformResult};
