//! Task Layer
//!
//! Poll tasks and the immutable registry that holds them.
//!
//! - [`TaskDescriptor`]: one metric key bound to an owned snapshot of its
//!   broker and queue, plus the gauge it writes into
//! - [`TaskRegistry`]: every descriptor of one configuration, built in full and
//!   never patched
//! - [`SharedRegistry`]: the atomically swapped reference to the live registry

mod descriptor;
mod registry;

pub use descriptor::TaskDescriptor;
pub use crate::metrics::RegistryChanges;
pub use registry::{BuildError, SharedRegistry, TaskRegistry};
