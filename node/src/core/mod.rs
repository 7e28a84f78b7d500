//! Per group runtime: one single threaded runner per group, reached through a [`GroupHandle`] and
//! the node wide [`GroupRegistry`].

pub(crate) mod builder;
pub(crate) mod handle;
pub(crate) mod registry;
pub(crate) mod runner;


pub use builder::GroupBuilder;
pub use handle::{GroupError, GroupHandle, GroupStatus};
pub use registry::{GroupRegistry, RegistryError};
pub use runner::GroupRunner;
