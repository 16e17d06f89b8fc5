pub mod agent;
pub mod config;
pub mod helpers;
pub mod store;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use agent::{AgentConfig, AgentId, Availability, ConfigPatch, Error, Policy, Registry, RelayError, Settings};
