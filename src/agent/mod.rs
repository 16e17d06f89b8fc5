pub mod connection;
pub mod error;
pub mod fanout;
pub mod messages;
pub mod registry;
pub mod relay;
pub mod types;

pub use connection::AgentConnection;
pub use error::{Error, RelayError, TransportError, ValidationError};
pub use fanout::{BroadcastEntry, OverviewRow, Policy};
pub use registry::{Registry, Settings};
pub use types::{Address, AgentConfig, AgentId, AgentSnapshot, Availability, ConfigPatch, Credential};
