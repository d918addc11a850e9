//! BotNet neighbor networking.
//!
//! Everything a node needs to talk to other nodes over HTTPS.
//!
//! ## Architecture
//!
//! - **NeighborClient**: pooled HTTP client bound to one neighbor's base URL
//! - **NeighborRegistry**: bounded, lock-guarded table of neighbors
//! - **TopologyManager**: adds, pings and evicts neighbors
//! - **DiscoveryService**: `_botnet` TXT record lookup and manifest fetch
//! - **PublicKeyDirectory**: TTL cache of remote agents' keys, filled from neighbors
//! - **AgentLocationCache**: which node hosts which agent

pub mod client;
pub mod discovery;
pub mod key_directory;
pub mod location;
pub mod message;
pub mod registry;
pub mod topology;

pub use client::{ClientConfig, NeighborClient, WireError};
pub use discovery::{DiscoveredNode, DiscoveryService, StaticResolver, SystemResolver, TxtResolver};
pub use key_directory::PublicKeyDirectory;
pub use location::AgentLocationCache;
pub use registry::{NeighborEntry, NeighborRegistry, NeighborStatus};
pub use topology::{HealthReport, TopologyConfig, TopologyManager};
