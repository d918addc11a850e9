//! Core kernel for a BotNet node.
//!
//! The kernel wires identity, storage, topology, discovery and the key
//! directory into a [`BotnetNode`] and runs its background loops.

pub mod background;
pub mod challenge;
pub mod config;
pub mod error;
pub mod federation;
pub mod identity;
pub mod node;
pub mod supervisor;

pub use error::{KernelError, KernelResult};
pub use federation::{AgentRoute, BroadcastReport, IncomingOutcome};
pub use identity::{IdentityKind, IdentityStore};
pub use node::BotnetNode;
