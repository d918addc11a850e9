//! Core types for BotNet nodes.
//!
//! Shared data structures, the error taxonomy, node configuration and the
//! Ed25519 signing protocol used by every other crate in the workspace.
//! Nothing here touches the network or the filesystem.

pub mod agent;
pub mod challenge;
pub mod config;
pub mod error;
pub mod manifest;
pub mod message;
pub mod node;
pub mod signing;

pub use error::{BotnetError, BotnetResult};
