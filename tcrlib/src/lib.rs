//! TCRouter Shared Library (tcrlib)
//!
//! Definitions shared by the router process (tcrouter) and the target
//! simulator (tcrsim): packets, command definitions, configuration file
//! types and the common error type.

pub mod config;
pub mod definitions;
pub mod error;
pub mod packet;
pub mod types;

pub use config::*;
pub use definitions::*;
pub use error::*;
pub use packet::*;
pub use types::*;
