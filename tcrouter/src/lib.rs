//! TCRouter - command routing for telemetry and command interfaces
//!
//! Each configured interface gets its own thread that connects, reads
//! packets, identifies them against the command definition table and hands
//! registered commands to the dispatcher for delivery downstream.

pub mod config;
pub mod dispatcher;
pub mod identifier;
pub mod interface;
pub mod interface_device;
pub mod interface_network;
pub mod interface_sim;
pub mod interface_thread;
pub mod supervisor;

pub use config::*;
pub use dispatcher::*;
pub use identifier::*;
pub use interface::*;
pub use interface_device::*;
pub use interface_network::*;
pub use interface_sim::*;
pub use interface_thread::*;
pub use supervisor::*;
