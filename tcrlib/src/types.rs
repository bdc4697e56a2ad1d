//! Type definitions shared between the router and its tools

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::TcrError;

/// Interface name
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InterfaceName(pub String);

impl InterfaceName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InterfaceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Connection state of an interface, as seen by its owning worker
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn to_u8(&self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ConnectionState::Disconnected),
            1 => Some(ConnectionState::Connecting),
            2 => Some(ConnectionState::Connected),
            _ => None,
        }
    }
}

/// Lifecycle state of an interface thread
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum WorkerState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl WorkerState {
    pub fn to_u8(&self) -> u8 {
        match self {
            WorkerState::Stopped => 0,
            WorkerState::Starting => 1,
            WorkerState::Running => 2,
            WorkerState::Stopping => 3,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(WorkerState::Stopped),
            1 => Some(WorkerState::Starting),
            2 => Some(WorkerState::Running),
            3 => Some(WorkerState::Stopping),
            _ => None,
        }
    }
}

/// Result of handling one packet read from an interface
#[derive(Debug)]
pub enum RoutingOutcome {
    /// Forwarded to the dispatcher successfully
    Dispatched,
    /// The dispatcher (or its downstream handler) failed
    DispatchFailed(TcrError),
    /// Identified as a (target, packet) pair with no registered definition
    UnknownCommand { target_name: String, packet_name: String },
    /// Could not be identified at all
    Unidentified,
}

impl RoutingOutcome {
    pub fn is_dispatched(&self) -> bool {
        matches!(self, RoutingOutcome::Dispatched)
    }
}

/// Per-interface routing statistics
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Statistics {
    /// When the snapshot was taken
    pub timestamp: Option<DateTime<Utc>>,
    pub connect_attempts: u64,
    pub connect_failures: u64,
    pub read_errors: u64,
    pub packets_read: u64,
    pub bytes_read: u64,
    pub dispatched: u64,
    pub dispatch_failures: u64,
    pub unknown_commands: u64,
    pub unidentified: u64,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timestamp(mut self) -> Self {
        self.timestamp = Some(Utc::now());
        self
    }

    /// Add another snapshot's counters into this one
    pub fn accumulate(&mut self, other: &Statistics) {
        self.connect_attempts += other.connect_attempts;
        self.connect_failures += other.connect_failures;
        self.read_errors += other.read_errors;
        self.packets_read += other.packets_read;
        self.bytes_read += other.bytes_read;
        self.dispatched += other.dispatched;
        self.dispatch_failures += other.dispatch_failures;
        self.unknown_commands += other.unknown_commands;
        self.unidentified += other.unidentified;
    }
}
