//! Packets read from interfaces
//!
//! The byte buffer is fixed once a packet has been read. Only the
//! identification fields change as the packet moves through the router.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One unit of received data plus its identification metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Packet {
    buffer: Vec<u8>,
    target_name: Option<String>,
    packet_name: Option<String>,
    received_time: DateTime<Utc>,
}

impl Packet {
    /// Create an unidentified packet received now
    pub fn new(buffer: impl Into<Vec<u8>>) -> Self {
        Self {
            buffer: buffer.into(),
            target_name: None,
            packet_name: None,
            received_time: Utc::now(),
        }
    }

    /// Create a packet already tagged with a target and packet name
    pub fn identified(
        buffer: impl Into<Vec<u8>>,
        target_name: impl Into<String>,
        packet_name: impl Into<String>,
    ) -> Self {
        let mut packet = Self::new(buffer);
        packet.set_identity(target_name, packet_name);
        packet
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn target_name(&self) -> Option<&str> {
        self.target_name.as_deref()
    }

    pub fn packet_name(&self) -> Option<&str> {
        self.packet_name.as_deref()
    }

    pub fn received_time(&self) -> DateTime<Utc> {
        self.received_time
    }

    pub fn set_received_time(&mut self, time: DateTime<Utc>) {
        self.received_time = time;
    }

    /// Tag the packet with a target and packet name. Empty names count as
    /// no identification.
    pub fn set_identity(&mut self, target_name: impl Into<String>, packet_name: impl Into<String>) {
        let target_name = target_name.into();
        let packet_name = packet_name.into();
        if target_name.is_empty() || packet_name.is_empty() {
            self.clear_identity();
        } else {
            self.target_name = Some(target_name);
            self.packet_name = Some(packet_name);
        }
    }

    pub fn clear_identity(&mut self) {
        self.target_name = None;
        self.packet_name = None;
    }

    /// Both names are present
    pub fn is_identified(&self) -> bool {
        self.target_name.is_some() && self.packet_name.is_some()
    }

    /// `(target, packet)` when identified
    pub fn identity(&self) -> Option<(&str, &str)> {
        match (self.target_name.as_deref(), self.packet_name.as_deref()) {
            (Some(target), Some(packet)) => Some((target, packet)),
            _ => None,
        }
    }
}
