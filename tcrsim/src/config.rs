//! Simulator configuration

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tcrlib::{parse_hex, TcrError, TcrResult};

/// How a simulated target delivers packets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Listen for the router's TCP interface and send length-prefixed frames
    Tcp,
    /// Send one datagram per packet to the router's UDP interface
    Udp,
}

/// One packet a target sends, repeated in rotation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketTemplate {
    /// Identifying bytes at the start of the packet
    pub prefix: Vec<u8>,
    /// Total packet size; the bytes after the prefix hold a sequence number
    /// followed by random filler
    pub size: usize,
}

#[derive(Debug, Clone)]
pub struct TargetConfig {
    pub name: String,
    pub protocol: Protocol,
    pub address: SocketAddr,
    /// UDP only: where the router is listening
    pub destination: Option<SocketAddr>,
    pub interval: Duration,
    pub packets: Vec<PacketTemplate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketTemplateJson {
    pub prefix: String,
    pub size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfigJson {
    pub name: String,
    pub protocol: String,
    pub address: String,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    pub packets: Vec<PacketTemplateJson>,
}

fn default_interval_ms() -> u64 {
    1000
}

/// Simulator configuration file structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfigFile {
    pub version: String,
    #[serde(default)]
    pub description: String,
    pub targets: Vec<TargetConfigJson>,
}

fn parse_addr(text: &str) -> Result<SocketAddr, String> {
    text.parse()
        .map_err(|_| format!("Invalid socket address: {}", text))
}

impl PacketTemplateJson {
    pub fn to_template(&self) -> Result<PacketTemplate, String> {
        let prefix = parse_hex(&self.prefix)?;
        if self.size < prefix.len() + 4 {
            return Err(format!(
                "Packet size {} leaves no room for the sequence number after {} prefix bytes",
                self.size,
                prefix.len()
            ));
        }
        Ok(PacketTemplate {
            prefix,
            size: self.size,
        })
    }
}

impl TargetConfigJson {
    pub fn to_target_config(&self) -> Result<TargetConfig, String> {
        let protocol = match self.protocol.as_str() {
            "tcp" => Protocol::Tcp,
            "udp" => Protocol::Udp,
            _ => return Err(format!("Invalid protocol: {}", self.protocol)),
        };

        let destination = self.destination.as_deref().map(parse_addr).transpose()?;
        if protocol == Protocol::Udp && destination.is_none() {
            return Err(format!("UDP target {} needs a destination", self.name));
        }

        if self.packets.is_empty() {
            return Err(format!("Target {} has no packets", self.name));
        }
        let packets = self
            .packets
            .iter()
            .map(|p| p.to_template())
            .collect::<Result<Vec<_>, String>>()?;

        Ok(TargetConfig {
            name: self.name.clone(),
            protocol,
            address: parse_addr(&self.address)?,
            destination,
            interval: Duration::from_millis(self.interval_ms),
            packets,
        })
    }
}

/// Load the simulated targets from a JSON file
pub fn load_config<P: AsRef<Path>>(path: P) -> TcrResult<Vec<TargetConfig>> {
    let file = File::open(path)?;
    let config: SimConfigFile = serde_json::from_reader(BufReader::new(file))?;

    config
        .targets
        .iter()
        .map(|t| t.to_target_config())
        .collect::<Result<Vec<_>, String>>()
        .map_err(TcrError::Config)
}
