//! Configuration file types
//!
//! The JSON-facing structs mirror the file layout loosely and are converted
//! into validated runtime structs with the `to_*` methods.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::definitions::{CommandDefinition, IdItem};
use crate::types::InterfaceName;

pub const DEFAULT_READ_TIMEOUT_MS: u64 = 50;
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 1000;
pub const DEFAULT_STOP_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_STATUS_INTERVAL_MS: u64 = 10000;

/// Router configuration file structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfigFile {
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub router: RouterSettingsJson,
    pub interfaces: Vec<InterfaceConfigJson>,
    #[serde(default)]
    pub routes: Vec<RouteConfigJson>,
    #[serde(default)]
    pub commands: Vec<CommandDefinitionJson>,
}

impl RouterConfigFile {
    pub fn to_router_config(&self) -> Result<RouterConfig, String> {
        let interfaces = self
            .interfaces
            .iter()
            .map(|i| i.to_interface_config())
            .collect::<Result<Vec<_>, String>>()?;

        let mut names: Vec<&InterfaceName> = interfaces.iter().map(|i| &i.name).collect();
        names.sort();
        if let Some(pair) = names.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(format!("Duplicate interface name: {}", pair[0]));
        }

        let routes = self
            .routes
            .iter()
            .map(|r| r.to_route_config())
            .collect::<Result<Vec<_>, String>>()?;

        let commands = self
            .commands
            .iter()
            .map(|c| c.to_command_definition())
            .collect::<Result<Vec<_>, String>>()?;

        Ok(RouterConfig {
            settings: self.router.to_router_settings()?,
            interfaces,
            routes,
            commands,
        })
    }
}

/// Validated router configuration
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub settings: RouterSettings,
    pub interfaces: Vec<InterfaceConfig>,
    pub routes: Vec<RouteConfig>,
    pub commands: Vec<CommandDefinition>,
}

/// JSON representation of the router settings block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterSettingsJson {
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
    #[serde(default = "default_status_interval_ms")]
    pub status_interval_ms: u64,
}

fn default_read_timeout_ms() -> u64 {
    DEFAULT_READ_TIMEOUT_MS
}

fn default_reconnect_delay_ms() -> u64 {
    DEFAULT_RECONNECT_DELAY_MS
}

fn default_stop_timeout_ms() -> u64 {
    DEFAULT_STOP_TIMEOUT_MS
}

fn default_status_interval_ms() -> u64 {
    DEFAULT_STATUS_INTERVAL_MS
}

impl Default for RouterSettingsJson {
    fn default() -> Self {
        Self {
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            stop_timeout_ms: DEFAULT_STOP_TIMEOUT_MS,
            status_interval_ms: DEFAULT_STATUS_INTERVAL_MS,
        }
    }
}

impl RouterSettingsJson {
    pub fn to_router_settings(&self) -> Result<RouterSettings, String> {
        if self.read_timeout_ms == 0 {
            return Err("read_timeout_ms must be greater than zero".to_string());
        }
        if self.stop_timeout_ms < self.read_timeout_ms {
            return Err("stop_timeout_ms must not be shorter than read_timeout_ms".to_string());
        }
        Ok(RouterSettings {
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            stop_timeout: Duration::from_millis(self.stop_timeout_ms),
            status_interval: Duration::from_millis(self.status_interval_ms),
        })
    }
}

/// Timing used by every interface thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterSettings {
    /// Bound on a single blocking read; also bounds how long a stop request
    /// can go unnoticed
    pub read_timeout: Duration,
    /// Wait between connection attempts
    pub reconnect_delay: Duration,
    /// How long stop() waits for the thread to exit
    pub stop_timeout: Duration,
    /// How often the binary logs a status summary
    pub status_interval: Duration,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            stop_timeout: Duration::from_millis(DEFAULT_STOP_TIMEOUT_MS),
            status_interval: Duration::from_millis(DEFAULT_STATUS_INTERVAL_MS),
        }
    }
}

/// TCP client endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TcpConfig {
    pub address: String,
    pub port: u16,
}

/// UDP endpoint; reads arrive on the bound port, writes go to the remote
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UdpConfig {
    pub address: String,
    pub port: u16,
    pub remote_address: Option<String>,
    pub remote_port: Option<u16>,
}

/// Device endpoint (/dev/* or a plain file)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceConfig {
    pub path: String,
    pub packet_size: usize,
}

/// A packet produced by a simulated interface
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SimulatedPacket {
    /// Pre-identification applied by the simulator, if any
    pub identity: Option<(String, String)>,
    pub data: Vec<u8>,
}

/// In-process packet generator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SimulatedConfig {
    pub interval: Duration,
    pub packets: Vec<SimulatedPacket>,
}

/// Interface endpoint kind
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum InterfaceKind {
    Tcp(TcpConfig),
    Udp(UdpConfig),
    Device(DeviceConfig),
    Simulated(SimulatedConfig),
}

/// Interface configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InterfaceConfig {
    pub name: InterfaceName,
    pub kind: InterfaceKind,
    /// Targets whose command definitions are used to identify packets read
    /// from this interface. Empty means every target.
    pub targets: Vec<String>,
}

/// JSON representation of a simulated packet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedPacketJson {
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub packet: Option<String>,
    pub data: String,
}

/// JSON representation of an interface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceConfigJson {
    pub name: String,
    #[serde(rename = "type")]
    pub if_type: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub remote_address: Option<String>,
    #[serde(default)]
    pub remote_port: Option<u16>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub packet_size: Option<usize>,
    #[serde(default)]
    pub interval_ms: Option<u64>,
    #[serde(default)]
    pub packets: Vec<SimulatedPacketJson>,
    #[serde(default)]
    pub targets: Vec<String>,
}

impl InterfaceConfigJson {
    pub fn to_interface_config(&self) -> Result<InterfaceConfig, String> {
        if self.name.is_empty() {
            return Err("Interface name must not be empty".to_string());
        }

        let kind = match self.if_type.as_str() {
            "tcp" => InterfaceKind::Tcp(TcpConfig {
                address: self.address.clone().ok_or("Missing address")?,
                port: self.port.ok_or("Missing port")?,
            }),
            "udp" => InterfaceKind::Udp(UdpConfig {
                address: self.address.clone().unwrap_or_else(|| "0.0.0.0".to_string()),
                port: self.port.ok_or("Missing port")?,
                remote_address: self.remote_address.clone(),
                remote_port: self.remote_port,
            }),
            "device" => InterfaceKind::Device(DeviceConfig {
                path: self.path.clone().ok_or("Missing path")?,
                packet_size: match self.packet_size {
                    Some(0) | None => return Err("Missing or zero packet_size".to_string()),
                    Some(size) => size,
                },
            }),
            "simulated" => {
                let packets = self
                    .packets
                    .iter()
                    .map(|p| p.to_simulated_packet())
                    .collect::<Result<Vec<_>, String>>()?;
                if packets.is_empty() {
                    return Err(format!("Simulated interface {} has no packets", self.name));
                }
                InterfaceKind::Simulated(SimulatedConfig {
                    interval: Duration::from_millis(self.interval_ms.unwrap_or(1000)),
                    packets,
                })
            }
            _ => return Err(format!("Invalid interface type: {}", self.if_type)),
        };

        Ok(InterfaceConfig {
            name: InterfaceName::new(&self.name),
            kind,
            targets: self.targets.clone(),
        })
    }
}

impl SimulatedPacketJson {
    pub fn to_simulated_packet(&self) -> Result<SimulatedPacket, String> {
        let identity = match (&self.target, &self.packet) {
            (Some(target), Some(packet)) => Some((target.clone(), packet.clone())),
            (None, None) => None,
            _ => return Err("Simulated packet needs both target and packet, or neither".to_string()),
        };
        Ok(SimulatedPacket {
            identity,
            data: parse_hex(&self.data)?,
        })
    }
}

/// Downstream handler for a target's commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteHandlerConfig {
    /// Write commands to this interface
    Interface(InterfaceConfig),
    /// Accept and drop
    Discard,
}

/// Route from a target to its downstream handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteConfig {
    pub target: String,
    pub handler: RouteHandlerConfig,
}

/// JSON representation of a route
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfigJson {
    pub target: String,
    #[serde(rename = "type")]
    pub route_type: String,
    #[serde(default)]
    pub interface: Option<InterfaceConfigJson>,
}

impl RouteConfigJson {
    pub fn to_route_config(&self) -> Result<RouteConfig, String> {
        let handler = match self.route_type.as_str() {
            "interface" => {
                let interface = self
                    .interface
                    .as_ref()
                    .ok_or_else(|| format!("Route for {} is missing its interface", self.target))?;
                RouteHandlerConfig::Interface(interface.to_interface_config()?)
            }
            "discard" => RouteHandlerConfig::Discard,
            _ => return Err(format!("Invalid route type: {}", self.route_type)),
        };
        Ok(RouteConfig {
            target: self.target.clone(),
            handler,
        })
    }
}

/// JSON representation of an ID item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdItemJson {
    pub offset: usize,
    /// Hex string, e.g. "0x1ACF" or "1a cf"
    pub value: String,
}

/// JSON representation of a command definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandDefinitionJson {
    pub target: String,
    pub packet: String,
    #[serde(default)]
    pub length: Option<usize>,
    #[serde(default)]
    pub min_length: Option<usize>,
    #[serde(default)]
    pub id_items: Vec<IdItemJson>,
}

impl CommandDefinitionJson {
    pub fn to_command_definition(&self) -> Result<CommandDefinition, String> {
        let id_items = self
            .id_items
            .iter()
            .map(|item| -> Result<IdItem, String> {
                Ok(IdItem::new(item.offset, parse_hex(&item.value)?))
            })
            .collect::<Result<Vec<_>, String>>()?;
        let def = CommandDefinition {
            target_name: self.target.clone(),
            packet_name: self.packet.clone(),
            length: self.length,
            min_length: self.min_length,
            id_items,
        };
        if !def.is_structural() {
            return Err(format!(
                "Command {} {} needs a length or at least one id item",
                self.target, self.packet
            ));
        }
        Ok(def)
    }
}

/// Parse a hex string, allowing an optional 0x prefix and whitespace
pub fn parse_hex(text: &str) -> Result<Vec<u8>, String> {
    let trimmed = text.trim();
    let digits: String = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed)
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if digits.is_empty() || digits.len() % 2 != 0 || !digits.is_ascii() {
        return Err(format!("Invalid hex value: {:?}", text));
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|_| format!("Invalid hex value: {:?}", text))
        })
        .collect()
}
