//! Command dispatch
//!
//! The dispatcher is shared by every interface thread and forwards an
//! identified command to the downstream handler for its target. Callers
//! take no lock; the router holds its route table behind an `RwLock` that
//! is released before the handler runs, and each handler serializes its
//! own downstream access.

use log::{debug, info};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, RwLock};
use tcrlib::{Packet, RouteConfig, RouteHandlerConfig, TcrError, TcrResult};

use crate::interface::{create_interface, Interface};

/// Routes identified command packets to their downstream handlers
pub trait CommandDispatcher: Send + Sync {
    /// Forward `packet`, received on `interface`, to the handler for the
    /// packet's target
    fn send_command_to_interface(&self, interface: &dyn Interface, packet: &Packet) -> TcrResult<()>;
}

/// A downstream consumer of commands for one target
pub trait CommandHandler: Send + Sync {
    fn name(&self) -> &str;

    fn handle_command(&self, packet: &Packet) -> TcrResult<()>;
}

/// Dispatcher with a route per target
#[derive(Default)]
pub struct CommandRouter {
    routes: RwLock<BTreeMap<String, Arc<dyn CommandHandler>>>,
    sent: AtomicU64,
    failed: AtomicU64,
}

impl CommandRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a router from configured routes. Interfaces used as handlers
    /// are created here but only connect on first use.
    pub fn from_routes(routes: &[RouteConfig]) -> TcrResult<Self> {
        let router = Self::new();
        for route in routes {
            let handler: Arc<dyn CommandHandler> = match &route.handler {
                RouteHandlerConfig::Interface(config) => {
                    Arc::new(InterfaceHandler::new(create_interface(config)?))
                }
                RouteHandlerConfig::Discard => Arc::new(DiscardHandler::new(&route.target)),
            };
            if router.add_route(&route.target, handler)?.is_some() {
                return Err(TcrError::config(format!("Duplicate route for target {}", route.target)));
            }
        }
        Ok(router)
    }

    /// Install the handler for a target, returning the one it replaced
    pub fn add_route(
        &self,
        target: &str,
        handler: Arc<dyn CommandHandler>,
    ) -> TcrResult<Option<Arc<dyn CommandHandler>>> {
        let mut routes = self
            .routes
            .write()
            .map_err(|_| TcrError::dispatch("route table lock poisoned"))?;
        info!("Routing commands for {} to {}", target, handler.name());
        Ok(routes.insert(target.to_string(), handler))
    }

    pub fn remove_route(&self, target: &str) -> TcrResult<Option<Arc<dyn CommandHandler>>> {
        let mut routes = self
            .routes
            .write()
            .map_err(|_| TcrError::dispatch("route table lock poisoned"))?;
        Ok(routes.remove(target))
    }

    pub fn route_count(&self) -> usize {
        self.routes.read().map(|r| r.len()).unwrap_or(0)
    }

    fn handler_for(&self, target: &str) -> TcrResult<Option<Arc<dyn CommandHandler>>> {
        let routes = self
            .routes
            .read()
            .map_err(|_| TcrError::dispatch("route table lock poisoned"))?;
        Ok(routes.get(target).cloned())
    }

    /// Commands forwarded successfully
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Commands that failed to route
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

impl CommandRouter {
    fn route(&self, interface: &dyn Interface, packet: &Packet) -> TcrResult<()> {
        let (target, name) = packet
            .identity()
            .ok_or_else(|| TcrError::dispatch("packet is not identified"))?;
        let handler = self.handler_for(target)?.ok_or_else(|| TcrError::NoRoute {
            target: target.to_string(),
            packet: name.to_string(),
        })?;
        debug!("{}: {} {} -> {}", interface.name(), target, name, handler.name());
        handler.handle_command(packet)
    }
}

impl CommandDispatcher for CommandRouter {
    fn send_command_to_interface(&self, interface: &dyn Interface, packet: &Packet) -> TcrResult<()> {
        let result = self.route(interface, packet);
        match &result {
            Ok(()) => self.sent.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.failed.fetch_add(1, Ordering::Relaxed),
        };
        result
    }
}

/// Writes commands to an interface owned by the handler
pub struct InterfaceHandler {
    name: String,
    interface: Mutex<Box<dyn Interface>>,
}

impl InterfaceHandler {
    pub fn new(interface: Box<dyn Interface>) -> Self {
        Self {
            name: interface.name().to_string(),
            interface: Mutex::new(interface),
        }
    }
}

impl CommandHandler for InterfaceHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle_command(&self, packet: &Packet) -> TcrResult<()> {
        let mut interface = self
            .interface
            .lock()
            .map_err(|_| TcrError::dispatch(format!("{} lock poisoned", self.name)))?;
        if !interface.is_connected() {
            interface.connect()?;
        }
        if let Err(e) = interface.write(packet) {
            // Reconnect on the next command
            interface.disconnect();
            return Err(e);
        }
        Ok(())
    }
}

/// Queues commands on a channel, e.g. for a store or logging consumer
pub struct ChannelHandler {
    name: String,
    sender: Sender<Packet>,
}

impl ChannelHandler {
    pub fn new(name: impl Into<String>, sender: Sender<Packet>) -> Self {
        Self {
            name: name.into(),
            sender,
        }
    }
}

impl CommandHandler for ChannelHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle_command(&self, packet: &Packet) -> TcrResult<()> {
        self.sender
            .send(packet.clone())
            .map_err(|_| TcrError::Channel(format!("{} receiver dropped", self.name)))
    }
}

/// Accepts and drops commands
pub struct DiscardHandler {
    name: String,
    count: AtomicU64,
}

impl DiscardHandler {
    pub fn new(target: &str) -> Self {
        Self {
            name: format!("discard:{}", target),
            count: AtomicU64::new(0),
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl CommandHandler for DiscardHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle_command(&self, _packet: &Packet) -> TcrResult<()> {
        self.count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
