//! Supervisor for the set of interface threads
//!
//! Owns one `InterfaceThread` per configured interface and starts, stops
//! and reports on them as a group. A failure on one interface is reported
//! and never prevents the others from being started or stopped.

use log::{error, info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tcrlib::{
    ConnectionState, DefinitionTable, InterfaceName, RouterConfig, RouterSettings, Statistics,
    TcrError, TcrResult, WorkerState,
};

use crate::dispatcher::{CommandDispatcher, CommandRouter};
use crate::identifier::PacketIdentifier;
use crate::interface::{create_interface, Interface};
use crate::interface_thread::{InterfaceThread, ThreadCounter};

/// Snapshot of one interface thread
#[derive(Debug, Clone, Serialize)]
pub struct InterfaceStatus {
    pub name: InterfaceName,
    pub worker_state: WorkerState,
    pub connection_state: ConnectionState,
    pub statistics: Statistics,
}

/// Per-interface failures from a group operation
pub type Failures = Vec<(InterfaceName, TcrError)>;

pub struct Supervisor {
    threads: BTreeMap<InterfaceName, InterfaceThread>,
    identifier: Arc<PacketIdentifier>,
    dispatcher: Arc<dyn CommandDispatcher>,
    settings: RouterSettings,
    counter: ThreadCounter,
}

impl Supervisor {
    pub fn new(
        identifier: Arc<PacketIdentifier>,
        dispatcher: Arc<dyn CommandDispatcher>,
        settings: RouterSettings,
    ) -> Self {
        Self {
            threads: BTreeMap::new(),
            identifier,
            dispatcher,
            settings,
            counter: ThreadCounter::new(),
        }
    }

    /// Build the definition table, the routing dispatcher and every
    /// configured interface. Nothing is started.
    pub fn from_config(config: &RouterConfig) -> TcrResult<Self> {
        let table = DefinitionTable::new(config.commands.clone())?;
        info!("Loaded {} command definitions", table.len());

        let identifier = Arc::new(PacketIdentifier::new(Arc::new(table)));
        let router = CommandRouter::from_routes(&config.routes)?;
        info!("Configured {} routes", router.route_count());

        let mut supervisor = Self::new(identifier, Arc::new(router), config.settings);
        for interface_config in &config.interfaces {
            supervisor.add_interface(create_interface(interface_config)?)?;
        }
        Ok(supervisor)
    }

    /// Register an interface. It is not started.
    pub fn add_interface(&mut self, interface: Box<dyn Interface>) -> TcrResult<()> {
        let name = interface.name().clone();
        if self.threads.contains_key(&name) {
            return Err(TcrError::config(format!("Duplicate interface name: {}", name)));
        }

        let thread = InterfaceThread::new(interface, self.identifier.clone(), self.dispatcher.clone())
            .with_settings(self.settings)
            .with_counter(self.counter.clone());
        self.threads.insert(name, thread);
        Ok(())
    }

    /// Stop and forget an interface
    pub fn remove_interface(&mut self, name: &InterfaceName) -> TcrResult<()> {
        let mut thread = self
            .threads
            .remove(name)
            .ok_or_else(|| TcrError::Interface(format!("Unknown interface: {}", name)))?;
        thread.stop()
    }

    pub fn start(&mut self, name: &InterfaceName) -> TcrResult<()> {
        self.thread_mut(name)?.start()
    }

    pub fn stop(&mut self, name: &InterfaceName) -> TcrResult<()> {
        self.thread_mut(name)?.stop()
    }

    /// Start every interface thread, carrying on past failures
    pub fn start_all(&mut self) -> Failures {
        let mut failures = Failures::new();
        for (name, thread) in self.threads.iter_mut() {
            match thread.start() {
                Ok(()) => info!("{}: started", name),
                Err(e) => {
                    error!("{}: failed to start: {}", name, e);
                    failures.push((name.clone(), e));
                }
            }
        }
        failures
    }

    /// Stop every interface thread. All threads are signalled before any is
    /// waited on, so the total wait is bounded by one stop timeout rather
    /// than one per thread.
    pub fn stop_all(&mut self) -> Failures {
        for thread in self.threads.values() {
            thread.request_stop();
        }

        let deadline = Instant::now() + self.settings.stop_timeout;
        let mut failures = Failures::new();
        for (name, thread) in self.threads.iter_mut() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if let Err(e) = thread.stop_within(remaining) {
                warn!("{}: {}", name, e);
                failures.push((name.clone(), e));
            }
        }
        failures
    }

    /// Number of interface threads currently alive
    pub fn active_workers(&self) -> usize {
        self.counter.active()
    }

    pub fn status(&self) -> Vec<InterfaceStatus> {
        self.threads
            .values()
            .map(|thread| InterfaceStatus {
                name: thread.name().clone(),
                worker_state: thread.state(),
                connection_state: thread.connection_state(),
                statistics: thread.stats(),
            })
            .collect()
    }

    /// Statistics summed over every interface
    pub fn total_statistics(&self) -> Statistics {
        let mut total = Statistics::new().with_timestamp();
        for thread in self.threads.values() {
            total.accumulate(&thread.stats());
        }
        total
    }

    pub fn names(&self) -> impl Iterator<Item = &InterfaceName> {
        self.threads.keys()
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    fn thread_mut(&mut self, name: &InterfaceName) -> TcrResult<&mut InterfaceThread> {
        self.threads
            .get_mut(name)
            .ok_or_else(|| TcrError::Interface(format!("Unknown interface: {}", name)))
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.stop_all();
    }
}
