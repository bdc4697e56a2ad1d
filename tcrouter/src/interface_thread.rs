//! Interface thread implementation for tcrouter
//!
//! Each interface thread owns one interface and runs the
//! connect / read / identify / dispatch loop for it on a dedicated OS
//! thread. Failures on one interface (connection refused, read errors,
//! downstream dispatch errors) are logged and retried here and never reach
//! other interfaces.
//!
//! Stopping is cooperative: `stop()` raises a stop signal that the loop
//! checks after every blocking call, then waits a bounded time for the
//! thread to exit. Reads use a short timeout so the signal is seen promptly.

use log::{debug, error, info, warn};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tcrlib::{
    ConnectionState, InterfaceName, Packet, RouterSettings, RoutingOutcome, Statistics, TcrError,
    TcrResult, WorkerState,
};

use crate::dispatcher::CommandDispatcher;
use crate::identifier::{Identification, PacketIdentifier};
use crate::interface::{Interface, ReadOutcome};

/// Number of live interface threads
///
/// Shared by every interface thread started from the same place (normally
/// a supervisor). A thread counts from the moment it begins running until
/// it has released its interface.
#[derive(Debug, Clone, Default)]
pub struct ThreadCounter(Arc<AtomicUsize>);

impl ThreadCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn enter(&self) -> ActiveGuard {
        self.0.fetch_add(1, Ordering::SeqCst);
        ActiveGuard(self.clone())
    }
}

struct ActiveGuard(ThreadCounter);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        (self.0).0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Stop request that can also interrupt the reconnect delay
#[derive(Default)]
struct StopSignal {
    requested: Mutex<bool>,
    cvar: Condvar,
}

impl StopSignal {
    fn request(&self) {
        *self.requested.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.cvar.notify_all();
    }

    fn reset(&self) {
        *self.requested.lock().unwrap_or_else(PoisonError::into_inner) = false;
    }

    fn is_requested(&self) -> bool {
        *self.requested.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep for `timeout` or until a stop is requested. Returns whether a
    /// stop was requested.
    fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut requested = self.requested.lock().unwrap_or_else(PoisonError::into_inner);
        while !*requested {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            requested = self
                .cvar
                .wait_timeout(requested, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        *requested
    }
}

#[derive(Default)]
struct Counters {
    connect_attempts: AtomicU64,
    connect_failures: AtomicU64,
    read_errors: AtomicU64,
    packets_read: AtomicU64,
    bytes_read: AtomicU64,
    dispatched: AtomicU64,
    dispatch_failures: AtomicU64,
    unknown_commands: AtomicU64,
    unidentified: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_outcome(&self, outcome: &RoutingOutcome) {
        match outcome {
            RoutingOutcome::Dispatched => Self::bump(&self.dispatched),
            RoutingOutcome::DispatchFailed(_) => Self::bump(&self.dispatch_failures),
            RoutingOutcome::UnknownCommand { .. } => Self::bump(&self.unknown_commands),
            RoutingOutcome::Unidentified => Self::bump(&self.unidentified),
        }
    }

    fn snapshot(&self) -> Statistics {
        Statistics {
            timestamp: None,
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            packets_read: self.packets_read.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            dispatch_failures: self.dispatch_failures.load(Ordering::Relaxed),
            unknown_commands: self.unknown_commands.load(Ordering::Relaxed),
            unidentified: self.unidentified.load(Ordering::Relaxed),
        }
        .with_timestamp()
    }
}

/// State shared between an `InterfaceThread` and its running worker
struct Shared {
    stop: StopSignal,
    state: AtomicU8,
    connection: AtomicU8,
    counters: Counters,
    /// Holds the interface while no worker owns it
    slot: Mutex<Option<Box<dyn Interface>>>,
}

impl Shared {
    fn set_state(&self, state: WorkerState) {
        self.state.store(state.to_u8(), Ordering::SeqCst);
    }

    fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::SeqCst)).unwrap_or_default()
    }

    fn set_connection(&self, connection: ConnectionState) {
        self.connection.store(connection.to_u8(), Ordering::SeqCst);
    }

    fn connection(&self) -> ConnectionState {
        ConnectionState::from_u8(self.connection.load(Ordering::SeqCst)).unwrap_or_default()
    }

    fn take_interface(&self) -> Option<Box<dyn Interface>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    fn return_interface(&self, interface: Box<dyn Interface>) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(interface);
    }
}

/// Identifies one packet and routes it to the dispatcher
#[derive(Clone)]
pub struct PacketHandler {
    identifier: Arc<PacketIdentifier>,
    dispatcher: Arc<dyn CommandDispatcher>,
}

impl PacketHandler {
    pub fn new(identifier: Arc<PacketIdentifier>, dispatcher: Arc<dyn CommandDispatcher>) -> Self {
        Self {
            identifier,
            dispatcher,
        }
    }

    /// Handle one packet read from `interface`.
    ///
    /// Packets whose names are in the definition table are dispatched.
    /// Named packets that are not in the table are reported and dropped.
    /// Packets with no names at all are dropped quietly.
    pub fn handle_packet(&self, interface: &dyn Interface, mut packet: Packet) -> RoutingOutcome {
        let identification = self.identifier.identify(&mut packet, interface.target_names());

        let Some((target, name)) = packet.identity() else {
            debug!("{}: unidentified packet, {} bytes", interface.name(), packet.len());
            return RoutingOutcome::Unidentified;
        };

        if !self.identifier.table().contains(target, name) {
            warn!(
                "{}: Received unknown identified command: {} {}",
                interface.name(),
                target,
                name
            );
            return RoutingOutcome::UnknownCommand {
                target_name: target.to_string(),
                packet_name: name.to_string(),
            };
        }

        if identification == Identification::Matched {
            debug!("{}: identified {} {}", interface.name(), target, name);
        }

        // A panicking dispatcher is reported like any other routing failure
        let result = catch_unwind(AssertUnwindSafe(|| {
            self.dispatcher.send_command_to_interface(interface, &packet)
        }))
        .unwrap_or_else(|panic| Err(TcrError::dispatch(panic_message(panic.as_ref()))));

        match result {
            Ok(()) => RoutingOutcome::Dispatched,
            Err(e) => {
                error!(
                    "{}: Error routing command {} {}: {}",
                    interface.name(),
                    target,
                    name,
                    e
                );
                RoutingOutcome::DispatchFailed(e)
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("panic with no message")
        .to_string()
}

/// The part that runs on the worker thread
struct Worker {
    name: InterfaceName,
    shared: Arc<Shared>,
    handler: PacketHandler,
    settings: RouterSettings,
}

impl Worker {
    fn run(self) {
        let Some(mut interface) = self.shared.take_interface() else {
            error!("{}: interface is not available", self.name);
            self.shared.set_state(WorkerState::Stopped);
            return;
        };

        // stop() may already have moved us to Stopping
        let _ = self.shared.state.compare_exchange(
            WorkerState::Starting.to_u8(),
            WorkerState::Running.to_u8(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        info!("{}: interface thread started", self.name);

        // The interface goes back to the slot even if the loop panics
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| self.run_loop(interface.as_mut()))) {
            error!(
                "{}: interface thread panicked: {}",
                self.name,
                panic_message(panic.as_ref())
            );
        }

        interface.disconnect();
        self.shared.set_connection(ConnectionState::Disconnected);
        self.shared.return_interface(interface);
        info!("{}: interface thread exiting", self.name);
    }

    fn run_loop(&self, interface: &mut dyn Interface) {
        let counters = &self.shared.counters;

        while !self.shared.stop.is_requested() {
            if !interface.is_connected() {
                self.connect(interface);
                continue;
            }

            match interface.read(self.settings.read_timeout) {
                Ok(ReadOutcome::Packet(packet)) => {
                    Counters::bump(&counters.packets_read);
                    counters.bytes_read.fetch_add(packet.len() as u64, Ordering::Relaxed);
                    // Fully read, so it is handled even if a stop arrived meanwhile
                    let outcome = self.handler.handle_packet(interface, packet);
                    counters.record_outcome(&outcome);
                }
                Ok(ReadOutcome::Timeout) => {}
                Ok(ReadOutcome::EndOfStream) => {
                    info!("{}: connection lost", self.name);
                    self.connection_lost(interface);
                }
                Err(e) => {
                    Counters::bump(&counters.read_errors);
                    warn!("{}: error reading from interface: {}", self.name, e);
                    self.connection_lost(interface);
                }
            }
        }
    }

    fn connect(&self, interface: &mut dyn Interface) {
        let counters = &self.shared.counters;
        self.shared.set_connection(ConnectionState::Connecting);
        Counters::bump(&counters.connect_attempts);

        match interface.connect() {
            Ok(()) => {
                self.shared.set_connection(ConnectionState::Connected);
                info!("{}: connection success", self.name);
            }
            Err(e) => {
                Counters::bump(&counters.connect_failures);
                warn!("{}: connection failed: {}", self.name, e);
                self.shared.stop.wait(self.settings.reconnect_delay);
            }
        }
    }

    fn connection_lost(&self, interface: &mut dyn Interface) {
        interface.disconnect();
        self.shared.set_connection(ConnectionState::Connecting);
        self.shared.stop.wait(self.settings.reconnect_delay);
    }
}

struct WorkerHandle {
    join: JoinHandle<()>,
    /// Disconnects when the worker thread finishes
    done: Receiver<()>,
}

/// Owns one interface and the thread that routes its packets
pub struct InterfaceThread {
    name: InterfaceName,
    shared: Arc<Shared>,
    handler: PacketHandler,
    settings: RouterSettings,
    counter: ThreadCounter,
    worker: Option<WorkerHandle>,
}

impl InterfaceThread {
    /// Bind an interface to a thread. Nothing runs until `start()`.
    pub fn new(
        interface: Box<dyn Interface>,
        identifier: Arc<PacketIdentifier>,
        dispatcher: Arc<dyn CommandDispatcher>,
    ) -> Self {
        let name = interface.name().clone();
        let shared = Arc::new(Shared {
            stop: StopSignal::default(),
            state: AtomicU8::new(WorkerState::Stopped.to_u8()),
            connection: AtomicU8::new(ConnectionState::Disconnected.to_u8()),
            counters: Counters::default(),
            slot: Mutex::new(Some(interface)),
        });

        Self {
            name,
            shared,
            handler: PacketHandler::new(identifier, dispatcher),
            settings: RouterSettings::default(),
            counter: ThreadCounter::new(),
            worker: None,
        }
    }

    pub fn with_settings(mut self, settings: RouterSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Count this thread in a shared counter instead of its own
    pub fn with_counter(mut self, counter: ThreadCounter) -> Self {
        self.counter = counter;
        self
    }

    pub fn name(&self) -> &InterfaceName {
        &self.name
    }

    pub fn counter(&self) -> &ThreadCounter {
        &self.counter
    }

    pub fn state(&self) -> WorkerState {
        self.shared.state()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.connection()
    }

    pub fn stats(&self) -> Statistics {
        self.shared.counters.snapshot()
    }

    /// Whether a worker thread has been started and not yet joined
    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Launch the worker thread and return without waiting for a
    /// connection. Does nothing if the worker is already running.
    pub fn start(&mut self) -> TcrResult<()> {
        if self.worker.is_some() {
            if self.state() == WorkerState::Stopping {
                return Err(TcrError::Worker(format!("{} is still stopping", self.name)));
            }
            return Ok(());
        }

        let worker = Worker {
            name: self.name.clone(),
            shared: self.shared.clone(),
            handler: self.handler.clone(),
            settings: self.settings,
        };
        let counter = self.counter.clone();
        let (done_tx, done_rx) = mpsc::channel::<()>();

        self.shared.stop.reset();
        self.shared.set_state(WorkerState::Starting);

        let join = thread::Builder::new()
            .name(format!("router:{}", self.name))
            .spawn(move || {
                // Declared first so it is dropped last, after the counter
                // has been released
                let _done = done_tx;
                let _active = counter.enter();
                worker.run();
            })
            .map_err(|e| {
                self.shared.set_state(WorkerState::Stopped);
                TcrError::Worker(format!("{}: failed to spawn thread: {}", self.name, e))
            })?;

        self.worker = Some(WorkerHandle { join, done: done_rx });
        Ok(())
    }

    /// Ask the worker to stop without waiting for it
    pub fn request_stop(&self) {
        if self.worker.is_some() {
            self.shared.set_state(WorkerState::Stopping);
            self.shared.stop.request();
        }
    }

    /// Stop the worker and wait until it has exited and disconnected the
    /// interface. Safe to call repeatedly.
    pub fn stop(&mut self) -> TcrResult<()> {
        self.stop_within(self.settings.stop_timeout)
    }

    /// Like `stop()`, giving up after `timeout`. On timeout the worker is
    /// kept so a later call can finish the job.
    pub fn stop_within(&mut self, timeout: Duration) -> TcrResult<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };

        self.shared.set_state(WorkerState::Stopping);
        self.shared.stop.request();

        if let Err(RecvTimeoutError::Timeout) = worker.done.recv_timeout(timeout) {
            warn!("{}: interface thread did not stop in time", self.name);
            self.worker = Some(worker);
            return Err(TcrError::StopTimeout {
                name: self.name.to_string(),
                waited_ms: timeout.as_millis() as u64,
            });
        }

        let joined = worker.join.join();
        self.shared.set_state(WorkerState::Stopped);
        self.shared.set_connection(ConnectionState::Disconnected);
        joined.map_err(|_| TcrError::Worker(format!("{} thread panicked", self.name)))
    }
}

impl Drop for InterfaceThread {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.stop();
        }
    }
}
