//! Interface thread behaviour driven through scripted interfaces

use log::{Level, LevelFilter, Log, Metadata, Record};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::thread;
use std::time::{Duration, Instant};
use tcrlib::{
    CommandDefinition, ConnectionState, DefinitionTable, InterfaceName, Packet, RouterSettings,
    TcrError, TcrResult, WorkerState,
};
use tcrouter::{CommandDispatcher, Interface, InterfaceThread, PacketIdentifier, ReadOutcome, Supervisor};

// Captured log lines, formatted "LEVEL message"
static MESSAGES: Mutex<Vec<String>> = Mutex::new(Vec::new());
static LOGGER: CaptureLogger = CaptureLogger;
static INIT: Once = Once::new();

struct CaptureLogger;

impl Log for CaptureLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        MESSAGES
            .lock()
            .unwrap()
            .push(format!("{} {}", record.level(), record.args()));
    }

    fn flush(&self) {}
}

fn init_logging() {
    INIT.call_once(|| {
        log::set_logger(&LOGGER).unwrap();
        log::set_max_level(LevelFilter::Trace);
    });
}

/// Log lines emitted for one interface. Tests run in parallel, so every
/// test uses its own interface name.
fn messages_for(name: &str) -> Vec<String> {
    let prefix = format!("{}: ", name);
    MESSAGES
        .lock()
        .unwrap()
        .iter()
        .filter(|m| m.contains(&prefix))
        .cloned()
        .collect()
}

fn logged(name: &str, level: Level, text: &str) -> bool {
    let level = level.to_string();
    messages_for(name)
        .iter()
        .any(|m| m.starts_with(&level) && m.contains(text))
}

enum Step {
    EndOfStream,
    Error,
}

/// Shared view of what the worker did to a scripted interface
#[derive(Default)]
struct Script {
    connect_failures: AtomicUsize,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    is_connected_calls: AtomicUsize,
    reads: AtomicUsize,
    steps: Mutex<VecDeque<Step>>,
}

/// Reports disconnected on its very first is_connected() call and
/// connected after a successful connect. Every read takes `read_delay`
/// regardless of the timeout and returns a clone of `packet` unless a
/// scripted step says otherwise.
struct ScriptedInterface {
    name: InterfaceName,
    targets: Vec<String>,
    connected: bool,
    read_delay: Duration,
    packet: Packet,
    script: Arc<Script>,
}

impl ScriptedInterface {
    fn new(name: &str, packet: Packet, read_delay: Duration) -> (Self, Arc<Script>) {
        let script = Arc::new(Script::default());
        let interface = Self {
            name: InterfaceName::new(name),
            targets: Vec::new(),
            connected: false,
            read_delay,
            packet,
            script: script.clone(),
        };
        (interface, script)
    }
}

impl Interface for ScriptedInterface {
    fn name(&self) -> &InterfaceName {
        &self.name
    }

    fn target_names(&self) -> &[String] {
        &self.targets
    }

    fn connect(&mut self) -> TcrResult<()> {
        self.script.connects.fetch_add(1, Ordering::SeqCst);
        let remaining = self.script.connect_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.script.connect_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(TcrError::connection("connection refused"));
        }
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.script.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        let calls = self.script.is_connected_calls.fetch_add(1, Ordering::SeqCst);
        calls > 0 && self.connected
    }

    fn read(&mut self, _timeout: Duration) -> TcrResult<ReadOutcome> {
        thread::sleep(self.read_delay);
        self.script.reads.fetch_add(1, Ordering::SeqCst);
        match self.script.steps.lock().unwrap().pop_front() {
            Some(Step::EndOfStream) => Ok(ReadOutcome::EndOfStream),
            Some(Step::Error) => Err(TcrError::read("scripted read failure")),
            None => Ok(ReadOutcome::Packet(self.packet.clone())),
        }
    }

    fn write(&mut self, _packet: &Packet) -> TcrResult<()> {
        Ok(())
    }
}

/// Records every command it is handed; optionally fails each one
#[derive(Default)]
struct RecordingDispatcher {
    commands: Mutex<Vec<(String, String)>>,
    fail: bool,
}

impl RecordingDispatcher {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn count(&self) -> usize {
        self.commands.lock().unwrap().len()
    }
}

impl CommandDispatcher for RecordingDispatcher {
    fn send_command_to_interface(&self, _interface: &dyn Interface, packet: &Packet) -> TcrResult<()> {
        let (target, name) = packet.identity().unwrap();
        self.commands
            .lock()
            .unwrap()
            .push((target.to_string(), name.to_string()));
        if self.fail {
            Err(TcrError::dispatch("downstream unavailable"))
        } else {
            Ok(())
        }
    }
}

fn identifier(definitions: Vec<CommandDefinition>) -> Arc<PacketIdentifier> {
    Arc::new(PacketIdentifier::new(Arc::new(DefinitionTable::new(definitions).unwrap())))
}

fn registered() -> Arc<PacketIdentifier> {
    identifier(vec![CommandDefinition::new("TGT", "PKT").with_length(4)])
}

fn tgt_pkt() -> Packet {
    Packet::identified(vec![0, 1, 2, 3], "TGT", "PKT")
}

fn settings() -> RouterSettings {
    RouterSettings {
        read_timeout: Duration::from_millis(10),
        reconnect_delay: Duration::from_millis(20),
        stop_timeout: Duration::from_secs(3),
        status_interval: Duration::from_secs(1),
    }
}

fn wait_for(deadline: Duration, cond: impl Fn() -> bool) -> bool {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

#[test]
fn test_worker_count_and_registered_dispatch() {
    init_logging();
    let (interface, script) = ScriptedInterface::new("COUNT_INT", tgt_pkt(), Duration::from_millis(60));
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let mut worker = InterfaceThread::new(Box::new(interface), registered(), dispatcher.clone())
        .with_settings(settings());

    let before = worker.counter().active();
    worker.start().unwrap();
    thread::sleep(Duration::from_millis(100));
    assert_eq!(worker.counter().active(), before + 1);
    assert_eq!(worker.state(), WorkerState::Running);
    assert_eq!(worker.connection_state(), ConnectionState::Connected);

    worker.stop().unwrap();
    thread::sleep(Duration::from_millis(500));
    assert_eq!(worker.counter().active(), before);
    assert_eq!(worker.state(), WorkerState::Stopped);

    assert!(dispatcher.count() >= 1);
    assert_eq!(
        dispatcher.commands.lock().unwrap()[0],
        ("TGT".to_string(), "PKT".to_string())
    );
    assert!(script.disconnects.load(Ordering::SeqCst) >= 1);
    assert!(logged("COUNT_INT", Level::Info, "connection success"));
}

#[test]
fn test_unknown_identified_command_not_dispatched() {
    init_logging();
    let (interface, _script) = ScriptedInterface::new("UNKNOWN_INT", tgt_pkt(), Duration::from_millis(60));
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let mut worker = InterfaceThread::new(
        Box::new(interface),
        identifier(vec![CommandDefinition::new("OTHER", "CMD").with_length(4)]),
        dispatcher.clone(),
    )
    .with_settings(settings());

    worker.start().unwrap();
    thread::sleep(Duration::from_millis(200));
    worker.stop().unwrap();

    assert_eq!(dispatcher.count(), 0);
    assert!(logged(
        "UNKNOWN_INT",
        Level::Warn,
        "Received unknown identified command: TGT PKT"
    ));
    assert!(worker.stats().unknown_commands >= 1);
}

#[test]
fn test_dispatch_failure_does_not_stop_worker() {
    init_logging();
    let (interface, _script) = ScriptedInterface::new("FAIL_INT", tgt_pkt(), Duration::from_millis(20));
    let dispatcher = Arc::new(RecordingDispatcher::failing());
    let mut worker = InterfaceThread::new(Box::new(interface), registered(), dispatcher.clone())
        .with_settings(settings());

    worker.start().unwrap();
    assert!(wait_for(Duration::from_secs(2), || dispatcher.count() >= 3));
    assert_eq!(worker.state(), WorkerState::Running);
    assert_eq!(worker.counter().active(), 1);
    worker.stop().unwrap();

    assert!(logged("FAIL_INT", Level::Error, "Error routing command"));
    assert!(logged("FAIL_INT", Level::Error, "downstream unavailable"));
    assert!(worker.stats().dispatch_failures >= 3);
}

#[test]
fn test_connect_failures_are_retried() {
    init_logging();
    let (interface, script) = ScriptedInterface::new("RETRY_INT", tgt_pkt(), Duration::from_millis(10));
    script.connect_failures.store(2, Ordering::SeqCst);
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let mut worker = InterfaceThread::new(Box::new(interface), registered(), dispatcher.clone())
        .with_settings(settings());

    worker.start().unwrap();
    assert!(wait_for(Duration::from_secs(2), || dispatcher.count() >= 1));
    worker.stop().unwrap();

    assert_eq!(script.connects.load(Ordering::SeqCst), 3);
    let stats = worker.stats();
    assert_eq!(stats.connect_attempts, 3);
    assert_eq!(stats.connect_failures, 2);
    assert!(logged("RETRY_INT", Level::Warn, "connection failed"));
}

#[test]
fn test_end_of_stream_and_read_error_reconnect() {
    init_logging();
    let (interface, script) = ScriptedInterface::new("EOS_INT", tgt_pkt(), Duration::from_millis(5));
    script
        .steps
        .lock()
        .unwrap()
        .extend([Step::EndOfStream, Step::Error]);
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let mut worker = InterfaceThread::new(Box::new(interface), registered(), dispatcher.clone())
        .with_settings(settings());

    worker.start().unwrap();
    assert!(wait_for(Duration::from_secs(2), || dispatcher.count() >= 1));
    worker.stop().unwrap();

    assert_eq!(script.connects.load(Ordering::SeqCst), 3);
    assert_eq!(worker.stats().read_errors, 1);
    assert!(logged("EOS_INT", Level::Info, "connection lost"));
    assert!(logged("EOS_INT", Level::Warn, "scripted read failure"));
}

#[test]
fn test_unidentified_packets_are_silent() {
    init_logging();
    let (interface, _script) =
        ScriptedInterface::new("QUIET_INT", Packet::new(vec![9, 9]), Duration::from_millis(10));
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let mut worker = InterfaceThread::new(Box::new(interface), registered(), dispatcher.clone())
        .with_settings(settings());

    worker.start().unwrap();
    assert!(wait_for(Duration::from_secs(2), || worker.stats().unidentified >= 3));
    worker.stop().unwrap();

    assert_eq!(dispatcher.count(), 0);
    assert_eq!(worker.stats().unknown_commands, 0);
    assert!(messages_for("QUIET_INT")
        .iter()
        .all(|m| !m.starts_with("WARN") && !m.starts_with("ERROR")));
}

#[test]
fn test_stop_during_read_handles_packet_and_is_repeatable() {
    init_logging();
    let (interface, script) = ScriptedInterface::new("INFLIGHT_INT", tgt_pkt(), Duration::from_millis(300));
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let mut worker = InterfaceThread::new(Box::new(interface), registered(), dispatcher.clone())
        .with_settings(settings());

    worker.start().unwrap();
    thread::sleep(Duration::from_millis(100));
    worker.stop().unwrap();

    // The read in progress when stop() was called completed and was routed
    assert_eq!(script.reads.load(Ordering::SeqCst), 1);
    assert_eq!(dispatcher.count(), 1);
    assert_eq!(worker.counter().active(), 0);

    worker.stop().unwrap();
    worker.stop().unwrap();
    assert!(!worker.is_running());
}

#[test]
fn test_stop_times_out_then_completes() {
    init_logging();
    let (interface, _script) = ScriptedInterface::new("SLOW_INT", tgt_pkt(), Duration::from_millis(800));
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let mut worker = InterfaceThread::new(Box::new(interface), registered(), dispatcher)
        .with_settings(settings());

    worker.start().unwrap();
    thread::sleep(Duration::from_millis(100));

    let started = Instant::now();
    match worker.stop_within(Duration::from_millis(50)) {
        Err(TcrError::StopTimeout { name, waited_ms }) => {
            assert_eq!(name, "SLOW_INT");
            assert_eq!(waited_ms, 50);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(started.elapsed() < Duration::from_millis(500));
    assert!(worker.is_running());
    assert!(worker.start().is_err());

    worker.stop().unwrap();
    assert_eq!(worker.counter().active(), 0);
    assert_eq!(worker.state(), WorkerState::Stopped);
}

#[test]
fn test_stop_without_start() {
    init_logging();
    let (interface, script) = ScriptedInterface::new("IDLE_INT", tgt_pkt(), Duration::from_millis(10));
    let mut worker = InterfaceThread::new(
        Box::new(interface),
        registered(),
        Arc::new(RecordingDispatcher::default()),
    );
    worker.stop().unwrap();
    assert_eq!(worker.state(), WorkerState::Stopped);
    assert_eq!(script.connects.load(Ordering::SeqCst), 0);
}

#[test]
fn test_supervisor_isolates_failing_interface() {
    init_logging();
    let (good, _good_script) = ScriptedInterface::new("SUP_GOOD", tgt_pkt(), Duration::from_millis(10));
    let (bad, bad_script) = ScriptedInterface::new("SUP_BAD", tgt_pkt(), Duration::from_millis(10));
    bad_script.connect_failures.store(usize::MAX, Ordering::SeqCst);

    let dispatcher = Arc::new(RecordingDispatcher::default());
    let mut supervisor = Supervisor::new(registered(), dispatcher.clone(), settings());
    supervisor.add_interface(Box::new(good)).unwrap();
    supervisor.add_interface(Box::new(bad)).unwrap();

    assert!(supervisor.start_all().is_empty());
    assert!(wait_for(Duration::from_secs(2), || dispatcher.count() >= 2));
    assert_eq!(supervisor.active_workers(), 2);

    let status = supervisor.status();
    let bad_status = status.iter().find(|s| s.name.as_str() == "SUP_BAD").unwrap();
    assert_eq!(bad_status.worker_state, WorkerState::Running);
    assert_ne!(bad_status.connection_state, ConnectionState::Connected);
    assert!(bad_status.statistics.connect_failures >= 1);

    assert!(supervisor.stop_all().is_empty());
    assert_eq!(supervisor.active_workers(), 0);
}

#[test]
fn test_stop_all_reports_hung_workers_within_one_timeout() {
    init_logging();
    let stop_timeout = Duration::from_millis(200);
    let short_stop = RouterSettings {
        stop_timeout,
        ..settings()
    };

    let dispatcher = Arc::new(RecordingDispatcher::default());
    let mut supervisor = Supervisor::new(registered(), dispatcher, short_stop);
    for name in ["HUNG_A", "HUNG_B"] {
        let (hung, _script) = ScriptedInterface::new(name, tgt_pkt(), Duration::from_millis(1500));
        supervisor.add_interface(Box::new(hung)).unwrap();
    }
    let (calm, _script) = ScriptedInterface::new("HUNG_CALM", tgt_pkt(), Duration::from_millis(10));
    supervisor.add_interface(Box::new(calm)).unwrap();

    assert!(supervisor.start_all().is_empty());
    thread::sleep(Duration::from_millis(100));
    assert_eq!(supervisor.active_workers(), 3);

    let started = Instant::now();
    let failures = supervisor.stop_all();
    let elapsed = started.elapsed();

    // One shared deadline, not one per hung worker
    assert!(elapsed >= stop_timeout);
    assert!(elapsed < stop_timeout * 2, "stop_all took {:?}", elapsed);

    let mut failed: Vec<&str> = failures
        .iter()
        .map(|(name, e)| {
            assert!(matches!(e, TcrError::StopTimeout { .. }), "unexpected {:?}", e);
            name.as_str()
        })
        .collect();
    failed.sort();
    assert_eq!(failed, vec!["HUNG_A", "HUNG_B"]);

    let status = supervisor.status();
    let calm = status.iter().find(|s| s.name.as_str() == "HUNG_CALM").unwrap();
    assert_eq!(calm.worker_state, WorkerState::Stopped);
    assert!(status
        .iter()
        .filter(|s| s.name.as_str() != "HUNG_CALM")
        .all(|s| s.worker_state == WorkerState::Stopping));

    // Once the slow reads finish, a second stop_all completes cleanly
    assert!(wait_for(Duration::from_secs(3), || supervisor.active_workers() == 0));
    assert!(supervisor.stop_all().is_empty());
    assert!(supervisor
        .status()
        .iter()
        .all(|s| s.worker_state == WorkerState::Stopped));
}
