//! Simulated interface
//!
//! Emits the configured packets in order, one per interval, for running the
//! router without hardware.

use log::{debug, info};
use std::thread;
use std::time::{Duration, Instant};
use tcrlib::{InterfaceName, Packet, SimulatedConfig, TcrResult};

use crate::interface::{Interface, ReadOutcome};

pub struct SimulatedInterface {
    name: InterfaceName,
    targets: Vec<String>,
    config: SimulatedConfig,
    connected: bool,
    next_index: usize,
    next_at: Instant,
    written: u64,
}

impl SimulatedInterface {
    pub fn new(name: InterfaceName, targets: Vec<String>, config: SimulatedConfig) -> Self {
        Self {
            name,
            targets,
            config,
            connected: false,
            next_index: 0,
            next_at: Instant::now(),
            written: 0,
        }
    }

    /// Number of packets written to the simulator
    pub fn written(&self) -> u64 {
        self.written
    }

    fn next_packet(&mut self) -> Option<Packet> {
        let sim = self.config.packets.get(self.next_index % self.config.packets.len().max(1))?;
        self.next_index += 1;
        let packet = match &sim.identity {
            Some((target, packet)) => Packet::identified(sim.data.clone(), target, packet),
            None => Packet::new(sim.data.clone()),
        };
        Some(packet)
    }
}

impl Interface for SimulatedInterface {
    fn name(&self) -> &InterfaceName {
        &self.name
    }

    fn target_names(&self) -> &[String] {
        &self.targets
    }

    fn connect(&mut self) -> TcrResult<()> {
        self.connected = true;
        self.next_at = Instant::now() + self.config.interval;
        info!("{}: simulator connected", self.name);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn read(&mut self, timeout: Duration) -> TcrResult<ReadOutcome> {
        let now = Instant::now();
        if now < self.next_at {
            let wait = self.next_at - now;
            if wait > timeout {
                thread::sleep(timeout);
                return Ok(ReadOutcome::Timeout);
            }
            thread::sleep(wait);
        }
        self.next_at += self.config.interval;
        match self.next_packet() {
            Some(packet) => Ok(ReadOutcome::Packet(packet)),
            None => Ok(ReadOutcome::EndOfStream),
        }
    }

    fn write(&mut self, packet: &Packet) -> TcrResult<()> {
        self.written += 1;
        debug!("{}: simulator accepted {} bytes", self.name, packet.len());
        Ok(())
    }
}
