//! Device interface (/dev/* or a plain file read in fixed-size chunks)

use log::{debug, info};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::AsFd;
use std::time::Duration;
use tcrlib::{DeviceConfig, InterfaceName, Packet, TcrError, TcrResult};

use crate::interface::{wait_readable, Interface, ReadOutcome};

pub struct DeviceInterface {
    name: InterfaceName,
    targets: Vec<String>,
    config: DeviceConfig,
    reader: Option<File>,
    writer: Option<File>,
}

impl DeviceInterface {
    pub fn new(name: InterfaceName, targets: Vec<String>, config: DeviceConfig) -> Self {
        Self {
            name,
            targets,
            config,
            reader: None,
            writer: None,
        }
    }
}

impl Interface for DeviceInterface {
    fn name(&self) -> &InterfaceName {
        &self.name
    }

    fn target_names(&self) -> &[String] {
        &self.targets
    }

    fn connect(&mut self) -> TcrResult<()> {
        let file = File::open(&self.config.path)
            .map_err(|e| TcrError::connection(format!("{}: {}", self.config.path, e)))?;
        info!("{}: opened {}", self.name, self.config.path);
        self.reader = Some(file);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.writer = None;
        if self.reader.take().is_some() {
            debug!("{}: closed {}", self.name, self.config.path);
        }
    }

    fn is_connected(&self) -> bool {
        self.reader.is_some()
    }

    fn read(&mut self, timeout: Duration) -> TcrResult<ReadOutcome> {
        let file = self
            .reader
            .as_mut()
            .ok_or_else(|| TcrError::Interface(format!("{} is not connected", self.name)))?;
        if !wait_readable(file.as_fd(), timeout)? {
            return Ok(ReadOutcome::Timeout);
        }

        let mut buffer = vec![0u8; self.config.packet_size];
        let mut filled = 0;
        while filled < buffer.len() {
            match file.read(&mut buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(TcrError::read(e.to_string())),
            }
        }

        if filled == 0 {
            return Ok(ReadOutcome::EndOfStream);
        }
        // A short trailing chunk is passed on; identification decides if it matters
        buffer.truncate(filled);
        Ok(ReadOutcome::Packet(Packet::new(buffer)))
    }

    fn write(&mut self, packet: &Packet) -> TcrResult<()> {
        if self.writer.is_none() {
            let file = OpenOptions::new().write(true).open(&self.config.path)?;
            self.writer = Some(file);
        }
        if let Some(writer) = self.writer.as_mut() {
            writer.write_all(packet.buffer())?;
        }
        Ok(())
    }
}
