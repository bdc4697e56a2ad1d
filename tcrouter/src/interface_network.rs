//! Network interfaces: TCP client and UDP socket
//!
//! TCP frames carry a 4-byte big-endian length prefix. UDP carries one
//! packet per datagram.

use log::{debug, info};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs, UdpSocket};
use std::os::fd::AsFd;
use std::time::Duration;
use tcrlib::{InterfaceName, Packet, TcpConfig, TcrError, TcrResult, UdpConfig};

use crate::config::constants::{CONNECT_TIMEOUT, FRAME_READ_TIMEOUT, MAX_PACKET_SIZE};
use crate::interface::{wait_readable, Interface, ReadOutcome};

fn resolve(address: &str, port: u16) -> TcrResult<SocketAddr> {
    (address, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| TcrError::connection(format!("No address for {}:{}", address, port)))
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

/// TCP client interface
pub struct TcpInterface {
    name: InterfaceName,
    targets: Vec<String>,
    config: TcpConfig,
    stream: Option<TcpStream>,
}

impl TcpInterface {
    pub fn new(name: InterfaceName, targets: Vec<String>, config: TcpConfig) -> Self {
        Self {
            name,
            targets,
            config,
            stream: None,
        }
    }

    fn stream(&mut self) -> TcrResult<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| TcrError::Interface(format!("{} is not connected", self.name)))
    }
}

impl Interface for TcpInterface {
    fn name(&self) -> &InterfaceName {
        &self.name
    }

    fn target_names(&self) -> &[String] {
        &self.targets
    }

    fn connect(&mut self) -> TcrResult<()> {
        let addr = resolve(&self.config.address, self.config.port)?;
        let stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)
            .map_err(|e| TcrError::connection(format!("{}: {}", addr, e)))?;
        stream.set_nodelay(true)?;
        // Only bounds the tail of a frame; waiting for a frame to start is
        // done with poll()
        stream.set_read_timeout(Some(FRAME_READ_TIMEOUT))?;
        stream.set_write_timeout(Some(FRAME_READ_TIMEOUT))?;
        info!("{}: connected to {}", self.name, addr);
        self.stream = Some(stream);
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
            debug!("{}: disconnected", self.name);
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn read(&mut self, timeout: Duration) -> TcrResult<ReadOutcome> {
        let stream = self.stream()?;
        if !wait_readable(stream.as_fd(), timeout)? {
            return Ok(ReadOutcome::Timeout);
        }

        let mut len_bytes = [0u8; 4];
        match stream.read(&mut len_bytes[..1]) {
            Ok(0) => return Ok(ReadOutcome::EndOfStream),
            Ok(_) => {}
            Err(e) if is_timeout(&e) => return Ok(ReadOutcome::Timeout),
            Err(e) => return Err(TcrError::read(e.to_string())),
        }

        // A frame has started; the rest must follow within the frame timeout
        stream
            .read_exact(&mut len_bytes[1..])
            .map_err(|e| TcrError::read(format!("incomplete frame header: {}", e)))?;
        let len = u32::from_be_bytes(len_bytes) as usize;
        if len > MAX_PACKET_SIZE {
            return Err(TcrError::read(format!("frame length {} exceeds {}", len, MAX_PACKET_SIZE)));
        }

        let mut buffer = vec![0u8; len];
        stream
            .read_exact(&mut buffer)
            .map_err(|e| TcrError::read(format!("incomplete frame body: {}", e)))?;
        Ok(ReadOutcome::Packet(Packet::new(buffer)))
    }

    fn write(&mut self, packet: &Packet) -> TcrResult<()> {
        let len = u32::try_from(packet.len())
            .map_err(|_| TcrError::Interface("packet too large".to_string()))?;
        let stream = self.stream()?;
        stream.write_all(&len.to_be_bytes())?;
        stream.write_all(packet.buffer())?;
        stream.flush()?;
        Ok(())
    }
}

/// UDP interface
pub struct UdpInterface {
    name: InterfaceName,
    targets: Vec<String>,
    config: UdpConfig,
    socket: Option<UdpSocket>,
    /// Where writes go when no remote is configured
    last_peer: Option<SocketAddr>,
    recv_buffer: Vec<u8>,
}

impl UdpInterface {
    pub fn new(name: InterfaceName, targets: Vec<String>, config: UdpConfig) -> Self {
        Self {
            name,
            targets,
            config,
            socket: None,
            last_peer: None,
            recv_buffer: vec![0u8; MAX_PACKET_SIZE],
        }
    }

    /// Local address after connect(); useful when bound to port 0
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    fn remote(&self) -> TcrResult<Option<SocketAddr>> {
        match (&self.config.remote_address, self.config.remote_port) {
            (Some(address), Some(port)) => Ok(Some(resolve(address, port)?)),
            _ => Ok(self.last_peer),
        }
    }
}

impl Interface for UdpInterface {
    fn name(&self) -> &InterfaceName {
        &self.name
    }

    fn target_names(&self) -> &[String] {
        &self.targets
    }

    fn connect(&mut self) -> TcrResult<()> {
        let addr = resolve(&self.config.address, self.config.port)?;
        let socket = UdpSocket::bind(addr)
            .map_err(|e| TcrError::connection(format!("bind {}: {}", addr, e)))?;
        info!("{}: listening on UDP {}", self.name, addr);
        self.socket = Some(socket);
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.socket.take().is_some() {
            debug!("{}: socket closed", self.name);
        }
    }

    fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    fn read(&mut self, timeout: Duration) -> TcrResult<ReadOutcome> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| TcrError::Interface(format!("{} is not connected", self.name)))?;
        // A zero read timeout is rejected by the socket layer
        socket.set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;

        match socket.recv_from(&mut self.recv_buffer) {
            Ok((0, _)) => Ok(ReadOutcome::Timeout),
            Ok((n, peer)) => {
                self.last_peer = Some(peer);
                Ok(ReadOutcome::Packet(Packet::new(&self.recv_buffer[..n])))
            }
            Err(e) if is_timeout(&e) => Ok(ReadOutcome::Timeout),
            Err(e) => Err(TcrError::read(e.to_string())),
        }
    }

    fn write(&mut self, packet: &Packet) -> TcrResult<()> {
        let remote = self
            .remote()?
            .ok_or_else(|| TcrError::Interface(format!("{} has no remote address", self.name)))?;
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| TcrError::Interface(format!("{} is not connected", self.name)))?;
        socket.send_to(packet.buffer(), remote)?;
        Ok(())
    }
}
