//! Simulated targets for tcrsim

use log::{debug, info, warn};
use rand::Rng;
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tcrlib::{TcrError, TcrResult};

use crate::config::{PacketTemplate, Protocol, TargetConfig};

const IDLE_SLEEP: Duration = Duration::from_millis(10);

/// Counters reported when the simulator shuts down
#[derive(Debug, Default, Clone)]
pub struct TargetStats {
    pub sent: u64,
    pub received_bytes: u64,
    pub last_sent: String,
    pub connected: bool,
}

/// One simulated target
pub struct Target {
    config: TargetConfig,
    sequence: u32,
    next_template: usize,
    stats: Arc<Mutex<TargetStats>>,
}

impl Target {
    pub fn new(config: TargetConfig, stats: Arc<Mutex<TargetStats>>) -> Self {
        Self {
            config,
            sequence: 0,
            next_template: 0,
            stats,
        }
    }

    pub fn run(&mut self, running: Arc<AtomicBool>) -> TcrResult<()> {
        match self.config.protocol {
            Protocol::Tcp => {
                let listener = TcpListener::bind(self.config.address)?;
                self.serve_tcp(listener, running)
            }
            Protocol::Udp => {
                let socket = UdpSocket::bind(self.config.address)?;
                self.serve_udp(socket, running)
            }
        }
    }

    fn update_connected(&self, connected: bool) {
        if let Ok(mut s) = self.stats.lock() {
            s.connected = connected;
        }
    }

    fn record_sent(&self, data: &[u8]) {
        if let Ok(mut s) = self.stats.lock() {
            s.sent += 1;
            s.last_sent = format!("{} bytes: {:02X?}", data.len(), &data[..data.len().min(8)]);
        }
    }

    fn record_received(&self, n: usize) {
        if let Ok(mut s) = self.stats.lock() {
            s.received_bytes += n as u64;
        }
    }

    /// Accept one router connection at a time and stream frames to it
    pub fn serve_tcp(&mut self, listener: TcpListener, running: Arc<AtomicBool>) -> TcrResult<()> {
        listener.set_nonblocking(true)?;
        info!("{}: listening on TCP {}", self.config.name, listener.local_addr()?);

        while running.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, peer)) => {
                    info!("{}: router connected from {}", self.config.name, peer);
                    self.update_connected(true);
                    if let Err(e) = self.handle_tcp_connection(stream, &running) {
                        warn!("{}: connection ended: {}", self.config.name, e);
                    }
                    self.update_connected(false);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(Duration::from_millis(100)),
                Err(e) => {
                    warn!("{}: accept error: {}", self.config.name, e);
                    thread::sleep(Duration::from_millis(100));
                }
            }
        }
        Ok(())
    }

    fn handle_tcp_connection(&mut self, mut stream: TcpStream, running: &AtomicBool) -> TcrResult<()> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;

        // Commands routed back to us are counted, not parsed
        let mut recv_buf = vec![0u8; 1024];
        let mut last_send = Instant::now();

        while running.load(Ordering::SeqCst) {
            match stream.read(&mut recv_buf) {
                Ok(0) => {
                    info!("{}: router disconnected", self.config.name);
                    return Ok(());
                }
                Ok(n) => {
                    debug!("{}: received {} bytes", self.config.name, n);
                    self.record_received(n);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => return Err(e.into()),
            }

            if last_send.elapsed() >= self.config.interval {
                let frame = frame(&self.next_packet())?;
                write_all_nonblocking(&mut stream, &frame, running)?;
                debug!("{}: sent {} byte frame", self.config.name, frame.len());
                self.record_sent(&frame[4..]);
                last_send = Instant::now();
            }

            thread::sleep(IDLE_SLEEP);
        }
        Ok(())
    }

    /// Send datagrams to the configured destination
    pub fn serve_udp(&mut self, socket: UdpSocket, running: Arc<AtomicBool>) -> TcrResult<()> {
        let destination = self
            .config
            .destination
            .ok_or_else(|| TcrError::Config(format!("{}: no UDP destination", self.config.name)))?;
        socket.set_nonblocking(true)?;
        info!(
            "{}: sending UDP from {} to {}",
            self.config.name,
            socket.local_addr()?,
            destination
        );

        let mut recv_buf = vec![0u8; 65536];
        let mut last_send = Instant::now();

        while running.load(Ordering::SeqCst) {
            match socket.recv_from(&mut recv_buf) {
                Ok((n, from)) => {
                    debug!("{}: received {} bytes from {}", self.config.name, n, from);
                    self.record_received(n);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => warn!("{}: recv error: {}", self.config.name, e),
            }

            if last_send.elapsed() >= self.config.interval {
                let packet = self.next_packet();
                match socket.send_to(&packet, destination) {
                    Ok(_) => self.record_sent(&packet),
                    // Nobody listening yet; the router may still be starting
                    Err(e) => debug!("{}: send error: {}", self.config.name, e),
                }
                last_send = Instant::now();
            }

            thread::sleep(IDLE_SLEEP);
        }
        Ok(())
    }

    /// Next packet in rotation, stamped with the running sequence number
    fn next_packet(&mut self) -> Vec<u8> {
        let template = &self.config.packets[self.next_template % self.config.packets.len()];
        let packet = generate_packet(template, self.sequence);
        self.next_template = self.next_template.wrapping_add(1);
        self.sequence = self.sequence.wrapping_add(1);
        packet
    }
}

/// Build a packet: prefix, then a big-endian sequence number, then random
/// filler up to the template size
pub fn generate_packet(template: &PacketTemplate, sequence: u32) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    let mut packet = Vec::with_capacity(template.size);
    packet.extend_from_slice(&template.prefix);
    packet.extend_from_slice(&sequence.to_be_bytes());
    while packet.len() < template.size {
        packet.push(rng.gen());
    }
    packet.truncate(template.size);
    packet
}

/// Length-prefix a packet the way the router's TCP interface reads it
pub fn frame(packet: &[u8]) -> TcrResult<Vec<u8>> {
    let len = u32::try_from(packet.len())
        .map_err(|_| TcrError::Interface(format!("packet of {} bytes is too large", packet.len())))?;
    let mut frame = Vec::with_capacity(packet.len() + 4);
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(packet);
    Ok(frame)
}

fn write_all_nonblocking(stream: &mut TcpStream, mut data: &[u8], running: &AtomicBool) -> TcrResult<()> {
    while !data.is_empty() {
        match stream.write(data) {
            Ok(0) => return Err(TcrError::connection("connection closed while writing")),
            Ok(n) => data = &data[n..],
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                if !running.load(Ordering::SeqCst) {
                    return Ok(());
                }
                thread::sleep(Duration::from_millis(1));
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn template() -> PacketTemplate {
        PacketTemplate {
            prefix: vec![0xAB, 0xCD],
            size: 12,
        }
    }

    fn config(protocol: Protocol, destination: Option<SocketAddr>) -> TargetConfig {
        TargetConfig {
            name: "SIM".to_string(),
            protocol,
            address: "127.0.0.1:0".parse().unwrap(),
            destination,
            interval: Duration::from_millis(20),
            packets: vec![template()],
        }
    }

    #[test]
    fn test_packet_generation() {
        let packet = generate_packet(&template(), 7);
        assert_eq!(packet.len(), 12);
        assert_eq!(&packet[..2], &[0xAB, 0xCD]);
        assert_eq!(&packet[2..6], &7u32.to_be_bytes());
    }

    #[test]
    fn test_frame() {
        assert_eq!(frame(&[1, 2, 3]).unwrap(), vec![0, 0, 0, 3, 1, 2, 3]);
    }

    #[test]
    fn test_tcp_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(Mutex::new(TargetStats::default()));

        let r = running.clone();
        let s = stats.clone();
        let server = thread::spawn(move || {
            Target::new(config(Protocol::Tcp, None), s).serve_tcp(listener, r)
        });

        let mut client = TcpStream::connect(addr).unwrap();
        client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        for expected in 0u32..2 {
            let mut len = [0u8; 4];
            client.read_exact(&mut len).unwrap();
            assert_eq!(u32::from_be_bytes(len), 12);
            let mut body = [0u8; 12];
            client.read_exact(&mut body).unwrap();
            assert_eq!(&body[2..6], &expected.to_be_bytes());
        }

        running.store(false, Ordering::SeqCst);
        server.join().unwrap().unwrap();
        assert!(stats.lock().unwrap().sent >= 2);
    }

    #[test]
    fn test_udp_datagrams() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let destination = receiver.local_addr().unwrap();
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let running = Arc::new(AtomicBool::new(true));

        let r = running.clone();
        let server = thread::spawn(move || {
            let stats = Arc::new(Mutex::new(TargetStats::default()));
            Target::new(config(Protocol::Udp, Some(destination)), stats).serve_udp(socket, r)
        });

        let mut buf = [0u8; 64];
        let (n, _) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(n, 12);
        assert_eq!(&buf[..2], &[0xAB, 0xCD]);

        running.store(false, Ordering::SeqCst);
        server.join().unwrap().unwrap();
    }
}
