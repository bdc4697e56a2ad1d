//! Interface implementation for tcrouter
//!
//! An interface is one connection endpoint (TCP client, UDP socket, device,
//! simulator). Each interface is owned by exactly one interface thread while
//! that thread runs; nothing else touches its connection state.

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use std::io;
use std::os::fd::BorrowedFd;
use std::time::Duration;
use tcrlib::{InterfaceConfig, InterfaceKind, InterfaceName, Packet, TcrError, TcrResult};

use crate::interface_device::DeviceInterface;
use crate::interface_network::{TcpInterface, UdpInterface};
use crate::interface_sim::SimulatedInterface;

/// What a bounded read produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// One complete packet
    Packet(Packet),
    /// Nothing arrived within the timeout
    Timeout,
    /// The peer closed the connection cleanly
    EndOfStream,
}

/// Capability set every interface provides to its interface thread
pub trait Interface: Send {
    /// Interface name, used in diagnostics
    fn name(&self) -> &InterfaceName;

    /// Targets whose command definitions apply to packets read here. An
    /// empty slice means all targets.
    fn target_names(&self) -> &[String];

    /// Open the connection. May block for a bounded time.
    fn connect(&mut self) -> TcrResult<()>;

    /// Close the connection. Safe to call when already disconnected.
    fn disconnect(&mut self);

    /// Non-blocking connection check
    fn is_connected(&self) -> bool;

    /// Wait at most `timeout` for one packet
    fn read(&mut self, timeout: Duration) -> TcrResult<ReadOutcome>;

    /// Best-effort send of one packet
    fn write(&mut self, packet: &Packet) -> TcrResult<()>;
}

/// Build an interface from its configuration. No connection is made.
pub fn create_interface(config: &InterfaceConfig) -> TcrResult<Box<dyn Interface>> {
    let name = config.name.clone();
    let targets = config.targets.clone();
    let interface: Box<dyn Interface> = match &config.kind {
        InterfaceKind::Tcp(tcp) => Box::new(TcpInterface::new(name, targets, tcp.clone())),
        InterfaceKind::Udp(udp) => Box::new(UdpInterface::new(name, targets, udp.clone())),
        InterfaceKind::Device(dev) => Box::new(DeviceInterface::new(name, targets, dev.clone())),
        InterfaceKind::Simulated(sim) => Box::new(SimulatedInterface::new(name, targets, sim.clone())),
    };
    Ok(interface)
}

/// Wait for a descriptor to become readable. Returns false on timeout.
///
/// Hang-up counts as readable so the following read sees end of stream.
pub(crate) fn wait_readable(fd: BorrowedFd<'_>, timeout: Duration) -> TcrResult<bool> {
    let mut poll_fds = [PollFd::new(fd, PollFlags::POLLIN)];
    let timeout = PollTimeout::try_from(timeout).unwrap_or(PollTimeout::MAX);

    match poll(&mut poll_fds, timeout) {
        Ok(0) => Ok(false),
        Ok(_) => {
            let Some(revents) = poll_fds[0].revents() else {
                return Ok(false);
            };
            if revents.intersects(PollFlags::POLLERR | PollFlags::POLLNVAL) {
                return Err(TcrError::read(format!("poll reported {:?}", revents)));
            }
            Ok(revents.intersects(PollFlags::POLLIN | PollFlags::POLLHUP))
        }
        // A signal woke us early; the caller simply sees a timeout
        Err(Errno::EINTR) => Ok(false),
        Err(e) => Err(TcrError::Io(io::Error::from_raw_os_error(e as i32))),
    }
}
