//! Panel link seam. `UdpTransport` speaks a minimal datagram layout: one
//! opcode byte, one frame-buffer index byte, then the payload. Opcodes cover
//! pixel-data upload, buffer commit, and out-of-band control strings.

use anyhow::{Context, Result, bail};
use log::debug;
use std::fmt;
use std::net::{Ipv6Addr, SocketAddrV6, UdpSocket};
use std::sync::Mutex;

pub const DEFAULT_PANEL_PORT: u16 = 48757;

const OP_PIXEL_DATA: u8 = 0x01;
const OP_SHOW_BUFFER: u8 = 0x02;
const OP_CONTROL: u8 = 0x03;

/// Resolved network handle for one panel. Callers treat it as opaque and
/// only hand it back to the transport that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelDestination(SocketAddrV6);

impl PanelDestination {
    pub fn new(addr: SocketAddrV6) -> Self {
        Self(addr)
    }
}

impl fmt::Display for PanelDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Trait for abstracting the panel link to enable testing
pub trait Transport {
    /// Turn a panel's link-local address into a destination handle
    fn resolve_destination(&self, link_local: &str) -> Result<PanelDestination>;

    /// Upload a pixel buffer into a named frame-buffer slot on the panel
    fn send_pixel_buffer(
        &self,
        destination: &PanelDestination,
        buffer_index: u8,
        bytes: &[u8],
    ) -> Result<()>;

    /// Tell the panel to display a previously uploaded slot
    fn commit_frame(&self, destination: &PanelDestination, buffer_index: u8) -> Result<()>;

    /// Out-of-band control command, e.g. firmware reset
    fn send_command(&self, command: &str, destination: &PanelDestination) -> Result<()>;
}

fn parse_link_local(link_local: &str) -> Result<Ipv6Addr> {
    link_local
        .trim()
        .parse()
        .with_context(|| format!("Invalid link-local address {link_local:?}"))
}

/// Real panel link over UDP. Link-local destinations are scoped to the
/// network interface the wall is wired to.
pub struct UdpTransport {
    socket: UdpSocket,
    scope_id: u32,
    port: u16,
}

impl UdpTransport {
    pub fn new(interface: &str, port: u16) -> Result<Self> {
        let scope_id = interface_index(interface)?;
        let socket =
            UdpSocket::bind("[::]:0").context("Failed to bind a UDP socket for the panel link")?;
        debug!("Panel link on interface {interface} (scope {scope_id}), port {port}");
        Ok(Self {
            socket,
            scope_id,
            port,
        })
    }

    fn send_datagram(
        &self,
        destination: &PanelDestination,
        opcode: u8,
        buffer_index: u8,
        payload: &[u8],
    ) -> Result<()> {
        let mut datagram = Vec::with_capacity(payload.len() + 2);
        datagram.push(opcode);
        datagram.push(buffer_index);
        datagram.extend_from_slice(payload);
        let sent = self
            .socket
            .send_to(&datagram, destination.0)
            .with_context(|| format!("Failed to send to panel at {destination}"))?;
        if sent != datagram.len() {
            bail!(
                "Short send to panel at {destination}: {sent} of {} bytes",
                datagram.len()
            );
        }
        Ok(())
    }
}

impl Transport for UdpTransport {
    fn resolve_destination(&self, link_local: &str) -> Result<PanelDestination> {
        let addr = parse_link_local(link_local)?;
        Ok(PanelDestination(SocketAddrV6::new(
            addr,
            self.port,
            0,
            self.scope_id,
        )))
    }

    fn send_pixel_buffer(
        &self,
        destination: &PanelDestination,
        buffer_index: u8,
        bytes: &[u8],
    ) -> Result<()> {
        self.send_datagram(destination, OP_PIXEL_DATA, buffer_index, bytes)
    }

    fn commit_frame(&self, destination: &PanelDestination, buffer_index: u8) -> Result<()> {
        self.send_datagram(destination, OP_SHOW_BUFFER, buffer_index, &[])
    }

    fn send_command(&self, command: &str, destination: &PanelDestination) -> Result<()> {
        self.send_datagram(destination, OP_CONTROL, 0, command.as_bytes())
    }
}

fn interface_index(name: &str) -> Result<u32> {
    let c_name = std::ffi::CString::new(name)
        .with_context(|| format!("Invalid interface name {name:?}"))?;
    let index = unsafe { libc::if_nametoindex(c_name.as_ptr()) };
    if index == 0 {
        bail!("Unknown network interface {name:?}");
    }
    Ok(index)
}

/// Transport that resolves addresses but sends nothing. Used for dry runs.
pub struct NullTransport;

impl Transport for NullTransport {
    fn resolve_destination(&self, link_local: &str) -> Result<PanelDestination> {
        let addr = parse_link_local(link_local)?;
        Ok(PanelDestination(SocketAddrV6::new(addr, 0, 0, 0)))
    }

    fn send_pixel_buffer(
        &self,
        destination: &PanelDestination,
        buffer_index: u8,
        bytes: &[u8],
    ) -> Result<()> {
        debug!(
            "Dry run: {} bytes to slot {buffer_index} at {destination}",
            bytes.len()
        );
        Ok(())
    }

    fn commit_frame(&self, _destination: &PanelDestination, _buffer_index: u8) -> Result<()> {
        Ok(())
    }

    fn send_command(&self, command: &str, destination: &PanelDestination) -> Result<()> {
        debug!("Dry run: command {command:?} to {destination}");
        Ok(())
    }
}

/// Every call a transport received, in order. Produced by
/// [`RecordingTransport`] for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Resolve {
        link_local: String,
    },
    PixelBuffer {
        destination: PanelDestination,
        buffer_index: u8,
        bytes: Vec<u8>,
    },
    Commit {
        destination: PanelDestination,
        buffer_index: u8,
    },
    Command {
        destination: PanelDestination,
        command: String,
    },
}

/// Simulated panel link for tests: records every call and can be told to
/// fail uploads to one destination.
#[derive(Default)]
pub struct RecordingTransport {
    calls: Mutex<Vec<TransportCall>>,
    fail_sends_to: Mutex<Option<PanelDestination>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every pixel-buffer upload to `link_local` fail from now on.
    pub fn fail_sends_to(&self, link_local: &str) {
        let destination = Self::destination_for(link_local);
        *self.fail_sends_to.lock().unwrap() = Some(destination);
    }

    /// The destination handle this transport resolves `link_local` to.
    pub fn destination_for(link_local: &str) -> PanelDestination {
        let addr: Ipv6Addr = link_local.trim().parse().unwrap();
        PanelDestination(SocketAddrV6::new(addr, 0, 0, 0))
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: TransportCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl Transport for RecordingTransport {
    fn resolve_destination(&self, link_local: &str) -> Result<PanelDestination> {
        self.record(TransportCall::Resolve {
            link_local: link_local.to_string(),
        });
        let addr = parse_link_local(link_local)?;
        Ok(PanelDestination(SocketAddrV6::new(addr, 0, 0, 0)))
    }

    fn send_pixel_buffer(
        &self,
        destination: &PanelDestination,
        buffer_index: u8,
        bytes: &[u8],
    ) -> Result<()> {
        if self.fail_sends_to.lock().unwrap().as_ref() == Some(destination) {
            bail!("Simulated send failure to {destination}");
        }
        self.record(TransportCall::PixelBuffer {
            destination: destination.clone(),
            buffer_index,
            bytes: bytes.to_vec(),
        });
        Ok(())
    }

    fn commit_frame(&self, destination: &PanelDestination, buffer_index: u8) -> Result<()> {
        self.record(TransportCall::Commit {
            destination: destination.clone(),
            buffer_index,
        });
        Ok(())
    }

    fn send_command(&self, command: &str, destination: &PanelDestination) -> Result<()> {
        self.record(TransportCall::Command {
            destination: destination.clone(),
            command: command.to_string(),
        });
        Ok(())
    }
}
