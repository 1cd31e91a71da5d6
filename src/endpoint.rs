//! Endpoints and the registry that owns them
//!
//! An endpoint is an addressable serial connection point: either a
//! virtual one backed by a pseudo-terminal pair generated here, or an
//! external device attached to the network. The registry maps endpoint
//! identifiers to their open descriptors and is exclusively owned by the
//! worker loop, so it needs no synchronization.

use crate::config::SerialPortConfig;
use crate::error::{NetworkError, Result};
use bytes::BytesMut;
use serialport::TTYPort;
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::pty::openpty;
use nix::sys::termios::{cfmakeraw, tcgetattr, tcsetattr, SetArg};
use nix::unistd::ttyname;

/// Endpoint variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EndpointKind {
    /// Backed by a pseudo-terminal pair generated by the worker
    Virtual,
    /// Backed by a pre-existing serial device
    External,
}

#[derive(Debug)]
enum EndpointIo {
    /// Master side of a pty pair
    Pty(File),
    /// Native serial port handle
    Serial(TTYPort),
}

/// A live serial connection point inside the network
#[derive(Debug)]
pub(crate) struct Endpoint {
    id: String,
    kind: EndpointKind,
    io: EndpointIo,
    /// Keeps the slave side of the pair open so the master never reports
    /// EIO while no consumer is attached.
    _slave: Option<OwnedFd>,
    /// Byte accumulator for delimiter-based data logging
    pub(crate) pending: BytesMut,
}

impl Endpoint {
    /// Generate a virtual endpoint from a fresh pseudo-terminal pair.
    ///
    /// The master is switched to raw mode and non-blocking; the slave
    /// path becomes the endpoint identifier.
    pub fn open_virtual() -> Result<Self> {
        let pty = openpty(None, None)
            .map_err(|e| NetworkError::Resource(format!("openpty failed: {e}")))?;
        let mut attrs = tcgetattr(&pty.master)?;
        cfmakeraw(&mut attrs);
        tcsetattr(&pty.master, SetArg::TCSANOW, &attrs)?;
        set_nonblocking(pty.master.as_raw_fd())?;
        let id = ttyname(&pty.slave)?.to_string_lossy().into_owned();
        Ok(Self {
            id,
            kind: EndpointKind::Virtual,
            io: EndpointIo::Pty(File::from(pty.master)),
            _slave: Some(pty.slave),
            pending: BytesMut::new(),
        })
    }

    /// Attach an external serial device described by `config`.
    pub fn open_external(config: &SerialPortConfig) -> Result<Self> {
        config.validate()?;
        let port = config.builder().open_native()?;
        set_nonblocking(port.as_raw_fd())?;
        Ok(Self {
            id: config.port.clone(),
            kind: EndpointKind::External,
            io: EndpointIo::Serial(port),
            _slave: None,
            pending: BytesMut::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> EndpointKind {
        self.kind
    }

    pub fn raw_fd(&self) -> RawFd {
        match &self.io {
            EndpointIo::Pty(file) => file.as_raw_fd(),
            EndpointIo::Serial(port) => port.as_raw_fd(),
        }
    }

    /// One non-blocking read of whatever bytes are currently available.
    /// A short or empty read is not an error.
    pub fn read_available(&mut self, buf: &mut [u8]) -> Result<usize> {
        let res = match &mut self.io {
            EndpointIo::Pty(file) => file.read(buf),
            EndpointIo::Serial(port) => port.read(buf),
        };
        match res {
            Ok(n) => Ok(n),
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Ok(0)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write the whole byte sequence, unmodified.
    pub fn write_all(&mut self, data: &[u8]) -> Result<()> {
        match &mut self.io {
            EndpointIo::Pty(file) => file.write_all(data)?,
            EndpointIo::Serial(port) => port.write_all(data)?,
        }
        Ok(())
    }

    /// Flush buffered output; the descriptor itself closes on drop.
    pub fn close(mut self) -> Result<()> {
        match &mut self.io {
            EndpointIo::Pty(file) => file.flush()?,
            EndpointIo::Serial(port) => port.flush()?,
        }
        Ok(())
    }
}

fn set_nonblocking(fd: RawFd) -> Result<()> {
    let flags = fcntl(fd, FcntlArg::F_GETFL)?;
    let flags = OFlag::from_bits_retain(flags) | OFlag::O_NONBLOCK;
    fcntl(fd, FcntlArg::F_SETFL(flags))?;
    Ok(())
}

/// Registry of live endpoints, exclusively owned by the worker loop.
///
/// Invariants: identifiers are unique across both endpoint kinds, and
/// there is exactly one entry per live descriptor.
#[derive(Default)]
pub(crate) struct EndpointRegistry {
    by_id: HashMap<String, Endpoint>,
    fd_index: HashMap<RawFd, String>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    /// Register an endpoint. The identifier must be unique.
    pub fn insert(&mut self, endpoint: Endpoint) -> Result<RawFd> {
        let id = endpoint.id().to_string();
        if self.by_id.contains_key(&id) {
            return Err(NetworkError::Resource(format!(
                "endpoint '{id}' is already registered"
            )));
        }
        let fd = endpoint.raw_fd();
        self.fd_index.insert(fd, id.clone());
        self.by_id.insert(id, endpoint);
        Ok(fd)
    }

    pub fn remove(&mut self, id: &str) -> Option<Endpoint> {
        let endpoint = self.by_id.remove(id)?;
        self.fd_index.remove(&endpoint.raw_fd());
        Some(endpoint)
    }

    pub fn get_by_fd_mut(&mut self, fd: RawFd) -> Option<&mut Endpoint> {
        let id = self.fd_index.get(&fd)?;
        self.by_id.get_mut(id)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Endpoint> {
        self.by_id.values_mut()
    }

    pub fn fds(&self) -> Vec<RawFd> {
        self.fd_index.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Drop every endpoint; descriptors close as the handles go out of
    /// scope, so cleanup completes even if an individual entry misbehaves.
    pub fn clear(&mut self) {
        self.fd_index.clear();
        self.by_id.clear();
    }
}
