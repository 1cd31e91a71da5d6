//! Controller front-end
//!
//! `SerialNetwork` is the object a host application holds: it spawns the
//! worker thread, issues commands over the channel, and consumes one
//! reply per sub-operation so its local view of the network stays in
//! sync. Operations are synchronous from the caller's perspective even
//! though execution happens on the worker.

use crate::channel::{control_channel, Command, ControllerLink, StatusReply};
use crate::config::SerialPortConfig;
use crate::datalog::DataLogConfig;
use crate::error::{NetworkError, Result};
use crate::worker::{run_network, WorkerOptions};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

/// Bound on each reply wait; a dead worker surfaces as an error instead
/// of a hang.
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Network configuration
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Number of virtual endpoints generated at startup
    pub virtual_ports: usize,
    /// External devices attached at startup
    pub external_ports: Vec<SerialPortConfig>,
    /// Relay bytes back to the originating endpoint as well
    pub loopback: bool,
    /// Optional raw payload logging
    pub data_log: Option<DataLogConfig>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            virtual_ports: 2,
            external_ports: Vec::new(),
            loopback: false,
            data_log: None,
        }
    }
}

impl NetworkConfig {
    /// Create a config with the given number of virtual endpoints
    pub fn new(virtual_ports: usize) -> Self {
        Self {
            virtual_ports,
            ..Self::default()
        }
    }

    /// Attach these external devices at startup
    #[must_use]
    pub fn external_ports(mut self, configs: Vec<SerialPortConfig>) -> Self {
        self.external_ports = configs;
        self
    }

    /// Enable or disable loopback delivery
    #[must_use]
    pub fn loopback(mut self, enabled: bool) -> Self {
        self.loopback = enabled;
        self
    }

    /// Enable raw payload logging
    #[must_use]
    pub fn data_log(mut self, config: DataLogConfig) -> Self {
        self.data_log = Some(config);
        self
    }
}

/// A software-defined network of serial endpoints
///
/// Bytes written to any endpoint of a running network appear verbatim on
/// every other endpoint (star topology). Endpoints can be added and
/// removed while forwarding is live.
pub struct SerialNetwork {
    config: NetworkConfig,
    link: Option<ControllerLink>,
    worker: Option<JoinHandle<()>>,
    ports: Vec<String>,
    external: Vec<SerialPortConfig>,
}

impl SerialNetwork {
    /// Create a network from the given configuration. Nothing runs until
    /// [`start`](Self::start).
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            link: None,
            worker: None,
            ports: Vec::new(),
            external: Vec::new(),
        }
    }

    /// Spawn the worker and wait for one reply per requested endpoint.
    ///
    /// Startup is not atomic: some endpoints may exist while others
    /// failed. Failed attempts are logged and skipped; the survivors are
    /// visible through [`ports`](Self::ports).
    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Err(NetworkError::Config(
                "network is already running".to_string(),
            ));
        }
        let (ctl, wrk) = control_channel();
        let options = WorkerOptions {
            virtual_ports: self.config.virtual_ports,
            external_ports: self.config.external_ports.clone(),
            loopback: self.config.loopback,
            data_log: self.config.data_log.clone(),
        };
        let handle = std::thread::Builder::new()
            .name("serinet-worker".to_string())
            .spawn(move || run_network(wrk, options))?;
        self.link = Some(ctl);
        self.worker = Some(handle);

        for _ in 0..self.config.virtual_ports {
            match self.next_reply()? {
                StatusReply::Ok(id) => self.ports.push(id),
                StatusReply::Error(cause) => {
                    warn!("virtual endpoint generation failed: {}", cause.error);
                }
                other => warn!("unexpected startup reply: {other:?}"),
            }
        }
        let initial = self.config.external_ports.clone();
        for config in &initial {
            match self.next_reply()? {
                StatusReply::Ok(id) => {
                    self.ports.push(id);
                    self.external.push(config.clone());
                }
                StatusReply::Exist(id) => debug!("endpoint '{id}' already attached"),
                StatusReply::Error(cause) => {
                    warn!("failed to attach '{}': {}", config.port, cause.error);
                }
                other => warn!("unexpected startup reply: {other:?}"),
            }
        }
        debug!("network started with {} endpoint(s)", self.ports.len());
        Ok(())
    }

    /// Stop the worker and clear the local endpoint list. Safe to call
    /// on a network that is not running.
    pub fn stop(&mut self) {
        if let Some(link) = self.link.take() {
            if let Err(e) = link.send(&Command::Stop) {
                debug!("stop command not delivered: {e}");
            }
        }
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!("worker thread panicked");
            }
        }
        self.ports.clear();
        self.external.clear();
    }

    /// Generate `count` additional virtual endpoints, returning the
    /// identifiers that were created. Failed attempts are logged and
    /// yield fewer than `count` identifiers.
    pub fn create(&mut self, count: usize) -> Result<Vec<String>> {
        self.send(Command::Create(count))?;
        let mut created = Vec::with_capacity(count);
        for _ in 0..count {
            match self.next_reply()? {
                StatusReply::Ok(id) => {
                    self.ports.push(id.clone());
                    created.push(id);
                }
                StatusReply::Error(cause) => {
                    warn!("virtual endpoint generation failed: {}", cause.error);
                }
                other => warn!("unexpected reply to create: {other:?}"),
            }
        }
        Ok(created)
    }

    /// Attach external devices to the running network, one reply per
    /// config. An EXIST reply is a no-op on the local list; an ERROR is
    /// logged and skipped.
    pub fn add(&mut self, configs: &[SerialPortConfig]) -> Result<()> {
        if configs.is_empty() {
            return Ok(());
        }
        self.send(Command::Add(configs.to_vec()))?;
        for config in configs {
            match self.next_reply()? {
                StatusReply::Ok(id) => {
                    self.ports.push(id);
                    self.external.push(config.clone());
                }
                StatusReply::Exist(id) => debug!("endpoint '{id}' already attached"),
                StatusReply::Error(cause) => {
                    warn!("failed to attach '{}': {}", config.port, cause.error);
                }
                other => warn!("unexpected reply to add: {other:?}"),
            }
        }
        Ok(())
    }

    /// Detach endpoints by identifier. An OK reply removes the endpoint
    /// from the local view; NOT_EXIST and ERROR leave it unchanged.
    pub fn remove(&mut self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.send(Command::Remove(ids.to_vec()))?;
        for id in ids {
            match self.next_reply()? {
                StatusReply::Ok(removed) => {
                    self.ports.retain(|port| port != &removed);
                    self.external.retain(|config| config.port != removed);
                }
                StatusReply::NotExist(missing) => {
                    debug!("endpoint '{missing}' was not part of the network");
                }
                StatusReply::Error(cause) => {
                    warn!("failed to remove '{id}': {}", cause.error);
                }
                other => warn!("unexpected reply to remove: {other:?}"),
            }
        }
        Ok(())
    }

    /// Identifiers of every endpoint currently tracked by this controller
    pub fn ports(&self) -> &[String] {
        &self.ports
    }

    /// Configurations of the external endpoints attached so far
    pub fn external_ports(&self) -> &[SerialPortConfig] {
        &self.external
    }

    /// Whether the worker is running
    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    fn send(&self, cmd: Command) -> Result<()> {
        match &self.link {
            Some(link) => link.send(&cmd),
            None => Err(NetworkError::ChannelClosed),
        }
    }

    fn next_reply(&self) -> Result<StatusReply> {
        match &self.link {
            Some(link) => link.recv_reply(REPLY_TIMEOUT),
            None => Err(NetworkError::ChannelClosed),
        }
    }
}

impl Drop for SerialNetwork {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A network of exactly two virtual endpoints
///
/// Convenience wrapper for the common case of replacing one physical
/// cable: two pty-backed ports whose byte streams mirror each other.
pub struct SerialPair {
    network: SerialNetwork,
}

impl SerialPair {
    /// Create the pair; call [`start`](Self::start) to bring it up.
    pub fn new() -> Self {
        Self {
            network: SerialNetwork::new(NetworkConfig::new(2)),
        }
    }

    /// Bring up both endpoints of the pair.
    pub fn start(&mut self) -> Result<()> {
        self.network.start()?;
        if self.network.ports().len() != 2 {
            self.network.stop();
            return Err(NetworkError::Resource(
                "failed to generate both endpoints of the pair".to_string(),
            ));
        }
        Ok(())
    }

    /// Tear the pair down.
    pub fn stop(&mut self) {
        self.network.stop();
    }

    /// First endpoint path, when running.
    pub fn first(&self) -> Option<&str> {
        self.network.ports().first().map(String::as_str)
    }

    /// Second endpoint path, when running.
    pub fn second(&self) -> Option<&str> {
        self.network.ports().get(1).map(String::as_str)
    }
}

impl Default for SerialPair {
    fn default() -> Self {
        Self::new()
    }
}
