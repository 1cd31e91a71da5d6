//! The worker loop
//!
//! A dedicated thread owns every descriptor in the network and runs the
//! cooperative event loop: drain one queued command, wait for
//! readability, broadcast whatever was read. No failure from a single
//! endpoint or command terminates the loop; only an explicit Stop (or a
//! vanished controller) does.

use crate::channel::{decode_command, Command, ErrorCause, Inbound, StatusReply, WorkerLink};
use crate::config::SerialPortConfig;
use crate::datalog::{DataLogConfig, DataLogger};
use crate::endpoint::{Endpoint, EndpointRegistry};
use crate::error::NetworkError;
use crate::poller::ReadPoller;
use std::time::Duration;
use tracing::{debug, warn};

/// Bound on the readiness wait; queued commands are noticed within this
/// window even when the network is idle.
const POLL_TIMEOUT: Duration = Duration::from_millis(100);

const READ_BUF_SIZE: usize = 4096;

/// Worker lifecycle. Stopped is terminal; there is no way back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerState {
    Running,
    Stopping,
    Stopped,
}

/// Everything the worker needs to bring a network up
pub(crate) struct WorkerOptions {
    pub virtual_ports: usize,
    pub external_ports: Vec<SerialPortConfig>,
    pub loopback: bool,
    pub data_log: Option<DataLogConfig>,
}

/// Entry point of the worker thread: generate the initial endpoints,
/// then serve the loop until stopped.
pub(crate) fn run_network(link: WorkerLink, options: WorkerOptions) {
    let mut worker = Worker::new(link, options.loopback, options.data_log);
    worker.create_virtual(options.virtual_ports);
    worker.add_external(&options.external_ports);
    worker.run();
}

struct Worker {
    link: WorkerLink,
    registry: EndpointRegistry,
    poller: ReadPoller,
    loopback: bool,
    data_log: Option<DataLogger>,
    state: WorkerState,
}

impl Worker {
    fn new(link: WorkerLink, loopback: bool, data_log: Option<DataLogConfig>) -> Self {
        let data_log = data_log.and_then(|config| match DataLogger::open(config) {
            Ok(logger) => Some(logger),
            Err(e) => {
                warn!("data logging disabled: {e}");
                None
            }
        });
        Self {
            link,
            registry: EndpointRegistry::new(),
            poller: ReadPoller::new(),
            loopback,
            data_log,
            state: WorkerState::Running,
        }
    }

    fn run(&mut self) {
        while self.state == WorkerState::Running {
            self.drain_command();
            if self.state != WorkerState::Running {
                break;
            }
            self.forward_pass();
        }
        self.shutdown();
    }

    /// Non-blocking check of the command channel. A queued command is
    /// executed fully, one reply per sub-operation, before forwarding
    /// resumes.
    fn drain_command(&mut self) {
        let frame = match self.link.poll_frame() {
            Inbound::Frame(frame) => frame,
            Inbound::Empty => return,
            Inbound::Disconnected => {
                warn!("controller link dropped, stopping worker");
                self.state = WorkerState::Stopping;
                return;
            }
        };
        let command = match decode_command(&frame) {
            Ok(command) => command,
            Err(e) => {
                warn!("rejecting command frame: {e}");
                self.reply_error(&e);
                return;
            }
        };
        match command {
            Command::Stop => {
                debug!("stop command received");
                self.state = WorkerState::Stopping;
            }
            Command::Create(count) => self.create_virtual(count),
            Command::Add(configs) => self.add_external(&configs),
            Command::Remove(ids) => self.remove(&ids),
        }
    }

    /// Attempt `count` independent virtual endpoint generations. Each
    /// attempt gets its own reply; one failure does not abort the rest.
    fn create_virtual(&mut self, count: usize) {
        for _ in 0..count {
            let attempt = Endpoint::open_virtual().and_then(|endpoint| {
                let id = endpoint.id().to_string();
                let fd = self.registry.insert(endpoint)?;
                self.poller.register(fd);
                Ok(id)
            });
            match attempt {
                Ok(id) => {
                    debug!("generated virtual endpoint '{id}'");
                    self.reply(StatusReply::Ok(id));
                }
                Err(e) => {
                    warn!("virtual endpoint generation failed: {e}");
                    self.reply_error(&e);
                }
            }
        }
    }

    /// Attach external endpoints, one reply per config: EXIST when the
    /// identifier is already registered, otherwise OK or ERROR.
    fn add_external(&mut self, configs: &[SerialPortConfig]) {
        for config in configs {
            debug!("attaching external endpoint '{}'", config.port);
            if self.registry.contains(&config.port) {
                debug!("external endpoint '{}' already exists", config.port);
                self.reply(StatusReply::Exist(config.port.clone()));
                continue;
            }
            let attempt = Endpoint::open_external(config).and_then(|endpoint| {
                let fd = self.registry.insert(endpoint)?;
                self.poller.register(fd);
                Ok(())
            });
            match attempt {
                Ok(()) => {
                    debug!("attached external endpoint '{}'", config.port);
                    self.reply(StatusReply::Ok(config.port.clone()));
                }
                Err(e) => {
                    warn!("failed to attach external endpoint '{}': {e}", config.port);
                    self.reply_error(&e);
                }
            }
        }
    }

    /// Detach endpoints by identifier. A missing identifier is a
    /// NOT_EXIST outcome, not an error. Once unregistered the entry is
    /// dropped unconditionally; a close-side failure still produces
    /// ERROR but never leaves a half-removed entry behind.
    fn remove(&mut self, ids: &[String]) {
        for id in ids {
            let Some(endpoint) = self.registry.remove(id) else {
                debug!("endpoint '{id}' does not exist");
                self.reply(StatusReply::NotExist(id.clone()));
                continue;
            };
            let kind = endpoint.kind();
            self.poller.unregister(endpoint.raw_fd());
            match endpoint.close() {
                Ok(()) => {
                    debug!("removed {kind:?} endpoint '{id}'");
                    self.reply(StatusReply::Ok(id.clone()));
                }
                Err(e) => {
                    warn!("cleanup failed for endpoint '{id}': {e}");
                    self.reply_error(&e);
                }
            }
        }
    }

    /// One forwarding iteration: bounded wait for readability, then relay
    /// each readable endpoint's bytes verbatim to every other endpoint
    /// (and back to the source when loopback is on). A read or write
    /// failure on one descriptor is logged and retried next cycle; the
    /// descriptor stays registered.
    fn forward_pass(&mut self) {
        let ready = match self.poller.wait(POLL_TIMEOUT) {
            Ok(ready) => ready,
            Err(e) => {
                warn!("readiness wait failed: {e}");
                return;
            }
        };
        let mut buf = [0u8; READ_BUF_SIZE];
        for fd in ready {
            let Some(endpoint) = self.registry.get_by_fd_mut(fd) else {
                continue;
            };
            let source = endpoint.id().to_string();
            let n = match endpoint.read_available(&mut buf) {
                Ok(n) => n,
                Err(e) => {
                    warn!("read failed on '{source}': {e}");
                    continue;
                }
            };
            if n == 0 {
                continue;
            }
            let data = &buf[..n];
            debug!("read {n} byte(s) from '{source}'");

            if let Some(logger) = self.data_log.as_mut() {
                if let Some(src) = self.registry.get_by_fd_mut(fd) {
                    logger.log_chunk(&source, &mut src.pending, data);
                }
            }

            let loopback = self.loopback;
            for other in self.registry.iter_mut() {
                if !loopback && other.raw_fd() == fd {
                    continue;
                }
                if let Err(e) = other.write_all(data) {
                    warn!("write failed on '{}': {e}", other.id());
                }
            }
        }
    }

    /// Release every registered descriptor. Handles close through drop
    /// glue, so cleanup completes even if an individual close fails.
    fn shutdown(&mut self) {
        debug!(
            "worker shutting down, releasing {} endpoint(s)",
            self.registry.len()
        );
        for fd in self.registry.fds() {
            self.poller.unregister(fd);
        }
        self.registry.clear();
        self.state = WorkerState::Stopped;
    }

    fn reply(&self, reply: StatusReply) {
        if let Err(e) = self.link.send_reply(&reply) {
            warn!("reply dropped: {e}");
        }
    }

    fn reply_error(&self, err: &NetworkError) {
        self.reply(StatusReply::Error(ErrorCause::new(err)));
    }
}
