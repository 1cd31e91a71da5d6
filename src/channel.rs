//! Command channel between the controller and the worker
//!
//! A duplex, message-oriented, FIFO link. Frames are JSON text: four
//! command kinds travel controller-to-worker, four reply kinds travel
//! back, one reply per sub-operation, strictly in issue order. A frame
//! that fails to decode costs one ERROR reply and nothing else.

use crate::config::SerialPortConfig;
use crate::error::{NetworkError, Result};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Command sent from the controller to the worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "payload", rename_all = "lowercase")]
pub enum Command {
    /// Terminate the worker loop
    Stop,
    /// Generate the given number of virtual endpoints
    Create(usize),
    /// Attach external endpoints
    Add(Vec<SerialPortConfig>),
    /// Detach endpoints by identifier
    Remove(Vec<String>),
}

/// Structured cause carried by an ERROR reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorCause {
    /// Human-readable failure message
    pub error: String,
    /// Diagnostic rendering of the underlying failure
    pub trace: String,
}

impl ErrorCause {
    pub(crate) fn new(err: &NetworkError) -> Self {
        Self {
            error: err.to_string(),
            trace: format!("{err:?}"),
        }
    }
}

/// Reply sent from the worker to the controller, one per sub-operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "payload")]
pub enum StatusReply {
    /// The operation succeeded for the carried identifier
    #[serde(rename = "OK")]
    Ok(String),
    /// The operation failed; the cause is carried
    #[serde(rename = "ERROR")]
    Error(ErrorCause),
    /// The identifier is already part of the network
    #[serde(rename = "EXIST")]
    Exist(String),
    /// The identifier is not part of the network
    #[serde(rename = "NOT_EXIST")]
    NotExist(String),
}

pub(crate) fn encode_command(cmd: &Command) -> String {
    serde_json::to_string(cmd).unwrap_or_default()
}

pub(crate) fn decode_command(frame: &str) -> Result<Command> {
    serde_json::from_str(frame).map_err(|e| NetworkError::Protocol(format!("bad command frame: {e}")))
}

/// Controller side of the command channel
pub(crate) struct ControllerLink {
    tx: Sender<String>,
    rx: Receiver<String>,
}

impl ControllerLink {
    pub fn send(&self, cmd: &Command) -> Result<()> {
        self.tx
            .send(encode_command(cmd))
            .map_err(|_| NetworkError::ChannelClosed)
    }

    pub fn recv_reply(&self, timeout: Duration) -> Result<StatusReply> {
        let frame = match self.rx.recv_timeout(timeout) {
            Ok(frame) => frame,
            Err(RecvTimeoutError::Timeout) => {
                return Err(NetworkError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "timed out waiting for a worker reply",
                )))
            }
            Err(RecvTimeoutError::Disconnected) => return Err(NetworkError::ChannelClosed),
        };
        serde_json::from_str(&frame)
            .map_err(|e| NetworkError::Protocol(format!("bad reply frame: {e}")))
    }

    #[cfg(test)]
    pub fn send_frame(&self, frame: String) {
        let _ = self.tx.send(frame);
    }
}

/// Result of a non-blocking look at the worker's inbound queue
pub(crate) enum Inbound {
    /// A frame is ready
    Frame(String),
    /// Nothing queued
    Empty,
    /// The controller side is gone
    Disconnected,
}

/// Worker side of the command channel
pub(crate) struct WorkerLink {
    tx: Sender<String>,
    rx: Receiver<String>,
}

impl WorkerLink {
    pub fn poll_frame(&self) -> Inbound {
        match self.rx.try_recv() {
            Ok(frame) => Inbound::Frame(frame),
            Err(TryRecvError::Empty) => Inbound::Empty,
            Err(TryRecvError::Disconnected) => Inbound::Disconnected,
        }
    }

    pub fn send_reply(&self, reply: &StatusReply) -> Result<()> {
        let frame = serde_json::to_string(reply).unwrap_or_default();
        self.tx.send(frame).map_err(|_| NetworkError::ChannelClosed)
    }
}

/// Create a connected controller/worker link pair
pub(crate) fn control_channel() -> (ControllerLink, WorkerLink) {
    let (cmd_tx, cmd_rx) = unbounded();
    let (reply_tx, reply_rx) = unbounded();
    (
        ControllerLink {
            tx: cmd_tx,
            rx: reply_rx,
        },
        WorkerLink {
            tx: reply_tx,
            rx: cmd_rx,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wire_shape() {
        assert_eq!(encode_command(&Command::Stop), r#"{"cmd":"stop"}"#);
        assert_eq!(
            encode_command(&Command::Create(3)),
            r#"{"cmd":"create","payload":3}"#
        );
        assert_eq!(
            encode_command(&Command::Remove(vec!["/dev/pts/7".to_string()])),
            r#"{"cmd":"remove","payload":["/dev/pts/7"]}"#
        );
    }

    #[test]
    fn test_command_round_trip() {
        let cmd = Command::Add(vec![SerialPortConfig::new("/dev/ttyUSB0", 9600)]);
        let decoded = decode_command(&encode_command(&cmd)).expect("decode");
        assert_eq!(decoded, cmd);
    }

    #[test]
    fn test_reply_wire_shape() {
        let reply = StatusReply::Ok("/dev/pts/3".to_string());
        let frame = serde_json::to_string(&reply).expect("encode");
        assert_eq!(frame, r#"{"status":"OK","payload":"/dev/pts/3"}"#);

        let reply = StatusReply::Error(ErrorCause {
            error: "open failed".to_string(),
            trace: "Resource(\"open failed\")".to_string(),
        });
        let frame = serde_json::to_string(&reply).expect("encode");
        assert!(frame.starts_with(r#"{"status":"ERROR","payload":{"error":"open failed""#));
    }

    #[test]
    fn test_malformed_frame_is_a_protocol_error() {
        assert!(matches!(
            decode_command(r#"{"cmd":"explode"}"#),
            Err(NetworkError::Protocol(_))
        ));
        assert!(matches!(
            decode_command("not json at all"),
            Err(NetworkError::Protocol(_))
        ));
    }

    #[test]
    fn test_frames_arrive_in_issue_order() {
        let (ctl, wrk) = control_channel();
        ctl.send(&Command::Create(1)).expect("send");
        ctl.send(&Command::Stop).expect("send");

        let first = match wrk.poll_frame() {
            Inbound::Frame(frame) => frame,
            _ => panic!("expected a frame"),
        };
        let second = match wrk.poll_frame() {
            Inbound::Frame(frame) => frame,
            _ => panic!("expected a frame"),
        };
        assert_eq!(decode_command(&first).expect("decode"), Command::Create(1));
        assert_eq!(decode_command(&second).expect("decode"), Command::Stop);
        assert!(matches!(wrk.poll_frame(), Inbound::Empty));
    }

    #[test]
    fn test_reply_timeout_and_disconnect() {
        let (ctl, wrk) = control_channel();
        assert!(matches!(
            ctl.recv_reply(Duration::from_millis(10)),
            Err(NetworkError::Io(_))
        ));
        drop(wrk);
        assert!(matches!(
            ctl.recv_reply(Duration::from_millis(10)),
            Err(NetworkError::ChannelClosed)
        ));
    }
}
