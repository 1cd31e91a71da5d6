//! External endpoint configuration
//!
//! Describes a real serial device to attach to a network. Configs are
//! validated at the boundary before they reach the worker.

use crate::error::{NetworkError, Result};
use serde::{Deserialize, Serialize};
use serialport::{DataBits, FlowControl, Parity, SerialPortBuilder, StopBits};
use std::time::Duration;

/// Serial port parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SerialParity {
    /// No parity
    #[default]
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
}

impl std::str::FromStr for SerialParity {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "n" => Ok(Self::None),
            "odd" | "o" => Ok(Self::Odd),
            "even" | "e" => Ok(Self::Even),
            _ => Ok(Self::None),
        }
    }
}

/// Serial port flow control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SerialFlowControl {
    /// No flow control
    #[default]
    None,
    /// Hardware flow control (RTS/CTS)
    Hardware,
    /// Software flow control (XON/XOFF)
    Software,
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

/// Configuration of an external serial endpoint
///
/// The `port` path doubles as the endpoint identifier inside the network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialPortConfig {
    /// Device path (e.g. /dev/ttyUSB0)
    pub port: String,
    /// Baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Data bits (5-8)
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    /// Stop bits (1-2)
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    /// Parity
    #[serde(default)]
    pub parity: SerialParity,
    /// Flow control
    #[serde(default)]
    pub flow_control: SerialFlowControl,
    /// Read timeout in milliseconds
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl SerialPortConfig {
    /// Create a configuration with default transport settings
    pub fn new(port: &str, baud_rate: u32) -> Self {
        Self {
            port: port.to_string(),
            baud_rate,
            data_bits: 8,
            stop_bits: 1,
            parity: SerialParity::None,
            flow_control: SerialFlowControl::None,
            timeout_ms: None,
        }
    }

    /// Set data bits
    #[must_use]
    pub fn data_bits(mut self, bits: u8) -> Self {
        self.data_bits = bits;
        self
    }

    /// Set stop bits
    #[must_use]
    pub fn stop_bits(mut self, bits: u8) -> Self {
        self.stop_bits = bits;
        self
    }

    /// Set parity
    #[must_use]
    pub fn parity(mut self, parity: SerialParity) -> Self {
        self.parity = parity;
        self
    }

    /// Set flow control
    #[must_use]
    pub fn flow_control(mut self, flow: SerialFlowControl) -> Self {
        self.flow_control = flow;
        self
    }

    /// Set the read timeout
    #[must_use]
    pub fn timeout_ms(mut self, millis: u64) -> Self {
        self.timeout_ms = Some(millis);
        self
    }

    /// Validate the configuration before it enters the core
    pub fn validate(&self) -> Result<()> {
        if self.port.trim().is_empty() {
            return Err(NetworkError::Config("port path is empty".to_string()));
        }
        if self.baud_rate == 0 {
            return Err(NetworkError::Config(format!(
                "invalid baud rate for '{}'",
                self.port
            )));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(NetworkError::Config(format!(
                "invalid data bits {} for '{}'",
                self.data_bits, self.port
            )));
        }
        if !(1..=2).contains(&self.stop_bits) {
            return Err(NetworkError::Config(format!(
                "invalid stop bits {} for '{}'",
                self.stop_bits, self.port
            )));
        }
        Ok(())
    }

    pub(crate) fn builder(&self) -> SerialPortBuilder {
        let data_bits = match self.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            _ => DataBits::Eight,
        };

        let stop_bits = match self.stop_bits {
            2 => StopBits::Two,
            _ => StopBits::One,
        };

        let parity = match self.parity {
            SerialParity::Odd => Parity::Odd,
            SerialParity::Even => Parity::Even,
            SerialParity::None => Parity::None,
        };

        let flow_control = match self.flow_control {
            SerialFlowControl::Hardware => FlowControl::Hardware,
            SerialFlowControl::Software => FlowControl::Software,
            SerialFlowControl::None => FlowControl::None,
        };

        serialport::new(self.port.as_str(), self.baud_rate)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(parity)
            .flow_control(flow_control)
            .timeout(Duration::from_millis(self.timeout_ms.unwrap_or(0)))
    }
}

impl Default for SerialPortConfig {
    fn default() -> Self {
        Self::new("/dev/ttyS0", 115_200)
    }
}
