use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_modbus::SlaveId;

use crate::service::modbus::{
  envelope, format_hex, DeviceClassError, EnvelopeError, Frame, Reading,
  ReadingKind, SerialParams, TcpParams,
};

pub const MIN_POLL_INTERVAL: u64 = 1;
pub const MAX_POLL_INTERVAL: u64 = 60;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
  #[error("Invalid gateway address")]
  GatewayAddress(#[from] EnvelopeError),

  #[error("Invalid device class")]
  DeviceClass(#[from] DeviceClassError),
}

/// Seconds between polling cycles, always within 1 to 60.
#[derive(
  Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize,
  Deserialize,
)]
#[serde(from = "u64", into = "u64")]
pub struct PollInterval(u64);

impl PollInterval {
  pub fn clamped(seconds: u64) -> Self {
    Self(seconds.clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL))
  }

  pub fn seconds(self) -> u64 {
    self.0
  }

  pub fn duration(self) -> Duration {
    Duration::from_secs(self.0)
  }
}

impl Default for PollInterval {
  fn default() -> Self {
    Self(2)
  }
}

impl From<u64> for PollInterval {
  fn from(value: u64) -> Self {
    Self::clamped(value)
  }
}

impl From<PollInterval> for u64 {
  fn from(value: PollInterval) -> Self {
    value.0
  }
}

#[derive(
  Debug, Clone, Copy, Default, Hash, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
  #[default]
  Serial,
  Tcp,
}

#[derive(
  Debug, Clone, Copy, Default, Hash, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AddressingMode {
  #[default]
  Direct,
  Gateway,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransportConfig {
  pub mode: TransportMode,
  pub serial: SerialParams,
  pub tcp: TcpParams,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelConfig {
  pub name: String,
  pub sensor: ReadingKind,
  pub slave: SlaveId,
  pub function: u8,
  pub transport: TransportConfig,
  pub addressing: AddressingMode,
  pub gateway_address: String,
  pub poll_interval: PollInterval,
}

impl ChannelConfig {
  pub fn new(name: impl Into<String>, sensor: ReadingKind) -> Self {
    Self {
      name: name.into(),
      sensor,
      slave: 0x01,
      function: 0x03,
      transport: TransportConfig {
        mode: TransportMode::Serial,
        serial: SerialParams::default(),
        tcp: TcpParams::default(),
      },
      addressing: AddressingMode::Direct,
      gateway_address: hex::encode_upper(envelope::DEFAULT_GATEWAY_ADDRESS),
      poll_interval: PollInterval::default(),
    }
  }

  /// Whether switching to `other` needs the transport to be reopened.
  pub fn transport_differs(&self, other: &ChannelConfig) -> bool {
    let (current, next) = (&self.transport, &other.transport);
    current.mode != next.mode
      || match next.mode {
        TransportMode::Serial => current.serial != next.serial,
        TransportMode::Tcp => current.tcp != next.tcp,
      }
  }

  /// Key of the physical port this channel shares with others, if any.
  pub fn shared_port(&self) -> Option<&str> {
    match self.transport.mode {
      TransportMode::Serial => Some(self.transport.serial.port.as_str()),
      TransportMode::Tcp => None,
    }
  }
}

#[derive(
  Debug, Clone, Copy, Default, Hash, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
  #[default]
  Stopped,
  Idle,
  Querying,
  Decoding,
}

#[derive(Debug, Clone)]
pub struct ChannelRuntime {
  pub config: ChannelConfig,
  pub open: bool,
  pub running: bool,
  pub phase: Phase,
  pub last_query: Option<Frame>,
  pub last_response: Option<Frame>,
  pub resolved_gateway: Option<String>,
  pub reading: Option<Reading>,
  pub decoded_at: Option<chrono::DateTime<chrono::Utc>>,
  pub polled_at: Option<chrono::DateTime<chrono::Utc>>,
  pub stale: bool,
  pub last_error: Option<String>,
}

impl ChannelRuntime {
  pub fn new(config: ChannelConfig) -> Self {
    Self {
      config,
      open: false,
      running: false,
      phase: Phase::Stopped,
      last_query: None,
      last_response: None,
      resolved_gateway: None,
      reading: None,
      decoded_at: None,
      polled_at: None,
      stale: true,
      last_error: None,
    }
  }

  pub fn latest(&self) -> Latest {
    Latest {
      reading: self.reading,
      decoded_at: self.decoded_at,
      polled_at: self.polled_at,
      stale: self.stale,
    }
  }

  pub fn frames(&self) -> FramePair {
    FramePair {
      query: self.last_query.as_deref().map(format_hex),
      response: self.last_response.as_deref().map(format_hex),
      gateway_address: self.resolved_gateway.clone(),
    }
  }

  pub fn status(&self) -> Status {
    Status {
      config: self.config.clone(),
      open: self.open,
      running: self.running,
      phase: self.phase,
      resolved_gateway: self.resolved_gateway.clone(),
      last_error: self.last_error.clone(),
      polled_at: self.polled_at,
      stale: self.stale,
    }
  }
}

/// Last good reading of a channel and how fresh it is.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Latest {
  pub reading: Option<Reading>,
  pub decoded_at: Option<chrono::DateTime<chrono::Utc>>,
  pub polled_at: Option<chrono::DateTime<chrono::Utc>>,
  /// The latest cycle did not produce `reading`.
  pub stale: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FramePair {
  pub query: Option<String>,
  pub response: Option<String>,
  pub gateway_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Status {
  pub config: ChannelConfig,
  pub open: bool,
  pub running: bool,
  pub phase: Phase,
  pub resolved_gateway: Option<String>,
  pub last_error: Option<String>,
  pub polled_at: Option<chrono::DateTime<chrono::Utc>>,
  pub stale: bool,
}

/// Normalizes a gateway address for storage, rejecting what would not
/// parse.
pub fn validate_gateway_address(address: &str) -> Result<String, ConfigError> {
  let bytes = envelope::parse_address(address)?;
  Ok(hex::encode_upper(bytes))
}
