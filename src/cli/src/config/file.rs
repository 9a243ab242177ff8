use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::process::{AddressingMode, TransportMode};
use crate::service::modbus::{DeviceClass, ReadingKind, Validation};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum LogLevel {
  Trace,
  Debug,
  Info,
  Warn,
  Error,
}

#[derive(Default, Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Modbus {
  pub(crate) response_timeout: Option<u32>,
  pub(crate) connect_timeout: Option<u32>,
  pub(crate) settle_delay: Option<u32>,
  pub(crate) idle_interval: Option<u32>,
  pub(crate) termination_timeout: Option<u32>,
  pub(crate) validation: Option<Validation>,
  pub(crate) tcp_read_limit: Option<usize>,
  pub(crate) persistence_buffer: Option<usize>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Parity {
  None,
  Odd,
  Even,
}

#[derive(Default, Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Serial {
  pub(crate) port: Option<String>,
  pub(crate) baud_rate: Option<u32>,
  pub(crate) parity: Option<Parity>,
  pub(crate) stop_bits: Option<u8>,
  pub(crate) data_bits: Option<u8>,
}

#[derive(Default, Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Tcp {
  pub(crate) host: Option<String>,
  pub(crate) port: Option<u16>,
  pub(crate) per_call: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Channel {
  pub(crate) sensor: ReadingKind,
  pub(crate) slave: Option<u8>,
  pub(crate) function: Option<u8>,
  pub(crate) mode: Option<TransportMode>,
  #[serde(default)]
  pub(crate) serial: Serial,
  #[serde(default)]
  pub(crate) tcp: Tcp,
  pub(crate) addressing: Option<AddressingMode>,
  pub(crate) gateway_address: Option<String>,
  pub(crate) poll_interval: Option<u64>,
}

#[derive(Default, Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Values {
  pub(crate) log_level: Option<LogLevel>,
  pub(crate) device_class: Option<DeviceClass>,
  #[serde(default)]
  pub(crate) modbus: Modbus,
  #[serde(default)]
  pub(crate) channels: BTreeMap<String, Channel>,
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
  #[error("Failed creating project directories")]
  MissingProjectDirs,

  #[error("Failed reading config file")]
  Read(#[from] std::io::Error),

  #[error("Config file is missing an extension")]
  MissingExtension,

  #[error("Config file has invalid extension")]
  InvalidExtension,

  #[error("Failed deserializing config from yaml")]
  DeserializationYaml(#[from] serde_yaml::Error),

  #[error("Failed deserializing config from toml")]
  DeserializationToml(#[from] toml::de::Error),

  #[error("Failed deserializing config from json")]
  DeserializationJson(#[from] serde_json::Error),
}

/// Reads the config file at `location` or at the default project location.
/// Only a missing default file is tolerated.
pub(crate) async fn parse_async(
  location: Option<&str>,
) -> Result<Values, ParseError> {
  let location = match location {
    Some(location) => std::path::PathBuf::from(location),
    None => {
      let location =
        match directories::ProjectDirs::from("com", "fieldpoll", "fieldpoll") {
          Some(project_dirs) => project_dirs.config_dir().join("config.yaml"),
          None => return Err(ParseError::MissingProjectDirs),
        };
      if !tokio::fs::try_exists(&location).await.unwrap_or(false) {
        tracing::debug!(
          "No config file at {}, using defaults",
          location.display()
        );
        return Ok(Values::default());
      }
      location
    }
  };

  let raw = tokio::fs::read_to_string(&location).await?;
  let values = match location.extension().and_then(|str| str.to_str()) {
    None => return Err(ParseError::MissingExtension),
    Some("yaml" | "yml") => serde_yaml::from_str::<Values>(raw.as_str())?,
    Some("toml") => toml::from_str::<Values>(raw.as_str())?,
    Some("json") => serde_json::from_str::<Values>(raw.as_str())?,
    Some(_) => return Err(ParseError::InvalidExtension),
  };

  Ok(values)
}

pub(crate) fn milliseconds_to_duration(
  milliseconds: u32,
) -> std::time::Duration {
  std::time::Duration::from_millis(u64::from(milliseconds))
}

pub(crate) fn to_parity(parity: Parity) -> tokio_serial::Parity {
  match parity {
    Parity::None => tokio_serial::Parity::None,
    Parity::Odd => tokio_serial::Parity::Odd,
    Parity::Even => tokio_serial::Parity::Even,
  }
}

pub(crate) fn to_stop_bits(stop_bits: u8) -> tokio_serial::StopBits {
  match stop_bits {
    1 => tokio_serial::StopBits::One,
    2 => tokio_serial::StopBits::Two,
    other => {
      tracing::warn!("Invalid stop bits {}, using 1", other);
      tokio_serial::StopBits::One
    }
  }
}

pub(crate) fn to_data_bits(data_bits: u8) -> tokio_serial::DataBits {
  match data_bits {
    5 => tokio_serial::DataBits::Five,
    6 => tokio_serial::DataBits::Six,
    7 => tokio_serial::DataBits::Seven,
    8 => tokio_serial::DataBits::Eight,
    other => {
      tracing::warn!("Invalid data bits {}, using 8", other);
      tokio_serial::DataBits::Eight
    }
  }
}

#[cfg(test)]
mod tests {
  use std::io::Write;

  use super::*;

  #[tokio::test]
  async fn reads_yaml_by_extension() {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    write!(
      file,
      "log_level: info
device_class: 3
modbus:
  validation: strict
  response_timeout: 500
channels:
  boiler:
    sensor: temperature-humidity
    mode: tcp
    tcp:
      host: 10.0.0.7
      per_call: true
"
    )
    .unwrap();

    let values = parse_async(file.path().to_str()).await.unwrap();

    assert_eq!(values.device_class.map(DeviceClass::get), Some(3));
    assert_eq!(values.modbus.validation, Some(Validation::Strict));
    assert_eq!(values.modbus.response_timeout, Some(500));
    let boiler = &values.channels["boiler"];
    assert_eq!(boiler.sensor, ReadingKind::TemperatureHumidity);
    assert_eq!(boiler.mode, Some(TransportMode::Tcp));
    assert_eq!(boiler.tcp.host.as_deref(), Some("10.0.0.7"));
    assert_eq!(boiler.tcp.per_call, Some(true));
  }

  #[tokio::test]
  async fn reads_toml_and_json() {
    let mut toml = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    write!(
      toml,
      "[channels.air]\nsensor = \"air-quality\"\npoll_interval = 5\n"
    )
    .unwrap();
    let mut json = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    write!(json, r#"{{"channels": {{"light": {{"sensor": "light-gas"}}}}}}"#)
      .unwrap();

    let toml = parse_async(toml.path().to_str()).await.unwrap();
    let json = parse_async(json.path().to_str()).await.unwrap();

    assert_eq!(toml.channels["air"].poll_interval, Some(5));
    assert_eq!(json.channels["light"].sensor, ReadingKind::LightGas);
  }

  #[tokio::test]
  async fn rejects_invalid_device_class() {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    write!(file, "device_class: 7\n").unwrap();

    assert!(matches!(
      parse_async(file.path().to_str()).await,
      Err(ParseError::DeserializationYaml(_))
    ));
  }

  #[tokio::test]
  async fn rejects_unknown_extension() {
    let file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();

    assert!(matches!(
      parse_async(file.path().to_str()).await,
      Err(ParseError::InvalidExtension)
    ));
  }

  #[tokio::test]
  async fn explicit_missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.yaml");

    assert!(matches!(
      parse_async(missing.to_str()).await,
      Err(ParseError::Read(_))
    ));
  }

  #[test]
  fn serial_settings_fall_back_on_invalid_values() {
    assert_eq!(to_stop_bits(2), tokio_serial::StopBits::Two);
    assert_eq!(to_stop_bits(3), tokio_serial::StopBits::One);
    assert_eq!(to_data_bits(7), tokio_serial::DataBits::Seven);
    assert_eq!(to_data_bits(9), tokio_serial::DataBits::Eight);
    assert_eq!(to_parity(Parity::Even), tokio_serial::Parity::Even);
  }
}
