mod args;
mod env;
mod file;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;

use crate::process::{
  AddressingMode, ChannelConfig, PollInterval, Settings, TransportConfig,
  TransportMode,
};
use crate::service::modbus::{
  envelope, DeviceClass, ReadingKind, SerialParams, SystemConnector,
  TcpParams, Validation,
};

const DEFAULT_SERIAL_PORT: &str = "COM3";
const DEFAULT_TCP_HOST: &str = "127.0.0.1";

#[derive(Debug, Clone)]
pub struct Modbus {
  pub response_timeout: Duration,
  pub connect_timeout: Duration,
  pub settle_delay: Duration,
  pub idle_interval: Duration,
  pub termination_timeout: Duration,
  pub validation: Validation,
  pub tcp_read_limit: usize,
  pub persistence_buffer: usize,
}

impl Modbus {
  pub fn settings(&self) -> Settings {
    Settings {
      response_timeout: self.response_timeout,
      idle_interval: self.idle_interval,
      termination_timeout: self.termination_timeout,
      validation: self.validation,
    }
  }

  pub fn connector(&self) -> SystemConnector {
    SystemConnector {
      settle_delay: self.settle_delay,
      connect_timeout: self.connect_timeout,
      read_limit: self.tcp_read_limit,
    }
  }
}

#[derive(Debug, Clone)]
pub struct Values {
  pub log_level: tracing::level_filters::LevelFilter,
  pub device_class: DeviceClass,
  pub modbus: Modbus,
  pub channels: Vec<ChannelConfig>,
  pub start: Vec<String>,
  pub scan: bool,
}

#[derive(Debug, Clone)]
struct Unparsed {
  from_args: args::Values,
  from_env: env::Values,
  from_file: file::Values,
}

#[derive(Debug, Clone)]
pub struct Manager {
  lock: Arc<Mutex<Unparsed>>,
}

#[derive(Debug, Error)]
pub enum ReadError {
  #[error("Failed reading file")]
  FileReadError(#[from] file::ParseError),

  #[error("Failed reading env")]
  EnvReadError(#[from] env::ParseError),
}

impl Manager {
  pub async fn new() -> Result<Self, ReadError> {
    let config = Self::read_async().await?;

    let config_manager = Self {
      lock: Arc::new(Mutex::new(config)),
    };

    Ok(config_manager)
  }

  pub async fn values(&self) -> Values {
    let config = self.lock.lock().await.clone();

    Self::parse(config)
  }

  #[tracing::instrument(skip(self))]
  pub async fn reload(&self) -> Values {
    let config = {
      let mut values = self.lock.lock().await;
      let from_file =
        file::parse_async(values.from_args.config.as_deref()).await;
      match from_file {
        Ok(from_file) => values.from_file = from_file,
        Err(error) => {
          tracing::error!("Failed parsing config file {}", error)
        }
      }
      values.clone()
    };

    Self::parse(config)
  }

  fn parse(config: Unparsed) -> Values {
    let modbus = config.from_file.modbus;
    let from_env = config.from_env;

    let channels = if config.from_file.channels.is_empty() {
      default_channels(&from_env)
    } else {
      config
        .from_file
        .channels
        .into_iter()
        .map(|(name, channel)| to_channel_config(name, channel, &from_env))
        .collect()
    };

    Values {
      log_level: if config.from_args.trace {
        tracing::level_filters::LevelFilter::TRACE
      } else {
        config.from_file.log_level.map_or_else(
          || {
            #[cfg(debug_assertions)]
            {
              tracing::level_filters::LevelFilter::DEBUG
            }
            #[cfg(not(debug_assertions))]
            {
              tracing::level_filters::LevelFilter::INFO
            }
          },
          |log_level| match log_level {
            file::LogLevel::Trace => tracing::level_filters::LevelFilter::TRACE,
            file::LogLevel::Debug => tracing::level_filters::LevelFilter::DEBUG,
            file::LogLevel::Info => tracing::level_filters::LevelFilter::INFO,
            file::LogLevel::Warn => tracing::level_filters::LevelFilter::WARN,
            file::LogLevel::Error => tracing::level_filters::LevelFilter::ERROR,
          },
        )
      },
      device_class: config.from_file.device_class.unwrap_or_default(),
      modbus: Modbus {
        response_timeout: file::milliseconds_to_duration(
          modbus.response_timeout.unwrap_or(1000),
        ),
        connect_timeout: file::milliseconds_to_duration(
          modbus.connect_timeout.unwrap_or(3000),
        ),
        settle_delay: file::milliseconds_to_duration(
          modbus.settle_delay.unwrap_or(300),
        ),
        idle_interval: file::milliseconds_to_duration(
          modbus.idle_interval.unwrap_or(200),
        ),
        termination_timeout: file::milliseconds_to_duration(
          modbus.termination_timeout.unwrap_or(1000),
        ),
        validation: modbus.validation.unwrap_or_default(),
        tcp_read_limit: modbus.tcp_read_limit.unwrap_or(1024),
        persistence_buffer: modbus.persistence_buffer.unwrap_or(1024),
      },
      channels,
      start: config.from_args.start,
      scan: config.from_args.scan,
    }
  }

  async fn read_async() -> Result<Unparsed, ReadError> {
    let from_args = args::parse();
    let from_env = env::parse()?;
    let from_file = file::parse_async(from_args.config.as_deref()).await?;

    Ok(Unparsed {
      from_args,
      from_env,
      from_file,
    })
  }
}

fn serial_defaults(from_env: &env::Values) -> SerialParams {
  SerialParams {
    port: from_env
      .serial_port
      .clone()
      .unwrap_or_else(|| DEFAULT_SERIAL_PORT.to_owned()),
    ..SerialParams::default()
  }
}

fn tcp_defaults(from_env: &env::Values) -> TcpParams {
  TcpParams {
    host: from_env
      .tcp_host
      .clone()
      .unwrap_or_else(|| DEFAULT_TCP_HOST.to_owned()),
    ..TcpParams::default()
  }
}

fn default_channels(from_env: &env::Values) -> Vec<ChannelConfig> {
  [
    ("light", ReadingKind::LightGas, "5678"),
    ("temperature", ReadingKind::TemperatureHumidity, "0002"),
    ("vibration", ReadingKind::Vibration, "0003"),
    ("air", ReadingKind::AirQuality, "0004"),
  ]
  .into_iter()
  .map(|(name, sensor, gateway_address)| {
    let mut config = ChannelConfig::new(name, sensor);
    config.transport.serial = serial_defaults(from_env);
    config.transport.tcp = tcp_defaults(from_env);
    config.gateway_address = gateway_address.to_owned();
    config
  })
  .collect()
}

fn to_channel_config(
  name: String,
  channel: file::Channel,
  from_env: &env::Values,
) -> ChannelConfig {
  let serial = serial_defaults(from_env);
  let tcp = tcp_defaults(from_env);
  let gateway_address = channel
    .gateway_address
    .unwrap_or_else(|| hex::encode_upper(envelope::DEFAULT_GATEWAY_ADDRESS));
  if let Err(error) = envelope::parse_address(&gateway_address) {
    tracing::warn!(
      "Channel {} has an invalid gateway address {}",
      name,
      error
    );
  }

  ChannelConfig {
    sensor: channel.sensor,
    slave: channel.slave.unwrap_or(0x01),
    function: channel.function.unwrap_or(0x03),
    transport: TransportConfig {
      mode: channel.mode.unwrap_or(TransportMode::Serial),
      serial: SerialParams {
        port: channel.serial.port.unwrap_or(serial.port),
        baud_rate: channel.serial.baud_rate.unwrap_or(serial.baud_rate),
        parity: channel.serial.parity.map_or(serial.parity, file::to_parity),
        stop_bits: channel
          .serial
          .stop_bits
          .map_or(serial.stop_bits, file::to_stop_bits),
        data_bits: channel
          .serial
          .data_bits
          .map_or(serial.data_bits, file::to_data_bits),
      },
      tcp: TcpParams {
        host: channel.tcp.host.unwrap_or(tcp.host),
        port: channel.tcp.port.unwrap_or(tcp.port),
        per_call: channel.tcp.per_call.unwrap_or(tcp.per_call),
      },
    },
    addressing: channel.addressing.unwrap_or(AddressingMode::Direct),
    gateway_address,
    poll_interval: channel
      .poll_interval
      .map_or_else(PollInterval::default, PollInterval::clamped),
    name,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn unparsed(yaml: &str) -> Unparsed {
    Unparsed {
      from_args: args::Values::default(),
      from_env: env::Values::default(),
      from_file: serde_yaml::from_str(yaml).unwrap(),
    }
  }

  #[test]
  fn defaults_without_file() {
    let values = Manager::parse(Unparsed {
      from_args: args::Values::default(),
      from_env: env::Values::default(),
      from_file: file::Values::default(),
    });

    assert_eq!(values.device_class, DeviceClass::default());
    assert_eq!(values.modbus.response_timeout, Duration::from_millis(1000));
    assert_eq!(values.modbus.settle_delay, Duration::from_millis(300));
    assert_eq!(values.modbus.validation, Validation::Lenient);
    assert_eq!(values.modbus.tcp_read_limit, 1024);

    let names = values
      .channels
      .iter()
      .map(|channel| (channel.name.as_str(), channel.gateway_address.as_str()))
      .collect::<Vec<_>>();
    assert_eq!(
      names,
      vec![
        ("light", "5678"),
        ("temperature", "0002"),
        ("vibration", "0003"),
        ("air", "0004")
      ]
    );
    assert!(values.channels.iter().all(|channel| {
      channel.transport.serial.port == "COM3"
        && channel.addressing == AddressingMode::Direct
    }));
  }

  #[test]
  fn env_supplies_default_port_and_host() {
    let mut config = unparsed(
      "channels:
  air:
    sensor: air-quality
  remote:
    sensor: vibration
    mode: tcp
    serial:
      port: /dev/ttyUSB3
",
    );
    config.from_env = env::Values {
      serial_port: Some("/dev/ttyUSB0".to_owned()),
      tcp_host: Some("192.168.1.20".to_owned()),
    };

    let values = Manager::parse(config);

    let air = &values.channels[0];
    assert_eq!(air.name, "air");
    assert_eq!(air.transport.serial.port, "/dev/ttyUSB0");
    let remote = &values.channels[1];
    assert_eq!(remote.transport.mode, TransportMode::Tcp);
    assert_eq!(remote.transport.serial.port, "/dev/ttyUSB3");
    assert_eq!(remote.transport.tcp.host, "192.168.1.20");
    assert_eq!(remote.transport.tcp.port, 502);
  }

  #[test]
  fn channel_values_are_resolved() {
    let values = Manager::parse(unparsed(
      "log_level: warn
channels:
  light:
    sensor: light-gas
    slave: 2
    addressing: gateway
    gateway_address: abcd
    poll_interval: 120
    serial:
      baud_rate: 19200
      parity: even
      stop_bits: 2
      data_bits: 7
",
    ));

    assert_eq!(
      values.log_level,
      tracing::level_filters::LevelFilter::WARN
    );
    let light = &values.channels[0];
    assert_eq!(light.slave, 2);
    assert_eq!(light.addressing, AddressingMode::Gateway);
    assert_eq!(light.gateway_address, "abcd");
    assert_eq!(light.poll_interval.seconds(), 60);
    assert_eq!(light.transport.serial.baud_rate, 19200);
    assert_eq!(light.transport.serial.parity, tokio_serial::Parity::Even);
    assert_eq!(light.transport.serial.stop_bits, tokio_serial::StopBits::Two);
    assert_eq!(
      light.transport.serial.data_bits,
      tokio_serial::DataBits::Seven
    );
  }

  #[test]
  fn trace_flag_overrides_file_level() {
    let mut config = unparsed("{}");
    config.from_args.trace = true;
    config.from_args.start = vec!["air".to_owned()];

    let values = Manager::parse(config);

    assert_eq!(
      values.log_level,
      tracing::level_filters::LevelFilter::TRACE
    );
    assert_eq!(values.start, vec!["air"]);

    let mut config = unparsed("log_level: warn\n");
    config.from_args.trace = true;

    let values = Manager::parse(config);

    assert_eq!(
      values.log_level,
      tracing::level_filters::LevelFilter::TRACE
    );
  }
}
