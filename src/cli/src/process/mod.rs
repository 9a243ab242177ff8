mod channel;
mod poll;

#[cfg(test)]
mod mock;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures_time::future::FutureExt;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

pub use channel::*;
pub use poll::{CycleError, Link, Settings};

use crate::service::modbus::{
  Connector, DeviceClass, SerialParams, TransportError,
};
use crate::service::serial::{self, SerialPort};
use crate::service::sink::Sink;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
  #[error("No channel named {0:?}")]
  UnknownChannel(String),

  #[error("Failed opening transport for {channel}")]
  Open {
    channel: String,
    #[source]
    source: TransportError,
  },

  #[error("Invalid configuration")]
  Config(#[from] ConfigError),
}

#[derive(Debug)]
struct Handle {
  token: CancellationToken,
  abort: tokio::task::AbortHandle,
  join: tokio::task::JoinHandle<()>,
  link: Link,
  port: Option<String>,
}

#[derive(Debug)]
struct Channel {
  runtime: Arc<Mutex<ChannelRuntime>>,
  handle: Mutex<Option<Handle>>,
}

#[derive(Debug)]
struct SharedPort {
  link: Link,
  users: usize,
}

/// Fixed set of named channels, each with its own worker once opened.
#[derive(Debug)]
pub struct Registry {
  channels: BTreeMap<String, Channel>,
  ports: Mutex<HashMap<String, SharedPort>>,
  connector: Arc<dyn Connector>,
  sink: Arc<dyn Sink>,
  device_class: Arc<RwLock<DeviceClass>>,
  settings: Settings,
}

impl Registry {
  pub fn new(
    channels: impl IntoIterator<Item = ChannelConfig>,
    settings: Settings,
    device_class: DeviceClass,
    connector: Arc<dyn Connector>,
    sink: Arc<dyn Sink>,
  ) -> Self {
    let channels = channels
      .into_iter()
      .map(|config| {
        (
          config.name.clone(),
          Channel {
            runtime: Arc::new(Mutex::new(ChannelRuntime::new(config))),
            handle: Mutex::new(None),
          },
        )
      })
      .collect::<BTreeMap<_, _>>();

    Self {
      channels,
      ports: Mutex::new(HashMap::new()),
      connector,
      sink,
      device_class: Arc::new(RwLock::new(device_class)),
      settings,
    }
  }

  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.channels.keys().map(String::as_str)
  }

  fn channel(&self, name: &str) -> Result<&Channel, RegistryError> {
    self
      .channels
      .get(name)
      .ok_or_else(|| RegistryError::UnknownChannel(name.to_owned()))
  }

  /// Opens the channel transport and spawns its worker. The worker idles
  /// until the channel is started.
  #[tracing::instrument(skip(self))]
  pub async fn open(&self, name: &str) -> Result<(), RegistryError> {
    let channel = self.channel(name)?;
    let mut handle = channel.handle.lock().await;
    if handle.is_some() {
      return Ok(());
    }

    let config = channel.runtime.lock().await.config.clone();
    let link =
      self
        .acquire(&config)
        .await
        .map_err(|source| RegistryError::Open {
          channel: name.to_owned(),
          source,
        })?;

    let token = CancellationToken::new();
    let worker = poll::Worker {
      runtime: channel.runtime.clone(),
      link: link.clone(),
      sink: self.sink.clone(),
      device_class: self.device_class.clone(),
      settings: self.settings,
      token: token.child_token(),
    };
    let join = tokio::spawn(worker.run());
    let abort = join.abort_handle();
    *handle = Some(Handle {
      token,
      abort,
      join,
      link,
      port: config.shared_port().map(str::to_owned),
    });

    channel.runtime.lock().await.open = true;
    tracing::info!("Opened channel {}", name);

    Ok(())
  }

  /// Stops the worker, waiting at most the termination timeout, and
  /// releases the transport.
  #[tracing::instrument(skip(self))]
  pub async fn close(&self, name: &str) -> Result<(), RegistryError> {
    let channel = self.channel(name)?;
    let handle = channel.handle.lock().await.take();

    if let Some(handle) = handle {
      handle.token.cancel();
      let timeout =
        futures_time::time::Duration::from(self.settings.termination_timeout);
      match handle.join.timeout(timeout).await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => {
          tracing::error! {
            %error,
            "Joining worker of {} failed",
            name
          }
        }
        Err(_) => {
          handle.abort.abort();
          tracing::warn!(
            "Worker of {} did not stop within {:?}, aborted",
            name,
            self.settings.termination_timeout
          );
        }
      }

      self.release(handle.port, handle.link).await;
      tracing::info!("Closed channel {}", name);
    }

    let mut runtime = channel.runtime.lock().await;
    runtime.open = false;
    runtime.running = false;
    runtime.phase = Phase::Stopped;

    Ok(())
  }

  pub async fn close_all(&self) {
    for name in self.channels.keys() {
      if let Err(error) = self.close(name).await {
        tracing::error!("Failed closing {} {}", name, error);
      }
    }
  }

  /// Opens the channel if needed and lets its worker poll.
  #[tracing::instrument(skip(self))]
  pub async fn start(&self, name: &str) -> Result<(), RegistryError> {
    self.open(name).await?;
    self.channel(name)?.runtime.lock().await.running = true;
    tracing::info!("Started polling {}", name);
    Ok(())
  }

  /// Pauses polling. The worker notices at the top of its next iteration.
  #[tracing::instrument(skip(self))]
  pub async fn stop(&self, name: &str) -> Result<(), RegistryError> {
    self.channel(name)?.runtime.lock().await.running = false;
    tracing::info!("Stopped polling {}", name);
    Ok(())
  }

  #[tracing::instrument(skip(self))]
  pub async fn set_poll_interval(
    &self,
    name: &str,
    seconds: u64,
  ) -> Result<PollInterval, RegistryError> {
    let interval = PollInterval::clamped(seconds);
    if interval.seconds() != seconds {
      tracing::debug!(
        "Clamped poll interval {} to {}",
        seconds,
        interval.seconds()
      );
    }
    self.channel(name)?.runtime.lock().await.config.poll_interval = interval;
    Ok(interval)
  }

  /// Returns whether the channel has to be closed and reopened for the new
  /// transport to take effect.
  #[tracing::instrument(skip(self, transport))]
  pub async fn set_transport_config(
    &self,
    name: &str,
    transport: TransportConfig,
  ) -> Result<bool, RegistryError> {
    let mut runtime = self.channel(name)?.runtime.lock().await;
    let mut next = runtime.config.clone();
    next.transport = transport;
    let reopen = runtime.open && runtime.config.transport_differs(&next);
    runtime.config = next;
    Ok(reopen)
  }

  /// Replaces everything but the name. Returns whether a reopen is needed.
  #[tracing::instrument(skip(self, config))]
  pub async fn update_config(
    &self,
    name: &str,
    mut config: ChannelConfig,
  ) -> Result<bool, RegistryError> {
    if config.addressing == AddressingMode::Gateway {
      config.gateway_address =
        validate_gateway_address(&config.gateway_address)?;
    }
    config.name = name.to_owned();

    let mut runtime = self.channel(name)?.runtime.lock().await;
    let reopen = runtime.open && runtime.config.transport_differs(&config);
    runtime.config = config;
    Ok(reopen)
  }

  /// Switches addressing, validating the gateway address when one is used.
  #[tracing::instrument(skip(self))]
  pub async fn set_addressing(
    &self,
    name: &str,
    mode: AddressingMode,
    address: Option<&str>,
  ) -> Result<(), RegistryError> {
    let mut runtime = self.channel(name)?.runtime.lock().await;
    let address = match (mode, address) {
      (AddressingMode::Gateway, Some(address)) => {
        Some(validate_gateway_address(address)?)
      }
      (AddressingMode::Gateway, None) => Some(validate_gateway_address(
        &runtime.config.gateway_address,
      )?),
      (AddressingMode::Direct, address) => address.map(str::to_owned),
    };

    runtime.config.addressing = mode;
    if let Some(address) = address {
      runtime.config.gateway_address = address;
    }
    Ok(())
  }

  pub async fn latest(&self, name: &str) -> Result<Latest, RegistryError> {
    Ok(self.channel(name)?.runtime.lock().await.latest())
  }

  pub async fn frames(&self, name: &str) -> Result<FramePair, RegistryError> {
    Ok(self.channel(name)?.runtime.lock().await.frames())
  }

  pub async fn status(&self, name: &str) -> Result<Status, RegistryError> {
    Ok(self.channel(name)?.runtime.lock().await.status())
  }

  pub async fn statuses(&self) -> Vec<Status> {
    let mut statuses = Vec::with_capacity(self.channels.len());
    for channel in self.channels.values() {
      statuses.push(channel.runtime.lock().await.status());
    }
    statuses
  }

  #[tracing::instrument(skip(self))]
  pub async fn set_device_class(
    &self,
    class: u8,
  ) -> Result<DeviceClass, RegistryError> {
    let class = DeviceClass::new(class).map_err(ConfigError::from)?;
    *self.device_class.write().await = class;
    Ok(class)
  }

  pub async fn device_class(&self) -> DeviceClass {
    *self.device_class.read().await
  }

  pub fn scan_ports(&self) -> Vec<SerialPort> {
    serial::scan_ports()
  }

  async fn acquire(
    &self,
    config: &ChannelConfig,
  ) -> Result<Link, TransportError> {
    match config.transport.mode {
      TransportMode::Tcp => {
        let transport = self.connector.tcp(&config.transport.tcp).await?;
        Ok(Arc::new(Mutex::new(transport)))
      }
      TransportMode::Serial => {
        self.acquire_serial(&config.transport.serial).await
      }
    }
  }

  async fn acquire_serial(
    &self,
    params: &SerialParams,
  ) -> Result<Link, TransportError> {
    let mut ports = self.ports.lock().await;
    if let Some(shared) = ports.get_mut(&params.port) {
      shared.users += 1;
      tracing::debug!(
        "Sharing serial port {} between {} channels",
        params.port,
        shared.users
      );
      return Ok(shared.link.clone());
    }

    let link: Link = Arc::new(Mutex::new(self.connector.serial(params).await?));
    ports.insert(
      params.port.clone(),
      SharedPort {
        link: link.clone(),
        users: 1,
      },
    );
    Ok(link)
  }

  async fn release(&self, port: Option<String>, link: Link) {
    drop(link);

    let Some(port) = port else {
      return;
    };
    let mut ports = self.ports.lock().await;
    let remaining = match ports.get_mut(&port) {
      Some(shared) => {
        shared.users = shared.users.saturating_sub(1);
        shared.users
      }
      None => return,
    };
    if remaining == 0 {
      ports.remove(&port);
      tracing::debug!("Released serial port {}", port);
    }
  }
}
