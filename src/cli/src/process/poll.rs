use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use super::channel::*;
use crate::service::modbus::{
  build_query, envelope, sensor, Context, DecodeError, DeviceClass, Expect,
  Frame, Reading, Span, Transport, TransportError, Validation,
};
use crate::service::sink::{Record, Sink};

/// A transport shared by every channel polling through it. Holding the lock
/// is what makes an exchange exclusive.
pub type Link = Arc<Mutex<Box<dyn Transport>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
  pub response_timeout: Duration,
  pub idle_interval: Duration,
  pub termination_timeout: Duration,
  pub validation: Validation,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      response_timeout: Duration::from_millis(1000),
      idle_interval: Duration::from_millis(200),
      termination_timeout: Duration::from_millis(1000),
      validation: Validation::Lenient,
    }
  }
}

#[derive(Debug, thiserror::Error)]
pub enum CycleError {
  #[error("Exchange failed")]
  Transport(#[from] TransportError),

  #[error("Response came from gateway {actual:?} instead of {expected:?}")]
  Gateway { expected: String, actual: String },

  #[error("Response rejected")]
  Decode(#[from] DecodeError),
}

impl CycleError {
  /// Display string with the full source chain.
  fn chain(&self) -> String {
    let mut message = self.to_string();
    let mut source = std::error::Error::source(self);
    while let Some(error) = source {
      message.push_str(": ");
      message.push_str(&error.to_string());
      source = error.source();
    }
    message
  }
}

pub(crate) struct Worker {
  pub(crate) runtime: Arc<Mutex<ChannelRuntime>>,
  pub(crate) link: Link,
  pub(crate) sink: Arc<dyn Sink>,
  pub(crate) device_class: Arc<RwLock<DeviceClass>>,
  pub(crate) settings: Settings,
  pub(crate) token: CancellationToken,
}

impl Worker {
  pub(crate) async fn run(self) {
    let session = uuid::Uuid::new_v4();
    let name = self.runtime.lock().await.config.name.clone();
    tracing::debug!(%session, "Worker for {} started", name);

    loop {
      let (running, config) = {
        let runtime = self.runtime.lock().await;
        (runtime.running, runtime.config.clone())
      };

      if !running {
        self.set_phase(Phase::Stopped).await;
        if self.sleep(self.settings.idle_interval).await {
          break;
        }
        continue;
      }

      let result = self.cycle(&config).await;
      self.apply(&config, result).await;

      if self.sleep(config.poll_interval.duration()).await {
        break;
      }
    }

    self.set_phase(Phase::Stopped).await;
    tracing::debug!(%session, "Worker for {} stopped", name);
  }

  /// Returns true when the worker was cancelled while sleeping.
  async fn sleep(&self, duration: Duration) -> bool {
    tokio::select! {
      _ = self.token.cancelled() => true,
      _ = tokio::time::sleep(duration) => false,
    }
  }

  async fn set_phase(&self, phase: Phase) {
    self.runtime.lock().await.phase = phase;
  }

  #[tracing::instrument(skip_all, fields(channel = %config.name))]
  async fn cycle(&self, config: &ChannelConfig) -> Result<Reading, CycleError> {
    let sensor = sensor(config.sensor);
    let context = Context {
      expect: Expect {
        slave: config.slave,
        function: config.function,
        validation: self.settings.validation,
      },
      device_class: *self.device_class.read().await,
    };

    self.set_phase(Phase::Querying).await;

    let mut responses = Vec::with_capacity(sensor.spans().len());
    for span in sensor.spans() {
      let query = build_query(
        config.slave,
        config.function,
        span.address(),
        span.quantity(),
      );
      let (outgoing, expected) = match config.addressing {
        AddressingMode::Direct => (query, span.response_len()),
        AddressingMode::Gateway => {
          let wrapped = envelope::wrap(&query, &config.gateway_address);
          let expected = span.response_len() + wrapped.len() - query.len();
          (wrapped, expected)
        }
      };

      self.runtime.lock().await.last_query = Some(outgoing.clone());

      let response = self.exchange(&outgoing, expected).await?;

      self.runtime.lock().await.last_response = Some(response.clone());

      responses.push(match config.addressing {
        AddressingMode::Direct => response,
        AddressingMode::Gateway => {
          let unwrapped = envelope::unwrap(&response, &config.gateway_address);
          self.runtime.lock().await.resolved_gateway =
            Some(unwrapped.resolved.clone());
          if !unwrapped.matched {
            return Err(CycleError::Gateway {
              expected: config.gateway_address.to_uppercase(),
              actual: unwrapped.resolved,
            });
          }
          unwrapped.inner
        }
      });
    }

    self.set_phase(Phase::Decoding).await;

    Ok(sensor.decode(&responses, &context)?)
  }

  async fn exchange(
    &self,
    frame: &[u8],
    expected: usize,
  ) -> Result<Frame, TransportError> {
    let mut link = self.link.lock().await;
    link
      .send_receive(frame, expected, self.settings.response_timeout)
      .await
  }

  async fn apply(
    &self,
    config: &ChannelConfig,
    result: Result<Reading, CycleError>,
  ) {
    let now = chrono::Utc::now();
    {
      let mut runtime = self.runtime.lock().await;
      runtime.polled_at = Some(now);
      runtime.phase = Phase::Idle;
      match &result {
        Ok(reading) => {
          runtime.reading = Some(*reading);
          runtime.decoded_at = Some(now);
          runtime.stale = false;
          runtime.last_error = None;
        }
        Err(error) => {
          runtime.stale = true;
          runtime.last_error = Some(error.chain());
        }
      }
    }

    match result {
      Ok(reading) => {
        tracing::debug!("Channel {} decoded {:?}", config.name, reading);
        self.sink.save(Record {
          channel: config.name.clone(),
          kind: reading.kind(),
          reading,
          timestamp: now,
        });
      }
      Err(error) => {
        tracing::debug!(
          "Channel {} cycle failed: {}",
          config.name,
          error.chain()
        );
      }
    }
  }
}
