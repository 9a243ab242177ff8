//! Scripted transports for scheduler tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::service::modbus::frame::with_crc;
use crate::service::modbus::{
  Connector, Frame, SerialParams, TcpParams, Transport, TransportError,
};

type Responder = Arc<dyn Fn(&[u8]) -> Option<Frame> + Send + Sync>;

/// What the mock transports observed.
#[derive(Debug, Default)]
pub(crate) struct Probe {
  in_flight: AtomicBool,
  pub(crate) opened: AtomicUsize,
  pub(crate) exchanges: AtomicUsize,
  pub(crate) overlaps: AtomicUsize,
  pub(crate) windows: std::sync::Mutex<Vec<(Instant, Instant)>>,
}

#[derive(Clone)]
pub(crate) struct MockConnector {
  probe: Arc<Probe>,
  responder: Responder,
  delay: Duration,
  hang: bool,
  fail: bool,
}

impl std::fmt::Debug for MockConnector {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("MockConnector")
      .field("probe", &self.probe)
      .field("delay", &self.delay)
      .finish()
  }
}

impl MockConnector {
  pub(crate) fn new(
    responder: impl Fn(&[u8]) -> Option<Frame> + Send + Sync + 'static,
  ) -> Self {
    Self {
      probe: Arc::new(Probe::default()),
      responder: Arc::new(responder),
      delay: Duration::ZERO,
      hang: false,
      fail: false,
    }
  }

  pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = delay;
    self
  }

  /// Exchanges never complete.
  pub(crate) fn hanging(mut self) -> Self {
    self.hang = true;
    self
  }

  /// Opening always fails.
  pub(crate) fn failing(mut self) -> Self {
    self.fail = true;
    self
  }

  pub(crate) fn probe(&self) -> Arc<Probe> {
    self.probe.clone()
  }

  fn transport(&self) -> Result<Box<dyn Transport>, TransportError> {
    if self.fail {
      return Err(TransportError::Io(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        "no such port",
      )));
    }

    self.probe.opened.fetch_add(1, Ordering::SeqCst);
    Ok(Box::new(MockTransport {
      probe: self.probe.clone(),
      responder: self.responder.clone(),
      delay: self.delay,
      hang: self.hang,
    }))
  }
}

#[async_trait::async_trait]
impl Connector for MockConnector {
  async fn serial(
    &self,
    _params: &SerialParams,
  ) -> Result<Box<dyn Transport>, TransportError> {
    self.transport()
  }

  async fn tcp(
    &self,
    _params: &TcpParams,
  ) -> Result<Box<dyn Transport>, TransportError> {
    self.transport()
  }
}

struct MockTransport {
  probe: Arc<Probe>,
  responder: Responder,
  delay: Duration,
  hang: bool,
}

impl std::fmt::Debug for MockTransport {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("MockTransport")
      .field("delay", &self.delay)
      .finish()
  }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
  async fn send_receive(
    &mut self,
    frame: &[u8],
    _expected: usize,
    timeout: Duration,
  ) -> Result<Frame, TransportError> {
    if self.probe.in_flight.swap(true, Ordering::SeqCst) {
      self.probe.overlaps.fetch_add(1, Ordering::SeqCst);
    }
    let start = Instant::now();

    if self.hang {
      std::future::pending::<()>().await;
    }
    tokio::time::sleep(self.delay).await;
    let response = (self.responder)(frame);

    self.probe.windows.lock().unwrap().push((start, Instant::now()));
    self.probe.exchanges.fetch_add(1, Ordering::SeqCst);
    self.probe.in_flight.store(false, Ordering::SeqCst);

    response.ok_or(TransportError::Timeout { timeout })
  }
}

/// Answers every known sensor query as slave 1, echoing any gateway prefix.
pub(crate) fn sensor_responder(request: &[u8]) -> Option<Frame> {
  let split = request.len().checked_sub(8)?;
  let (prefix, query) = request.split_at(split);
  let start = u16::from_be_bytes([query[2], query[3]]);
  let count = u16::from_be_bytes([query[4], query[5]]);

  let data: Vec<u8> = match (start, count) {
    // humidity 60.0, temperature 25.5
    (0x0000, 2) => vec![0x02, 0x58, 0x00, 0xFF],
    // air quality
    (0x0000, 5) => {
      vec![0x00, 0x2A, 0x00, 0x7B, 0x00, 0xC8, 0x11, 0x94, 0x00, 0x0F]
    }
    // light/gas, wide pressure and light
    (0x0000, 8) => vec![
      0x00, 0x00, 0x00, 0xEC, 0x00, 0x19, 0x03, 0x00, 0x00, 0x01, 0x8C, 0xA0,
      0x00, 0x00, 0x01, 0xA7,
    ],
    // vibration motion, velocity 1.5 / 0.5 / 0.3
    (0x0000, 13) => [250u16, 15, 5, 3, 10, 10, 10, 0, 0, 7, 1, 1, 1]
      .into_iter()
      .flat_map(u16::to_be_bytes)
      .collect(),
    // vibration frequency
    (0x0021, 6) => [50.0f32, 50.0, 25.0]
      .into_iter()
      .flat_map(f32::to_be_bytes)
      .collect(),
    _ => return None,
  };

  let mut body = vec![0x01, query[1], u8::try_from(data.len()).ok()?];
  body.extend_from_slice(&data);

  let mut response = prefix.to_vec();
  response.extend_from_slice(&with_crc(&body));
  Some(response)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::service::modbus::build_query;

  #[test]
  fn responder_echoes_gateway_prefix() {
    let mut request = vec![0x00, 0x02];
    request.extend_from_slice(&build_query(0x01, 0x03, 0x0000, 2));

    let response = sensor_responder(&request).unwrap();

    assert_eq!(&response[..5], &[0x00, 0x02, 0x01, 0x03, 0x04]);
    assert_eq!(response.len(), 2 + 9);
  }

  #[test]
  fn responder_ignores_unknown_blocks() {
    assert_eq!(sensor_responder(&build_query(0x01, 0x03, 0x0100, 2)), None);
    assert_eq!(sensor_responder(&[0x01]), None);
  }
}
