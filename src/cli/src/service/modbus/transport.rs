use std::fmt::Debug;
use std::time::Duration;

use futures_time::future::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialStream};

use super::frame::{format_hex, Frame};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
  #[error("Failed opening serial port {port}")]
  Open {
    port: String,
    #[source]
    source: tokio_serial::Error,
  },

  #[error("Failed connecting to {address}")]
  Connect {
    address: String,
    #[source]
    source: std::io::Error,
  },

  #[error("Connecting to {address} timed out")]
  ConnectTimeout { address: String },

  #[error("No response within {timeout:?}")]
  Timeout { timeout: Duration },

  #[error("Serial port control failed")]
  Control(#[from] tokio_serial::Error),

  #[error("Exchange failed")]
  Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialParams {
  pub port: String,
  pub baud_rate: u32,
  pub parity: tokio_serial::Parity,
  pub stop_bits: tokio_serial::StopBits,
  pub data_bits: tokio_serial::DataBits,
}

impl Default for SerialParams {
  fn default() -> Self {
    Self {
      port: "COM3".to_owned(),
      baud_rate: 9600,
      parity: tokio_serial::Parity::None,
      stop_bits: tokio_serial::StopBits::One,
      data_bits: tokio_serial::DataBits::Eight,
    }
  }
}

#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpParams {
  pub host: String,
  pub port: u16,
  /// Open a fresh connection for every exchange.
  pub per_call: bool,
}

impl TcpParams {
  pub fn address(&self) -> String {
    format!("{}:{}", self.host, self.port)
  }
}

impl Default for TcpParams {
  fn default() -> Self {
    Self {
      host: "127.0.0.1".to_owned(),
      port: 502,
      per_call: false,
    }
  }
}

/// One request/response exchange over an open link.
///
/// Implementations return whatever arrived before `timeout` even when it
/// is shorter than `expected`; an exchange with no bytes at all is a
/// [`TransportError::Timeout`]. Links that cannot discard input may return
/// trailing bytes past `expected`.
#[async_trait::async_trait]
pub trait Transport: Debug + Send {
  async fn send_receive(
    &mut self,
    frame: &[u8],
    expected: usize,
    timeout: Duration,
  ) -> Result<Frame, TransportError>;
}

/// Opens transports for channels.
#[async_trait::async_trait]
pub trait Connector: Debug + Send + Sync {
  async fn serial(
    &self,
    params: &SerialParams,
  ) -> Result<Box<dyn Transport>, TransportError>;

  async fn tcp(
    &self,
    params: &TcpParams,
  ) -> Result<Box<dyn Transport>, TransportError>;
}

#[derive(Debug, Clone, Copy)]
pub struct SystemConnector {
  pub settle_delay: Duration,
  pub connect_timeout: Duration,
  pub read_limit: usize,
}

#[async_trait::async_trait]
impl Connector for SystemConnector {
  async fn serial(
    &self,
    params: &SerialParams,
  ) -> Result<Box<dyn Transport>, TransportError> {
    Ok(Box::new(SerialTransport::open(params, self.settle_delay)?))
  }

  async fn tcp(
    &self,
    params: &TcpParams,
  ) -> Result<Box<dyn Transport>, TransportError> {
    Ok(Box::new(
      TcpTransport::open(params.clone(), self.connect_timeout, self.read_limit)
        .await?,
    ))
  }
}

pub struct SerialTransport {
  port: String,
  stream: SerialStream,
  settle_delay: Duration,
}

impl Debug for SerialTransport {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SerialTransport")
      .field("port", &self.port)
      .field("settle_delay", &self.settle_delay)
      .finish()
  }
}

impl SerialTransport {
  #[tracing::instrument(skip(settle_delay))]
  pub fn open(
    params: &SerialParams,
    settle_delay: Duration,
  ) -> Result<Self, TransportError> {
    let stream = tokio_serial::new(&params.port, params.baud_rate)
      .parity(params.parity)
      .stop_bits(params.stop_bits)
      .data_bits(params.data_bits)
      .open_native_async()
      .map_err(|source| TransportError::Open {
        port: params.port.clone(),
        source,
      })?;

    tracing::debug!("Opened serial port {}", params.port);

    Ok(Self {
      port: params.port.clone(),
      stream,
      settle_delay,
    })
  }
}

#[async_trait::async_trait]
impl Transport for SerialTransport {
  #[tracing::instrument(skip(self, frame), fields(port = %self.port))]
  async fn send_receive(
    &mut self,
    frame: &[u8],
    expected: usize,
    timeout: Duration,
  ) -> Result<Frame, TransportError> {
    self.stream.clear(tokio_serial::ClearBuffer::All)?;

    tracing::trace!("Sending {}", format_hex(frame));
    self.stream.write_all(frame).await?;
    self.stream.flush().await?;

    tokio::time::sleep(self.settle_delay).await;

    read_until(&mut self.stream, expected, timeout).await
  }
}

#[derive(Debug)]
pub struct TcpTransport {
  params: TcpParams,
  connect_timeout: Duration,
  read_limit: usize,
  stream: Option<TcpStream>,
}

impl TcpTransport {
  /// Connects right away unless the link is opened per call.
  #[tracing::instrument(skip(connect_timeout, read_limit))]
  pub async fn open(
    params: TcpParams,
    connect_timeout: Duration,
    read_limit: usize,
  ) -> Result<Self, TransportError> {
    let stream = if params.per_call {
      None
    } else {
      Some(connect(&params, connect_timeout).await?)
    };

    Ok(Self {
      params,
      connect_timeout,
      read_limit,
      stream,
    })
  }

  async fn exchange(
    stream: &mut TcpStream,
    frame: &[u8],
    expected: usize,
    read_limit: usize,
    timeout: Duration,
  ) -> Result<Frame, TransportError> {
    let stale = discard_pending(stream)?;
    if stale > 0 {
      tracing::debug!("Discarded {} stale bytes", stale);
    }

    tracing::trace!("Sending {}", format_hex(frame));
    stream.write_all(frame).await?;

    let mut response =
      read_until(stream, expected.min(read_limit), timeout).await?;
    take_available(stream, &mut response, read_limit)?;

    Ok(response)
  }
}

#[async_trait::async_trait]
impl Transport for TcpTransport {
  #[tracing::instrument(
    skip(self, frame),
    fields(address = %self.params.address())
  )]
  async fn send_receive(
    &mut self,
    frame: &[u8],
    expected: usize,
    timeout: Duration,
  ) -> Result<Frame, TransportError> {
    let mut stream = match self.stream.take() {
      Some(stream) => stream,
      None => connect(&self.params, self.connect_timeout).await?,
    };

    let result =
      Self::exchange(&mut stream, frame, expected, self.read_limit, timeout)
        .await;

    // NOTE: a short reply may still be in flight so the socket goes with it
    let complete = match &result {
      Ok(response) => response.len() >= expected.min(self.read_limit),
      Err(_) => false,
    };
    if complete && !self.params.per_call {
      self.stream = Some(stream);
    }

    result
  }
}

/// Drops whatever a previous exchange left unread on the socket.
fn discard_pending(stream: &TcpStream) -> Result<usize, TransportError> {
  let mut scratch = [0u8; 256];
  let mut discarded = 0;
  loop {
    match stream.try_read(&mut scratch) {
      Ok(0) => return Ok(discarded),
      Ok(count) => discarded += count,
      Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {
        return Ok(discarded)
      }
      Err(error) => return Err(error.into()),
    }
  }
}

/// Appends bytes that already arrived behind the response, up to `limit`.
fn take_available(
  stream: &TcpStream,
  response: &mut Frame,
  limit: usize,
) -> Result<(), TransportError> {
  while response.len() < limit {
    let mut chunk = vec![0u8; limit - response.len()];
    match stream.try_read(&mut chunk) {
      Ok(0) => break,
      Ok(count) => response.extend_from_slice(&chunk[..count]),
      Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => break,
      Err(error) => return Err(error.into()),
    }
  }

  Ok(())
}

async fn connect(
  params: &TcpParams,
  timeout: Duration,
) -> Result<TcpStream, TransportError> {
  let address = params.address();
  match TcpStream::connect(&address)
    .timeout(futures_time::time::Duration::from(timeout))
    .await
  {
    Ok(Ok(stream)) => {
      tracing::debug!("Connected to {}", address);
      Ok(stream)
    }
    Ok(Err(source)) => Err(TransportError::Connect { address, source }),
    Err(_) => Err(TransportError::ConnectTimeout { address }),
  }
}

/// Reads until `expected` bytes arrived, the peer closed or `timeout`
/// elapsed.
async fn read_until<R: AsyncRead + Unpin>(
  reader: &mut R,
  expected: usize,
  timeout: Duration,
) -> Result<Frame, TransportError> {
  let deadline = tokio::time::Instant::now() + timeout;
  let mut buffer = vec![0u8; expected];
  let mut filled = 0;

  while filled < expected {
    let read = tokio::time::timeout_at(
      deadline,
      reader.read(&mut buffer[filled..]),
    )
    .await;
    match read {
      Ok(Ok(0)) | Err(_) => break,
      Ok(Ok(count)) => filled += count,
      Ok(Err(error)) => return Err(error.into()),
    }
  }

  if filled == 0 {
    return Err(TransportError::Timeout { timeout });
  }

  buffer.truncate(filled);
  tracing::trace!("Received {}", format_hex(&buffer));

  Ok(buffer)
}
