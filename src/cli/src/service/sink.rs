use serde::Serialize;

use super::modbus::{Reading, ReadingKind};

/// One successfully decoded reading, handed to persistence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
  pub channel: String,
  pub kind: ReadingKind,
  pub reading: Reading,
  pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Persistence side of the poller. Saving must never block a worker.
pub trait Sink: std::fmt::Debug + Send + Sync {
  fn save(&self, record: Record);
}

/// Hands records to a bounded channel and drops them when it is full.
#[derive(Debug, Clone)]
pub struct BufferedSink {
  sender: flume::Sender<Record>,
}

impl BufferedSink {
  pub fn new(capacity: usize) -> (Self, flume::Receiver<Record>) {
    let (sender, receiver) = flume::bounded(capacity);
    (Self { sender }, receiver)
  }
}

impl Sink for BufferedSink {
  fn save(&self, record: Record) {
    match self.sender.try_send(record) {
      Ok(()) => {}
      Err(flume::TrySendError::Full(record)) => {
        tracing::warn!(
          "Persistence buffer is full, dropping {:?} reading of {}",
          record.kind,
          record.channel
        );
      }
      Err(flume::TrySendError::Disconnected(record)) => {
        // NOTE: nobody is listening anymore during shutdown
        tracing::trace!("Persistence is gone, dropping {}", record.channel);
      }
    }
  }
}
