use crc::{Crc, CRC_16_MODBUS};
use itertools::Itertools;
use tokio_modbus::{Address, Quantity, SlaveId};

pub(crate) const MIN_FRAME_LEN: usize = 8;

const CRC_MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Raw Modbus-RTU bytes: address, function, payload and a little endian
/// CRC16 trailer.
pub type Frame = Vec<u8>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
  #[error("Frame is {actual} bytes long but at least {minimum} are required")]
  Length { minimum: usize, actual: usize },

  #[error("Frame checksum {actual:#06X} does not match computed {expected:#06X}")]
  Checksum { expected: u16, actual: u16 },
}

pub fn crc16(bytes: &[u8]) -> u16 {
  CRC_MODBUS.checksum(bytes)
}

pub fn build_query(
  slave: SlaveId,
  function: u8,
  start: Address,
  count: Quantity,
) -> Frame {
  let mut frame = Vec::with_capacity(MIN_FRAME_LEN);
  frame.push(slave);
  frame.push(function);
  frame.extend_from_slice(&start.to_be_bytes());
  frame.extend_from_slice(&count.to_be_bytes());
  let crc = crc16(&frame);
  frame.extend_from_slice(&crc.to_le_bytes());
  frame
}

pub fn validate_frame(frame: &[u8]) -> Result<(), FrameError> {
  if frame.len() < MIN_FRAME_LEN {
    return Err(FrameError::Length {
      minimum: MIN_FRAME_LEN,
      actual: frame.len(),
    });
  }

  let (expected, actual) = checksums(frame);
  if expected != actual {
    return Err(FrameError::Checksum { expected, actual });
  }

  Ok(())
}

/// Computed and transmitted checksum of a frame that carries at least the
/// two trailer bytes.
pub(crate) fn checksums(frame: &[u8]) -> (u16, u16) {
  let split = frame.len().saturating_sub(2);
  let (body, trailer) = frame.split_at(split);
  let actual = match trailer {
    [low, high] => u16::from_le_bytes([*low, *high]),
    _ => 0,
  };
  (crc16(body), actual)
}

pub fn format_hex(bytes: &[u8]) -> String {
  bytes.iter().map(|byte| format!("{byte:02X}")).join(" ")
}

#[cfg(test)]
pub(crate) fn with_crc(body: &[u8]) -> Frame {
  let mut frame = body.to_vec();
  frame.extend_from_slice(&crc16(body).to_le_bytes());
  frame
}
