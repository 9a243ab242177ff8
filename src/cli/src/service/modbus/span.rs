use std::fmt::Debug;

use tokio_modbus::{Address, Quantity};

/// Address, function and byte count ahead of the register data plus the
/// CRC16 trailer.
const RESPONSE_OVERHEAD: usize = 5;

pub trait Span {
  fn address(&self) -> Address;

  fn quantity(&self) -> Quantity;

  fn response_len(&self) -> usize {
    RESPONSE_OVERHEAD + 2 * usize::from(self.quantity())
  }
}

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct SimpleSpan {
  pub address: u16,
  pub quantity: u16,
}

impl SimpleSpan {
  pub const fn new(address: Address, quantity: Quantity) -> Self {
    Self { address, quantity }
  }
}

impl Span for SimpleSpan {
  fn address(&self) -> Address {
    self.address
  }

  fn quantity(&self) -> Quantity {
    self.quantity
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn response_length_covers_registers_and_framing() {
    assert_eq!(SimpleSpan::new(0x0000, 2).response_len(), 9);
    assert_eq!(SimpleSpan::new(0x0000, 8).response_len(), 21);
    assert_eq!(SimpleSpan::new(0x0000, 13).response_len(), 31);
    assert_eq!(SimpleSpan::new(0x0021, 6).response_len(), 17);
  }
}
