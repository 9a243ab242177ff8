//! Gateway addressing envelope: raw target address bytes ahead of a
//! Modbus-RTU frame.

use super::frame::Frame;

pub const DEFAULT_GATEWAY_ADDRESS: [u8; 2] = [0x56, 0x78];

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EnvelopeError {
  #[error("Gateway address is empty")]
  Empty,

  #[error("Gateway address {address:?} is not valid hex")]
  Hex {
    address: String,
    #[source]
    source: hex::FromHexError,
  },
}

/// Parses a hex address like `5678` or `56 78` into raw bytes.
pub fn parse_address(address: &str) -> Result<Vec<u8>, EnvelopeError> {
  let digits = address
    .chars()
    .filter(|c| !c.is_whitespace())
    .collect::<String>();
  if digits.is_empty() {
    return Err(EnvelopeError::Empty);
  }

  hex::decode(&digits).map_err(|source| EnvelopeError::Hex {
    address: address.to_owned(),
    source,
  })
}

/// Like [`parse_address`] but substitutes [`DEFAULT_GATEWAY_ADDRESS`] for
/// anything that does not parse.
pub fn resolve_address(address: &str) -> Vec<u8> {
  match parse_address(address) {
    Ok(bytes) => bytes,
    Err(error) => {
      tracing::warn!(
        "Using default gateway address {} instead: {}",
        hex::encode_upper(DEFAULT_GATEWAY_ADDRESS),
        error
      );
      DEFAULT_GATEWAY_ADDRESS.to_vec()
    }
  }
}

pub fn wrap(frame: &[u8], address: &str) -> Frame {
  let mut wrapped = resolve_address(address);
  wrapped.extend_from_slice(frame);
  wrapped
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unwrapped {
  pub matched: bool,
  pub inner: Frame,
  /// Uppercase hex of the prefix actually present in the response.
  pub resolved: String,
}

/// Splits the address prefix off a response and compares it to the
/// expected gateway address.
pub fn unwrap(response: &[u8], address: &str) -> Unwrapped {
  let expected = resolve_address(address);
  let split = expected.len().min(response.len());
  let (prefix, inner) = response.split_at(split);

  Unwrapped {
    matched: prefix.len() == expected.len() && prefix == expected.as_slice(),
    inner: inner.to_vec(),
    resolved: hex::encode_upper(prefix),
  }
}

#[cfg(test)]
mod tests {
  use super::super::frame::build_query;
  use super::*;

  #[test]
  fn wrap_prepends_gateway_address() {
    let frame = build_query(0x01, 0x03, 0x0000, 0x0008);

    assert_eq!(
      wrap(&frame, "5678"),
      vec![0x56, 0x78, 0x01, 0x03, 0x00, 0x00, 0x00, 0x08, 0x44, 0x0C]
    );
  }

  #[test]
  fn wrap_then_unwrap_is_identity() {
    let frame = build_query(0x01, 0x03, 0x0021, 0x0006);

    for address in ["5678", "0002", "ab", "0A0B0C", "56 78"] {
      let unwrapped = unwrap(&wrap(&frame, address), address);

      assert!(unwrapped.matched, "{address}");
      assert_eq!(unwrapped.inner, frame);
    }
  }

  #[test]
  fn unwrap_compares_case_insensitively() {
    let unwrapped = unwrap(&[0xAB, 0xCD, 0x01], "abcd");

    assert!(unwrapped.matched);
    assert_eq!(unwrapped.resolved, "ABCD");
  }

  #[test]
  fn unwrap_reports_foreign_address() {
    let unwrapped = unwrap(&[0x00, 0x03, 0x01, 0x03], "0002");

    assert!(!unwrapped.matched);
    assert_eq!(unwrapped.resolved, "0003");
    assert_eq!(unwrapped.inner, vec![0x01, 0x03]);
  }

  #[test]
  fn unwrap_of_short_response_does_not_match() {
    let unwrapped = unwrap(&[0x56], "5678");

    assert!(!unwrapped.matched);
    assert!(unwrapped.inner.is_empty());
  }

  #[test]
  fn invalid_address_falls_back_to_default() {
    let frame = vec![0x01, 0x03];

    assert_eq!(wrap(&frame, "xyz"), vec![0x56, 0x78, 0x01, 0x03]);
    assert_eq!(wrap(&frame, ""), vec![0x56, 0x78, 0x01, 0x03]);
    assert!(unwrap(&[0x56, 0x78, 0x01], "zz").matched);
  }

  #[test]
  fn parse_address_rejects_bad_input() {
    assert_eq!(parse_address(""), Err(EnvelopeError::Empty));
    assert_eq!(parse_address("  "), Err(EnvelopeError::Empty));
    assert!(matches!(
      parse_address("567"),
      Err(EnvelopeError::Hex { .. })
    ));
    assert!(matches!(
      parse_address("56g8"),
      Err(EnvelopeError::Hex { .. })
    ));
    assert_eq!(parse_address("0002"), Ok(vec![0x00, 0x02]));
  }
}
