use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SerialPort {
  pub name: String,
  pub description: String,
  pub kind: PortKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PortKind {
  Usb,
  Pci,
  Bluetooth,
  Unknown,
}

impl From<&serialport::SerialPortType> for PortKind {
  fn from(value: &serialport::SerialPortType) -> Self {
    match value {
      serialport::SerialPortType::UsbPort(_) => PortKind::Usb,
      serialport::SerialPortType::PciPort => PortKind::Pci,
      serialport::SerialPortType::BluetoothPort => PortKind::Bluetooth,
      serialport::SerialPortType::Unknown => PortKind::Unknown,
    }
  }
}

impl PortKind {
  pub fn label(self) -> &'static str {
    match self {
      PortKind::Usb => "USB serial port",
      PortKind::Pci => "PCI serial port",
      PortKind::Bluetooth => "Bluetooth serial port",
      PortKind::Unknown => "Serial port",
    }
  }
}

/// Serial ports the operating system currently reports, sorted by name.
#[tracing::instrument]
pub fn scan_ports() -> Vec<SerialPort> {
  let available = match serialport::available_ports() {
    Ok(available) => available,
    Err(error) => {
      tracing::warn!("Failed listing serial ports {}", error);
      return Vec::new();
    }
  };

  let mut ports = available
    .into_iter()
    .filter(|port| is_port_name(&port.port_name))
    .map(|port| {
      let kind = PortKind::from(&port.port_type);
      let product = match &port.port_type {
        serialport::SerialPortType::UsbPort(info) => info.product.as_deref(),
        _ => None,
      };
      SerialPort {
        description: describe(product, kind),
        kind,
        name: port.port_name,
      }
    })
    .collect::<Vec<_>>();
  ports.sort_by(|a, b| a.name.cmp(&b.name));

  tracing::debug!("Found {} serial ports", ports.len());

  ports
}

fn describe(product: Option<&str>, kind: PortKind) -> String {
  match product.map(str::trim) {
    Some(product) if !product.is_empty() => product.to_owned(),
    _ => kind.label().to_owned(),
  }
}

pub(crate) fn is_port_name(name: &str) -> bool {
  PORT_NAME_REGEX.is_match(name)
}

lazy_static::lazy_static! {
  #[allow(clippy::unwrap_used)] // NOTE: valid regex
  static ref PORT_NAME_REGEX: regex::Regex =
    regex::Regex::new(r"^(COM\d+|/[^/]+(/[^/]+)+)$").unwrap();
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn recognizes_device_paths_and_com_ports() {
    assert!(is_port_name("COM3"));
    assert!(is_port_name("/dev/ttyUSB0"));
    assert!(is_port_name("/dev/serial/by-id/usb-FTDI"));
    assert!(!is_port_name("ttyUSB0"));
    assert!(!is_port_name("/dev"));
    assert!(!is_port_name("COM"));
  }

  #[test]
  fn description_prefers_usb_product() {
    assert_eq!(
      describe(Some("CP2102 USB to UART Bridge"), PortKind::Usb),
      "CP2102 USB to UART Bridge"
    );
    assert_eq!(describe(Some("  "), PortKind::Usb), "USB serial port");
    assert_eq!(describe(None, PortKind::Pci), "PCI serial port");
    assert_eq!(describe(None, PortKind::Unknown), "Serial port");
  }

  #[test]
  fn scanning_never_fails() {
    let ports = scan_ports();

    assert!(ports.iter().all(|port| is_port_name(&port.name)));
    assert!(ports.iter().all(|port| !port.description.is_empty()));
  }
}
