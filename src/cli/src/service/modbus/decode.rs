use serde::{Deserialize, Serialize};
use tokio_modbus::SlaveId;

use super::frame::checksums;
use super::reading::*;

const HEADER_LEN: usize = 3;
const TRAILER_LEN: usize = 2;

const TEMPERATURE_RANGE: (f64, f64) = (-40.0, 85.0);
const HUMIDITY_RANGE: (f64, f64) = (0.0, 100.0);
const CO2_RANGE: (f64, f64) = (0.0, 5000.0);
const AQI_RANGE: (f64, f64) = (0.0, 500.0);
const PM25_RANGE: (f64, f64) = (0.0, 500.0);
const PM10_RANGE: (f64, f64) = (0.0, 600.0);
const VOC_RANGE: (f64, f64) = (0.0, 1000.0);
const LIGHT_RANGE: (f64, f64) = (0.0, 100_000.0);

/// How a checksum mismatch in a response is treated.
#[derive(
  Debug, Clone, Copy, Default, Hash, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Validation {
  /// Log the mismatch and keep decoding.
  #[default]
  Lenient,
  /// Reject the frame.
  Strict,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
  #[error("Response is {actual} bytes long but at least {minimum} are required")]
  ShortFrame { minimum: usize, actual: usize },

  #[error(
    "Response is from {slave:#04X}/{function:#04X} \
     but {expected_slave:#04X}/{expected_function:#04X} was queried"
  )]
  AddressMismatch {
    expected_slave: SlaveId,
    expected_function: u8,
    slave: SlaveId,
    function: u8,
  },

  #[error("Response declares {actual} data bytes but {expected:?} are accepted")]
  ByteCount { expected: &'static [u8], actual: u8 },

  #[error("Response checksum {actual:#06X} does not match computed {expected:#06X}")]
  Checksum { expected: u16, actual: u16 },

  #[error("Decoded {field} {value} is out of range")]
  Range { field: &'static str, value: f64 },

  #[error("Expected {expected} responses but got {actual}")]
  MissingResponse { expected: usize, actual: usize },
}

/// What a response has to come from to be accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expect {
  pub slave: SlaveId,
  pub function: u8,
  pub validation: Validation,
}

impl Default for Expect {
  fn default() -> Self {
    Self {
      slave: 0x01,
      function: 0x03,
      validation: Validation::Lenient,
    }
  }
}

pub trait Decoder {
  type Output;

  fn decode(&self, frame: &[u8]) -> Result<Self::Output, DecodeError>;
}

/// Data bytes of a response that passed the header checks.
#[derive(Debug, Clone, Copy)]
struct Payload<'a> {
  frame: &'a [u8],
  data: &'a [u8],
}

impl<'a> Payload<'a> {
  fn parse(
    frame: &'a [u8],
    expect: &Expect,
    minimum: usize,
    byte_counts: &'static [u8],
  ) -> Result<Self, DecodeError> {
    if frame.len() < minimum {
      return Err(DecodeError::ShortFrame {
        minimum,
        actual: frame.len(),
      });
    }

    let (slave, function, byte_count) = match frame {
      [slave, function, byte_count, ..] => (*slave, *function, *byte_count),
      _ => {
        return Err(DecodeError::ShortFrame {
          minimum: HEADER_LEN,
          actual: frame.len(),
        })
      }
    };

    if slave != expect.slave || function != expect.function {
      return Err(DecodeError::AddressMismatch {
        expected_slave: expect.slave,
        expected_function: expect.function,
        slave,
        function,
      });
    }

    if !byte_counts.contains(&byte_count) {
      return Err(DecodeError::ByteCount {
        expected: byte_counts,
        actual: byte_count,
      });
    }

    let end = HEADER_LEN + usize::from(byte_count);
    if frame.len() < end + TRAILER_LEN {
      return Err(DecodeError::ShortFrame {
        minimum: end + TRAILER_LEN,
        actual: frame.len(),
      });
    }

    Ok(Self {
      frame: &frame[..end + TRAILER_LEN],
      data: &frame[HEADER_LEN..end],
    })
  }

  fn byte_count(&self) -> usize {
    self.data.len()
  }

  fn u16(&self, register: usize) -> u16 {
    let offset = register * 2;
    match self.data.get(offset..offset + 2) {
      Some([high, low]) => u16::from_be_bytes([*high, *low]),
      _ => 0,
    }
  }

  fn u32(&self, register: usize) -> u32 {
    (u32::from(self.u16(register)) << 16) | u32::from(self.u16(register + 1))
  }

  fn f32(&self, register: usize) -> f32 {
    f32::from_bits(self.u32(register))
  }

  fn tenths(&self, register: usize) -> f64 {
    f64::from(self.u16(register)) / 10.0
  }

  fn signed_tenths(&self, register: usize) -> f64 {
    f64::from(self.u16(register) as i16) / 10.0
  }

  fn verify(&self, validation: Validation) -> Result<(), DecodeError> {
    let (expected, actual) = checksums(self.frame);
    if expected == actual {
      return Ok(());
    }

    match validation {
      Validation::Strict => Err(DecodeError::Checksum { expected, actual }),
      Validation::Lenient => {
        tracing::warn!(
          "Response checksum mismatch: computed {:#06X}, received {:#06X}",
          expected,
          actual
        );
        Ok(())
      }
    }
  }
}

fn within(
  field: &'static str,
  value: f64,
  (minimum, maximum): (f64, f64),
) -> Result<f64, DecodeError> {
  if value.is_finite() && value >= minimum && value <= maximum {
    Ok(value)
  } else {
    Err(DecodeError::Range { field, value })
  }
}

fn finite(field: &'static str, value: f64) -> Result<f64, DecodeError> {
  if value.is_finite() {
    Ok(value)
  } else {
    Err(DecodeError::Range { field, value })
  }
}

#[derive(Debug, Clone, Copy)]
pub struct TemperatureHumidityDecoder {
  pub expect: Expect,
}

impl Decoder for TemperatureHumidityDecoder {
  type Output = TemperatureHumidity;

  fn decode(&self, frame: &[u8]) -> Result<Self::Output, DecodeError> {
    let payload = Payload::parse(frame, &self.expect, 9, &[0x04])?;

    let humidity = payload.tenths(0);
    let temperature = payload.signed_tenths(1);

    payload.verify(self.expect.validation)?;

    Ok(TemperatureHumidity {
      temperature: within("temperature", temperature, TEMPERATURE_RANGE)?,
      humidity: within("humidity", humidity, HUMIDITY_RANGE)?,
    })
  }
}

/// Motion block of a vibration sensor, registers `0x0000..=0x000C`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Motion {
  pub temperature: f64,
  pub velocity: Axes,
  pub displacement: Axes,
  pub acceleration: Axes,
  pub firmware_version: u16,
}

#[derive(Debug, Clone, Copy)]
pub struct MotionDecoder {
  pub expect: Expect,
}

impl Decoder for MotionDecoder {
  type Output = Motion;

  fn decode(&self, frame: &[u8]) -> Result<Self::Output, DecodeError> {
    let payload = Payload::parse(frame, &self.expect, 31, &[0x1A])?;

    let temperature = payload.signed_tenths(0);
    let velocity =
      Axes::new(payload.tenths(1), payload.tenths(2), payload.tenths(3));
    let displacement =
      Axes::new(payload.tenths(4), payload.tenths(5), payload.tenths(6));
    let firmware_version = payload.u16(9);
    let acceleration =
      Axes::new(payload.tenths(10), payload.tenths(11), payload.tenths(12));

    payload.verify(self.expect.validation)?;

    Ok(Motion {
      temperature: within("temperature", temperature, TEMPERATURE_RANGE)?,
      velocity,
      displacement,
      acceleration,
      firmware_version,
    })
  }
}

/// Frequency block of a vibration sensor, registers `0x0021..=0x0026`.
#[derive(Debug, Clone, Copy)]
pub struct FrequencyDecoder {
  pub expect: Expect,
}

impl Decoder for FrequencyDecoder {
  type Output = Frequency;

  fn decode(&self, frame: &[u8]) -> Result<Self::Output, DecodeError> {
    let payload = Payload::parse(frame, &self.expect, 9, &[0x04, 0x0C])?;

    let x = f64::from(payload.f32(0));
    let yz = if payload.byte_count() == 0x0C {
      Some((f64::from(payload.f32(2)), f64::from(payload.f32(4))))
    } else {
      None
    };

    payload.verify(self.expect.validation)?;

    Ok(Frequency {
      x: finite("frequency", x)?,
      y: yz.map(|(y, _)| finite("frequency", y)).transpose()?,
      z: yz.map(|(_, z)| finite("frequency", z)).transpose()?,
    })
  }
}

#[derive(Debug, Clone, Copy)]
pub struct LightGasDecoder {
  pub expect: Expect,
}

impl Decoder for LightGasDecoder {
  type Output = LightGas;

  fn decode(&self, frame: &[u8]) -> Result<Self::Output, DecodeError> {
    let payload = Payload::parse(frame, &self.expect, 17, &[0x0C, 0x10])?;

    let status = payload.u16(0);
    let temperature = payload.signed_tenths(1);
    let humidity = f64::from(payload.u16(2));
    let co2 = f64::from(payload.u16(3));
    let (pressure, light) = if payload.byte_count() == 0x10 {
      (payload.u32(4), payload.u32(6))
    } else {
      (u32::from(payload.u16(4)), u32::from(payload.u16(5)))
    };
    let pressure = f64::from(pressure) / 1000.0;
    let light = f64::from(light);

    payload.verify(self.expect.validation)?;

    Ok(LightGas {
      status,
      temperature: within("temperature", temperature, TEMPERATURE_RANGE)?,
      humidity: within("humidity", humidity, HUMIDITY_RANGE)?,
      co2: within("co2", co2, CO2_RANGE)?,
      pressure,
      light: within("light", light, LIGHT_RANGE)?,
    })
  }
}

#[derive(Debug, Clone, Copy)]
pub struct AirQualityDecoder {
  pub expect: Expect,
}

impl Decoder for AirQualityDecoder {
  type Output = AirQuality;

  fn decode(&self, frame: &[u8]) -> Result<Self::Output, DecodeError> {
    let payload = Payload::parse(frame, &self.expect, 15, &[0x0A])?;

    let aqi = f64::from(payload.u16(0));
    let pm25 = payload.tenths(1);
    let pm10 = payload.tenths(2);
    let co2 = payload.tenths(3);
    let voc = payload.tenths(4);

    payload.verify(self.expect.validation)?;

    Ok(AirQuality {
      aqi: within("aqi", aqi, AQI_RANGE)?,
      pm25: within("pm25", pm25, PM25_RANGE)?,
      pm10: within("pm10", pm10, PM10_RANGE)?,
      co2: within("co2", co2, CO2_RANGE)?,
      voc: within("voc", voc, VOC_RANGE)?,
    })
  }
}
