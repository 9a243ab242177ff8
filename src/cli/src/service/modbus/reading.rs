use serde::{Deserialize, Serialize};

use super::vibration::Condition;

#[derive(
  Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum ReadingKind {
  TemperatureHumidity,
  Vibration,
  LightGas,
  AirQuality,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Axes {
  pub x: f64,
  pub y: f64,
  pub z: f64,
}

impl Axes {
  pub fn new(x: f64, y: f64, z: f64) -> Self {
    Self { x, y, z }
  }

  /// Euclidean norm of the triple.
  pub fn resultant(&self) -> f64 {
    (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
  }
}

/// Dominant vibration frequency in Hz. Single axis sensors only report `x`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Frequency {
  pub x: f64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub y: Option<f64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub z: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TemperatureHumidity {
  pub temperature: f64,
  pub humidity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Vibration {
  pub temperature: f64,
  pub velocity: Axes,
  pub displacement: Axes,
  pub acceleration: Axes,
  pub frequency: Frequency,
  pub resultant_velocity: f64,
  pub resultant_displacement: f64,
  pub resultant_acceleration: f64,
  pub firmware_version: u16,
  pub condition: Condition,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LightGas {
  pub status: u16,
  pub temperature: f64,
  pub humidity: f64,
  pub co2: f64,
  /// kPa
  pub pressure: f64,
  /// lux
  pub light: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AirQuality {
  pub aqi: f64,
  pub pm25: f64,
  pub pm10: f64,
  pub co2: f64,
  pub voc: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Reading {
  TemperatureHumidity(TemperatureHumidity),
  Vibration(Vibration),
  LightGas(LightGas),
  AirQuality(AirQuality),
}

impl Reading {
  pub fn kind(&self) -> ReadingKind {
    match self {
      Reading::TemperatureHumidity(_) => ReadingKind::TemperatureHumidity,
      Reading::Vibration(_) => ReadingKind::Vibration,
      Reading::LightGas(_) => ReadingKind::LightGas,
      Reading::AirQuality(_) => ReadingKind::AirQuality,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn resultant_is_euclidean_norm() {
    approx::assert_relative_eq!(Axes::new(3.0, 4.0, 12.0).resultant(), 13.0);
    approx::assert_relative_eq!(Axes::default().resultant(), 0.0);
  }

  #[test]
  fn reading_serializes_with_kind_tag() {
    let reading = Reading::TemperatureHumidity(TemperatureHumidity {
      temperature: 25.5,
      humidity: 60.0,
    });

    let json = serde_json::to_value(reading).unwrap();

    assert_eq!(json["kind"], "temperature-humidity");
    assert_eq!(json["humidity"], 60.0);
    assert_eq!(reading.kind(), ReadingKind::TemperatureHumidity);
  }
}
