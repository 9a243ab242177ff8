//! ISO 2372 vibration severity rating.

use serde::{Deserialize, Serialize};

/// Upper velocity bounds (mm/s RMS) of bands A, B, C and D per machine class.
const LIMITS: [[f64; 4]; 4] = [
  [0.71, 1.12, 1.8, 1.8],
  [1.12, 1.8, 2.8, 2.8],
  [1.8, 2.8, 4.5, 4.5],
  [2.8, 4.5, 7.1, 7.1],
];

const STATUSES: [Status; 4] = [Status::A, Status::B, Status::C, Status::D];

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Device class {0} is not one of 1, 2, 3 or 4")]
pub struct DeviceClassError(pub u8);

/// ISO 2372 machine class, I through IV.
#[derive(
  Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize,
)]
#[serde(into = "u8")]
pub struct DeviceClass(u8);

impl DeviceClass {
  pub fn new(class: u8) -> Result<Self, DeviceClassError> {
    match class {
      1..=4 => Ok(Self(class)),
      other => Err(DeviceClassError(other)),
    }
  }

  pub fn get(self) -> u8 {
    self.0
  }

  pub fn limits(self) -> [f64; 4] {
    LIMITS[usize::from(self.0 - 1)]
  }
}

impl Default for DeviceClass {
  fn default() -> Self {
    Self(1)
  }
}

impl TryFrom<u8> for DeviceClass {
  type Error = DeviceClassError;

  fn try_from(value: u8) -> Result<Self, Self::Error> {
    Self::new(value)
  }
}

impl From<DeviceClass> for u8 {
  fn from(value: DeviceClass) -> Self {
    value.0
  }
}

impl<'de> Deserialize<'de> for DeviceClass {
  fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
  where
    D: serde::Deserializer<'de>,
  {
    let class = u8::deserialize(deserializer)?;
    Self::new(class).map_err(serde::de::Error::custom)
  }
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
  A,
  B,
  C,
  D,
}

impl Status {
  pub fn label(self) -> &'static str {
    match self {
      Status::A => "good",
      Status::B => "acceptable",
      Status::C => "unsatisfactory",
      Status::D => "unacceptable",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Condition {
  pub status: Status,
  pub label: &'static str,
}

impl From<Status> for Condition {
  fn from(status: Status) -> Self {
    Self {
      status,
      label: status.label(),
    }
  }
}

pub fn evaluate(
  velocity_x: f64,
  velocity_y: f64,
  velocity_z: f64,
  class: DeviceClass,
) -> Condition {
  let velocity = velocity_x.abs().max(velocity_y.abs()).max(velocity_z.abs());

  let status = class
    .limits()
    .iter()
    .zip(STATUSES)
    .find(|(limit, _)| **limit >= velocity)
    .map_or(Status::D, |(_, status)| status);

  status.into()
}

/// Rates raw velocities against a class number that has not been validated
/// yet.
pub fn evaluate_class(
  velocity_x: f64,
  velocity_y: f64,
  velocity_z: f64,
  class: u8,
) -> Result<Condition, DeviceClassError> {
  let class = DeviceClass::new(class)?;
  Ok(evaluate(velocity_x, velocity_y, velocity_z, class))
}
