use std::fmt::Debug;
use std::sync::Arc;

use super::decode::*;
use super::frame::Frame;
use super::reading::*;
use super::span::SimpleSpan;
use super::vibration::{evaluate, DeviceClass};

/// Inputs a sensor needs besides the raw responses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Context {
  pub expect: Expect,
  pub device_class: DeviceClass,
}

/// Register layout and decoding of one sensor family.
///
/// A polling cycle issues one query per span, in order, and hands all the
/// responses to [`Sensor::decode`].
pub trait Sensor: Debug + Send + Sync {
  fn kind(&self) -> ReadingKind;

  fn spans(&self) -> &'static [SimpleSpan];

  fn decode(
    &self,
    responses: &[Frame],
    context: &Context,
  ) -> Result<Reading, DecodeError>;
}

pub fn sensor(kind: ReadingKind) -> Arc<dyn Sensor> {
  match kind {
    ReadingKind::TemperatureHumidity => Arc::new(TemperatureHumiditySensor),
    ReadingKind::Vibration => Arc::new(VibrationSensor),
    ReadingKind::LightGas => Arc::new(LightGasSensor),
    ReadingKind::AirQuality => Arc::new(AirQualitySensor),
  }
}

fn single<'a>(responses: &'a [Frame]) -> Result<&'a Frame, DecodeError> {
  match responses {
    [response] => Ok(response),
    _ => Err(DecodeError::MissingResponse {
      expected: 1,
      actual: responses.len(),
    }),
  }
}

#[derive(Debug, Clone, Copy)]
pub struct TemperatureHumiditySensor;

impl Sensor for TemperatureHumiditySensor {
  fn kind(&self) -> ReadingKind {
    ReadingKind::TemperatureHumidity
  }

  fn spans(&self) -> &'static [SimpleSpan] {
    const SPANS: [SimpleSpan; 1] = [SimpleSpan::new(0x0000, 2)];
    &SPANS
  }

  fn decode(
    &self,
    responses: &[Frame],
    context: &Context,
  ) -> Result<Reading, DecodeError> {
    let decoder = TemperatureHumidityDecoder {
      expect: context.expect,
    };
    Ok(Reading::TemperatureHumidity(
      decoder.decode(single(responses)?)?,
    ))
  }
}

/// Motion block followed by the frequency block. Both have to decode for
/// the cycle to produce a reading.
#[derive(Debug, Clone, Copy)]
pub struct VibrationSensor;

impl Sensor for VibrationSensor {
  fn kind(&self) -> ReadingKind {
    ReadingKind::Vibration
  }

  fn spans(&self) -> &'static [SimpleSpan] {
    const SPANS: [SimpleSpan; 2] =
      [SimpleSpan::new(0x0000, 13), SimpleSpan::new(0x0021, 6)];
    &SPANS
  }

  fn decode(
    &self,
    responses: &[Frame],
    context: &Context,
  ) -> Result<Reading, DecodeError> {
    let (motion, frequency) = match responses {
      [motion, frequency] => (motion, frequency),
      _ => {
        return Err(DecodeError::MissingResponse {
          expected: 2,
          actual: responses.len(),
        })
      }
    };

    let motion = MotionDecoder {
      expect: context.expect,
    }
    .decode(motion)?;
    let frequency = FrequencyDecoder {
      expect: context.expect,
    }
    .decode(frequency)?;

    let condition = evaluate(
      motion.velocity.x,
      motion.velocity.y,
      motion.velocity.z,
      context.device_class,
    );

    Ok(Reading::Vibration(Vibration {
      temperature: motion.temperature,
      velocity: motion.velocity,
      displacement: motion.displacement,
      acceleration: motion.acceleration,
      frequency,
      resultant_velocity: motion.velocity.resultant(),
      resultant_displacement: motion.displacement.resultant(),
      resultant_acceleration: motion.acceleration.resultant(),
      firmware_version: motion.firmware_version,
      condition,
    }))
  }
}

#[derive(Debug, Clone, Copy)]
pub struct LightGasSensor;

impl Sensor for LightGasSensor {
  fn kind(&self) -> ReadingKind {
    ReadingKind::LightGas
  }

  fn spans(&self) -> &'static [SimpleSpan] {
    const SPANS: [SimpleSpan; 1] = [SimpleSpan::new(0x0000, 8)];
    &SPANS
  }

  fn decode(
    &self,
    responses: &[Frame],
    context: &Context,
  ) -> Result<Reading, DecodeError> {
    let decoder = LightGasDecoder {
      expect: context.expect,
    };
    Ok(Reading::LightGas(decoder.decode(single(responses)?)?))
  }
}

#[derive(Debug, Clone, Copy)]
pub struct AirQualitySensor;

impl Sensor for AirQualitySensor {
  fn kind(&self) -> ReadingKind {
    ReadingKind::AirQuality
  }

  fn spans(&self) -> &'static [SimpleSpan] {
    const SPANS: [SimpleSpan; 1] = [SimpleSpan::new(0x0000, 5)];
    &SPANS
  }

  fn decode(
    &self,
    responses: &[Frame],
    context: &Context,
  ) -> Result<Reading, DecodeError> {
    let decoder = AirQualityDecoder {
      expect: context.expect,
    };
    Ok(Reading::AirQuality(decoder.decode(single(responses)?)?))
  }
}

#[cfg(test)]
mod tests {
  use super::super::frame::with_crc;
  use super::super::vibration::Status;
  use super::*;

  fn motion_frame(velocity: [u16; 3]) -> Frame {
    let mut body = vec![0x01, 0x03, 0x1A, 0x00, 0xFA];
    for register in velocity
      .into_iter()
      .chain([10, 10, 10, 0, 0, 7, 1, 1, 1])
    {
      body.extend_from_slice(&register.to_be_bytes());
    }
    with_crc(&body)
  }

  fn frequency_frame() -> Frame {
    let mut body = vec![0x01, 0x03, 0x0C];
    for value in [50.0f32, 50.0, 25.0] {
      body.extend_from_slice(&value.to_be_bytes());
    }
    with_crc(&body)
  }

  #[test]
  fn every_kind_has_a_sensor() {
    for kind in [
      ReadingKind::TemperatureHumidity,
      ReadingKind::Vibration,
      ReadingKind::LightGas,
      ReadingKind::AirQuality,
    ] {
      assert_eq!(sensor(kind).kind(), kind);
    }
  }

  #[test]
  fn vibration_queries_motion_then_frequency() {
    assert_eq!(
      VibrationSensor.spans(),
      &[SimpleSpan::new(0x0000, 13), SimpleSpan::new(0x0021, 6)]
    );
  }

  #[test]
  fn vibration_reading_carries_condition_for_device_class() {
    let responses = vec![motion_frame([15, 5, 3]), frequency_frame()];
    let small = Context::default();
    let large = Context {
      device_class: DeviceClass::new(4).unwrap(),
      ..Context::default()
    };

    let Reading::Vibration(small) =
      VibrationSensor.decode(&responses, &small).unwrap()
    else {
      panic!("expected a vibration reading");
    };
    let Reading::Vibration(large) =
      VibrationSensor.decode(&responses, &large).unwrap()
    else {
      panic!("expected a vibration reading");
    };

    assert_eq!(small.condition.status, Status::C);
    assert_eq!(large.condition.status, Status::A);
    assert_eq!(small.firmware_version, 7);
    assert_eq!(small.frequency.z, Some(25.0));
    approx::assert_relative_eq!(small.temperature, 25.0);
  }

  #[test]
  fn vibration_fails_as_a_whole() {
    let truncated = vec![motion_frame([1, 1, 1]), vec![0x01, 0x03]];

    assert!(VibrationSensor
      .decode(&truncated, &Context::default())
      .is_err());
    assert_eq!(
      VibrationSensor.decode(&truncated[..1], &Context::default()),
      Err(DecodeError::MissingResponse {
        expected: 2,
        actual: 1
      })
    );
  }

  #[test]
  fn single_block_sensors_reject_extra_responses() {
    let frame = with_crc(&[0x01, 0x03, 0x04, 0x02, 0x58, 0x00, 0xFF]);

    assert!(TemperatureHumiditySensor
      .decode(&[frame.clone()], &Context::default())
      .is_ok());
    assert!(matches!(
      TemperatureHumiditySensor
        .decode(&[frame.clone(), frame], &Context::default()),
      Err(DecodeError::MissingResponse { actual: 2, .. })
    ));
  }
}
