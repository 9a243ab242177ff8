pub mod decode;
pub mod envelope;
pub mod frame;
pub mod reading;
pub mod sensor;
pub mod span;
pub mod transport;
pub mod vibration;

pub use decode::{DecodeError, Expect, Validation};
pub use envelope::EnvelopeError;
pub use frame::{
  build_query, crc16, format_hex, validate_frame, Frame, FrameError,
};
pub use reading::*;
pub use sensor::{sensor, Context, Sensor};
pub use span::{SimpleSpan, Span};
pub use transport::*;
pub use vibration::{evaluate, Condition, DeviceClass, DeviceClassError, Status};
