//! HomeKit provisioning surface: the HomeKey control point and supported
//! configuration characteristics.

pub mod control_point;
pub mod types;

pub use control_point::{handle_control_point, supported_configuration};
pub use types::{ControlPointRequest, ControlPointResponse, Opcode, Status};
