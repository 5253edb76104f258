/*!
# Giggle DevKit - Test doubles and helpers for the OSC router

- `MotorProbe`: a fake haptic device, a real UDP socket that records every
  OSC message it receives
- `sweep`: value ramps used to exercise avatar parameters by hand
*/

pub mod motor_probe;
pub mod sweep;

pub use motor_probe::MotorProbe;
pub use sweep::sweep;
