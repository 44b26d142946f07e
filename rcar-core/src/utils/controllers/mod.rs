//! Module Exports
//!
//! This file exports the hardware boundary and the control layer of the car.
//!
//! - `command`: the closed command vocabulary.
//! - `car`: the `CarState` state machine that clamps and applies commands.
//! - `shield`: `HardwareInterface` over the expansion board's I2C registers.
//! - `sim`: in-memory I2C bus emulating the expansion board.

pub mod car;
pub mod command;
pub mod shield;
pub mod sim;

use core::{fmt, time::Duration};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

pub use command::{Command, VOCABULARY};
pub use car::{CarConfig, CarSnapshot, CarState, DistanceReading, NO_ECHO_SENTINEL};
pub use shield::{ServoCalibration, ShieldConfig, ShieldDriver, ShieldError};
pub use sim::{SimHandle, SimulatedShieldBus};

/// Car state shared by every connection worker.
///
/// All mutations and the hardware transactions they trigger happen while the
/// lock is held.
pub type SharedCar<H> = Arc<Mutex<CarState<H>>>;

/// Wrap a car for sharing between connection workers.
pub fn share<H>(car: CarState<H>) -> SharedCar<H> {
    Arc::new(Mutex::new(car))
}

/// Direction the drive motors are commanded in.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Movement {
    #[default]
    Stopped,
    Forward,
    Backward,
}

/// Servo outputs the car drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServoChannel {
    Steering,
    CameraPan,
    CameraTilt,
}

/// On/off state of the three LED colors.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedState {
    pub red: bool,
    pub green: bool,
    pub blue: bool,
}

impl LedState {
    pub const OFF: LedState = LedState {
        red: false,
        green: false,
        blue: false,
    };

    pub const fn new(
        red: bool,
        green: bool,
        blue: bool,
    ) -> Self {
        Self { red, green, blue }
    }
}

/// Primitive actuator and sensor operations of the car.
///
/// Calls are synchronous and may block on bus I/O. Every call may fail; the
/// caller must not assume success.
pub trait HardwareInterface {
    type Error: fmt::Debug;

    /// Drive the motors. `Movement::Stopped` must command zero power
    /// regardless of `duty`.
    fn set_motor(
        &mut self,
        direction: Movement,
        duty: u16,
    ) -> Result<(), Self::Error>;

    /// Move a servo to `degrees` relative to its calibrated center.
    fn set_servo_angle(
        &mut self,
        channel: ServoChannel,
        degrees: i32,
    ) -> Result<(), Self::Error>;

    /// Read the ultrasonic sensor, waiting at most `timeout`.
    ///
    /// Returns `Ok(None)` when no echo arrived within the bound.
    fn read_ultrasonic_distance(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<f32>, Self::Error>;

    fn set_led(
        &mut self,
        led: LedState,
    ) -> Result<(), Self::Error>;

    fn set_buzzer(
        &mut self,
        on: bool,
        frequency_hz: u16,
    ) -> Result<(), Self::Error>;
}

/// Physical parts of the car, used to label faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Actuator {
    Motors,
    Steering,
    CameraPan,
    CameraTilt,
    Ultrasonic,
    Led,
    Buzzer,
}

impl fmt::Display for Actuator {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let name = match self {
            Actuator::Motors => "motors",
            Actuator::Steering => "steering servo",
            Actuator::CameraPan => "camera pan servo",
            Actuator::CameraTilt => "camera tilt servo",
            Actuator::Ultrasonic => "ultrasonic sensor",
            Actuator::Led => "RGB LED",
            Actuator::Buzzer => "buzzer",
        };
        f.write_str(name)
    }
}

impl From<ServoChannel> for Actuator {
    fn from(channel: ServoChannel) -> Self {
        match channel {
            ServoChannel::Steering => Actuator::Steering,
            ServoChannel::CameraPan => Actuator::CameraPan,
            ServoChannel::CameraTilt => Actuator::CameraTilt,
        }
    }
}

/// Errors raised by the control layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControlError {
    /// The hardware call failed; car state was left unchanged.
    #[error("actuator fault on {actuator}: {reason}")]
    ActuatorFault { actuator: Actuator, reason: String },
    /// The command targets a part this build does not have.
    #[error("{0} is not fitted on this car")]
    NotFitted(Actuator),
}

impl ControlError {
    pub(crate) fn fault<E: fmt::Debug>(
        actuator: Actuator,
        error: E,
    ) -> Self {
        ControlError::ActuatorFault {
            actuator,
            reason: format!("{error:?}"),
        }
    }
}
