//! Expansion-board driver for the smart car.
//!
//! The board sits on the I2C bus (default address `0x18`) and exposes a bank
//! of 16-bit registers for servos, motor PWM and direction, buzzer, LED I/O
//! and the ultrasonic echo time. A register write is a single I2C write of
//! `[register, high byte, low byte]`.
//!
//! `ShieldDriver` implements [`HardwareInterface`] on top of any
//! `embedded_hal::i2c::I2c` bus.

use core::{fmt, time::Duration};
use std::time::Instant;

use embedded_hal::i2c::I2c;
use serde::{Deserialize, Serialize};

use super::{HardwareInterface, LedState, Movement, ServoChannel};
use crate::utils::math::map_range;

/// Default 7-bit address of the expansion board.
pub const SHIELD_ADDRESS: u8 = 0x18;

/// Register map of the expansion board.
pub mod reg {
    pub const SERVO1: u8 = 0;
    pub const SERVO2: u8 = 1;
    pub const SERVO3: u8 = 2;
    pub const SERVO4: u8 = 3;
    pub const PWM1: u8 = 4;
    pub const PWM2: u8 = 5;
    pub const DIR1: u8 = 6;
    pub const DIR2: u8 = 7;
    pub const BUZZER: u8 = 8;
    pub const IO1: u8 = 9;
    pub const IO2: u8 = 10;
    pub const IO3: u8 = 11;
    /// High byte of the echo time; the low byte follows at `SONIC + 1`.
    pub const SONIC: u8 = 12;
    /// Writing `0xBB << 8 | new_address << 1` here moves the board.
    pub const ADDRESS: u8 = 0xAA;
}

/// Servo pulse width at 0°, in µs.
pub const SERVO_MIN_PULSE: f32 = 500.0;
/// Servo pulse width at 180°, in µs.
pub const SERVO_MAX_PULSE: f32 = 2500.0;
/// Echo samples with a high byte at or above this are garbage.
pub const SONIC_MAX_HIGH_BYTE: u8 = 50;

/// Errors that can occur when talking to the expansion board.
#[derive(Debug)]
pub enum ShieldError<E: fmt::Debug> {
    /// The bus transaction failed.
    Bus(E),
    /// Requested board address is outside the 7-bit range `0x03..=0x77`.
    InvalidAddress(u8),
}

/// Mounting calibration of one servo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServoCalibration {
    /// Servo angle (0–180°) that corresponds to logical 0.
    pub center: i32,
    /// Positive logical angles move the servo towards 0°.
    pub inverted: bool,
}

impl Default for ServoCalibration {
    fn default() -> Self {
        Self {
            center: 90,
            inverted: false,
        }
    }
}

impl ServoCalibration {
    /// Servo angle for a logical angle, clamped to 0–180°.
    pub fn servo_degrees(
        &self,
        logical: i32,
    ) -> i32 {
        let offset = if self.inverted {
            logical.saturating_neg()
        } else {
            logical
        };
        self.center.saturating_add(offset).clamp(0, 180)
    }

    /// Pulse width in µs for a logical angle.
    pub fn pulse_width(
        &self,
        logical: i32,
    ) -> u16 {
        let degrees = self.servo_degrees(logical) as f32;
        map_range(degrees, 0.0, 180.0, SERVO_MIN_PULSE, SERVO_MAX_PULSE) as u16
    }
}

/// Bus-level settings of the expansion board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShieldConfig {
    pub address: u8,
    /// How many times each register write is sent.
    pub write_repeats: u8,
    /// Upper bound on echo samples per distance read.
    pub max_read_attempts: u8,
    pub steering: ServoCalibration,
    pub camera_pan: ServoCalibration,
    pub camera_tilt: ServoCalibration,
}

impl Default for ShieldConfig {
    fn default() -> Self {
        Self {
            address: SHIELD_ADDRESS,
            write_repeats: 1,
            max_read_attempts: 10,
            steering: ServoCalibration::default(),
            camera_pan: ServoCalibration::default(),
            camera_tilt: ServoCalibration::default(),
        }
    }
}

/// Convert an echo time in µs to centimeters.
pub fn echo_to_cm(echo_us: u16) -> f32 {
    f32::from(echo_us) * 17.0 / 1000.0
}

/// High-level driver for the expansion board over an I2C bus.
pub struct ShieldDriver<I2C> {
    i2c: I2C,
    config: ShieldConfig,
}

impl<I2C, E> ShieldDriver<I2C>
where
    I2C: I2c<Error = E>,
    E: fmt::Debug,
{
    /// Create a driver with the default address and calibration.
    pub fn new(i2c: I2C) -> Self {
        Self::with_config(i2c, ShieldConfig::default())
    }

    pub fn with_config(
        i2c: I2C,
        config: ShieldConfig,
    ) -> Self {
        ShieldDriver { i2c, config }
    }

    pub fn config(&self) -> &ShieldConfig {
        &self.config
    }

    /// Give the bus back.
    pub fn release(self) -> I2C {
        self.i2c
    }

    /// Check that the board acknowledges its address.
    pub fn probe(&mut self) -> Result<(), ShieldError<E>> {
        self.i2c
            .write(self.config.address, &[])
            .map_err(ShieldError::Bus)
    }

    /// Move the board to a new 7-bit address and start using it.
    pub fn set_board_address(
        &mut self,
        address: u8,
    ) -> Result<(), ShieldError<E>> {
        if !(0x03..=0x77).contains(&address) {
            return Err(ShieldError::InvalidAddress(address));
        }
        let value = (0xBB << 8) | (u16::from(address) << 1);
        self.write_register(reg::ADDRESS, value)?;
        tracing::info!("shield address changed to 0x{:02X}", address);
        self.config.address = address;
        Ok(())
    }

    /// Write a 16-bit register value, repeated `write_repeats` times.
    pub fn write_register(
        &mut self,
        register: u8,
        value: u16,
    ) -> Result<(), ShieldError<E>> {
        let [hi, lo] = value.to_be_bytes();
        for _ in 0..self.config.write_repeats.max(1) {
            self.i2c
                .write(self.config.address, &[register, hi, lo])
                .map_err(ShieldError::Bus)?;
        }
        Ok(())
    }

    /// Read one raw echo-time sample in µs.
    pub fn read_echo_time(&mut self) -> Result<u16, ShieldError<E>> {
        let mut hi = [0u8];
        let mut lo = [0u8];
        self.i2c
            .write_read(self.config.address, &[reg::SONIC], &mut hi)
            .map_err(ShieldError::Bus)?;
        self.i2c
            .write_read(self.config.address, &[reg::SONIC + 1], &mut lo)
            .map_err(ShieldError::Bus)?;
        Ok(u16::from_be_bytes([hi[0], lo[0]]))
    }

    fn calibration(
        &self,
        channel: ServoChannel,
    ) -> (u8, ServoCalibration) {
        match channel {
            ServoChannel::Steering => (reg::SERVO1, self.config.steering),
            ServoChannel::CameraPan => (reg::SERVO2, self.config.camera_pan),
            ServoChannel::CameraTilt => (reg::SERVO3, self.config.camera_tilt),
        }
    }
}

impl<I2C, E> HardwareInterface for ShieldDriver<I2C>
where
    I2C: I2c<Error = E>,
    E: fmt::Debug,
{
    type Error = ShieldError<E>;

    fn set_motor(
        &mut self,
        direction: Movement,
        duty: u16,
    ) -> Result<(), Self::Error> {
        let dir = match direction {
            Movement::Stopped => {
                self.write_register(reg::PWM1, 0)?;
                return self.write_register(reg::PWM2, 0);
            }
            Movement::Forward => 1,
            Movement::Backward => 0,
        };
        self.write_register(reg::DIR1, dir)?;
        self.write_register(reg::DIR2, dir)?;
        self.write_register(reg::PWM1, duty)?;
        self.write_register(reg::PWM2, duty)
    }

    fn set_servo_angle(
        &mut self,
        channel: ServoChannel,
        degrees: i32,
    ) -> Result<(), Self::Error> {
        let (register, calibration) = self.calibration(channel);
        self.write_register(register, calibration.pulse_width(degrees))
    }

    /// Sample the echo time until a plausible value arrives, the attempt
    /// budget runs out, or `timeout` passes.
    fn read_ultrasonic_distance(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<f32>, Self::Error> {
        // None: the timeout is past the clock's range, only attempts bound the read
        let deadline = Instant::now().checked_add(timeout);
        let mut sampled = false;
        let mut fault = None;

        for attempt in 0..self.config.max_read_attempts.max(1) {
            if attempt > 0 && deadline.is_some_and(|d| Instant::now() >= d) {
                break;
            }
            match self.read_echo_time() {
                Ok(echo) if echo != 0 && echo.to_be_bytes()[0] < SONIC_MAX_HIGH_BYTE => {
                    return Ok(Some(echo_to_cm(echo)));
                }
                Ok(echo) => {
                    tracing::trace!(attempt, echo, "discarding echo sample");
                    sampled = true;
                }
                Err(error) => {
                    tracing::debug!(attempt, ?error, "echo read failed");
                    fault = Some(error);
                }
            }
        }

        match fault {
            Some(error) if !sampled => Err(error),
            _ => Ok(None),
        }
    }

    /// LEDs are active-low.
    fn set_led(
        &mut self,
        led: LedState,
    ) -> Result<(), Self::Error> {
        self.write_register(reg::IO1, u16::from(!led.red))?;
        self.write_register(reg::IO2, u16::from(!led.green))?;
        self.write_register(reg::IO3, u16::from(!led.blue))
    }

    fn set_buzzer(
        &mut self,
        on: bool,
        frequency_hz: u16,
    ) -> Result<(), Self::Error> {
        let value = if on { frequency_hz } else { 0 };
        self.write_register(reg::BUZZER, value)
    }
}
