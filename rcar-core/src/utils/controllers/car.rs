//! Car-control state machine.
//!
//! `CarState` owns the commanded speed, direction, servo angles, LED and
//! buzzer state of the car and is the only place that talks to the
//! [`HardwareInterface`]. Every operation computes the new value first, pushes
//! it to the hardware, and commits it only when the hardware call succeeded,
//! so an actuator fault never leaves a partial update behind.
//!
//! Angle and speed adjustments are relative deltas that saturate at the
//! configured bounds (see [`Bounds`]).

use core::time::Duration;

use serde::{Deserialize, Serialize};

use super::{
    command::Command, Actuator, ControlError, HardwareInterface, LedState, Movement,
    ServoChannel,
};
use crate::utils::math::Bounds;

/// Value reported for a distance read that got no echo.
pub const NO_ECHO_SENTINEL: f32 = -1.0;

/// Valid range of the speed magnitude.
pub const SPEED_RANGE: Bounds = Bounds::new(0, 100);

/// Limits and calibration of the control layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CarConfig {
    /// Motor duty commanded at speed 100.
    pub max_duty: u16,
    /// Steering angle range, degrees from center.
    pub steering: Bounds,
    /// Camera pan range, degrees from center.
    pub camera_pan: Bounds,
    /// Camera tilt range, degrees from center.
    pub camera_tilt: Bounds,
    /// `false` on pan-only builds.
    pub tilt_fitted: bool,
    /// Accepted buzzer frequencies in Hz.
    pub buzzer_hz: Bounds,
    /// Upper bound on a single ultrasonic read.
    pub distance_timeout_ms: u64,
}

impl Default for CarConfig {
    fn default() -> Self {
        Self {
            max_duty: 1000,
            steering: Bounds::new(-45, 45),
            camera_pan: Bounds::new(-80, 80),
            camera_tilt: Bounds::new(-40, 40),
            tilt_fitted: true,
            buzzer_hz: Bounds::new(100, 10_000),
            distance_timeout_ms: 100,
        }
    }
}

impl CarConfig {
    pub fn distance_timeout(&self) -> Duration {
        Duration::from_millis(self.distance_timeout_ms)
    }

    /// Motor duty for a speed in `0..=100`.
    pub fn duty_for(
        &self,
        speed: u8,
    ) -> u16 {
        let duty = u32::from(speed.min(100)) * u32::from(self.max_duty) / 100;
        duty as u16
    }
}

/// Outcome of an ultrasonic read.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceReading {
    Centimeters(f32),
    NoEcho,
}

impl DistanceReading {
    /// Numeric wire value; `NoEcho` maps to [`NO_ECHO_SENTINEL`].
    pub fn value(&self) -> f32 {
        match self {
            DistanceReading::Centimeters(cm) => *cm,
            DistanceReading::NoEcho => NO_ECHO_SENTINEL,
        }
    }
}

/// Plain copy of every field of a [`CarState`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CarSnapshot {
    pub speed: u8,
    pub movement: Movement,
    pub steering: i32,
    pub camera_pan: i32,
    /// `None` on pan-only builds.
    pub camera_tilt: Option<i32>,
    pub led: LedState,
    /// Active frequency while the buzzer sounds.
    pub buzzer_hz: Option<u16>,
    pub last_distance: Option<DistanceReading>,
}

/// Commanded state of the car and the hardware it drives.
pub struct CarState<H> {
    hardware: H,
    config: CarConfig,
    speed: u8,
    movement: Movement,
    steering: i32,
    camera_pan: i32,
    camera_tilt: i32,
    led: LedState,
    buzzer_hz: Option<u16>,
    last_distance: Option<DistanceReading>,
}

impl<H> CarState<H>
where
    H: HardwareInterface,
{
    /// Create a car with every value at neutral. No hardware is touched until
    /// [`CarState::initialize`].
    pub fn new(
        hardware: H,
        config: CarConfig,
    ) -> Self {
        Self {
            steering: config.steering.clamp(0),
            camera_pan: config.camera_pan.clamp(0),
            camera_tilt: config.camera_tilt.clamp(0),
            hardware,
            config,
            speed: 0,
            movement: Movement::Stopped,
            led: LedState::OFF,
            buzzer_hz: None,
            last_distance: None,
        }
    }

    /// Drive the hardware into the neutral state at startup.
    pub fn initialize(&mut self) -> Result<(), ControlError> {
        tracing::info!("driving car to neutral state");
        self.neutral()
    }

    pub fn config(&self) -> &CarConfig {
        &self.config
    }

    pub fn hardware(&self) -> &H {
        &self.hardware
    }

    pub fn hardware_mut(&mut self) -> &mut H {
        &mut self.hardware
    }

    pub fn snapshot(&self) -> CarSnapshot {
        CarSnapshot {
            speed: self.speed,
            movement: self.movement,
            steering: self.steering,
            camera_pan: self.camera_pan,
            camera_tilt: self.config.tilt_fitted.then_some(self.camera_tilt),
            led: self.led,
            buzzer_hz: self.buzzer_hz,
            last_distance: self.last_distance,
        }
    }

    /// Execute a decoded `Command`.
    ///
    /// Returns the distance for `GET_DISTANCE` and `None` for everything else.
    pub fn execute_command(
        &mut self,
        command: Command,
    ) -> Result<Option<f32>, ControlError> {
        match command {
            Command::Forward => self.forward()?,
            Command::Backward => self.backward()?,
            Command::Stop => self.stop()?,
            Command::SetSpeed(v) => {
                self.set_speed(v);
            }
            Command::TurnLeft(d) => self.turn_left(d)?,
            Command::TurnRight(d) => self.turn_right(d)?,
            Command::CenterSteering => self.center_steering()?,
            Command::CamLeft(d) => self.camera_left(d)?,
            Command::CamRight(d) => self.camera_right(d)?,
            Command::CamUp(d) => self.camera_up(d)?,
            Command::CamDown(d) => self.camera_down(d)?,
            Command::CamCenter => self.camera_center()?,
            Command::GetDistance => return Ok(Some(self.get_distance()?.value())),
            Command::BuzzerOn(hz) => self.buzzer_on(hz)?,
            Command::BuzzerOff => self.buzzer_off()?,
            Command::LedRgb(r, g, b) => self.led_rgb(r, g, b)?,
        }
        Ok(None)
    }

    // Motion

    /// Store a new speed magnitude, clamped to `0..=100`.
    ///
    /// The motors pick it up on the next `forward()`/`backward()`.
    pub fn set_speed(
        &mut self,
        value: i32,
    ) -> u8 {
        self.speed = SPEED_RANGE.clamp(value) as u8;
        self.speed
    }

    pub fn forward(&mut self) -> Result<(), ControlError> {
        self.drive(Movement::Forward)
    }

    pub fn backward(&mut self) -> Result<(), ControlError> {
        self.drive(Movement::Backward)
    }

    pub fn stop(&mut self) -> Result<(), ControlError> {
        self.drive(Movement::Stopped)
    }

    fn drive(
        &mut self,
        movement: Movement,
    ) -> Result<(), ControlError> {
        let duty = match movement {
            Movement::Stopped => 0,
            Movement::Forward | Movement::Backward => self.config.duty_for(self.speed),
        };
        self.hardware
            .set_motor(movement, duty)
            .map_err(|e| ControlError::fault(Actuator::Motors, e))?;
        self.movement = movement;
        tracing::debug!(?movement, duty, "motors driven");
        Ok(())
    }

    // Steering

    pub fn turn_left(
        &mut self,
        delta: i32,
    ) -> Result<(), ControlError> {
        let target = self.config.steering.apply_delta(self.steering, delta);
        self.steer(target)
    }

    pub fn turn_right(
        &mut self,
        delta: i32,
    ) -> Result<(), ControlError> {
        let target = self
            .config
            .steering
            .apply_negative_delta(self.steering, delta);
        self.steer(target)
    }

    pub fn center_steering(&mut self) -> Result<(), ControlError> {
        let target = self.config.steering.clamp(0);
        self.steer(target)
    }

    fn steer(
        &mut self,
        target: i32,
    ) -> Result<(), ControlError> {
        self.push_servo(ServoChannel::Steering, target)?;
        self.steering = target;
        Ok(())
    }

    // Camera

    pub fn camera_left(
        &mut self,
        delta: i32,
    ) -> Result<(), ControlError> {
        let target = self.config.camera_pan.apply_delta(self.camera_pan, delta);
        self.pan(target)
    }

    pub fn camera_right(
        &mut self,
        delta: i32,
    ) -> Result<(), ControlError> {
        let target = self
            .config
            .camera_pan
            .apply_negative_delta(self.camera_pan, delta);
        self.pan(target)
    }

    pub fn camera_up(
        &mut self,
        delta: i32,
    ) -> Result<(), ControlError> {
        self.require_tilt()?;
        let target = self.config.camera_tilt.apply_delta(self.camera_tilt, delta);
        self.tilt(target)
    }

    pub fn camera_down(
        &mut self,
        delta: i32,
    ) -> Result<(), ControlError> {
        self.require_tilt()?;
        let target = self
            .config
            .camera_tilt
            .apply_negative_delta(self.camera_tilt, delta);
        self.tilt(target)
    }

    /// Center pan, and tilt when fitted.
    ///
    /// Pan is committed before tilt is pushed; a tilt fault leaves the pan
    /// centered.
    pub fn camera_center(&mut self) -> Result<(), ControlError> {
        self.pan(self.config.camera_pan.clamp(0))?;
        if self.config.tilt_fitted {
            self.tilt(self.config.camera_tilt.clamp(0))?;
        }
        Ok(())
    }

    fn require_tilt(&self) -> Result<(), ControlError> {
        if self.config.tilt_fitted {
            Ok(())
        } else {
            Err(ControlError::NotFitted(Actuator::CameraTilt))
        }
    }

    fn pan(
        &mut self,
        target: i32,
    ) -> Result<(), ControlError> {
        self.push_servo(ServoChannel::CameraPan, target)?;
        self.camera_pan = target;
        Ok(())
    }

    fn tilt(
        &mut self,
        target: i32,
    ) -> Result<(), ControlError> {
        self.push_servo(ServoChannel::CameraTilt, target)?;
        self.camera_tilt = target;
        Ok(())
    }

    fn push_servo(
        &mut self,
        channel: ServoChannel,
        degrees: i32,
    ) -> Result<(), ControlError> {
        self.hardware
            .set_servo_angle(channel, degrees)
            .map_err(|e| ControlError::fault(channel.into(), e))?;
        tracing::debug!(?channel, degrees, "servo moved");
        Ok(())
    }

    // Sensors and signalling

    /// Read the ultrasonic sensor.
    ///
    /// A read that gets no echo within the configured bound is not an error:
    /// it yields [`DistanceReading::NoEcho`].
    pub fn get_distance(&mut self) -> Result<DistanceReading, ControlError> {
        let timeout = self.config.distance_timeout();
        let reading = match self
            .hardware
            .read_ultrasonic_distance(timeout)
            .map_err(|e| ControlError::fault(Actuator::Ultrasonic, e))?
        {
            Some(cm) => DistanceReading::Centimeters(cm),
            None => {
                tracing::warn!(?timeout, "ultrasonic read got no echo");
                DistanceReading::NoEcho
            }
        };
        self.last_distance = Some(reading);
        Ok(reading)
    }

    /// Sound the buzzer; the frequency is clamped to the configured range.
    pub fn buzzer_on(
        &mut self,
        frequency_hz: i32,
    ) -> Result<(), ControlError> {
        let hz = self
            .config
            .buzzer_hz
            .clamp(frequency_hz)
            .clamp(1, i32::from(u16::MAX)) as u16;
        self.hardware
            .set_buzzer(true, hz)
            .map_err(|e| ControlError::fault(Actuator::Buzzer, e))?;
        self.buzzer_hz = Some(hz);
        Ok(())
    }

    pub fn buzzer_off(&mut self) -> Result<(), ControlError> {
        self.hardware
            .set_buzzer(false, 0)
            .map_err(|e| ControlError::fault(Actuator::Buzzer, e))?;
        self.buzzer_hz = None;
        Ok(())
    }

    pub fn led_rgb(
        &mut self,
        red: bool,
        green: bool,
        blue: bool,
    ) -> Result<(), ControlError> {
        let led = LedState::new(red, green, blue);
        self.hardware
            .set_led(led)
            .map_err(|e| ControlError::fault(Actuator::Led, e))?;
        self.led = led;
        Ok(())
    }

    /// Drive every actuator to its safe state: motors off, servos centered,
    /// buzzer and LEDs off.
    ///
    /// Every step is attempted even if an earlier one fails; the first fault
    /// is returned.
    pub fn neutral(&mut self) -> Result<(), ControlError> {
        let steps = [
            self.stop(),
            self.center_steering(),
            self.camera_center(),
            self.buzzer_off(),
            self.led_rgb(false, false, false),
        ];

        let mut first = None;
        for result in steps {
            if let Err(error) = result {
                tracing::error!(%error, "neutral step failed");
                first.get_or_insert(error);
            }
        }
        match first {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Motor(Movement, u16),
        Servo(ServoChannel, i32),
        Distance,
        Led(LedState),
        Buzzer(bool, u16),
    }

    /// Hardware that records calls and can be told to fail.
    #[derive(Debug, Default)]
    struct RecordingHardware {
        pub calls: Vec<Call>,
        pub fail: bool,
        pub distance: Option<f32>,
    }

    impl RecordingHardware {
        fn record(
            &mut self,
            call: Call,
        ) -> Result<(), &'static str> {
            if self.fail {
                return Err("bus did not acknowledge");
            }
            self.calls.push(call);
            Ok(())
        }
    }

    impl HardwareInterface for RecordingHardware {
        type Error = &'static str;

        fn set_motor(
            &mut self,
            direction: Movement,
            duty: u16,
        ) -> Result<(), Self::Error> {
            self.record(Call::Motor(direction, duty))
        }

        fn set_servo_angle(
            &mut self,
            channel: ServoChannel,
            degrees: i32,
        ) -> Result<(), Self::Error> {
            self.record(Call::Servo(channel, degrees))
        }

        fn read_ultrasonic_distance(
            &mut self,
            _timeout: Duration,
        ) -> Result<Option<f32>, Self::Error> {
            self.record(Call::Distance)?;
            Ok(self.distance)
        }

        fn set_led(
            &mut self,
            led: LedState,
        ) -> Result<(), Self::Error> {
            self.record(Call::Led(led))
        }

        fn set_buzzer(
            &mut self,
            on: bool,
            frequency_hz: u16,
        ) -> Result<(), Self::Error> {
            self.record(Call::Buzzer(on, frequency_hz))
        }
    }

    fn car() -> CarState<RecordingHardware> {
        CarState::new(RecordingHardware::default(), CarConfig::default())
    }

    #[test]
    fn turn_left_saturates_at_max() {
        let mut car = car();
        car.turn_left(20).unwrap();
        car.turn_left(30).unwrap();
        assert_eq!(car.snapshot().steering, 45);
        assert_eq!(
            car.hardware().calls.last(),
            Some(&Call::Servo(ServoChannel::Steering, 45))
        );
    }

    #[test]
    fn negative_delta_turns_the_other_way() {
        let mut car = car();
        car.turn_left(-10).unwrap();
        assert_eq!(car.snapshot().steering, -10);
        car.turn_right(-20).unwrap();
        assert_eq!(car.snapshot().steering, 10);
    }

    #[test]
    fn center_steering_is_idempotent() {
        let mut car = car();
        car.turn_right(30).unwrap();
        for _ in 0..5 {
            car.center_steering().unwrap();
            assert_eq!(car.snapshot().steering, 0);
        }
    }

    #[test]
    fn zero_speed_forward_drives_zero_power() {
        let mut car = car();
        car.set_speed(0);
        car.forward().unwrap();
        assert_eq!(car.snapshot().movement, Movement::Forward);
        assert_eq!(
            car.hardware().calls,
            vec![Call::Motor(Movement::Forward, 0)]
        );
    }

    #[test]
    fn speed_persists_across_stop() {
        let mut car = car();
        assert_eq!(car.set_speed(50), 50);
        car.forward().unwrap();
        car.stop().unwrap();
        let snap = car.snapshot();
        assert_eq!(snap.movement, Movement::Stopped);
        assert_eq!(snap.speed, 50);
        assert_eq!(
            car.hardware().calls,
            vec![
                Call::Motor(Movement::Forward, 500),
                Call::Motor(Movement::Stopped, 0)
            ]
        );
    }

    #[test]
    fn speed_clamps_silently() {
        let mut car = car();
        assert_eq!(car.set_speed(250), 100);
        assert_eq!(car.set_speed(-3), 0);
        assert!(car.hardware().calls.is_empty());
    }

    #[test]
    fn fault_leaves_state_unchanged() {
        let mut car = car();
        car.set_speed(40);
        car.turn_left(10).unwrap();
        car.led_rgb(true, false, false).unwrap();
        let before = car.snapshot();

        car.hardware_mut().fail = true;
        let err = car.forward().unwrap_err();
        assert!(matches!(
            err,
            ControlError::ActuatorFault {
                actuator: Actuator::Motors,
                ..
            }
        ));
        assert!(car.turn_left(10).is_err());
        assert!(car.camera_up(10).is_err());
        assert!(car.buzzer_on(2000).is_err());
        assert!(car.led_rgb(false, true, false).is_err());
        assert!(car.get_distance().is_err());
        assert_eq!(car.snapshot(), before);
    }

    #[test]
    fn camera_axes_clamp_independently() {
        let mut car = car();
        car.camera_left(500).unwrap();
        car.camera_down(500).unwrap();
        let snap = car.snapshot();
        assert_eq!(snap.camera_pan, 80);
        assert_eq!(snap.camera_tilt, Some(-40));

        car.camera_center().unwrap();
        let snap = car.snapshot();
        assert_eq!(snap.camera_pan, 0);
        assert_eq!(snap.camera_tilt, Some(0));
    }

    #[test]
    fn tilt_commands_fail_on_pan_only_build() {
        let config = CarConfig {
            tilt_fitted: false,
            ..CarConfig::default()
        };
        let mut car = CarState::new(RecordingHardware::default(), config);
        assert_eq!(
            car.camera_up(5),
            Err(ControlError::NotFitted(Actuator::CameraTilt))
        );
        car.camera_center().unwrap();
        assert_eq!(
            car.hardware().calls,
            vec![Call::Servo(ServoChannel::CameraPan, 0)]
        );
        assert_eq!(car.snapshot().camera_tilt, None);
    }

    #[test]
    fn no_echo_yields_sentinel() {
        let mut car = car();
        let value = car.execute_command(Command::GetDistance).unwrap();
        assert_eq!(value, Some(NO_ECHO_SENTINEL));
        assert_eq!(car.snapshot().last_distance, Some(DistanceReading::NoEcho));

        car.hardware_mut().distance = Some(23.5);
        let value = car.execute_command(Command::GetDistance).unwrap();
        assert_eq!(value, Some(23.5));
    }

    #[test]
    fn buzzer_frequency_saturates() {
        let mut car = car();
        car.buzzer_on(50_000).unwrap();
        assert_eq!(car.snapshot().buzzer_hz, Some(10_000));
        car.buzzer_on(0).unwrap();
        assert_eq!(car.snapshot().buzzer_hz, Some(100));
        car.buzzer_off().unwrap();
        assert_eq!(car.snapshot().buzzer_hz, None);
    }

    #[test]
    fn neutral_attempts_every_step() {
        let mut car = car();
        car.hardware_mut().fail = true;
        assert!(car.neutral().is_err());

        car.hardware_mut().fail = false;
        car.set_speed(70);
        car.backward().unwrap();
        car.turn_right(15).unwrap();
        car.buzzer_on(2000).unwrap();
        car.led_rgb(true, true, true).unwrap();
        car.hardware_mut().calls.clear();

        car.neutral().unwrap();
        let snap = car.snapshot();
        assert_eq!(snap.movement, Movement::Stopped);
        assert_eq!(snap.steering, 0);
        assert_eq!(snap.buzzer_hz, None);
        assert_eq!(snap.led, LedState::OFF);
        assert_eq!(
            car.hardware().calls,
            vec![
                Call::Motor(Movement::Stopped, 0),
                Call::Servo(ServoChannel::Steering, 0),
                Call::Servo(ServoChannel::CameraPan, 0),
                Call::Servo(ServoChannel::CameraTilt, 0),
                Call::Buzzer(false, 0),
                Call::Led(LedState::OFF),
            ]
        );
    }

    proptest! {
        #[test]
        fn steering_equals_saturating_sum(
            deltas in proptest::collection::vec((any::<bool>(), -200i32..200), 0..64)
        ) {
            let mut car = car();
            let mut expected = 0i32;
            for (left, delta) in deltas {
                if left {
                    car.turn_left(delta).unwrap();
                    expected = (expected + delta).clamp(-45, 45);
                } else {
                    car.turn_right(delta).unwrap();
                    expected = (expected - delta).clamp(-45, 45);
                }
                let angle = car.snapshot().steering;
                prop_assert!((-45..=45).contains(&angle));
                prop_assert_eq!(angle, expected);
            }
        }

        #[test]
        fn extreme_deltas_never_overflow(delta in any::<i32>()) {
            let mut car = car();
            car.turn_left(delta).unwrap();
            car.turn_left(delta).unwrap();
            car.camera_right(delta).unwrap();
            let snap = car.snapshot();
            prop_assert!((-45..=45).contains(&snap.steering));
            prop_assert!((-80..=80).contains(&snap.camera_pan));
        }
    }
}
