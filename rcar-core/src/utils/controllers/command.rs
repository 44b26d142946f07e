//! The closed command vocabulary of the car.
//!
//! Serialized as JSON with tag `"cmd"` and arguments under `"args"`, e.g.
//! `{"cmd":"SET_SPEED","args":50}` or `{"cmd":"STOP"}`. The text encoding in
//! [`crate::utils::connection::protocol`] uses the same names.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Kind of a single command argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Int,
    Bool,
}

impl fmt::Display for ArgKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            ArgKind::Int => f.write_str("integer"),
            ArgKind::Bool => f.write_str("boolean"),
        }
    }
}

/// Every command a client may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "args", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    // Motion
    Forward,
    Backward,
    Stop,
    /// Speed magnitude, clamped to 0..=100.
    SetSpeed(i32),

    // Steering, relative degrees
    TurnLeft(i32),
    TurnRight(i32),
    CenterSteering,

    // Camera, relative degrees
    CamLeft(i32),
    CamRight(i32),
    CamUp(i32),
    CamDown(i32),
    CamCenter,

    // Sensors and signalling
    GetDistance,
    /// Tone frequency in Hz.
    BuzzerOn(i32),
    BuzzerOff,
    LedRgb(bool, bool, bool),
}

/// Name and argument signature of one vocabulary entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    pub name: &'static str,
    pub args: &'static [ArgKind],
}

const NONE: &[ArgKind] = &[];
const ONE_INT: &[ArgKind] = &[ArgKind::Int];
const RGB: &[ArgKind] = &[ArgKind::Bool, ArgKind::Bool, ArgKind::Bool];

/// The full vocabulary, in declaration order.
pub const VOCABULARY: [Signature; 16] = [
    Signature { name: "FORWARD", args: NONE },
    Signature { name: "BACKWARD", args: NONE },
    Signature { name: "STOP", args: NONE },
    Signature { name: "SET_SPEED", args: ONE_INT },
    Signature { name: "TURN_LEFT", args: ONE_INT },
    Signature { name: "TURN_RIGHT", args: ONE_INT },
    Signature { name: "CENTER_STEERING", args: NONE },
    Signature { name: "CAM_LEFT", args: ONE_INT },
    Signature { name: "CAM_RIGHT", args: ONE_INT },
    Signature { name: "CAM_UP", args: ONE_INT },
    Signature { name: "CAM_DOWN", args: ONE_INT },
    Signature { name: "CAM_CENTER", args: NONE },
    Signature { name: "GET_DISTANCE", args: NONE },
    Signature { name: "BUZZER_ON", args: ONE_INT },
    Signature { name: "BUZZER_OFF", args: NONE },
    Signature { name: "LED_RGB", args: RGB },
];

/// A decoded argument value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arg {
    Int(i32),
    Bool(bool),
}

impl Command {
    /// Look up a vocabulary entry by its wire name (case-insensitive).
    pub fn signature(name: &str) -> Option<&'static Signature> {
        VOCABULARY
            .iter()
            .find(|sig| sig.name.eq_ignore_ascii_case(name))
    }

    /// Wire name of this command.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Forward => "FORWARD",
            Command::Backward => "BACKWARD",
            Command::Stop => "STOP",
            Command::SetSpeed(_) => "SET_SPEED",
            Command::TurnLeft(_) => "TURN_LEFT",
            Command::TurnRight(_) => "TURN_RIGHT",
            Command::CenterSteering => "CENTER_STEERING",
            Command::CamLeft(_) => "CAM_LEFT",
            Command::CamRight(_) => "CAM_RIGHT",
            Command::CamUp(_) => "CAM_UP",
            Command::CamDown(_) => "CAM_DOWN",
            Command::CamCenter => "CAM_CENTER",
            Command::GetDistance => "GET_DISTANCE",
            Command::BuzzerOn(_) => "BUZZER_ON",
            Command::BuzzerOff => "BUZZER_OFF",
            Command::LedRgb(..) => "LED_RGB",
        }
    }

    /// Arguments in wire order.
    pub fn args(&self) -> Vec<Arg> {
        match *self {
            Command::SetSpeed(v)
            | Command::TurnLeft(v)
            | Command::TurnRight(v)
            | Command::CamLeft(v)
            | Command::CamRight(v)
            | Command::CamUp(v)
            | Command::CamDown(v)
            | Command::BuzzerOn(v) => vec![Arg::Int(v)],
            Command::LedRgb(r, g, b) => vec![Arg::Bool(r), Arg::Bool(g), Arg::Bool(b)],
            Command::Forward
            | Command::Backward
            | Command::Stop
            | Command::CenterSteering
            | Command::CamCenter
            | Command::GetDistance
            | Command::BuzzerOff => Vec::new(),
        }
    }

    /// Build a command from a vocabulary entry and arguments already checked
    /// against its signature. Returns `None` on any mismatch.
    pub fn from_parts(
        signature: &Signature,
        args: &[Arg],
    ) -> Option<Command> {
        let cmd = match (signature.name, args) {
            ("FORWARD", []) => Command::Forward,
            ("BACKWARD", []) => Command::Backward,
            ("STOP", []) => Command::Stop,
            ("SET_SPEED", [Arg::Int(v)]) => Command::SetSpeed(*v),
            ("TURN_LEFT", [Arg::Int(v)]) => Command::TurnLeft(*v),
            ("TURN_RIGHT", [Arg::Int(v)]) => Command::TurnRight(*v),
            ("CENTER_STEERING", []) => Command::CenterSteering,
            ("CAM_LEFT", [Arg::Int(v)]) => Command::CamLeft(*v),
            ("CAM_RIGHT", [Arg::Int(v)]) => Command::CamRight(*v),
            ("CAM_UP", [Arg::Int(v)]) => Command::CamUp(*v),
            ("CAM_DOWN", [Arg::Int(v)]) => Command::CamDown(*v),
            ("CAM_CENTER", []) => Command::CamCenter,
            ("GET_DISTANCE", []) => Command::GetDistance,
            ("BUZZER_ON", [Arg::Int(v)]) => Command::BuzzerOn(*v),
            ("BUZZER_OFF", []) => Command::BuzzerOff,
            ("LED_RGB", [Arg::Bool(r), Arg::Bool(g), Arg::Bool(b)]) => Command::LedRgb(*r, *g, *b),
            _ => return None,
        };
        Some(cmd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vocabulary_names_match_serde_tags() {
        let samples = [
            Command::Forward,
            Command::SetSpeed(1),
            Command::CenterSteering,
            Command::CamDown(2),
            Command::GetDistance,
            Command::LedRgb(true, false, true),
        ];
        for cmd in samples {
            let json = serde_json::to_value(cmd).unwrap();
            assert_eq!(json["cmd"], cmd.name());
            assert!(Command::signature(cmd.name()).is_some());
        }
    }

    #[test]
    fn from_parts_rebuilds_every_signature() {
        for sig in VOCABULARY.iter() {
            let args: Vec<Arg> = sig
                .args
                .iter()
                .map(|kind| match kind {
                    ArgKind::Int => Arg::Int(7),
                    ArgKind::Bool => Arg::Bool(true),
                })
                .collect();
            let cmd = Command::from_parts(sig, &args).unwrap();
            assert_eq!(cmd.name(), sig.name);
            assert_eq!(cmd.args(), args);
        }
    }
}
