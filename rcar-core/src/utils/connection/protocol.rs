//! Command protocol.
//!
//! Messages are lines: every request and every response ends with `\n`, and
//! no encoded message contains a newline. A line is either
//!
//! - text: `SET_SPEED 50`, answered with `OK`, `OK 42.5` or
//!   `ERR PROTOCOL unknown command `FOO``, or
//! - JSON (starts with `{`): `{"cmd":"SET_SPEED","args":50}`, answered with
//!   `{"status":"ok"}` or `{"status":"error","kind":"protocol","message":"..."}`.
//!
//! The response always uses the encoding of the request it answers.

use std::io::{self, BufRead, Read};

use serde::{Deserialize, Serialize};

use crate::utils::controllers::{
    command::{Arg, ArgKind},
    Command, ControlError,
};

/// Wire encoding of a single line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Text,
    Json,
}

impl Encoding {
    /// Encoding a raw line is written in.
    pub fn detect(line: &[u8]) -> Encoding {
        match line.iter().find(|b| !b.is_ascii_whitespace()) {
            Some(b'{') => Encoding::Json,
            _ => Encoding::Text,
        }
    }
}

/// Reasons a line could not be turned into a [`Command`] or [`Response`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("empty command")]
    Empty,
    #[error("unknown command `{0}`")]
    UnknownCommand(String),
    #[error("{command} takes {expected} argument(s), got {found}")]
    Arity {
        command: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("{command} argument {position}: expected {expected}, got `{value}`")]
    InvalidArgument {
        command: &'static str,
        position: usize,
        expected: ArgKind,
        value: String,
    },
    #[error("{command} does not take field `{field}`")]
    UnknownField {
        command: &'static str,
        field: String,
    },
    #[error("malformed JSON command: {0}")]
    Json(String),
    #[error("message is not valid UTF-8")]
    NotUtf8,
    #[error("message exceeds {0} bytes")]
    TooLong(usize),
    #[error("malformed response: {0}")]
    BadResponse(String),
}

/// Decode one request line (without its terminator).
pub fn decode_request(line: &[u8]) -> (Encoding, Result<Command, ProtocolError>) {
    let encoding = Encoding::detect(line);
    let result = std::str::from_utf8(line)
        .map_err(|_| ProtocolError::NotUtf8)
        .and_then(|text| match encoding {
            Encoding::Text => decode_text(text),
            Encoding::Json => decode_json(text),
        });
    (encoding, result)
}

/// Decode a text command such as `LED_RGB 1 0 1`.
pub fn decode_text(line: &str) -> Result<Command, ProtocolError> {
    let mut tokens = line.split_ascii_whitespace();
    let name = tokens.next().ok_or(ProtocolError::Empty)?;
    let signature =
        Command::signature(name).ok_or_else(|| ProtocolError::UnknownCommand(name.to_string()))?;

    let raw: Vec<&str> = tokens.collect();
    if raw.len() != signature.args.len() {
        return Err(ProtocolError::Arity {
            command: signature.name,
            expected: signature.args.len(),
            found: raw.len(),
        });
    }

    let args = raw
        .iter()
        .zip(signature.args)
        .enumerate()
        .map(|(i, (value, kind))| {
            parse_arg(value, *kind).ok_or_else(|| ProtocolError::InvalidArgument {
                command: signature.name,
                position: i + 1,
                expected: *kind,
                value: value.to_string(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Command::from_parts(signature, &args).ok_or(ProtocolError::Arity {
        command: signature.name,
        expected: signature.args.len(),
        found: args.len(),
    })
}

fn parse_arg(
    value: &str,
    kind: ArgKind,
) -> Option<Arg> {
    match kind {
        ArgKind::Int => value.parse::<i32>().ok().map(Arg::Int),
        ArgKind::Bool => match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "on" => Some(Arg::Bool(true)),
            "0" | "false" | "off" => Some(Arg::Bool(false)),
            _ => None,
        },
    }
}

/// Decode a JSON command such as `{"cmd":"TURN_LEFT","args":15}`.
///
/// Names match case-insensitively as in the text encoding. Any field besides
/// `cmd` and `args` is rejected.
pub fn decode_json(line: &str) -> Result<Command, ProtocolError> {
    let mut value: serde_json::Value =
        serde_json::from_str(line).map_err(|e| ProtocolError::Json(e.to_string()))?;

    if let Some(object) = value.as_object_mut() {
        if let Some(name) = object.get("cmd").and_then(|v| v.as_str()) {
            let signature = Command::signature(name)
                .ok_or_else(|| ProtocolError::UnknownCommand(name.to_string()))?;
            if let Some(field) = object.keys().find(|k| !matches!(k.as_str(), "cmd" | "args")) {
                return Err(ProtocolError::UnknownField {
                    command: signature.name,
                    field: field.clone(),
                });
            }
            object.insert(
                String::from("cmd"),
                serde_json::Value::from(signature.name),
            );
        }
    }
    serde_json::from_value(value).map_err(|e| ProtocolError::Json(e.to_string()))
}

/// Encode a command, including its terminating newline.
pub fn encode_command(
    command: &Command,
    encoding: Encoding,
) -> String {
    let mut out = match encoding {
        Encoding::Text => {
            let mut line = command.name().to_string();
            for arg in command.args() {
                line.push(' ');
                match arg {
                    Arg::Int(v) => line.push_str(&v.to_string()),
                    Arg::Bool(b) => line.push(if b { '1' } else { '0' }),
                }
            }
            line
        }
        Encoding::Json => json_line(command),
    };
    out.push('\n');
    out
}

fn json_line<T: Serialize>(value: &T) -> String {
    // Plain enums and structs of numbers and strings always serialize.
    serde_json::to_string(value).unwrap_or_else(|e| {
        tracing::error!(error = %e, "JSON encoding failed");
        String::from("{}")
    })
}

/// Failure category reported to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Protocol,
    ActuatorFault,
    Unsupported,
    Busy,
}

impl FailureKind {
    fn as_text(&self) -> &'static str {
        match self {
            FailureKind::Protocol => "PROTOCOL",
            FailureKind::ActuatorFault => "ACTUATOR_FAULT",
            FailureKind::Unsupported => "UNSUPPORTED",
            FailureKind::Busy => "BUSY",
        }
    }

    fn from_text(text: &str) -> Option<Self> {
        match text {
            "PROTOCOL" => Some(FailureKind::Protocol),
            "ACTUATOR_FAULT" => Some(FailureKind::ActuatorFault),
            "UNSUPPORTED" => Some(FailureKind::Unsupported),
            "BUSY" => Some(FailureKind::Busy),
            _ => None,
        }
    }
}

/// Answer to a single request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Ok {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<f32>,
    },
    Error { kind: FailureKind, message: String },
}

impl Response {
    pub fn ack(value: Option<f32>) -> Self {
        Response::Ok { value }
    }

    pub fn error(
        kind: FailureKind,
        message: impl Into<String>,
    ) -> Self {
        let message: String = message.into();
        Response::Error {
            kind,
            message: message.replace(['\r', '\n'], " "),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Response::Ok { .. })
    }

    /// Encode the response, including its terminating newline.
    pub fn encode(
        &self,
        encoding: Encoding,
    ) -> String {
        let mut out = match encoding {
            Encoding::Json => json_line(self),
            Encoding::Text => match self {
                Response::Ok { value: None } => String::from("OK"),
                Response::Ok { value: Some(v) } => format!("OK {v}"),
                Response::Error { kind, message } => {
                    format!("ERR {} {}", kind.as_text(), message)
                }
            },
        };
        out.push('\n');
        out
    }

    /// Decode a response line (terminator optional).
    pub fn decode(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim();
        if line.starts_with('{') {
            return serde_json::from_str(line)
                .map_err(|e| ProtocolError::BadResponse(e.to_string()));
        }

        let bad = || ProtocolError::BadResponse(line.to_string());
        let (head, rest) = line.split_once(' ').unwrap_or((line, ""));
        match head {
            "OK" if rest.is_empty() => Ok(Response::ack(None)),
            "OK" => rest
                .trim()
                .parse::<f32>()
                .map(|v| Response::ack(Some(v)))
                .map_err(|_| bad()),
            "ERR" => {
                let (kind, message) = rest.split_once(' ').unwrap_or((rest, ""));
                let kind = FailureKind::from_text(kind).ok_or_else(bad)?;
                Ok(Response::error(kind, message))
            }
            _ => Err(bad()),
        }
    }
}

impl From<&ProtocolError> for Response {
    fn from(error: &ProtocolError) -> Self {
        Response::error(FailureKind::Protocol, error.to_string())
    }
}

impl From<&ControlError> for Response {
    fn from(error: &ControlError) -> Self {
        let kind = match error {
            ControlError::ActuatorFault { .. } => FailureKind::ActuatorFault,
            ControlError::NotFitted(_) => FailureKind::Unsupported,
        };
        Response::error(kind, error.to_string())
    }
}

/// One read from a [`FrameReader`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete line without its terminator.
    Line(Vec<u8>),
    /// A line exceeded the length limit; the rest of it is being skipped.
    TooLong,
    /// The read timed out before a full line arrived.
    Idle,
    /// The peer closed the stream.
    Closed,
}

/// Splits a byte stream into newline-terminated frames of bounded length.
///
/// The limit applies to the line content; neither `\n` nor a `\r` before it
/// counts. Partial lines survive read timeouts, so a reader with a socket
/// read timeout can poll for shutdown between frames.
pub struct FrameReader<R> {
    inner: R,
    buf: Vec<u8>,
    max_len: usize,
    discarding: bool,
}

impl<R: BufRead> FrameReader<R> {
    pub fn new(
        inner: R,
        max_len: usize,
    ) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            max_len: max_len.max(1),
            discarding: false,
        }
    }

    pub fn read_frame(&mut self) -> io::Result<Frame> {
        loop {
            // room for max_len content bytes plus "\r\n"; between calls buf
            // holds at most max_len + 1 bytes
            let budget = (self.max_len + 2).saturating_sub(self.buf.len()) as u64;
            match (&mut self.inner).take(budget).read_until(b'\n', &mut self.buf) {
                Ok(0) => return Ok(Frame::Closed),
                Ok(_) => {
                    if self.buf.last() == Some(&b'\n') {
                        let mut line = std::mem::take(&mut self.buf);
                        if std::mem::take(&mut self.discarding) {
                            continue;
                        }
                        line.pop();
                        if line.last() == Some(&b'\r') {
                            line.pop();
                        }
                        if line.len() > self.max_len {
                            return Ok(Frame::TooLong);
                        }
                        return Ok(Frame::Line(line));
                    }
                    if self.overflowed() {
                        self.buf.clear();
                        if !self.discarding {
                            self.discarding = true;
                            return Ok(Frame::TooLong);
                        }
                    }
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) =>
                {
                    return Ok(Frame::Idle)
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// The pending bytes can no longer end in a line within the limit.
    fn overflowed(&self) -> bool {
        let len = self.buf.len();
        let awaiting_lf = len == self.max_len + 1 && self.buf.last() == Some(&b'\r');
        len > self.max_len && !awaiting_lf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::controllers::VOCABULARY;

    fn every_command() -> Vec<Command> {
        vec![
            Command::Forward,
            Command::Backward,
            Command::Stop,
            Command::SetSpeed(50),
            Command::TurnLeft(15),
            Command::TurnRight(-15),
            Command::CenterSteering,
            Command::CamLeft(10),
            Command::CamRight(10),
            Command::CamUp(5),
            Command::CamDown(5),
            Command::CamCenter,
            Command::GetDistance,
            Command::BuzzerOn(2000),
            Command::BuzzerOff,
            Command::LedRgb(true, false, true),
        ]
    }

    #[test]
    fn every_command_round_trips_in_both_encodings() {
        let commands = every_command();
        assert_eq!(commands.len(), VOCABULARY.len());
        for cmd in commands {
            for encoding in [Encoding::Text, Encoding::Json] {
                let wire = encode_command(&cmd, encoding);
                assert!(wire.ends_with('\n'));
                assert_eq!(wire.matches('\n').count(), 1);
                let (detected, decoded) = decode_request(wire.trim_end().as_bytes());
                assert_eq!(detected, encoding);
                assert_eq!(decoded, Ok(cmd), "wire: {wire:?}");
            }
        }
    }

    #[test]
    fn text_encoding_is_stable() {
        assert_eq!(encode_command(&Command::SetSpeed(50), Encoding::Text), "SET_SPEED 50\n");
        assert_eq!(
            encode_command(&Command::LedRgb(true, false, true), Encoding::Text),
            "LED_RGB 1 0 1\n"
        );
        assert_eq!(
            encode_command(&Command::SetSpeed(50), Encoding::Json),
            "{\"cmd\":\"SET_SPEED\",\"args\":50}\n"
        );
    }

    #[test]
    fn text_names_are_case_insensitive() {
        assert_eq!(decode_text("set_speed 10"), Ok(Command::SetSpeed(10)));
        assert_eq!(decode_text("  stop  "), Ok(Command::Stop));
        assert_eq!(
            decode_text("LED_RGB on off TRUE"),
            Ok(Command::LedRgb(true, false, true))
        );
    }

    #[test]
    fn rejects_unknown_arity_and_type_errors() {
        assert_eq!(decode_text(""), Err(ProtocolError::Empty));
        assert_eq!(
            decode_text("JUMP 3"),
            Err(ProtocolError::UnknownCommand("JUMP".into()))
        );
        assert_eq!(
            decode_text("SET_SPEED"),
            Err(ProtocolError::Arity {
                command: "SET_SPEED",
                expected: 1,
                found: 0
            })
        );
        assert_eq!(
            decode_text("FORWARD 10"),
            Err(ProtocolError::Arity {
                command: "FORWARD",
                expected: 0,
                found: 1
            })
        );
        assert_eq!(
            decode_text("LED_RGB 1 0"),
            Err(ProtocolError::Arity {
                command: "LED_RGB",
                expected: 3,
                found: 2
            })
        );
        assert_eq!(
            decode_text("TURN_LEFT ten"),
            Err(ProtocolError::InvalidArgument {
                command: "TURN_LEFT",
                position: 1,
                expected: ArgKind::Int,
                value: "ten".into()
            })
        );
        assert!(matches!(
            decode_text("LED_RGB 1 maybe 0"),
            Err(ProtocolError::InvalidArgument { position: 2, .. })
        ));
        assert!(decode_text("SET_SPEED 99999999999").is_err());
    }

    #[test]
    fn json_rejections() {
        assert_eq!(
            decode_json(r#"{"cmd":"JUMP"}"#),
            Err(ProtocolError::UnknownCommand("JUMP".into()))
        );
        assert!(matches!(
            decode_json(r#"{"cmd":"SET_SPEED","args":"fast"}"#),
            Err(ProtocolError::Json(_))
        ));
        assert!(matches!(
            decode_json(r#"{"cmd":"LED_RGB","args":[true,false]}"#),
            Err(ProtocolError::Json(_))
        ));
        assert!(matches!(
            decode_json(r#"{"cmd":"SET_SPEED""#),
            Err(ProtocolError::Json(_))
        ));
        assert_eq!(
            decode_request(&[0xff, 0xfe]).1,
            Err(ProtocolError::NotUtf8)
        );
        assert_eq!(
            decode_json(r#"{"cmd":"STOP","speed":9}"#),
            Err(ProtocolError::UnknownField {
                command: "STOP",
                field: "speed".into()
            })
        );
        assert!(matches!(
            decode_json(r#"{"cmd":"SET_SPEED","args":5,"arg":6}"#),
            Err(ProtocolError::UnknownField { command: "SET_SPEED", .. })
        ));
    }

    #[test]
    fn json_names_are_case_insensitive() {
        assert_eq!(decode_json(r#"{"cmd":"stop"}"#), Ok(Command::Stop));
        assert_eq!(
            decode_json(r#"{"cmd":"Set_Speed","args":20}"#),
            Ok(Command::SetSpeed(20))
        );
        assert_eq!(
            decode_json(r#"{"cmd":"jump"}"#),
            Err(ProtocolError::UnknownCommand("jump".into()))
        );
    }

    #[test]
    fn responses_encode_and_decode() {
        let cases = [
            Response::ack(None),
            Response::ack(Some(42.5)),
            Response::ack(Some(-1.0)),
            Response::error(FailureKind::Protocol, "unknown command `JUMP`"),
            Response::error(FailureKind::ActuatorFault, "actuator fault on motors: Bus"),
        ];
        for response in cases {
            for encoding in [Encoding::Text, Encoding::Json] {
                let wire = response.encode(encoding);
                assert_eq!(Response::decode(&wire), Ok(response.clone()));
            }
        }
        assert_eq!(Response::ack(Some(-1.0)).encode(Encoding::Text), "OK -1\n");
        assert_eq!(Response::ack(None).encode(Encoding::Json), "{\"status\":\"ok\"}\n");
    }

    #[test]
    fn error_messages_never_break_framing() {
        let response = Response::error(FailureKind::Protocol, "line one\nline two\r");
        assert_eq!(response.encode(Encoding::Text).matches('\n').count(), 1);
    }

    #[test]
    fn frame_reader_splits_and_limits_lines() {
        let input: &[u8] = b"STOP\r\nFORWARD\n\nTOO_LONG_LINE_HERE\nCAM_CENTER\npartial";
        let mut reader = FrameReader::new(input, 12);
        assert_eq!(reader.read_frame().unwrap(), Frame::Line(b"STOP".to_vec()));
        assert_eq!(reader.read_frame().unwrap(), Frame::Line(b"FORWARD".to_vec()));
        assert_eq!(reader.read_frame().unwrap(), Frame::Line(Vec::new()));
        assert_eq!(reader.read_frame().unwrap(), Frame::TooLong);
        assert_eq!(reader.read_frame().unwrap(), Frame::Line(b"CAM_CENTER".to_vec()));
        assert_eq!(reader.read_frame().unwrap(), Frame::Closed);
    }

    #[test]
    fn frame_limit_excludes_carriage_return() {
        let input: &[u8] = b"STOP\r\nSTOPS\r\nSTOP\nABCD\rX\nFWD\n";
        let mut reader = FrameReader::new(input, 4);
        assert_eq!(reader.read_frame().unwrap(), Frame::Line(b"STOP".to_vec()));
        assert_eq!(reader.read_frame().unwrap(), Frame::TooLong);
        assert_eq!(reader.read_frame().unwrap(), Frame::Line(b"STOP".to_vec()));
        assert_eq!(reader.read_frame().unwrap(), Frame::TooLong);
        assert_eq!(reader.read_frame().unwrap(), Frame::Line(b"FWD".to_vec()));
        assert_eq!(reader.read_frame().unwrap(), Frame::Closed);
    }
}
