//! Codec for encoding/decoding payloads to/from `|`-delimited text frames
//!
//! Every frame is `TYPE|field|field...` terminated by `\r\n`. Content fields of
//! `MSG`, `WSP`, `SYS` and `ERR` are preceded by their UTF-8 byte length, which
//! lets content contain `|` and is validated on decode. Decoding is pure.

use std::error::Error;
use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use url::form_urlencoded;

use super::channel::{ChannelPayload, OptionalChannelArgs};
use super::payload::{MessageType, Payload, PayloadKind};

pub const FIELD_SEPARATOR: char = '|';
pub const LIST_SEPARATOR: char = ',';
pub const ARG_SEPARATOR: char = ';';
pub const LINE_TERMINATOR: &str = "\r\n";
/// Stands in for an absent channel, password or size in `CH` frames
pub const ABSENT: &str = "-";

/// Why a frame could not be decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Structurally invalid frame (bad number, bad argument, bad encoding)
    Malformed(String),
    /// Declared content length differs from the content's byte length
    LengthMismatch { declared: usize, actual: usize },
    /// The type's mandatory field count was not met
    TooFewFields {
        message_type: MessageType,
        expected: usize,
        found: usize,
    },
    UnsupportedType(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(msg) => write!(f, "Malformed payload: {}", msg),
            Self::LengthMismatch { declared, actual } => write!(
                f,
                "Malformed payload: declared length {} does not match content length {}",
                declared, actual
            ),
            Self::TooFewFields {
                message_type,
                expected,
                found,
            } => write!(
                f,
                "Too few fields for {}: expected {}, found {}",
                message_type, expected, found
            ),
            Self::UnsupportedType(tag) => write!(f, "Unsupported message type: {}", tag),
        }
    }
}

impl Error for DecodeError {}

/// Selects how frames are represented on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireEncoding {
    /// Plain `|`-delimited text
    #[default]
    Plain,
    /// Each plain frame base64-encoded, then terminated by `\r\n`
    Base64,
}

/// Encoder/decoder bound to one wire encoding
#[derive(Debug, Clone, Copy, Default)]
pub struct Codec {
    encoding: WireEncoding,
}

impl Codec {
    pub fn new(encoding: WireEncoding) -> Self {
        Self { encoding }
    }

    pub fn plain() -> Self {
        Self::new(WireEncoding::Plain)
    }

    pub fn encoding(&self) -> WireEncoding {
        self.encoding
    }

    /// Encodes a payload into a terminated wire line
    pub fn encode(&self, payload: &Payload) -> String {
        match self.encoding {
            WireEncoding::Plain => encode(payload),
            WireEncoding::Base64 => {
                let mut line = STANDARD.encode(encode_frame(payload));
                line.push_str(LINE_TERMINATOR);
                line
            }
        }
    }

    /// Decodes one wire line, with or without its terminator
    pub fn decode(&self, line: &str) -> Result<Payload, DecodeError> {
        match self.encoding {
            WireEncoding::Plain => decode(line),
            WireEncoding::Base64 => {
                let raw = STANDARD
                    .decode(strip_terminator(line))
                    .map_err(|e| DecodeError::Malformed(format!("invalid base64 frame: {}", e)))?;
                let frame = String::from_utf8(raw)
                    .map_err(|_| DecodeError::Malformed("frame is not valid UTF-8".to_string()))?;
                decode(&frame)
            }
        }
    }
}

/// Encodes a payload as a plain frame terminated by `\r\n`
pub fn encode(payload: &Payload) -> String {
    let mut line = encode_frame(payload);
    line.push_str(LINE_TERMINATOR);
    line
}

/// Encodes a payload as a plain frame without terminator
pub fn encode_frame(payload: &Payload) -> String {
    let ts = payload.timestamp.to_string();
    let tag = payload.message_type().as_str();

    let fields: Vec<String> = match &payload.kind {
        PayloadKind::Message { sender, content } => vec![
            ts,
            sender.clone(),
            content.len().to_string(),
            content.clone(),
        ],
        PayloadKind::Whisper {
            sender,
            recipient,
            content,
        } => vec![
            ts,
            sender.clone(),
            recipient.clone(),
            content.len().to_string(),
            content.clone(),
        ],
        PayloadKind::System { content, status } => vec![
            ts,
            content.len().to_string(),
            content.clone(),
            status.clone(),
        ],
        PayloadKind::Error { content } => vec![ts, content.len().to_string(), content.clone()],
        PayloadKind::User {
            username,
            status,
            password,
        } => {
            let mut fields = vec![ts, username.clone(), status.clone()];
            if let Some(password) = password {
                fields.push(password.clone());
            }
            fields
        }
        PayloadKind::ActiveUsers { users, status } => vec![
            ts,
            users.join(&LIST_SEPARATOR.to_string()),
            status.clone(),
        ],
        PayloadKind::History {
            sender,
            entries,
            status,
        } => vec![
            ts,
            sender.clone(),
            entries
                .iter()
                .map(|entry| STANDARD.encode(entry))
                .collect::<Vec<_>>()
                .join(&LIST_SEPARATOR.to_string()),
            status.clone(),
        ],
        PayloadKind::Encryption {
            sender,
            recipient,
            key,
            status,
        } => vec![
            ts,
            sender.clone(),
            recipient.clone(),
            key.clone(),
            status.clone(),
        ],
        PayloadKind::Channel(channel) => encode_channel_fields(ts, channel),
    };

    let mut frame = String::from(tag);
    for field in fields {
        frame.push(FIELD_SEPARATOR);
        frame.push_str(&field);
    }
    frame
}

fn encode_channel_fields(ts: String, channel: &ChannelPayload) -> Vec<String> {
    let or_absent = |value: Option<&str>| match value {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => ABSENT.to_string(),
    };

    let mut fields = vec![
        ts,
        channel.action().as_str().to_string(),
        channel.requester().to_string(),
        or_absent(channel.channel()),
        or_absent(channel.password()),
        channel
            .size()
            .map(|s| s.to_string())
            .unwrap_or_else(|| ABSENT.to_string()),
    ];

    if !channel.args().is_empty() {
        fields.push(encode_optional_args(channel.args()));
    }
    fields
}

fn encode_optional_args(args: &OptionalChannelArgs) -> String {
    let mut pairs: Vec<(&str, String)> = Vec::new();
    if let Some(status) = &args.status {
        pairs.push(("status", status.clone()));
    }
    if let Some(visibility) = &args.visibility {
        pairs.push(("visibility", visibility.as_str().to_string()));
    }
    if let Some(message) = &args.message {
        pairs.push(("message", message.clone()));
    }
    if let Some(reason) = &args.reason {
        pairs.push(("reason", reason.clone()));
    }
    if let Some(channels) = &args.channels {
        pairs.push(("channels", channels.join(&LIST_SEPARATOR.to_string())));
    }
    if let Some(users) = &args.users {
        pairs.push(("users", users.join(&LIST_SEPARATOR.to_string())));
    }
    if let Some(target) = &args.target {
        pairs.push(("target", target.clone()));
    }

    pairs
        .into_iter()
        .map(|(key, value)| {
            let escaped: String = form_urlencoded::byte_serialize(value.as_bytes()).collect();
            format!("{}={}", key, escaped)
        })
        .collect::<Vec<_>>()
        .join(&ARG_SEPARATOR.to_string())
}

fn strip_terminator(line: &str) -> &str {
    line.strip_suffix(LINE_TERMINATOR)
        .or_else(|| line.strip_suffix('\n'))
        .unwrap_or(line)
}

/// Splits `rest` into exactly `expected` fields; the last field keeps any separators
fn split_fields(
    rest: &str,
    expected: usize,
    message_type: MessageType,
) -> Result<Vec<&str>, DecodeError> {
    let fields: Vec<&str> = rest.splitn(expected, FIELD_SEPARATOR).collect();
    if fields.len() < expected {
        return Err(DecodeError::TooFewFields {
            message_type,
            expected,
            found: fields.len(),
        });
    }
    Ok(fields)
}

fn parse_timestamp(field: &str) -> Result<i64, DecodeError> {
    field
        .parse()
        .map_err(|_| DecodeError::Malformed(format!("invalid timestamp '{}'", field)))
}

fn checked_content(declared: &str, content: &str) -> Result<String, DecodeError> {
    let declared: usize = declared
        .parse()
        .map_err(|_| DecodeError::Malformed(format!("invalid content length '{}'", declared)))?;
    if declared != content.len() {
        return Err(DecodeError::LengthMismatch {
            declared,
            actual: content.len(),
        });
    }
    Ok(content.to_string())
}

fn split_list(field: &str) -> Vec<String> {
    if field.is_empty() {
        return Vec::new();
    }
    field.split(LIST_SEPARATOR).map(str::to_string).collect()
}

fn decode_history_entries(field: &str) -> Result<Vec<String>, DecodeError> {
    split_list(field)
        .into_iter()
        .map(|entry| {
            let raw = STANDARD.decode(entry.as_bytes()).map_err(|e| {
                DecodeError::Malformed(format!("invalid history entry encoding: {}", e))
            })?;
            String::from_utf8(raw)
                .map_err(|_| DecodeError::Malformed("history entry is not valid UTF-8".to_string()))
        })
        .collect()
}

/// Decodes a plain frame, with or without its terminator
pub fn decode(line: &str) -> Result<Payload, DecodeError> {
    let line = strip_terminator(line);
    let (tag, rest) = line.split_once(FIELD_SEPARATOR).unwrap_or((line, ""));
    let message_type: MessageType = tag
        .parse()
        .map_err(DecodeError::UnsupportedType)?;

    let (timestamp, kind) = match message_type {
        MessageType::Message => {
            let f = split_fields(rest, 4, message_type)?;
            let kind = PayloadKind::Message {
                sender: f[1].to_string(),
                content: checked_content(f[2], f[3])?,
            };
            (f[0], kind)
        }
        MessageType::Whisper => {
            let f = split_fields(rest, 5, message_type)?;
            let kind = PayloadKind::Whisper {
                sender: f[1].to_string(),
                recipient: f[2].to_string(),
                content: checked_content(f[3], f[4])?,
            };
            (f[0], kind)
        }
        MessageType::System => {
            let f = split_fields(rest, 3, message_type)?;
            let (content, status) =
                f[2].rsplit_once(FIELD_SEPARATOR)
                    .ok_or(DecodeError::TooFewFields {
                        message_type,
                        expected: 4,
                        found: 3,
                    })?;
            let kind = PayloadKind::System {
                content: checked_content(f[1], content)?,
                status: status.to_string(),
            };
            (f[0], kind)
        }
        MessageType::Error => {
            let f = split_fields(rest, 3, message_type)?;
            let kind = PayloadKind::Error {
                content: checked_content(f[1], f[2])?,
            };
            (f[0], kind)
        }
        MessageType::User => {
            let f: Vec<&str> = rest.splitn(4, FIELD_SEPARATOR).collect();
            if f.len() < 3 {
                return Err(DecodeError::TooFewFields {
                    message_type,
                    expected: 3,
                    found: f.len(),
                });
            }
            let kind = PayloadKind::User {
                username: f[1].to_string(),
                status: f[2].to_string(),
                password: f.get(3).map(|p| p.to_string()),
            };
            (f[0], kind)
        }
        MessageType::ActiveUsers => {
            let f = split_fields(rest, 3, message_type)?;
            let kind = PayloadKind::ActiveUsers {
                users: split_list(f[1]),
                status: f[2].to_string(),
            };
            (f[0], kind)
        }
        MessageType::History => {
            let f = split_fields(rest, 4, message_type)?;
            let kind = PayloadKind::History {
                sender: f[1].to_string(),
                entries: decode_history_entries(f[2])?,
                status: f[3].to_string(),
            };
            (f[0], kind)
        }
        MessageType::Encryption => {
            let f = split_fields(rest, 5, message_type)?;
            let kind = PayloadKind::Encryption {
                sender: f[1].to_string(),
                recipient: f[2].to_string(),
                key: f[3].to_string(),
                status: f[4].to_string(),
            };
            (f[0], kind)
        }
        MessageType::Channel => {
            let f: Vec<&str> = rest.split(FIELD_SEPARATOR).collect();
            if f.len() < 6 {
                return Err(DecodeError::TooFewFields {
                    message_type,
                    expected: 6,
                    found: f.len(),
                });
            }
            if f.len() > 7 {
                return Err(DecodeError::Malformed(format!(
                    "too many fields for CH: {}",
                    f.len()
                )));
            }
            (f[0], PayloadKind::Channel(decode_channel(&f[1..])?))
        }
    };

    Ok(Payload::with_timestamp(parse_timestamp(timestamp)?, kind))
}

fn decode_channel(f: &[&str]) -> Result<ChannelPayload, DecodeError> {
    let present = |value: &str| -> Option<String> {
        if value.is_empty() || value == ABSENT {
            None
        } else {
            Some(value.to_string())
        }
    };

    let action = f[0].parse().map_err(DecodeError::Malformed)?;
    let mut builder = ChannelPayload::builder()
        .action(action)
        .requester(f[1]);

    if let Some(channel) = present(f[2]) {
        builder = builder.channel(channel);
    }
    if let Some(password) = present(f[3]) {
        builder = builder.password(password);
    }
    if let Some(size) = present(f[4]) {
        let size = size
            .parse()
            .map_err(|_| DecodeError::Malformed(format!("invalid channel size '{}'", size)))?;
        builder = builder.size(size);
    }
    if let Some(args) = f.get(5) {
        builder = builder.args(decode_optional_args(args)?);
    }

    builder
        .build()
        .map_err(|e| DecodeError::Malformed(e.to_string()))
}

fn decode_optional_args(field: &str) -> Result<OptionalChannelArgs, DecodeError> {
    let mut args = OptionalChannelArgs::default();

    for segment in field.split(ARG_SEPARATOR).filter(|s| !s.is_empty()) {
        if !segment.contains('=') {
            return Err(DecodeError::Malformed(format!(
                "optional argument '{}' is not key=value",
                segment
            )));
        }
        let (key, value) = form_urlencoded::parse(segment.as_bytes())
            .next()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .ok_or_else(|| DecodeError::Malformed(format!("invalid argument '{}'", segment)))?;

        match key.as_str() {
            "status" => args.status = Some(value),
            "visibility" => args.visibility = Some(value.parse().map_err(DecodeError::Malformed)?),
            "message" => args.message = Some(value),
            "reason" => args.reason = Some(value),
            "channels" => args.channels = Some(split_list(&value)),
            "users" => args.users = Some(split_list(&value)),
            "target" => args.target = Some(value),
            other => {
                return Err(DecodeError::Malformed(format!(
                    "unknown optional argument '{}'",
                    other
                )))
            }
        }
    }

    Ok(args)
}
