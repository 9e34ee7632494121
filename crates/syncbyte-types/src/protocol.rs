//! Connector wire protocol.
//!
//! Connectors exchange newline-delimited JSON objects. Each object carries a
//! `type` discriminator and a body under the matching lower-case key:
//!
//! ```json
//! {"type":"RECORD","record":{"stream":"users","data":{"id":1},"emitted_at":0}}
//! {"type":"STATE","state":{"data":{"checkpoint":1}}}
//! ```
//!
//! Only [`ProtocolMessage::Record`] and [`ProtocolMessage::State`] take part in
//! replication. Everything else is informational.

use serde::{Deserialize, Serialize};

/// Discriminator carried in the `type` field of every protocol message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Record,
    State,
    Log,
    Trace,
    Spec,
    Catalog,
    ConnectionStatus,
}

impl MessageType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Record => "RECORD",
            Self::State => "STATE",
            Self::Log => "LOG",
            Self::Trace => "TRACE",
            Self::Spec => "SPEC",
            Self::Catalog => "CATALOG",
            Self::ConnectionStatus => "CONNECTION_STATUS",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single row emitted by a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMessage {
    /// Stream the record belongs to.
    pub stream: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Record payload. Never touched by the engine.
    pub data: serde_json::Value,
    /// Emission time in epoch milliseconds.
    pub emitted_at: i64,
}

/// Opaque connector checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub data: serde_json::Value,
}

/// Severity of a connector log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    Fatal,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogMessage {
    pub level: LogLevel,
    pub message: String,
}

/// A protocol message whose body has been checked against its `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireMessage", into = "WireMessage")]
pub enum ProtocolMessage {
    Record(RecordMessage),
    State(State),
    Log(LogMessage),
    Trace(serde_json::Value),
    Spec(serde_json::Value),
    Catalog(serde_json::Value),
    ConnectionStatus(serde_json::Value),
}

impl ProtocolMessage {
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Record(_) => MessageType::Record,
            Self::State(_) => MessageType::State,
            Self::Log(_) => MessageType::Log,
            Self::Trace(_) => MessageType::Trace,
            Self::Spec(_) => MessageType::Spec,
            Self::Catalog(_) => MessageType::Catalog,
            Self::ConnectionStatus(_) => MessageType::ConnectionStatus,
        }
    }

    /// Convenience constructor for a record message.
    #[must_use]
    pub fn record(stream: impl Into<String>, data: serde_json::Value, emitted_at: i64) -> Self {
        Self::Record(RecordMessage {
            stream: stream.into(),
            namespace: None,
            data,
            emitted_at,
        })
    }

    /// Convenience constructor for a state message.
    #[must_use]
    pub fn state(data: serde_json::Value) -> Self {
        Self::State(State { data })
    }

    /// Whether the message moves from source to destination during replication.
    #[must_use]
    pub fn is_replicated(&self) -> bool {
        matches!(self, Self::Record(_) | Self::State(_))
    }

    /// Serialize as a single protocol line (without the trailing newline).
    ///
    /// # Errors
    ///
    /// Returns an error if the record payload cannot be serialized.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// One line read from a connector's output.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine {
    Message(ProtocolMessage),
    /// Text that is not a protocol object (plain log output, blank lines).
    Unstructured(String),
}

/// A line claimed to be a protocol message but broke the contract.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolParseError {
    #[error("{0} message is missing its `{1}` body")]
    MissingBody(MessageType, &'static str),
    #[error("invalid protocol message of type {message_type}: {reason}")]
    Invalid { message_type: String, reason: String },
    #[error("output line is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
}

/// Parse one line of connector output.
///
/// Lines that are not JSON objects with a string `type` field are returned as
/// [`ParsedLine::Unstructured`]. Objects that do declare a `type` must match the
/// protocol exactly.
///
/// # Errors
///
/// Returns [`ProtocolParseError`] when a typed object is malformed, has an
/// unknown type, or lacks the body its type requires.
pub fn parse_line(line: &str) -> Result<ParsedLine, ProtocolParseError> {
    let trimmed = line.trim();
    let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) else {
        return Ok(ParsedLine::Unstructured(trimmed.to_string()));
    };
    let Some(message_type) = value.get("type").and_then(serde_json::Value::as_str) else {
        return Ok(ParsedLine::Unstructured(trimmed.to_string()));
    };
    let message_type = message_type.to_string();

    serde_json::from_value::<ProtocolMessage>(value)
        .map(ParsedLine::Message)
        .map_err(|e| ProtocolParseError::Invalid {
            message_type,
            reason: e.to_string(),
        })
}

#[derive(Clone, Serialize, Deserialize)]
struct WireMessage {
    #[serde(rename = "type")]
    message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    record: Option<RecordMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    state: Option<State>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    log: Option<LogMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    trace: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    spec: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    catalog: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    connection_status: Option<serde_json::Value>,
}

impl WireMessage {
    fn empty(message_type: MessageType) -> Self {
        Self {
            message_type,
            record: None,
            state: None,
            log: None,
            trace: None,
            spec: None,
            catalog: None,
            connection_status: None,
        }
    }
}

impl TryFrom<WireMessage> for ProtocolMessage {
    type Error = ProtocolParseError;

    fn try_from(wire: WireMessage) -> Result<Self, Self::Error> {
        let message_type = wire.message_type;
        let missing = |field: &'static str| ProtocolParseError::MissingBody(message_type, field);
        match wire.message_type {
            MessageType::Record => wire.record.map(Self::Record).ok_or_else(|| missing("record")),
            MessageType::State => wire.state.map(Self::State).ok_or_else(|| missing("state")),
            MessageType::Log => wire.log.map(Self::Log).ok_or_else(|| missing("log")),
            MessageType::Trace => wire.trace.map(Self::Trace).ok_or_else(|| missing("trace")),
            MessageType::Spec => wire.spec.map(Self::Spec).ok_or_else(|| missing("spec")),
            MessageType::Catalog => wire
                .catalog
                .map(Self::Catalog)
                .ok_or_else(|| missing("catalog")),
            MessageType::ConnectionStatus => wire
                .connection_status
                .map(Self::ConnectionStatus)
                .ok_or_else(|| missing("connection_status")),
        }
    }
}

impl From<ProtocolMessage> for WireMessage {
    fn from(message: ProtocolMessage) -> Self {
        let mut wire = Self::empty(message.message_type());
        match message {
            ProtocolMessage::Record(r) => wire.record = Some(r),
            ProtocolMessage::State(s) => wire.state = Some(s),
            ProtocolMessage::Log(l) => wire.log = Some(l),
            ProtocolMessage::Trace(t) => wire.trace = Some(t),
            ProtocolMessage::Spec(s) => wire.spec = Some(s),
            ProtocolMessage::Catalog(c) => wire.catalog = Some(c),
            ProtocolMessage::ConnectionStatus(c) => wire.connection_status = Some(c),
        }
        wire
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_wire_format() {
        let msg = ProtocolMessage::record("users", json!({"id": 1}), 42);
        let value: serde_json::Value = serde_json::from_str(&msg.to_line().unwrap()).unwrap();
        assert_eq!(value["type"], "RECORD");
        assert_eq!(value["record"]["stream"], "users");
        assert_eq!(value["record"]["data"]["id"], 1);
        assert!(value.get("state").is_none());
        assert!(value["record"].get("namespace").is_none());
    }

    #[test]
    fn parse_state_line() {
        let parsed = parse_line(r#"{"type":"STATE","state":{"data":{"checkpoint":1}}}"#).unwrap();
        assert_eq!(
            parsed,
            ParsedLine::Message(ProtocolMessage::state(json!({"checkpoint": 1})))
        );
    }

    #[test]
    fn parse_log_line() {
        let parsed =
            parse_line(r#"{"type":"LOG","log":{"level":"WARN","message":"slow query"}}"#).unwrap();
        let ParsedLine::Message(ProtocolMessage::Log(log)) = parsed else {
            panic!("expected log message, got {parsed:?}");
        };
        assert_eq!(log.level, LogLevel::Warn);
        assert_eq!(log.message, "slow query");
    }

    #[test]
    fn plain_text_is_unstructured() {
        let parsed = parse_line("Starting connector...\n").unwrap();
        assert_eq!(parsed, ParsedLine::Unstructured("Starting connector...".into()));
    }

    #[test]
    fn json_without_type_is_unstructured() {
        let parsed = parse_line(r#"{"level":"info","msg":"hello"}"#).unwrap();
        assert!(matches!(parsed, ParsedLine::Unstructured(_)));
    }

    #[test]
    fn record_without_body_is_error() {
        let err = parse_line(r#"{"type":"RECORD","state":{"data":{}}}"#).unwrap_err();
        let ProtocolParseError::Invalid { message_type, reason } = err else {
            panic!("expected invalid message error");
        };
        assert_eq!(message_type, "RECORD");
        assert!(reason.contains("record"), "got: {reason}");
    }

    #[test]
    fn unknown_type_is_error() {
        let err = parse_line(r#"{"type":"BOGUS"}"#).unwrap_err();
        assert!(err.to_string().contains("BOGUS"));
    }

    #[test]
    fn trace_is_not_replicated() {
        let parsed = parse_line(r#"{"type":"TRACE","trace":{"type":"ERROR"}}"#).unwrap();
        let ParsedLine::Message(msg) = parsed else {
            panic!("expected message");
        };
        assert_eq!(msg.message_type(), MessageType::Trace);
        assert!(!msg.is_replicated());
    }
}
