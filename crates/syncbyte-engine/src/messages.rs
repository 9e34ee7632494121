//! Reading protocol messages from connector output.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use syncbyte_types::job::ConnectorRole;
use syncbyte_types::protocol::{parse_line, LogLevel, ParsedLine, ProtocolMessage, ProtocolParseError};

#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("failed reading {role} output: {source}")]
    Io {
        role: ConnectorRole,
        source: std::io::Error,
    },
    #[error(transparent)]
    Protocol(#[from] ProtocolParseError),
}

/// Line-oriented reader over a connector's stdout.
///
/// Yields only RECORD and STATE messages. Log and trace messages, and any
/// output that is not a protocol object, are re-emitted through `tracing`
/// and skipped.
pub struct MessageStream<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
    role: ConnectorRole,
}

impl<R: AsyncRead + Unpin> MessageStream<R> {
    pub fn new(reader: R, role: ConnectorRole) -> Self {
        Self {
            reader: BufReader::new(reader),
            buf: Vec::new(),
            role,
        }
    }

    /// Next replicated message, or `None` once the output is closed.
    ///
    /// # Errors
    ///
    /// Returns [`ReadError::Io`] if reading fails and [`ReadError::Protocol`]
    /// if a line is not UTF-8 or claims to be a protocol message but is
    /// malformed.
    pub async fn next_message(&mut self) -> Result<Option<ProtocolMessage>, ReadError> {
        loop {
            self.buf.clear();
            let read = self
                .reader
                .read_until(b'\n', &mut self.buf)
                .await
                .map_err(|source| ReadError::Io {
                    role: self.role,
                    source,
                })?;
            if read == 0 {
                return Ok(None);
            }
            let line = std::str::from_utf8(&self.buf).map_err(ProtocolParseError::from)?;

            match parse_line(line)? {
                ParsedLine::Message(message) if message.is_replicated() => return Ok(Some(message)),
                ParsedLine::Message(ProtocolMessage::Log(log)) => {
                    emit_connector_log(self.role, log.level, &log.message);
                }
                ParsedLine::Message(ProtocolMessage::Trace(trace)) => {
                    tracing::info!(role = %self.role, trace = %trace, "Connector trace");
                }
                ParsedLine::Message(other) => {
                    tracing::debug!(
                        role = %self.role,
                        message_type = %other.message_type(),
                        "Dropping non-replicated message"
                    );
                }
                ParsedLine::Unstructured(text) if text.is_empty() => {}
                ParsedLine::Unstructured(text) => {
                    tracing::info!(role = %self.role, "{}", text);
                }
            }
        }
    }
}

fn emit_connector_log(role: ConnectorRole, level: LogLevel, message: &str) {
    match level {
        LogLevel::Fatal | LogLevel::Error => tracing::error!(role = %role, "{}", message),
        LogLevel::Warn => tracing::warn!(role = %role, "{}", message),
        LogLevel::Info => tracing::info!(role = %role, "{}", message),
        LogLevel::Debug => tracing::debug!(role = %role, "{}", message),
        LogLevel::Trace => tracing::trace!(role = %role, "{}", message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stream(output: &'static str) -> MessageStream<&'static [u8]> {
        MessageStream::new(output.as_bytes(), ConnectorRole::Source)
    }

    #[tokio::test]
    async fn yields_only_replicated_messages_in_order() {
        let mut messages = stream(concat!(
            "starting up\n",
            r#"{"type":"LOG","log":{"level":"INFO","message":"connected"}}"#, "\n",
            r#"{"type":"RECORD","record":{"stream":"users","data":{"id":1},"emitted_at":0}}"#, "\n",
            "\n",
            r#"{"type":"SPEC","spec":{}}"#, "\n",
            r#"{"type":"STATE","state":{"data":{"checkpoint":1}}}"#, "\n",
        ));

        let first = messages.next_message().await.unwrap().unwrap();
        assert_eq!(first, ProtocolMessage::record("users", json!({"id": 1}), 0));
        let second = messages.next_message().await.unwrap().unwrap();
        assert_eq!(second, ProtocolMessage::state(json!({"checkpoint": 1})));
        assert!(messages.next_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn malformed_record_is_protocol_error() {
        let mut messages = stream("{\"type\":\"RECORD\",\"record\":{\"data\":{}}}\n");
        let err = messages.next_message().await.unwrap_err();
        assert!(matches!(err, ReadError::Protocol(_)));
    }

    #[tokio::test]
    async fn invalid_utf8_line_is_protocol_error() {
        let output: &[u8] =
            b"{\"type\":\"RECORD\",\"record\":{\"stream\":\"u\xff\",\"data\":{},\"emitted_at\":0}}\n";
        let mut messages = MessageStream::new(output, ConnectorRole::Source);
        let err = messages.next_message().await.unwrap_err();
        assert!(matches!(
            err,
            ReadError::Protocol(ProtocolParseError::InvalidUtf8(_))
        ));
    }

    #[tokio::test]
    async fn last_line_without_newline_is_read() {
        let mut messages = stream(r#"{"type":"STATE","state":{"data":{"checkpoint":7}}}"#);
        let state = messages.next_message().await.unwrap().unwrap();
        assert_eq!(state, ProtocolMessage::state(json!({"checkpoint": 7})));
        assert!(messages.next_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_output_ends_immediately() {
        let mut messages = stream("");
        assert!(messages.next_message().await.unwrap().is_none());
    }
}
