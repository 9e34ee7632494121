//! Stream-name rewriting applied between source and destination.

use std::borrow::Cow;

use syncbyte_types::catalog::ConfiguredCatalog;
use syncbyte_types::protocol::ProtocolMessage;

/// Prefixes stream names with a sync-level namespace prefix.
///
/// An empty or absent prefix makes the mapper the identity. Only record
/// messages are rewritten; their payload is never touched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespacingMapper {
    prefix: Option<String>,
}

impl NamespacingMapper {
    #[must_use]
    pub fn new(prefix: Option<String>) -> Self {
        Self {
            prefix: prefix.filter(|p| !p.is_empty()),
        }
    }

    #[must_use]
    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// Destination-side name for a source stream.
    #[must_use]
    pub fn map_stream_name<'a>(&self, stream: &'a str) -> Cow<'a, str> {
        match &self.prefix {
            Some(prefix) => Cow::Owned(format!("{prefix}{stream}")),
            None => Cow::Borrowed(stream),
        }
    }

    /// Rewrite the catalog the destination is configured with.
    #[must_use]
    pub fn map_catalog(&self, catalog: &ConfiguredCatalog) -> ConfiguredCatalog {
        let mut mapped = catalog.clone();
        if self.prefix.is_some() {
            for configured in &mut mapped.streams {
                configured.stream.name = self.map_stream_name(&configured.stream.name).into_owned();
            }
        }
        mapped
    }

    /// Rewrite one outgoing message. Borrows the input when nothing changes.
    #[must_use]
    pub fn map_message<'a>(&self, message: &'a ProtocolMessage) -> Cow<'a, ProtocolMessage> {
        match (message, &self.prefix) {
            (ProtocolMessage::Record(record), Some(_)) => {
                let mut record = record.clone();
                record.stream = self.map_stream_name(&record.stream).into_owned();
                Cow::Owned(ProtocolMessage::Record(record))
            }
            _ => Cow::Borrowed(message),
        }
    }
}
