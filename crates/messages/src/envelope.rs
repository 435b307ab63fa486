use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use sagastore_core::{MessageId, MessageKind};

/// Well-known header names.
pub mod headers {
    /// Address replies should be sent to; recorded as the saga's originator.
    pub const REPLY_TO_ADDRESS: &str = "ReplyToAddress";
}

/// Envelope for an incoming message, as handed over by the messaging layer.
///
/// Notes:
/// - `kind` drives lookup-strategy selection (correlation mapping vs finder).
/// - `body` is the message payload; correlation values are read from it by
///   dotted property path.
/// - `headers` carry transport metadata (reply-to address, etc.).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    message_id: MessageId,
    kind: MessageKind,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    body: JsonValue,
}

impl MessageEnvelope {
    pub fn new(kind: impl Into<MessageKind>, body: JsonValue) -> Self {
        Self {
            message_id: MessageId::new(),
            kind: kind.into(),
            headers: BTreeMap::new(),
            body,
        }
    }

    pub fn with_id(mut self, message_id: MessageId) -> Self {
        self.message_id = message_id;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    pub fn kind(&self) -> &MessageKind {
        &self.kind
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn reply_to(&self) -> Option<&str> {
        self.header(headers::REPLY_TO_ADDRESS)
    }

    pub fn body(&self) -> &JsonValue {
        &self.body
    }

    /// Look up a body property by dotted path (`"order.id"`).
    pub fn property(&self, path: &str) -> Option<&JsonValue> {
        path.split('.').try_fold(&self.body, |value, segment| value.get(segment))
    }
}
