use std::hash::{Hash, Hasher};

use bytes::{BufMut, BytesMut};

/// A single server-sent event.
///
/// Two events are equal when their id and name match, the payload is not compared.
#[derive(Debug, Clone, Default)]
pub struct SseEvent {
    pub id: Option<String>,
    /// Event type, `message` on the client side when unset.
    pub name: Option<String>,
    /// Comment text, one comment line per `\n` separated line.
    pub comment: Option<String>,
    /// Payload, one `data:` line per `\n` separated line.
    pub data: String,
    /// Reconnection delay in milliseconds.
    pub retry: Option<u64>,
}

impl SseEvent {
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }

    /// A comment-only event, commonly used as a keep-alive.
    pub fn comment(comment: impl Into<String>) -> Self {
        Self {
            comment: Some(comment.into()),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_retry(mut self, retry: u64) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Append the wire form of this event to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        if let Some(name) = &self.name {
            field(dst, "event", name);
        }

        if let Some(id) = &self.id {
            field(dst, "id", id);
        }

        if let Some(comment) = &self.comment {
            for line in comment.split('\n') {
                field(dst, "", line);
            }
        }

        if let Some(retry) = self.retry {
            field(dst, "retry", &retry.to_string());
        }

        if !self.data.is_empty() {
            for line in self.data.split('\n') {
                field(dst, "data", line);
            }
        }

        dst.put_u8(b'\n');
    }
}

fn field(dst: &mut BytesMut, name: &str, value: &str) {
    dst.put(name.as_bytes());
    dst.put(&b": "[..]);
    dst.put(value.as_bytes());
    dst.put_u8(b'\n');
}

impl PartialEq for SseEvent {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.name == other.name
    }
}

impl Eq for SseEvent {}

impl Hash for SseEvent {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.name.hash(state);
    }
}
