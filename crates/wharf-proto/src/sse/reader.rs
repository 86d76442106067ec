use std::{
    collections::{HashSet, VecDeque},
    time::Duration,
};

use bytes::BytesMut;
use tracing::{event, Level};

use crate::{
    sse::{SseEvent, SseParser},
    DecodeError, DecodeStatus,
};

/// Events remembered for dedupe unless configured otherwise.
pub const DEFAULT_DEDUPE_WINDOW: usize = 1024;

/// Client side view of an event stream across reconnects.
///
/// Drops events repeated by the server after a reconnect, and keeps what's needed to
/// reconnect: the last event id and the retry delay. Only the most recent id-bearing events
/// are remembered, the oldest is forgotten once the window is full.
pub struct SseStreamReader {
    parser: SseParser,
    seen: HashSet<SseEvent>,
    order: VecDeque<SseEvent>,
    window: usize,
    last_event_id: Option<String>,
    retry: Option<Duration>,
    default_retry: Duration,
}

impl SseStreamReader {
    pub fn new(parser: SseParser, default_retry: Duration) -> Self {
        Self {
            parser,
            seen: HashSet::new(),
            order: VecDeque::new(),
            window: DEFAULT_DEDUPE_WINDOW,
            last_event_id: None,
            retry: None,
            default_retry,
        }
    }

    /// Remember at most `window` events for dedupe.
    pub fn dedupe_window(mut self, window: usize) -> Self {
        self.window = window.max(1);
        self
    }

    /// Swap in a fresh parser for a new connection, keeping dedupe and reconnect state.
    pub fn reconnect(&mut self, parser: SseParser) {
        self.parser = parser;
    }

    /// Decode the next event that wasn't delivered before.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<DecodeStatus<SseEvent>, DecodeError> {
        loop {
            let event = match self.parser.decode(buf)? {
                DecodeStatus::FullyRead(event) => event,
                status => return Ok(status),
            };

            if let Some(event) = self.accept(event) {
                return Ok(DecodeStatus::FullyRead(event));
            }
        }
    }

    /// Flush the final event at end of stream, unless it's a repeat.
    pub fn finish(&mut self) -> Result<Option<SseEvent>, DecodeError> {
        Ok(self.parser.finish()?.and_then(|event| self.accept(event)))
    }

    fn accept(&mut self, event: SseEvent) -> Option<SseEvent> {
        if let Some(retry) = event.retry {
            self.retry = Some(Duration::from_millis(retry));
        }

        if let Some(id) = &event.id {
            self.last_event_id = Some(id.clone());

            if self.seen.contains(&event) {
                event!(Level::DEBUG, id, "dropping repeated event");
                return None;
            }
            self.remember(event.clone());
        }

        Some(event)
    }

    fn remember(&mut self, event: SseEvent) {
        if self.order.len() >= self.window {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }

        self.seen.insert(event.clone());
        self.order.push_back(event);
    }

    /// Number of events currently remembered for dedupe.
    pub fn remembered(&self) -> usize {
        self.order.len()
    }

    /// Value for `Last-Event-ID` when reconnecting.
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    /// Delay before reconnecting, the server's `retry:` if it sent one.
    pub fn retry_delay(&self) -> Duration {
        self.retry.unwrap_or(self.default_retry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_reconnect_state() {
        let mut reader = SseStreamReader::new(SseParser::new(), Duration::from_secs(3));
        assert_eq!(reader.retry_delay(), Duration::from_secs(3));

        let mut buf = BytesMut::from(&b"id: 4\nretry: 500\ndata: x\n\n"[..]);
        assert!(matches!(
            reader.decode(&mut buf).unwrap(),
            DecodeStatus::FullyRead(_)
        ));

        assert_eq!(reader.last_event_id(), Some("4"));
        assert_eq!(reader.retry_delay(), Duration::from_millis(500));
    }
}
