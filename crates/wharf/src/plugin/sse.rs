use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
};

use anyhow::{bail, Context as _, Error};
use bytes::{Bytes, BytesMut};
use tracing::{event, Level};
use wharf_proto::{
    http::encode_response,
    sse::{SseCodec, SseEvent, CONTENT_TYPE},
    HttpRequest, HttpResponse,
};

use crate::{
    handler::Produced,
    path::PathTemplate,
    plugin::{PluginContext, ServicePlugin},
    pool::TaskPool,
    ChannelAction, Inbound, IoHandler, Notifier, Outbound, SessionContext, WriteError,
};

/// Limit for the unused decode side of an event stream session.
const INPUT_CHUNK_LIMIT: usize = 64 * 1024;

/// Feeds one event stream, called on the task pool once per subscribing client.
///
/// The stream ends when the sink is dropped.
pub trait SseSubscriber: Send + Sync {
    fn subscribe(&self, request: &HttpRequest, sink: EventSink);
}

impl<F> SseSubscriber for F
where
    F: Fn(&HttpRequest, EventSink) + Send + Sync,
{
    fn subscribe(&self, request: &HttpRequest, sink: EventSink) {
        self(request, sink)
    }
}

/// Serves event streams on registered paths.
pub struct SsePlugin {
    streams: Vec<(PathTemplate, Arc<dyn SseSubscriber>)>,
    pool: Option<Arc<TaskPool>>,
}

impl SsePlugin {
    pub fn new() -> Self {
        Self {
            streams: Vec::new(),
            pool: None,
        }
    }

    pub fn stream<S>(mut self, template: &str, subscriber: S) -> Self
    where
        S: SseSubscriber + 'static,
    {
        self.streams
            .push((PathTemplate::new(template), Arc::new(subscriber)));
        self
    }
}

impl Default for SsePlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl ServicePlugin for SsePlugin {
    fn name(&self) -> &str {
        "sse"
    }

    fn priority(&self) -> i32 {
        200
    }

    fn init_plugin(&mut self, cx: &PluginContext) -> Result<(), Error> {
        self.pool = Some(cx.pool().clone());
        Ok(())
    }

    fn determine_io_handler(
        &self,
        request: &HttpRequest,
        _cx: &mut SessionContext,
    ) -> Result<Option<Box<dyn IoHandler>>, Error> {
        if request.method() != "GET" {
            return Ok(None);
        }

        let Some((_, subscriber)) = self
            .streams
            .iter()
            .find(|(template, _)| template.matches(request.path()))
        else {
            return Ok(None);
        };

        let pool = self.pool.as_ref().context("sse plugin not initialized")?;
        let handler = SseHandler::new(subscriber.clone(), pool.clone());
        Ok(Some(Box::new(handler)))
    }
}

#[derive(Default)]
struct SinkState {
    queue: VecDeque<SseEvent>,
    finished: bool,
    closed: bool,
}

struct SinkShared {
    state: Mutex<SinkState>,
}

impl SinkShared {
    fn lock(&self) -> MutexGuard<SinkState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Sends events to one subscribed client from any thread.
///
/// Dropping the sink ends the stream once queued events are written.
pub struct EventSink {
    shared: Arc<SinkShared>,
    notifier: Notifier,
    limit: usize,
}

impl EventSink {
    /// Queue an event for the client.
    ///
    /// Fails with `WriteError::Closed` once the client is gone, the subscriber should stop then.
    pub fn send(&self, event: SseEvent) -> Result<(), WriteError> {
        {
            let mut state = self.shared.lock();
            if state.closed {
                return Err(WriteError::Closed);
            }
            if state.queue.len() >= self.limit {
                return Err(WriteError::QueueFull);
            }
            state.queue.push_back(event);
        }

        self.notifier.notify();
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// End the stream.
    pub fn finish(self) {}
}

impl Drop for EventSink {
    fn drop(&mut self) {
        let closed = {
            let mut state = self.shared.lock();
            state.finished = true;
            state.closed
        };

        if !closed {
            self.notifier.notify();
        }
    }
}

struct SseHandler {
    subscriber: Arc<dyn SseSubscriber>,
    pool: Arc<TaskPool>,
    shared: Arc<SinkShared>,
    head: Option<Bytes>,
    started: bool,
    ending: bool,
}

impl SseHandler {
    fn new(subscriber: Arc<dyn SseSubscriber>, pool: Arc<TaskPool>) -> Self {
        Self {
            subscriber,
            pool,
            shared: Arc::new(SinkShared {
                state: Mutex::new(SinkState::default()),
            }),
            head: None,
            started: false,
            ending: false,
        }
    }

    fn check_finished(&mut self) -> ChannelAction {
        if !self.started || self.head.is_some() || self.ending {
            return ChannelAction::KeepOpen;
        }

        let state = self.shared.lock();
        if state.finished && state.queue.is_empty() {
            self.ending = true;
            return ChannelAction::CloseOutput;
        }

        ChannelAction::KeepOpen
    }
}

impl IoHandler for SseHandler {
    fn consume(
        &mut self,
        cx: &mut SessionContext,
        message: Inbound,
    ) -> Result<ChannelAction, Error> {
        let Inbound::Http(request) = message else {
            bail!("event stream only takes the subscribing request");
        };
        if self.started {
            return Ok(ChannelAction::KeepOpen);
        }
        self.started = true;

        let response = HttpResponse::new(200)
            .with_header("Content-Type", CONTENT_TYPE)
            .with_header("Cache-Control", "no-cache")
            .with_header("Transfer-Encoding", "chunked");
        let mut head = BytesMut::new();
        encode_response(&response, &mut head)?;
        self.head = Some(head.freeze());

        cx.switch_codec(Box::new(SseCodec::chunked(INPUT_CHUNK_LIMIT)));

        let sink = EventSink {
            shared: self.shared.clone(),
            notifier: cx.notifier(),
            limit: cx.write_queue_limit(),
        };
        let subscriber = self.subscriber.clone();

        event!(Level::DEBUG, path = request.path(), "event stream subscribed");
        self.pool
            .spawn(move || subscriber.subscribe(&request, sink))
            .context("failed to start event stream subscriber")?;

        Ok(ChannelAction::KeepOpen)
    }

    fn produce(&mut self, _cx: &mut SessionContext) -> Result<Option<Produced>, Error> {
        if let Some(head) = self.head.take() {
            return Ok(Some(Produced::new(Outbound::Raw(head))));
        }

        let event = self.shared.lock().queue.pop_front();
        Ok(event.map(|event| Produced::new(Outbound::Sse(event))))
    }

    fn write_successful(&mut self, _cx: &mut SessionContext, _written: usize) -> ChannelAction {
        self.check_finished()
    }

    fn handle_closed_input(&mut self, _cx: &mut SessionContext) -> ChannelAction {
        ChannelAction::CloseAll
    }

    fn on_session_close(&mut self, _cx: &mut SessionContext) {
        let mut state = self.shared.lock();
        state.closed = true;
        state.queue.clear();
    }

    fn on_notify(&mut self, _cx: &mut SessionContext) -> ChannelAction {
        self.check_finished()
    }
}
