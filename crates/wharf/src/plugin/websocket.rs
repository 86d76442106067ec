use std::{
    collections::VecDeque,
    net::SocketAddr,
    sync::{mpsc, Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use anyhow::{bail, Error};
use bytes::BytesMut;
use tracing::{event, Level};
use uuid::Uuid;
use wharf_proto::{
    http::encode_response,
    websocket::{
        CloseFrame, Handshake, HandshakeOutcome, Message, PerMessageDeflate, Role,
        WebSocketCodec, CLOSE_INTERNAL_ERROR, CLOSE_INVALID_PAYLOAD,
        CLOSE_PROTOCOL_ERROR, CLOSE_TOO_BIG,
    },
    DecodeError, HttpRequest,
};

use crate::{
    handler::Produced,
    path::{PathParams, PathTemplate},
    plugin::ServicePlugin,
    session::Attributes,
    ChannelAction, Completion, Inbound, IoHandler, Notifier, Outbound, SessionContext,
    SessionError, WriteError,
};

const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Application side of a WebSocket connection, one instance per connection.
pub trait WebSocketEndpoint: Send {
    fn on_open(&mut self, _session: &mut WsSession) -> Result<(), Error> {
        Ok(())
    }

    /// A text or binary message arrived.
    fn on_message(&mut self, session: &mut WsSession, message: Message) -> Result<(), Error>;

    /// The connection closed, `frame` is what the peer sent if it closed cleanly.
    fn on_close(&mut self, _session: &mut WsSession, _frame: Option<&CloseFrame>) {}

    fn on_error(&mut self, _session: &mut WsSession, error: &Error) {
        event!(Level::WARN, ?error, "websocket endpoint error");
    }
}

type EndpointFactory = Box<dyn Fn() -> Box<dyn WebSocketEndpoint> + Send + Sync>;

struct Registration {
    template: PathTemplate,
    handshake: Arc<Handshake>,
    factory: EndpointFactory,
}

/// Upgrades requests on registered paths to WebSocket connections.
pub struct WebSocketPlugin {
    endpoints: Vec<Registration>,
    max_message_size: usize,
}

impl WebSocketPlugin {
    pub fn new() -> Self {
        Self {
            endpoints: Vec::new(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Serve `template` with endpoints from `factory`, offering permessage-deflate.
    pub fn endpoint<F, E>(self, template: &str, factory: F) -> Self
    where
        F: Fn() -> E + Send + Sync + 'static,
        E: WebSocketEndpoint + 'static,
    {
        let deflate = PerMessageDeflate::new().max_message_size(self.max_message_size);
        let handshake = Handshake::new().extension(Arc::new(deflate));
        self.endpoint_with(template, handshake, factory)
    }

    /// Serve `template` with a custom handshake, for sub-protocols or origin checks.
    pub fn endpoint_with<F, E>(mut self, template: &str, handshake: Handshake, factory: F) -> Self
    where
        F: Fn() -> E + Send + Sync + 'static,
        E: WebSocketEndpoint + 'static,
    {
        self.endpoints.push(Registration {
            template: PathTemplate::new(template),
            handshake: Arc::new(handshake),
            factory: Box::new(move || Box::new(factory())),
        });
        self
    }
}

impl Default for WebSocketPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl ServicePlugin for WebSocketPlugin {
    fn name(&self) -> &str {
        "websocket"
    }

    fn priority(&self) -> i32 {
        100
    }

    fn determine_io_handler(
        &self,
        request: &HttpRequest,
        cx: &mut SessionContext,
    ) -> Result<Option<Box<dyn IoHandler>>, Error> {
        if !Handshake::is_upgrade_request(request) {
            return Ok(None);
        }

        let found = self.endpoints.iter().find_map(|registration| {
            registration
                .template
                .resolve(request.path())
                .ok()
                .map(|params| (registration, params))
        });
        let Some((registration, params)) = found else {
            return Ok(None);
        };

        let handler = WebSocketHandler {
            endpoint: (registration.factory)(),
            handshake: registration.handshake.clone(),
            max_message_size: self.max_message_size,
            state: State::Handshake,
            conn: Connection {
                params,
                protocol: None,
                outbox: VecDeque::new(),
                remote: WsRemote::new(cx.notifier()),
                close_sent: false,
            },
            remote_pending: VecDeque::new(),
            unacked: 0,
            close_received: false,
            input_failed: false,
            closed_notified: false,
        };
        Ok(Some(Box::new(handler)))
    }
}

/// Per-connection state endpoints reach through `WsSession`.
struct Connection {
    params: PathParams,
    protocol: Option<String>,
    outbox: VecDeque<Produced>,
    remote: WsRemote,
    close_sent: bool,
}

/// The endpoint's view of its connection during a callback.
pub struct WsSession<'a> {
    cx: &'a mut SessionContext,
    conn: &'a mut Connection,
}

impl<'a> WsSession<'a> {
    fn new(cx: &'a mut SessionContext, conn: &'a mut Connection) -> Self {
        Self { cx, conn }
    }

    pub fn id(&self) -> Uuid {
        self.cx.id()
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.cx.peer_addr()
    }

    /// Queue a message, written after the current callback returns.
    pub fn send(&mut self, message: Message) -> Result<(), WriteError> {
        self.enqueue(Produced::new(Outbound::WebSocket(message)))
    }

    /// Queue a message, `callback` fires once it's written or failed.
    pub fn send_with<F>(&mut self, message: Message, callback: F) -> Result<(), WriteError>
    where
        F: FnOnce(Result<usize, WriteError>) + Send + 'static,
    {
        let produced =
            Produced::new(Outbound::WebSocket(message)).with_completion(Completion::new(callback));
        self.enqueue(produced)
    }

    /// Start the closing handshake.
    pub fn close(&mut self, code: u16, reason: &str) {
        if self.conn.close_sent {
            return;
        }

        let message = Message::close(code, reason);
        self.conn
            .outbox
            .push_back(Produced::new(Outbound::WebSocket(message)));
        self.conn.close_sent = true;
    }

    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.conn.params.get(name)
    }

    /// Negotiated sub-protocol.
    pub fn protocol(&self) -> Option<&str> {
        self.conn.protocol.as_deref()
    }

    pub fn attributes(&self) -> &Attributes {
        self.cx.attributes()
    }

    pub fn attributes_mut(&mut self) -> &mut Attributes {
        self.cx.attributes_mut()
    }

    /// Handle for sending on this connection from other threads.
    pub fn remote(&self) -> WsRemote {
        self.conn.remote.clone()
    }

    fn enqueue(&mut self, produced: Produced) -> Result<(), WriteError> {
        if self.conn.close_sent {
            if let Some(completion) = produced.completion {
                completion.fail(WriteError::Closed);
            }
            return Err(WriteError::Closed);
        }

        if self.conn.outbox.len() >= self.cx.write_queue_limit() {
            if let Some(completion) = produced.completion {
                completion.fail(WriteError::QueueFull);
            }
            return Err(WriteError::QueueFull);
        }

        self.conn.outbox.push_back(produced);
        Ok(())
    }
}

type CompletionSlot = Arc<Mutex<Option<Completion>>>;

struct RemoteSend {
    message: Message,
    deadline: Option<Instant>,
    slot: Option<CompletionSlot>,
}

#[derive(Default)]
struct RemoteState {
    queue: VecDeque<RemoteSend>,
    closed: bool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Fire the completion in `slot` if nobody else did yet.
fn fire(slot: &CompletionSlot, result: Result<usize, WriteError>) {
    let completion = lock(slot).take();
    if let Some(completion) = completion {
        completion.complete(result);
    }
}

/// Sends messages on a WebSocket connection from any thread.
#[derive(Clone)]
pub struct WsRemote {
    state: Arc<Mutex<RemoteState>>,
    notifier: Notifier,
}

impl WsRemote {
    fn new(notifier: Notifier) -> Self {
        Self {
            state: Arc::new(Mutex::new(RemoteState::default())),
            notifier,
        }
    }

    /// Queue a message without waiting for it to be written.
    pub fn send(&self, message: Message) -> Result<(), WriteError> {
        self.push(RemoteSend {
            message,
            deadline: None,
            slot: None,
        })
    }

    /// Send a message and wait until it's written, failing with `WriteError::TimedOut` if
    /// that doesn't happen within `timeout`.
    ///
    /// Blocks the calling thread, never call this from a handler callback.
    pub fn send_timeout(&self, message: Message, timeout: Duration) -> Result<usize, WriteError> {
        let (sender, receiver) = mpsc::channel();
        let slot: CompletionSlot = Arc::new(Mutex::new(Some(Completion::new(move |result| {
            let _ = sender.send(result);
        }))));

        self.push(RemoteSend {
            message,
            deadline: Some(Instant::now() + timeout),
            slot: Some(slot.clone()),
        })?;

        match receiver.recv_timeout(timeout) {
            Ok(result) => result,
            Err(_) => {
                // The write may have finished meanwhile, whichever fires first wins
                fire(&slot, Err(WriteError::TimedOut));
                receiver.try_recv().unwrap_or(Err(WriteError::TimedOut))
            }
        }
    }

    /// Ask the connection to start its closing handshake.
    pub fn close(&self, code: u16, reason: &str) -> Result<(), WriteError> {
        self.push(RemoteSend {
            message: Message::close(code, reason),
            deadline: None,
            slot: None,
        })
    }

    /// Whether the connection is gone.
    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    fn push(&self, send: RemoteSend) -> Result<(), WriteError> {
        {
            let mut state = lock(&self.state);
            if state.closed {
                if let Some(slot) = &send.slot {
                    fire(slot, Err(WriteError::Closed));
                }
                return Err(WriteError::Closed);
            }
            state.queue.push_back(send);
        }

        self.notifier.notify();
        Ok(())
    }

    fn take_queued(&self) -> Vec<RemoteSend> {
        lock(&self.state).queue.drain(..).collect()
    }

    fn shutdown(&self) {
        let queued = {
            let mut state = lock(&self.state);
            state.closed = true;
            state.queue.drain(..).collect::<Vec<_>>()
        };

        for send in queued {
            if let Some(slot) = &send.slot {
                fire(slot, Err(WriteError::Closed));
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Handshake,
    Rejected,
    Open,
}

struct WebSocketHandler {
    endpoint: Box<dyn WebSocketEndpoint>,
    handshake: Arc<Handshake>,
    max_message_size: usize,
    state: State,
    conn: Connection,
    remote_pending: VecDeque<RemoteSend>,
    /// Produced messages not yet reported written.
    unacked: usize,
    close_received: bool,
    input_failed: bool,
    closed_notified: bool,
}

impl WebSocketHandler {
    fn upgrade(&mut self, cx: &mut SessionContext, request: HttpRequest) -> ChannelAction {
        let accepted = match self.handshake.respond(&request) {
            HandshakeOutcome::Accepted(accepted) => accepted,
            HandshakeOutcome::Rejected(response) => {
                let response = response.with_header("Connection", "close");
                self.conn
                    .outbox
                    .push_back(Produced::new(Outbound::Http(response)));
                self.state = State::Rejected;
                return ChannelAction::CloseInput;
            }
        };

        // The 101 goes out raw so the codec can switch before anything else is decoded
        let mut head = BytesMut::new();
        if let Err(error) = encode_response(&accepted.response, &mut head) {
            event!(Level::ERROR, ?error, "failed to encode handshake response");
            return ChannelAction::CloseAll;
        }
        self.conn
            .outbox
            .push_back(Produced::new(Outbound::Raw(head.freeze())));

        let codec = WebSocketCodec::new(
            Role::Server,
            accepted.transformations,
            self.max_message_size,
        );
        cx.switch_codec(Box::new(codec));

        self.conn.protocol = accepted.protocol;
        self.state = State::Open;
        event!(Level::DEBUG, path = request.path(), protocol = ?self.conn.protocol, "websocket opened");

        let result = self
            .endpoint
            .on_open(&mut WsSession::new(cx, &mut self.conn));
        if let Err(error) = result {
            self.endpoint_failed(cx, &error);
        }

        ChannelAction::KeepOpen
    }

    fn on_frame(&mut self, cx: &mut SessionContext, message: Message) -> ChannelAction {
        match message {
            Message::Ping(payload) => {
                if !self.conn.close_sent {
                    self.conn
                        .outbox
                        .push_back(Produced::new(Outbound::WebSocket(Message::Pong(payload))));
                }
            }
            Message::Pong(_) => {}
            Message::Close(frame) => {
                self.close_received = true;
                self.notify_closed(cx, frame.as_ref());

                if !self.conn.close_sent {
                    let echo = Message::Close(frame);
                    self.conn
                        .outbox
                        .push_back(Produced::new(Outbound::WebSocket(echo)));
                    self.conn.close_sent = true;
                } else if self.unacked == 0 && self.conn.outbox.is_empty() {
                    return ChannelAction::CloseAll;
                }
            }
            message => {
                // Data after our close frame is dropped
                if self.conn.close_sent {
                    return ChannelAction::KeepOpen;
                }

                let result = self
                    .endpoint
                    .on_message(&mut WsSession::new(cx, &mut self.conn), message);
                if let Err(error) = result {
                    self.endpoint_failed(cx, &error);
                }
            }
        }

        ChannelAction::KeepOpen
    }

    fn endpoint_failed(&mut self, cx: &mut SessionContext, error: &Error) {
        let mut session = WsSession::new(cx, &mut self.conn);
        self.endpoint.on_error(&mut session, error);
        session.close(CLOSE_INTERNAL_ERROR, "internal error");
    }

    fn notify_closed(&mut self, cx: &mut SessionContext, frame: Option<&CloseFrame>) {
        if self.closed_notified || self.state != State::Open {
            return;
        }
        self.closed_notified = true;

        self.endpoint
            .on_close(&mut WsSession::new(cx, &mut self.conn), frame);
    }

    fn next_remote(&mut self) -> Option<Produced> {
        while let Some(send) = self.remote_pending.pop_front() {
            // Remote closes keep their place behind earlier remote sends
            if let Message::Close(_) = &send.message {
                self.conn.close_sent = true;
            }

            let Some(slot) = send.slot else {
                return Some(Produced::new(Outbound::WebSocket(send.message)));
            };

            // The sender gave up on this one already
            if lock(&slot).is_none() {
                continue;
            }

            let completion = Completion::new(move |result| fire(&slot, result));
            let produced =
                Produced::new(Outbound::WebSocket(send.message)).with_completion(completion);
            return Some(produced);
        }

        None
    }
}

fn close_code(error: &Error) -> Option<u16> {
    let Some(SessionError::Decode(error)) = error.downcast_ref::<SessionError>() else {
        return None;
    };

    let code = match error {
        DecodeError::TooLarge { .. } => CLOSE_TOO_BIG,
        DecodeError::Utf8(_) => CLOSE_INVALID_PAYLOAD,
        _ => CLOSE_PROTOCOL_ERROR,
    };
    Some(code)
}

impl IoHandler for WebSocketHandler {
    fn consume(
        &mut self,
        cx: &mut SessionContext,
        message: Inbound,
    ) -> Result<ChannelAction, Error> {
        let action = match (self.state, message) {
            (State::Handshake, Inbound::Http(request)) => self.upgrade(cx, request),
            (State::Open, Inbound::WebSocket(message)) => self.on_frame(cx, message),
            (_, message) => bail!("unexpected {:?} in websocket state {:?}", message, self.state),
        };

        Ok(action)
    }

    fn produce(&mut self, _cx: &mut SessionContext) -> Result<Option<Produced>, Error> {
        let produced = match self.conn.outbox.pop_front() {
            Some(produced) => Some(produced),
            None if self.state == State::Open && !self.conn.close_sent => self.next_remote(),
            None => None,
        };

        if produced.is_some() {
            self.unacked += 1;
        }
        Ok(produced)
    }

    fn write_successful(&mut self, _cx: &mut SessionContext, _written: usize) -> ChannelAction {
        self.unacked = self.unacked.saturating_sub(1);

        if self.state == State::Rejected {
            return ChannelAction::CloseAll;
        }

        let flushed = self.unacked == 0 && self.conn.outbox.is_empty();
        if self.conn.close_sent && flushed && (self.close_received || self.input_failed) {
            return ChannelAction::CloseAll;
        }

        ChannelAction::KeepOpen
    }

    fn on_read_error(&mut self, cx: &mut SessionContext, error: &Error) -> ChannelAction {
        let Some(code) = close_code(error).filter(|_| self.state == State::Open) else {
            return ChannelAction::CloseAll;
        };

        event!(Level::DEBUG, code, ?error, "closing websocket after bad input");
        self.input_failed = true;

        let mut session = WsSession::new(cx, &mut self.conn);
        self.endpoint.on_error(&mut session, error);
        session.close(code, "");

        ChannelAction::CloseInput
    }

    fn handle_closed_input(&mut self, cx: &mut SessionContext) -> ChannelAction {
        if self.input_failed || self.state == State::Rejected {
            return ChannelAction::KeepOpen;
        }

        // Peer went away without a closing handshake
        self.notify_closed(cx, None);
        ChannelAction::CloseAll
    }

    fn on_session_close(&mut self, cx: &mut SessionContext) {
        self.notify_closed(cx, None);
        self.conn.remote.shutdown();

        for send in self.remote_pending.drain(..) {
            if let Some(slot) = &send.slot {
                fire(slot, Err(WriteError::Closed));
            }
        }
        self.conn.outbox.clear();
    }

    fn deadline(&self) -> Option<Instant> {
        self.remote_pending
            .iter()
            .filter_map(|send| send.deadline)
            .min()
    }

    fn on_timeout(&mut self, _cx: &mut SessionContext, now: Instant) -> ChannelAction {
        self.remote_pending.retain(|send| {
            let expired = send.deadline.map_or(false, |deadline| deadline <= now);
            if expired {
                if let Some(slot) = &send.slot {
                    fire(slot, Err(WriteError::TimedOut));
                }
            }
            !expired
        });

        ChannelAction::KeepOpen
    }

    fn on_notify(&mut self, _cx: &mut SessionContext) -> ChannelAction {
        self.remote_pending.extend(self.conn.remote.take_queued());
        ChannelAction::KeepOpen
    }
}
