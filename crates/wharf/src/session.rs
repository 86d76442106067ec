use std::{
    any::Any,
    collections::{HashMap, VecDeque},
    fmt,
    net::SocketAddr,
    sync::Arc,
};

use bytes::Bytes;
use tracing::{event, Level};
use uuid::Uuid;

use crate::{
    codec::ProtocolCodec, encoder::ChannelEncoder, handler::IoHandler, module::ServerModule,
    notify::Notifier, SessionError, WriteError,
};

type CompletionFn = Box<dyn FnOnce(Result<usize, WriteError>) + Send>;

/// Continuation fired exactly once when a write finishes.
///
/// Receives the number of bytes written, or why the write failed. Dropping a completion that
/// didn't fire fails it with `WriteError::Closed`.
pub struct Completion {
    callback: Option<CompletionFn>,
}

impl Completion {
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce(Result<usize, WriteError>) + Send + 'static,
    {
        Self {
            callback: Some(Box::new(callback)),
        }
    }

    pub fn complete(mut self, result: Result<usize, WriteError>) {
        if let Some(callback) = self.callback.take() {
            callback(result);
        }
    }

    pub fn succeed(self, written: usize) {
        self.complete(Ok(written));
    }

    pub fn fail(self, error: WriteError) {
        self.complete(Err(error));
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            callback(Err(WriteError::Closed));
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("fired", &self.callback.is_none())
            .finish()
    }
}

/// Encoded bytes waiting to be written to the channel.
#[derive(Debug)]
pub struct PendingWrite {
    data: Bytes,
    written: usize,
    completion: Option<Completion>,
    /// Whether the handler hears about this write, TLS records it doesn't.
    pub(crate) report: bool,
}

impl PendingWrite {
    pub fn new(data: Bytes, completion: Option<Completion>) -> Self {
        Self {
            data,
            written: 0,
            completion,
            report: true,
        }
    }

    /// Bytes produced by the session itself rather than a handler, such as TLS records.
    pub(crate) fn internal(data: Bytes) -> Self {
        Self {
            report: false,
            ..Self::new(data, None)
        }
    }

    pub fn remaining(&self) -> &[u8] {
        &self.data[self.written..]
    }

    pub fn advance(&mut self, count: usize) {
        self.written = (self.written + count).min(self.data.len());
    }

    pub fn is_done(&self) -> bool {
        self.written == self.data.len()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub(crate) fn take_completion(&mut self) -> Option<Completion> {
        self.completion.take()
    }
}

/// Bounded FIFO of pending writes.
pub struct WriteQueue {
    entries: VecDeque<PendingWrite>,
    limit: usize,
}

impl WriteQueue {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            limit,
        }
    }

    /// Queue a write, failing its completion right away if the queue is at its limit.
    pub fn push(&mut self, mut write: PendingWrite) -> Result<(), WriteError> {
        if self.entries.len() >= self.limit {
            if let Some(completion) = write.take_completion() {
                completion.fail(WriteError::QueueFull);
            }
            return Err(WriteError::QueueFull);
        }

        self.entries.push_back(write);
        Ok(())
    }

    /// Queue a write regardless of the limit, for records the session can't do without.
    pub(crate) fn push_internal(&mut self, write: PendingWrite) {
        self.entries.push_back(write);
    }

    pub fn front_mut(&mut self) -> Option<&mut PendingWrite> {
        self.entries.front_mut()
    }

    pub fn pop_front(&mut self) -> Option<PendingWrite> {
        self.entries.pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.limit
    }

    /// Drop every queued write, failing each completion with `error()`.
    pub fn fail_all<F>(&mut self, error: F)
    where
        F: Fn() -> WriteError,
    {
        for mut write in self.entries.drain(..) {
            if let Some(completion) = write.take_completion() {
                completion.fail(error());
            }
        }
    }
}

/// Per-session values keyed by name.
#[derive(Default)]
pub struct Attributes {
    values: HashMap<String, Box<dyn Any + Send>>,
}

impl Attributes {
    pub fn insert<T: Any + Send>(&mut self, name: impl Into<String>, value: T) {
        self.values.insert(name.into(), Box::new(value));
    }

    pub fn get<T: Any>(&self, name: &str) -> Option<&T> {
        self.values.get(name)?.downcast_ref()
    }

    pub fn get_mut<T: Any>(&mut self, name: &str) -> Option<&mut T> {
        self.values.get_mut(name)?.downcast_mut()
    }

    pub fn remove(&mut self, name: &str) -> Option<Box<dyn Any + Send>> {
        self.values.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }
}

/// The part of a session handlers get to see.
pub struct SessionContext {
    id: Uuid,
    peer: SocketAddr,
    secure: bool,
    keep_alive: bool,
    write_queue_limit: usize,
    attributes: Attributes,
    principal: Option<String>,
    notifier: Notifier,
    codec_switch: Option<Box<dyn ProtocolCodec>>,
}

impl SessionContext {
    pub fn new(peer: SocketAddr, secure: bool, notifier: Notifier) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer,
            secure,
            keep_alive: true,
            write_queue_limit: 64,
            attributes: Attributes::default(),
            principal: None,
            notifier,
            codec_switch: None,
        }
    }

    pub(crate) fn with_limits(mut self, keep_alive: bool, write_queue_limit: usize) -> Self {
        self.keep_alive = keep_alive;
        self.write_queue_limit = write_queue_limit;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Whether the module allows connections to outlive one exchange.
    pub fn keep_alive_enabled(&self) -> bool {
        self.keep_alive
    }

    pub fn write_queue_limit(&self) -> usize {
        self.write_queue_limit
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }

    /// Identity established by the module's authorizer, if any.
    pub fn principal(&self) -> Option<&str> {
        self.principal.as_deref()
    }

    pub fn set_principal(&mut self, principal: impl Into<String>) {
        self.principal = Some(principal.into());
    }

    /// Handle to wake this session from another thread.
    pub fn notifier(&self) -> Notifier {
        self.notifier.clone()
    }

    /// Replace the session's codec once the current callback returns.
    ///
    /// Bytes already buffered are decoded with the new codec, so an upgrade takes effect for
    /// everything after the message that requested it.
    pub fn switch_codec(&mut self, codec: Box<dyn ProtocolCodec>) {
        self.codec_switch = Some(codec);
    }

    pub(crate) fn take_codec_switch(&mut self) -> Option<Box<dyn ProtocolCodec>> {
        self.codec_switch.take()
    }
}

/// Everything the engine keeps for one accepted connection.
pub struct ServerSession<C> {
    pub(crate) channel: C,
    pub(crate) module: Arc<ServerModule>,
    pub(crate) encoder: ChannelEncoder,
    pub(crate) handler: Option<Box<dyn IoHandler>>,
    pub(crate) context: SessionContext,
    pub(crate) read_queue: VecDeque<Bytes>,
    pub(crate) writes: WriteQueue,
}

impl<C> ServerSession<C> {
    pub fn new(
        channel: C,
        peer: SocketAddr,
        module: Arc<ServerModule>,
        notifier: Notifier,
    ) -> Result<Self, SessionError> {
        let encoder = module.new_encoder()?;
        let context = SessionContext::new(peer, encoder.is_secure(), notifier)
            .with_limits(module.keep_alive(), module.write_queue_limit());

        event!(Level::DEBUG, id = %context.id(), ?peer, secure = encoder.is_secure(), "session created");

        Ok(Self {
            channel,
            writes: WriteQueue::new(module.write_queue_limit()),
            module,
            encoder,
            handler: None,
            context,
            read_queue: VecDeque::new(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.context.id()
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.context.peer_addr()
    }

    pub fn module(&self) -> &Arc<ServerModule> {
        &self.module
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn has_handler(&self) -> bool {
        self.handler.is_some()
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;

    fn counting() -> (Completion, Arc<AtomicUsize>, Arc<std::sync::Mutex<Option<bool>>>) {
        let count = Arc::new(AtomicUsize::new(0));
        let outcome = Arc::new(std::sync::Mutex::new(None));

        let c = count.clone();
        let o = outcome.clone();
        let completion = Completion::new(move |result| {
            c.fetch_add(1, Ordering::SeqCst);
            *o.lock().unwrap() = Some(result.is_ok());
        });

        (completion, count, outcome)
    }

    #[test]
    fn dropped_completion_fails_once() {
        let (completion, count, outcome) = counting();
        drop(completion);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(*outcome.lock().unwrap(), Some(false));
    }

    #[test]
    fn fired_completion_does_not_fire_on_drop() {
        let (completion, count, outcome) = counting();
        completion.succeed(10);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(*outcome.lock().unwrap(), Some(true));
    }

    #[test]
    fn full_queue_fails_new_writes() {
        let mut queue = WriteQueue::new(1);
        queue
            .push(PendingWrite::new(Bytes::from_static(b"a"), None))
            .unwrap();

        let (completion, count, outcome) = counting();
        let result = queue.push(PendingWrite::new(Bytes::from_static(b"b"), Some(completion)));

        assert!(matches!(result, Err(WriteError::QueueFull)));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(*outcome.lock().unwrap(), Some(false));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn attributes_are_typed() {
        let mut attributes = Attributes::default();
        attributes.insert("count", 3u32);

        assert_eq!(attributes.get::<u32>("count"), Some(&3));
        assert!(attributes.get::<String>("count").is_none());

        *attributes.get_mut::<u32>("count").unwrap() += 1;
        assert_eq!(attributes.get::<u32>("count"), Some(&4));
    }
}
