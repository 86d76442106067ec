use std::{
    collections::HashMap,
    io::ErrorKind,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use anyhow::{Context as _, Error};
use mio::{
    net::{TcpListener, TcpStream},
    Events, Interest, Poll, Token, Waker,
};
use thunderdome::{Arena, Index};
use tracing::{event, instrument, Level};

use crate::{
    module::ServerModule,
    notify::{Notifier, NotifyQueue},
    processor::{ChannelProcessor, Subscription},
    ServerSession,
};

const WAKER: Token = Token(0);

/// Turn `WouldBlock` into `None`, it just means there's nothing left to handle.
fn check_io<T>(value: Result<T, std::io::Error>) -> Result<Option<T>, std::io::Error> {
    match value {
        Ok(value) => Ok(Some(value)),
        Err(error) if error.kind() == ErrorKind::WouldBlock => Ok(None),
        Err(error) => Err(error),
    }
}

struct Listener {
    listener: TcpListener,
    module: Arc<ServerModule>,
}

struct Entry {
    token: Token,
    interest: Interest,
    processor: ChannelProcessor<TcpStream>,
}

/// Stops a running reactor from any thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    stop: Arc<AtomicBool>,
    queue: Arc<NotifyQueue>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        event!(Level::INFO, "shutdown requested");
        self.stop.store(true, Ordering::SeqCst);
        self.queue.wake();
    }

    pub fn is_shutdown(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

/// Single threaded event loop multiplexing listeners and sessions over one `mio::Poll`.
pub struct Reactor {
    poll: Poll,
    queue: Arc<NotifyQueue>,
    stop: Arc<AtomicBool>,
    /// Tokens are never reused, a stale notification can't reach a newer session.
    next_token: usize,
    listeners: HashMap<Token, Listener>,
    sessions: Arena<Entry>,
    tokens: HashMap<Token, Index>,
}

impl Reactor {
    pub fn new() -> Result<Self, Error> {
        let poll = Poll::new().context("failed to create poll")?;
        let waker = Waker::new(poll.registry(), WAKER).context("failed to create waker")?;

        Ok(Self {
            poll,
            queue: Arc::new(NotifyQueue::new(waker)),
            stop: Arc::new(AtomicBool::new(false)),
            next_token: WAKER.0 + 1,
            listeners: HashMap::new(),
            sessions: Arena::new(),
            tokens: HashMap::new(),
        })
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            stop: self.stop.clone(),
            queue: self.queue.clone(),
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Accept connections on `addr` for `module`, returning the bound address.
    #[instrument("Reactor::listen", skip_all)]
    pub fn listen(&mut self, addr: SocketAddr, module: Arc<ServerModule>) -> Result<SocketAddr, Error> {
        let mut listener =
            TcpListener::bind(addr).with_context(|| format!("failed to bind {}", addr))?;
        let local_addr = listener.local_addr()?;

        let token = self.token();
        self.poll
            .registry()
            .register(&mut listener, token, Interest::READABLE)?;

        event!(Level::INFO, module = module.name(), ?local_addr, "listening");
        self.listeners.insert(token, Listener { listener, module });

        Ok(local_addr)
    }

    /// Run until shut down, then close every session.
    #[instrument("Reactor::run", skip_all)]
    pub fn run(&mut self) -> Result<(), Error> {
        while !self.stop.load(Ordering::SeqCst) {
            self.run_once(None)?;
        }

        self.close_all();
        Ok(())
    }

    /// Wait for events at most `timeout` (or until the nearest handler deadline), and
    /// handle them.
    pub fn run_once(&mut self, timeout: Option<Duration>) -> Result<(), Error> {
        let timeout = match (timeout, self.next_deadline()) {
            (timeout, None) => timeout,
            (None, Some(deadline)) => Some(deadline.saturating_duration_since(Instant::now())),
            (Some(timeout), Some(deadline)) => {
                Some(timeout.min(deadline.saturating_duration_since(Instant::now())))
            }
        };

        let mut events = Events::with_capacity(256);
        match self.poll.poll(&mut events, timeout) {
            Ok(()) => {}
            Err(error) if error.kind() == ErrorKind::Interrupted => return Ok(()),
            Err(error) => return Err(Error::from(error).context("poll failed")),
        }

        let ready: Vec<_> = events
            .iter()
            .map(|event| (event.token(), event.is_readable(), event.is_writable()))
            .collect();

        for (token, readable, writable) in ready {
            if token == WAKER {
                continue;
            }

            if self.listeners.contains_key(&token) {
                self.accept(token);
            } else {
                self.on_session_ready(token, readable, writable);
            }
        }

        self.dispatch_notifications();
        self.expire_deadlines();

        Ok(())
    }

    fn token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }

    fn accept(&mut self, token: Token) {
        let Some(listener) = self.listeners.get(&token) else {
            return;
        };
        let module = listener.module.clone();

        let mut accepted = Vec::new();
        loop {
            match check_io(listener.listener.accept()) {
                Ok(Some(stream)) => accepted.push(stream),
                Ok(None) => break,
                Err(error) => {
                    // Usually out of descriptors, the listener stays registered
                    event!(Level::WARN, ?error, "accept failed");
                    break;
                }
            }
        }

        for (stream, remote_addr) in accepted {
            event!(Level::DEBUG, ?remote_addr, "stream accepted");
            if let Err(error) = self.add_session(stream, remote_addr, module.clone()) {
                event!(Level::WARN, ?error, ?remote_addr, "failed to start session");
            }
        }
    }

    fn add_session(
        &mut self,
        mut stream: TcpStream,
        peer: SocketAddr,
        module: Arc<ServerModule>,
    ) -> Result<(), Error> {
        if let Err(error) = stream.set_nodelay(true) {
            event!(Level::DEBUG, ?error, "failed to set TCP_NODELAY");
        }

        let token = self.token();
        let interest = Interest::READABLE | Interest::WRITABLE;
        self.poll.registry().register(&mut stream, token, interest)?;

        let notifier = Notifier::new(self.queue.clone(), token);
        let session = match ServerSession::new(stream, peer, module, notifier) {
            Ok(session) => session,
            Err(error) => return Err(Error::from(error).context("failed to create session")),
        };

        let index = self.sessions.insert(Entry {
            token,
            interest,
            processor: ChannelProcessor::new(session),
        });
        self.tokens.insert(token, index);

        Ok(())
    }

    fn on_session_ready(&mut self, token: Token, readable: bool, writable: bool) {
        let Some(&index) = self.tokens.get(&token) else {
            event!(Level::TRACE, ?token, "event for unknown token");
            return;
        };
        let Some(entry) = self.sessions.get_mut(index) else {
            return;
        };

        let subscription = entry.processor.on_ready(readable, writable);
        self.update(index, subscription);
    }

    fn dispatch_notifications(&mut self) {
        for token in self.queue.take_pending() {
            let Some(&index) = self.tokens.get(&token) else {
                continue;
            };
            let Some(entry) = self.sessions.get_mut(index) else {
                continue;
            };

            let subscription = entry.processor.notify();
            self.update(index, subscription);
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.sessions
            .iter()
            .filter_map(|(_, entry)| entry.processor.deadline())
            .min()
    }

    fn expire_deadlines(&mut self) {
        let now = Instant::now();

        let expired: Vec<Index> = self
            .sessions
            .iter()
            .filter(|(_, entry)| entry.processor.deadline().map_or(false, |d| d <= now))
            .map(|(index, _)| index)
            .collect();

        for index in expired {
            let Some(entry) = self.sessions.get_mut(index) else {
                continue;
            };

            let subscription = entry.processor.on_timeout(now);
            self.update(index, subscription);
        }
    }

    /// Apply a session's new subscription, removing it once closed.
    fn update(&mut self, index: Index, subscription: Subscription) {
        let registry = self.poll.registry();
        let Some(entry) = self.sessions.get_mut(index) else {
            return;
        };

        if subscription.closed {
            if let Err(error) = registry.deregister(entry.processor.session_mut().channel_mut()) {
                event!(Level::TRACE, ?error, "failed to deregister session");
            }

            self.tokens.remove(&entry.token);
            self.sessions.remove(index);
            return;
        }

        // Readable stays registered so hang-ups are always noticed
        let mut interest = Interest::READABLE;
        if subscription.write {
            interest = interest | Interest::WRITABLE;
        }

        if interest != entry.interest {
            let channel = entry.processor.session_mut().channel_mut();
            match registry.reregister(channel, entry.token, interest) {
                Ok(()) => entry.interest = interest,
                Err(error) => event!(Level::WARN, ?error, "failed to reregister session"),
            }
        }
    }

    fn close_all(&mut self) {
        event!(Level::DEBUG, sessions = self.sessions.len(), "closing all sessions");

        for (_, mut entry) in self.sessions.drain() {
            entry.processor.close();
            if let Err(error) = self
                .poll
                .registry()
                .deregister(entry.processor.session_mut().channel_mut())
            {
                event!(Level::TRACE, ?error, "failed to deregister session");
            }
        }
        self.tokens.clear();
    }
}
