#![allow(dead_code)]

use std::{
    collections::VecDeque,
    io::{self, ErrorKind, Read, Write},
    net::{Shutdown, SocketAddr},
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use anyhow::{bail, Error};
use bytes::BytesMut;
use mio::Token;
use wharf::{
    plugin::{RoutePlugin, PATH_PARAMS},
    proto::{
        http::{HttpClientCodec, HttpLimits},
        DecodeStatus, HttpRequest, HttpResponse,
    },
    Channel, ChannelProcessor, HandlerRegistry, ModuleBuilder, Notifier, NotifyQueue,
    PathParams, ServerModule, ServerSession, SessionContext, Subscription, TaskPool,
};

#[derive(Default)]
struct MockState {
    input: VecDeque<u8>,
    eof: bool,
    output: Vec<u8>,
    writes_blocked: bool,
    shutdown_read: bool,
    shutdown_write: bool,
}

/// In-memory channel, cloned handles share the same buffers.
#[derive(Clone, Default)]
pub struct MockChannel {
    state: Arc<Mutex<MockState>>,
}

impl MockChannel {
    fn lock(&self) -> MutexGuard<MockState> {
        self.state.lock().unwrap()
    }

    pub fn push_input(&self, bytes: &[u8]) {
        self.lock().input.extend(bytes);
    }

    pub fn close_input(&self) {
        self.lock().eof = true;
    }

    pub fn set_writes_blocked(&self, blocked: bool) {
        self.lock().writes_blocked = blocked;
    }

    pub fn output(&self) -> Vec<u8> {
        self.lock().output.clone()
    }

    pub fn take_output(&self) -> Vec<u8> {
        std::mem::take(&mut self.lock().output)
    }

    pub fn is_write_shut(&self) -> bool {
        self.lock().shutdown_write
    }

    pub fn is_shut(&self) -> bool {
        let state = self.lock();
        state.shutdown_read && state.shutdown_write
    }
}

impl Read for MockChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.lock();

        if state.input.is_empty() {
            if state.eof {
                return Ok(0);
            }
            return Err(ErrorKind::WouldBlock.into());
        }

        let count = buf.len().min(state.input.len());
        for (slot, byte) in buf.iter_mut().zip(state.input.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }
}

impl Write for MockChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.lock();

        if state.shutdown_write {
            return Err(ErrorKind::BrokenPipe.into());
        }
        if state.writes_blocked {
            return Err(ErrorKind::WouldBlock.into());
        }

        state.output.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Channel for MockChannel {
    fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        let mut state = self.lock();
        match how {
            Shutdown::Read => state.shutdown_read = true,
            Shutdown::Write => state.shutdown_write = true,
            Shutdown::Both => {
                state.shutdown_read = true;
                state.shutdown_write = true;
            }
        }
        Ok(())
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        Ok(peer())
    }
}

pub fn peer() -> SocketAddr {
    "127.0.0.1:40000".parse().unwrap()
}

/// A session driven by hand over a `MockChannel`.
pub struct TestSession {
    pub processor: ChannelProcessor<MockChannel>,
    pub channel: MockChannel,
    pub queue: Arc<NotifyQueue>,
}

impl TestSession {
    pub fn when_received(&mut self, bytes: &[u8]) -> Subscription {
        self.channel.push_input(bytes);
        self.processor.on_ready(true, false)
    }

    pub fn when_peer_closed(&mut self) -> Subscription {
        self.channel.close_input();
        self.processor.on_ready(true, false)
    }

    /// Deliver notifications from other threads until `done` holds.
    pub fn when_notified_until<F>(&mut self, mut done: F) -> Result<(), Error>
    where
        F: FnMut(&Self) -> bool,
    {
        let deadline = Instant::now() + Duration::from_secs(5);

        while !done(self) {
            if Instant::now() > deadline {
                bail!("timed out waiting for notifications");
            }

            if self.queue.take_pending().is_empty() {
                std::thread::sleep(Duration::from_millis(5));
                continue;
            }
            self.processor.notify();
        }

        Ok(())
    }

    /// Every complete response written so far.
    pub fn then_responses(&self) -> Result<Vec<HttpResponse>, Error> {
        then_decoded_responses(&self.channel.output())
    }
}

pub fn then_decoded_responses(wire: &[u8]) -> Result<Vec<HttpResponse>, Error> {
    let mut codec = HttpClientCodec::new(HttpLimits::default());
    let mut buf = BytesMut::from(wire);
    let mut responses = Vec::new();

    while let DecodeStatus::FullyRead(response) = codec.decode(&mut buf)? {
        responses.push(response);
    }

    Ok(responses)
}

pub fn then_body(response: &HttpResponse) -> &str {
    response
        .body()
        .map(|body| std::str::from_utf8(body).unwrap())
        .unwrap_or("")
}

pub fn given_task_pool() -> Arc<TaskPool> {
    Arc::new(TaskPool::new(2).unwrap())
}

fn hello(_request: &HttpRequest, cx: &mut SessionContext) -> Result<HttpResponse, Error> {
    let name = cx
        .attributes()
        .get::<PathParams>(PATH_PARAMS)
        .and_then(|params| params.get("name"))
        .unwrap_or("nobody")
        .to_string();

    Ok(HttpResponse::new(200)
        .with_header("Content-Type", "text/plain")
        .with_body(format!("hello {}", name)))
}

fn broken(_request: &HttpRequest, _cx: &mut SessionContext) -> Result<HttpResponse, Error> {
    bail!("handler broke")
}

fn redirect(request: &HttpRequest, _cx: &mut SessionContext) -> Result<HttpResponse, Error> {
    // Query text ends up in a header unescaped
    let target = request.query_param("to").unwrap_or("/").replace("%0D%0A", "\r\n");
    Ok(HttpResponse::new(302).with_header("Location", target))
}

/// A module answering `/hello/{name}`, with `/broken` failing every request and `/redirect`
/// copying its query into a header.
pub fn given_hello_module() -> ModuleBuilder {
    let mut registry = HandlerRegistry::new();
    registry.register_request("hello", || hello);
    registry.register_request("broken", || broken);
    registry.register_request("redirect", || redirect);

    let routes = RoutePlugin::new()
        .route("/hello/{name}", "hello")
        .route("/broken", "broken")
        .route("/redirect", "redirect");

    ServerModule::builder("test")
        .factory(registry)
        .plugin(routes)
        .task_pool(given_task_pool())
}

pub fn given_session(module: ServerModule) -> Result<TestSession, Error> {
    let channel = MockChannel::default();
    let queue = Arc::new(NotifyQueue::detached());
    let notifier = Notifier::new(queue.clone(), Token(1));

    let session = ServerSession::new(channel.clone(), peer(), Arc::new(module), notifier)?;

    Ok(TestSession {
        processor: ChannelProcessor::new(session),
        channel,
        queue,
    })
}

pub fn given_get(path: &str) -> String {
    format!("GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", path)
}

pub fn given_context() -> SessionContext {
    let queue = Arc::new(NotifyQueue::detached());
    SessionContext::new(peer(), false, Notifier::new(queue, Token(1)))
}
