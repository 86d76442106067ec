use std::{
    io::{self, ErrorKind},
    net::Shutdown,
    time::Instant,
};

use anyhow::Error;
use bytes::Bytes;
use tracing::{event, Level};
use wharf_proto::{http::ReadHint, DecodeStatus};

use crate::{
    handler::{Produced, StatusHandler},
    resolver::Determination,
    session::PendingWrite,
    Channel, ChannelAction, Inbound, IoHandler, ServerSession, SessionContext, SessionError,
    WriteError,
};

/// Reads taken per pass before decoding, so one busy peer can't grow the buffer unbounded.
const MAX_READS_PER_PASS: usize = 16;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    Accepted,
    Handshaking,
    Reading,
    Dispatching,
    Writing,
    Closed,
}

/// Readiness a session wants from the reactor next.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Subscription {
    pub read: bool,
    pub write: bool,
    pub closed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Output {
    Open,
    /// No more produce calls, flushing what's queued before shutting down the write half.
    Draining,
    Shut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Consume,
    Callback,
}

/// Drives one session: reads, decodes, dispatches to its handler and flushes writes.
///
/// The processor never blocks, each entry point does as much work as the channel allows
/// and returns the readiness it's waiting for.
///
/// Input that can't be decoded before any handler is bound is answered with a
/// `400 Bad Request` carrying `Connection: close`, then the session closes. Requests the
/// authorizer refuses get its 401 or 403 the same way.
pub struct ChannelProcessor<C: Channel> {
    session: ServerSession<C>,
    state: ProcessorState,
    read_buf: Vec<u8>,
    input_open: bool,
    input_failed: bool,
    peer_eof: bool,
    output: Output,
    /// The bound handler is answering a single request, after which it's released.
    exchange: bool,
    closed: bool,
}

impl<C: Channel> ChannelProcessor<C> {
    pub fn new(session: ServerSession<C>) -> Self {
        let read_buf = vec![0; session.module.read_buffer_size()];

        Self {
            session,
            state: ProcessorState::Accepted,
            read_buf,
            input_open: true,
            input_failed: false,
            peer_eof: false,
            output: Output::Open,
            exchange: false,
            closed: false,
        }
    }

    pub fn session(&self) -> &ServerSession<C> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut ServerSession<C> {
        &mut self.session
    }

    pub fn state(&self) -> ProcessorState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// The channel is ready, do whatever work is possible.
    pub fn on_ready(&mut self, readable: bool, writable: bool) -> Subscription {
        event!(Level::TRACE, id = %self.session.id(), readable, writable, "session ready");

        if self.state == ProcessorState::Accepted {
            self.state = if self.session.encoder.is_handshaking() {
                ProcessorState::Handshaking
            } else {
                ProcessorState::Reading
            };
        }

        self.run()
    }

    /// Earliest moment the handler wants `on_timeout` called.
    pub fn deadline(&self) -> Option<Instant> {
        if self.closed {
            return None;
        }

        self.session.handler.as_ref()?.deadline()
    }

    pub fn on_timeout(&mut self, now: Instant) -> Subscription {
        if let Some(action) = self.with_handler(|handler, cx| handler.on_timeout(cx, now)) {
            self.apply(action, Origin::Callback);
        }

        self.run()
    }

    /// Woken from another thread through the session's `Notifier`.
    pub fn notify(&mut self) -> Subscription {
        if let Some(action) = self.with_handler(|handler, cx| handler.on_notify(cx)) {
            self.apply(action, Origin::Callback);
        }

        self.run()
    }

    pub fn subscription(&self) -> Subscription {
        Subscription {
            read: !self.closed && self.can_read(),
            write: !self.closed && !self.session.writes.is_empty(),
            closed: self.closed,
        }
    }

    /// Close the session, failing queued writes.
    ///
    /// Safe to call more than once, the handler hears about it exactly once.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.state = ProcessorState::Closed;

        self.session.writes.fail_all(|| WriteError::Closed);

        if let Some(trailer) = self.session.encoder.close() {
            if let Err(error) = self.session.channel.write_all(&trailer) {
                event!(Level::TRACE, ?error, "failed to write trailer on close");
            }
        }

        if let Err(error) = self.session.channel.shutdown(Shutdown::Both) {
            event!(Level::TRACE, ?error, "failed to shut down channel");
        }

        if let Some(mut handler) = self.session.handler.take() {
            handler.on_session_close(&mut self.session.context);
        }

        event!(Level::DEBUG, id = %self.session.id(), peer = ?self.session.peer_addr(), "session closed");
    }

    fn run(&mut self) -> Subscription {
        while !self.closed {
            let read = self.read_available();
            let processed = !self.closed && self.process_input();
            let written = !self.closed && self.pump_output();

            if !self.closed {
                self.close_if_idle();
            }

            if !(read || processed || written) {
                break;
            }
        }

        self.subscription()
    }

    fn can_read(&self) -> bool {
        self.input_open && !self.peer_eof && !self.input_failed
    }

    /// Read what the channel has, handing the raw chunks to the encoder.
    fn read_available(&mut self) -> bool {
        let mut progress = false;

        for _ in 0..MAX_READS_PER_PASS {
            if !self.can_read() {
                break;
            }

            match self.session.channel.read(&mut self.read_buf) {
                Ok(0) => {
                    event!(Level::DEBUG, id = %self.session.id(), "peer closed input");
                    self.peer_eof = true;
                    self.session.encoder.mark_peer_closed();
                    return true;
                }
                Ok(count) => {
                    let hint = if count == self.read_buf.len() {
                        ReadHint::Full
                    } else {
                        ReadHint::Partial
                    };
                    self.session.encoder.set_read_hint(hint);
                    self.session
                        .read_queue
                        .push_back(Bytes::copy_from_slice(&self.read_buf[..count]));
                    progress = true;

                    self.feed_reads();
                }
                Err(error) if error.kind() == ErrorKind::WouldBlock => break,
                Err(error) if error.kind() == ErrorKind::Interrupted => continue,
                Err(error) => {
                    self.read_failed(SessionError::Io(error));
                    return true;
                }
            }
        }

        progress
    }

    fn feed_reads(&mut self) {
        while let Some(chunk) = self.session.read_queue.pop_front() {
            let result = self.session.encoder.feed(&chunk);

            if let Some(records) = self.session.encoder.take_tls_output() {
                self.session.writes.push_internal(PendingWrite::internal(records));
            }

            match result {
                Ok(true) => {}
                Ok(false) => {
                    event!(Level::DEBUG, id = %self.session.id(), "peer closed tls stream");
                    self.peer_eof = true;
                }
                Err(error) => {
                    self.session.read_queue.clear();
                    self.read_failed(error);
                    return;
                }
            }
        }

        if self.state == ProcessorState::Handshaking && !self.session.encoder.is_handshaking() {
            event!(Level::DEBUG, id = %self.session.id(), "tls handshake complete");
            self.state = ProcessorState::Reading;
        }
    }

    /// Decode buffered input and dispatch it, returns whether anything happened.
    fn process_input(&mut self) -> bool {
        if !self.input_open || self.input_failed {
            return false;
        }

        if !self.session.has_handler() {
            return self.bind_handler();
        }

        match self.session.encoder.decode_buffered() {
            Ok(DecodeStatus::NeedMoreData) => false,
            Ok(DecodeStatus::FullyRead(message)) => {
                self.consume(message);
                true
            }
            Ok(DecodeStatus::Closed) => {
                self.finish_input();
                true
            }
            Err(error) => {
                self.read_failed(error);
                true
            }
        }
    }

    fn bind_handler(&mut self) -> bool {
        let module = self.session.module.clone();
        let result = module
            .resolver()
            .determine_io_handler(&mut self.session.encoder, &mut self.session.context);

        match result {
            Ok(Determination::NeedMoreData) => false,
            Ok(Determination::Closed) => {
                self.input_ended();
                true
            }
            Ok(Determination::Found(handler, message)) => {
                self.session.handler = Some(handler);
                self.consume(message);
                true
            }
            Ok(Determination::NotFound(error)) => {
                event!(Level::ERROR, id = %self.session.id(), ?error, "no handler for request");
                self.close();
                true
            }
            Err(SessionError::Decode(error)) => {
                event!(Level::DEBUG, id = %self.session.id(), ?error, "malformed request");
                self.input_failed = true;
                self.session.handler = Some(Box::new(StatusHandler::closing(400)));
                self.close_input(true);
                true
            }
            Err(error) => {
                event!(Level::DEBUG, id = %self.session.id(), ?error, "failed to read request");
                self.close();
                true
            }
        }
    }

    fn consume(&mut self, message: Inbound) {
        self.state = ProcessorState::Dispatching;

        let result = self.with_handler(|handler, cx| match handler.consume(cx, message) {
            Ok(action) => (action, Origin::Consume),
            Err(error) => (handler.on_read_error(cx, &error), Origin::Callback),
        });

        if self.state == ProcessorState::Dispatching {
            self.state = ProcessorState::Reading;
        }

        if let Some((action, origin)) = result {
            self.apply(action, origin);
        }
    }

    /// Give a codec the chance to complete a message that runs until close, then end input.
    fn finish_input(&mut self) {
        match self.session.encoder.finish() {
            Ok(DecodeStatus::FullyRead(message)) => self.consume(message),
            Ok(_) => {}
            Err(error) => {
                self.read_failed(error);
                return;
            }
        }

        if !self.closed {
            self.input_ended();
        }
    }

    /// The peer ended its input.
    fn input_ended(&mut self) {
        self.peer_eof = true;
        if !self.input_open {
            return;
        }
        self.input_open = false;

        if let Some(action) = self.with_handler(|handler, cx| handler.handle_closed_input(cx)) {
            self.apply(action, Origin::Callback);
        }
    }

    fn read_failed(&mut self, error: SessionError) {
        event!(Level::DEBUG, id = %self.session.id(), ?error, "read failed");
        self.input_failed = true;

        let error = Error::from(error);
        let action = self.with_handler(|handler, cx| handler.on_read_error(cx, &error));

        match action {
            // Input can't carry on after a failed read
            Some(ChannelAction::KeepOpen) => self.close_input(false),
            Some(action) => self.apply(action, Origin::Callback),
            None => self.close(),
        }
    }

    fn apply(&mut self, action: ChannelAction, origin: Origin) {
        if self.closed {
            return;
        }

        match action {
            ChannelAction::KeepOpen => {}
            ChannelAction::CloseInput => self.close_input(origin == Origin::Consume),
            ChannelAction::CloseOutput => self.close_output(),
            ChannelAction::CloseAll => self.close(),
        }
    }

    fn close_input(&mut self, exchange: bool) {
        if !self.input_open {
            return;
        }
        self.input_open = false;

        if exchange {
            self.exchange = true;
            self.state = ProcessorState::Writing;
        }

        let action = self.with_handler(|handler, cx| handler.handle_closed_input(cx));
        match action {
            Some(ChannelAction::CloseInput) | None => {}
            Some(action) => self.apply(action, Origin::Callback),
        }
    }

    fn close_output(&mut self) {
        if self.output != Output::Open {
            return;
        }
        self.output = Output::Draining;

        if let Some(trailer) = self.session.encoder.close() {
            self.session.writes.push_internal(PendingWrite::internal(trailer));
        }
    }

    /// Flush queued writes and ask the handler for more, returns whether anything happened.
    fn pump_output(&mut self) -> bool {
        let mut progress = false;

        loop {
            let (flushed, blocked) = self.flush();
            progress |= flushed;
            if blocked || self.closed {
                return progress;
            }

            if self.output != Output::Open || self.session.writes.is_full() {
                break;
            }

            let Some(produced) = self.with_handler(|handler, cx| handler.produce(cx)) else {
                break;
            };

            match produced {
                Ok(Some(produced)) => {
                    progress = true;
                    self.enqueue(produced);
                }
                Ok(None) => break,
                Err(error) => {
                    self.write_failed(error);
                    return true;
                }
            }

            if self.closed {
                return true;
            }
        }

        if self.output == Output::Draining && self.session.writes.is_empty() {
            self.shut_output();
            progress = true;
        }

        progress
    }

    fn enqueue(&mut self, produced: Produced) {
        let Produced {
            message,
            completion,
        } = produced;

        let data = match self.session.encoder.encode(message) {
            Ok(data) => data,
            Err(error) => {
                let error = match error {
                    SessionError::Encode(error) => WriteError::Encode(error),
                    other => WriteError::Io(other.to_string()),
                };
                let reported = Error::msg(error.to_string());

                if let Some(completion) = completion {
                    completion.fail(error);
                }
                self.write_failed(reported);
                return;
            }
        };

        if let Err(error) = self.session.writes.push(PendingWrite::new(data, completion)) {
            self.write_failed(Error::from(error));
        }
    }

    /// Write queued data until the channel blocks, returns (progress, blocked).
    fn flush(&mut self) -> (bool, bool) {
        let mut progress = false;

        while !self.closed {
            let Some(write) = self.session.writes.front_mut() else {
                break;
            };

            if !write.is_done() {
                match self.session.channel.write(write.remaining()) {
                    Ok(0) => {
                        self.channel_write_failed(io::Error::from(ErrorKind::WriteZero));
                        return (true, false);
                    }
                    Ok(count) => {
                        write.advance(count);
                        progress = true;
                    }
                    Err(error) if error.kind() == ErrorKind::WouldBlock => return (progress, true),
                    Err(error) if error.kind() == ErrorKind::Interrupted => continue,
                    Err(error) => {
                        self.channel_write_failed(error);
                        return (true, false);
                    }
                }
            }

            if write.is_done() {
                if let Some(write) = self.session.writes.pop_front() {
                    self.write_completed(write);
                }
                progress = true;
            }
        }

        if progress {
            if let Err(error) = self.session.channel.flush() {
                event!(Level::TRACE, ?error, "channel flush failed");
            }
        }

        (progress, false)
    }

    fn write_completed(&mut self, mut write: PendingWrite) {
        let written = write.len();
        if let Some(completion) = write.take_completion() {
            completion.succeed(written);
        }

        if !write.report {
            return;
        }

        let action = self.with_handler(|handler, cx| handler.write_successful(cx, written));
        match action {
            Some(ChannelAction::KeepOpen) if self.exchange => self.end_exchange(),
            Some(action) => self.apply(action, Origin::Callback),
            None => {}
        }
    }

    /// The handler answered its request, release it and go back to reading.
    fn end_exchange(&mut self) {
        self.exchange = false;
        self.session.handler = None;

        if !self.input_failed {
            self.input_open = true;
            self.state = ProcessorState::Reading;
        }
    }

    fn channel_write_failed(&mut self, error: io::Error) {
        event!(Level::DEBUG, id = %self.session.id(), ?error, "write failed");

        if let Some(mut write) = self.session.writes.pop_front() {
            if let Some(completion) = write.take_completion() {
                completion.fail(WriteError::Io(error.to_string()));
            }
        }

        self.write_failed(Error::from(SessionError::Io(error)));
    }

    fn write_failed(&mut self, error: Error) {
        let action = self
            .with_handler(|handler, cx| handler.write_failed(cx, &error))
            .unwrap_or(ChannelAction::CloseAll);
        self.apply(action, Origin::Callback);
    }

    fn shut_output(&mut self) {
        self.output = Output::Shut;

        if let Err(error) = self.session.channel.shutdown(Shutdown::Write) {
            event!(Level::TRACE, ?error, "failed to shut down write half");
        }

        if !self.input_open {
            self.close();
        }
    }

    fn close_if_idle(&mut self) {
        let input_done = !self.input_open && (self.peer_eof || self.input_failed);
        let unbound = !self.session.has_handler() || self.output == Output::Shut;

        if input_done && unbound && self.session.writes.is_empty() {
            self.close();
        }
    }

    /// Run a handler callback, applying any codec switch it asked for.
    fn with_handler<F, R>(&mut self, f: F) -> Option<R>
    where
        F: FnOnce(&mut dyn IoHandler, &mut SessionContext) -> R,
    {
        let session = &mut self.session;
        let handler = session.handler.as_mut()?;
        let result = f(handler.as_mut(), &mut session.context);

        if let Some(codec) = session.context.take_codec_switch() {
            session.encoder.set_codec(codec);
        }

        Some(result)
    }
}

impl<C: Channel> Drop for ChannelProcessor<C> {
    fn drop(&mut self) {
        self.close();
    }
}
