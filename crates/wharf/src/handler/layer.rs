use std::time::Instant;

use anyhow::Error;
use tracing::{event, Level};
use wharf_proto::HttpRequest;

use crate::{
    handler::{IoHandler, Produced},
    ChannelAction, Inbound, SessionContext,
};

/// Middleware wrapped around every handler a module resolves.
///
/// Layers are applied in registration order, the last registered layer ends up outermost.
pub trait HandlerLayer: Send + Sync {
    fn wrap(&self, handler: Box<dyn IoHandler>, request: &HttpRequest) -> Box<dyn IoHandler>;
}

/// Logs each exchange with its method, path and duration.
#[derive(Default)]
pub struct TracingLayer;

impl HandlerLayer for TracingLayer {
    fn wrap(&self, handler: Box<dyn IoHandler>, request: &HttpRequest) -> Box<dyn IoHandler> {
        Box::new(Traced {
            inner: handler,
            method: request.method().to_string(),
            path: request.path().to_string(),
            started: Instant::now(),
            written: 0,
        })
    }
}

struct Traced {
    inner: Box<dyn IoHandler>,
    method: String,
    path: String,
    started: Instant,
    written: usize,
}

impl IoHandler for Traced {
    fn consume(
        &mut self,
        cx: &mut SessionContext,
        message: Inbound,
    ) -> Result<ChannelAction, Error> {
        self.inner.consume(cx, message)
    }

    fn produce(&mut self, cx: &mut SessionContext) -> Result<Option<Produced>, Error> {
        self.inner.produce(cx)
    }

    fn write_successful(&mut self, cx: &mut SessionContext, written: usize) -> ChannelAction {
        self.written += written;
        self.inner.write_successful(cx, written)
    }

    fn write_failed(&mut self, cx: &mut SessionContext, error: &Error) -> ChannelAction {
        event!(Level::WARN, method = %self.method, path = %self.path, ?error, "write failed");
        self.inner.write_failed(cx, error)
    }

    fn on_read_error(&mut self, cx: &mut SessionContext, error: &Error) -> ChannelAction {
        event!(Level::WARN, method = %self.method, path = %self.path, ?error, "read failed");
        self.inner.on_read_error(cx, error)
    }

    fn handle_closed_input(&mut self, cx: &mut SessionContext) -> ChannelAction {
        self.inner.handle_closed_input(cx)
    }

    fn on_session_close(&mut self, cx: &mut SessionContext) {
        self.inner.on_session_close(cx)
    }

    fn deadline(&self) -> Option<Instant> {
        self.inner.deadline()
    }

    fn on_timeout(&mut self, cx: &mut SessionContext, now: Instant) -> ChannelAction {
        self.inner.on_timeout(cx, now)
    }

    fn on_notify(&mut self, cx: &mut SessionContext) -> ChannelAction {
        self.inner.on_notify(cx)
    }
}

impl Drop for Traced {
    fn drop(&mut self) {
        event!(
            Level::INFO,
            method = %self.method,
            path = %self.path,
            written = self.written,
            elapsed = ?self.started.elapsed(),
            "exchange finished"
        );
    }
}
