use anyhow::{bail, Error};
use tracing::{event, Level};
use wharf_proto::{http::status_reason, HttpRequest, HttpResponse};

use crate::{
    handler::{IoHandler, Produced},
    ChannelAction, Inbound, Outbound, SessionContext,
};

/// Turns one request into one response.
pub trait RequestHandler: Send {
    fn handle(&mut self, request: &HttpRequest, cx: &mut SessionContext)
        -> Result<HttpResponse, Error>;
}

impl<F> RequestHandler for F
where
    F: FnMut(&HttpRequest, &mut SessionContext) -> Result<HttpResponse, Error> + Send,
{
    fn handle(
        &mut self,
        request: &HttpRequest,
        cx: &mut SessionContext,
    ) -> Result<HttpResponse, Error> {
        self(request, cx)
    }
}

/// Adapts a `RequestHandler` to the IO handler contract, with HTTP keep-alive.
pub struct ExchangeHandler<H> {
    inner: H,
    request: Option<HttpRequest>,
    keep_alive: bool,
}

impl<H: RequestHandler> ExchangeHandler<H> {
    pub fn new(inner: H) -> Self {
        Self {
            inner,
            request: None,
            keep_alive: false,
        }
    }
}

impl<H: RequestHandler> IoHandler for ExchangeHandler<H> {
    fn consume(
        &mut self,
        cx: &mut SessionContext,
        message: Inbound,
    ) -> Result<ChannelAction, Error> {
        let Inbound::Http(request) = message else {
            bail!("exchange handler only takes http requests");
        };

        self.keep_alive = cx.keep_alive_enabled() && request.keep_alive();
        self.request = Some(request);

        Ok(ChannelAction::CloseInput)
    }

    fn produce(&mut self, cx: &mut SessionContext) -> Result<Option<Produced>, Error> {
        let Some(request) = self.request.take() else {
            return Ok(None);
        };

        let mut response = match self.inner.handle(&request, cx) {
            Ok(response) => response,
            Err(error) => {
                event!(Level::ERROR, ?error, path = request.path(), "request handler failed");
                self.keep_alive = false;
                HttpResponse::new(500).with_body(status_reason(500))
            }
        };

        if !self.keep_alive {
            response.headers_mut().set("Connection", "close");
        }

        // Responses to HEAD carry the headers only
        if request.method() == "HEAD" {
            if let Some(body) = response.body() {
                let length = body.len().to_string();
                response.headers_mut().set("Content-Length", length);
            }
            response.set_body(None);
        }

        Ok(Some(Produced::new(Outbound::Http(response))))
    }

    fn write_successful(&mut self, _cx: &mut SessionContext, _written: usize) -> ChannelAction {
        if self.keep_alive {
            ChannelAction::KeepOpen
        } else {
            ChannelAction::CloseAll
        }
    }
}
