use anyhow::Error;
use wharf_proto::{http::status_reason, HttpResponse};

use crate::{
    handler::{IoHandler, Produced},
    ChannelAction, Inbound, Outbound, SessionContext,
};

/// Answers every request with a fixed status.
pub struct StatusHandler {
    status: u16,
    closing: bool,
    pending: bool,
    keep_alive: bool,
}

impl StatusHandler {
    /// Respond with `status`, keeping the connection alive if the request allows it.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            closing: false,
            pending: false,
            keep_alive: false,
        }
    }

    /// Respond with `status`, then close the session.
    pub fn closing(status: u16) -> Self {
        Self {
            closing: true,
            pending: true,
            ..Self::new(status)
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }
}

impl IoHandler for StatusHandler {
    fn consume(
        &mut self,
        cx: &mut SessionContext,
        message: Inbound,
    ) -> Result<ChannelAction, Error> {
        self.pending = true;
        self.keep_alive = match message {
            Inbound::Http(request) => {
                !self.closing && cx.keep_alive_enabled() && request.keep_alive()
            }
            _ => false,
        };

        Ok(ChannelAction::CloseInput)
    }

    fn produce(&mut self, _cx: &mut SessionContext) -> Result<Option<Produced>, Error> {
        if !self.pending {
            return Ok(None);
        }
        self.pending = false;

        let mut response = HttpResponse::new(self.status)
            .with_header("Content-Type", "text/plain")
            .with_body(status_reason(self.status));
        if !self.keep_alive {
            response.headers_mut().set("Connection", "close");
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
