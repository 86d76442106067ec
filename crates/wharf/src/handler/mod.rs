//! The contract between the engine and application code.

mod exchange;
mod layer;
mod status;

use std::{collections::HashMap, time::Instant};

use anyhow::Error;

pub use self::{
    exchange::{ExchangeHandler, RequestHandler},
    layer::{HandlerLayer, TracingLayer},
    status::StatusHandler,
};

use crate::{ChannelAction, Completion, Inbound, Outbound, SessionContext};

/// A message a handler produced, with an optional continuation for when it's written.
pub struct Produced {
    pub message: Outbound,
    pub completion: Option<Completion>,
}

impl Produced {
    pub fn new(message: Outbound) -> Self {
        Self {
            message,
            completion: None,
        }
    }

    pub fn with_completion(mut self, completion: Completion) -> Self {
        self.completion = Some(completion);
        self
    }
}

/// Handles the traffic of one session, one handler being bound at a time.
///
/// All callbacks run on the session's reactor thread. Every callback that returns a
/// `ChannelAction` has it applied to the session before anything else happens.
pub trait IoHandler: Send {
    /// Take a decoded message.
    ///
    /// Errors are passed to `on_read_error`.
    fn consume(&mut self, cx: &mut SessionContext, message: Inbound)
        -> Result<ChannelAction, Error>;

    /// Produce the next message to write, if there is one.
    ///
    /// Called whenever the write queue has room. Errors are passed to `write_failed`.
    fn produce(&mut self, cx: &mut SessionContext) -> Result<Option<Produced>, Error>;

    /// A produced message was fully written.
    fn write_successful(&mut self, _cx: &mut SessionContext, _written: usize) -> ChannelAction {
        ChannelAction::KeepOpen
    }

    fn write_failed(&mut self, _cx: &mut SessionContext, _error: &Error) -> ChannelAction {
        ChannelAction::CloseAll
    }

    fn on_read_error(&mut self, _cx: &mut SessionContext, _error: &Error) -> ChannelAction {
        ChannelAction::CloseAll
    }

    /// Input was closed, by `CloseInput` or by the peer.
    fn handle_closed_input(&mut self, _cx: &mut SessionContext) -> ChannelAction {
        ChannelAction::KeepOpen
    }

    /// The session closed, called exactly once for the handler bound at that moment.
    fn on_session_close(&mut self, _cx: &mut SessionContext) {}

    /// Earliest moment `on_timeout` should be called.
    fn deadline(&self) -> Option<Instant> {
        None
    }

    fn on_timeout(&mut self, _cx: &mut SessionContext, _now: Instant) -> ChannelAction {
        ChannelAction::KeepOpen
    }

    /// The session was woken through its `Notifier`.
    fn on_notify(&mut self, _cx: &mut SessionContext) -> ChannelAction {
        ChannelAction::KeepOpen
    }
}

/// Creates handlers by type id, the extension point for dependency injection.
pub trait HandlerFactory: Send + Sync {
    fn create(&self, type_id: &str) -> Option<Box<dyn IoHandler>>;
}

type Constructor = Box<dyn Fn() -> Box<dyn IoHandler> + Send + Sync>;

/// Map based `HandlerFactory`.
#[derive(Default)]
pub struct HandlerRegistry {
    constructors: HashMap<String, Constructor>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor for raw IO handlers.
    pub fn register<F>(&mut self, type_id: impl Into<String>, constructor: F)
    where
        F: Fn() -> Box<dyn IoHandler> + Send + Sync + 'static,
    {
        self.constructors
            .insert(type_id.into(), Box::new(constructor));
    }

    /// Register a constructor for request handlers, adapted to a request/response exchange.
    pub fn register_request<F, H>(&mut self, type_id: impl Into<String>, constructor: F)
    where
        F: Fn() -> H + Send + Sync + 'static,
        H: RequestHandler + 'static,
    {
        self.register(type_id, move || {
            Box::new(ExchangeHandler::new(constructor())) as Box<dyn IoHandler>
        });
    }

    pub fn contains(&self, type_id: &str) -> bool {
        self.constructors.contains_key(type_id)
    }
}

impl HandlerFactory for HandlerRegistry {
    fn create(&self, type_id: &str) -> Option<Box<dyn IoHandler>> {
        self.constructors.get(type_id).map(|constructor| constructor())
    }
}
