//! A pluggable, non-blocking server engine.
//!
//! Every connection follows the same path: accept, optional TLS, decode, dispatch to an
//! `IoHandler`, produce, encode, write, then keep-alive or close. Plugins decide which handler
//! answers a request, codecs for HTTP/1.1, WebSocket and server-sent events live in
//! `wharf-proto`.

mod action;
mod auth;
mod channel;
mod codec;
mod config;
mod encoder;
mod error;
pub mod handler;
mod module;
mod notify;
mod path;
pub mod plugin;
mod pool;
mod processor;
mod reactor;
mod resolver;
mod server;
mod session;

pub use wharf_proto as proto;
pub use wharf_tls::{TlsContext, TlsSettings};

pub use self::{
    action::ChannelAction,
    auth::{Authorizer, SecurityError},
    channel::Channel,
    codec::{Inbound, Outbound, ProtocolCodec, RawCodec},
    config::{ModuleConfig, ServerConfig},
    encoder::ChannelEncoder,
    error::{ConfigError, ResolveError, SessionError, WriteError},
    handler::{
        ExchangeHandler, HandlerFactory, HandlerLayer, HandlerRegistry, IoHandler, Produced,
        RequestHandler, StatusHandler, TracingLayer,
    },
    module::{ModuleBuilder, ServerModule},
    notify::{Notifier, NotifyQueue},
    path::{PathError, PathParams, PathTemplate},
    pool::TaskPool,
    processor::{ChannelProcessor, ProcessorState, Subscription},
    reactor::{Reactor, ShutdownHandle},
    resolver::{Determination, HandlerResolver},
    server::{BoundServer, Server},
    session::{
        Attributes, Completion, PendingWrite, ServerSession, SessionContext, WriteQueue,
    },
};
