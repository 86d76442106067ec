//! Service plugins, the extension point that maps requests to handlers.

mod route;
mod sse;
mod websocket;

use std::sync::Arc;

use anyhow::Error;
use wharf_proto::HttpRequest;

pub use self::{
    route::{RoutePlugin, PATH_PARAMS},
    sse::{EventSink, SsePlugin, SseSubscriber},
    websocket::{WebSocketEndpoint, WebSocketPlugin, WsRemote, WsSession},
};

use crate::{handler::HandlerFactory, pool::TaskPool, IoHandler, SessionContext};

/// What a plugin gets to see of its module while it initializes.
pub struct PluginContext {
    module: String,
    protocol: String,
    factory: Arc<dyn HandlerFactory>,
    pool: Arc<TaskPool>,
}

impl PluginContext {
    pub(crate) fn new(
        module: String,
        protocol: String,
        factory: Arc<dyn HandlerFactory>,
        pool: Arc<TaskPool>,
    ) -> Self {
        Self {
            module,
            protocol,
            factory,
            pool,
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn factory(&self) -> &Arc<dyn HandlerFactory> {
        &self.factory
    }

    pub fn pool(&self) -> &Arc<TaskPool> {
        &self.pool
    }
}

/// Decides whether it serves a request, and with which handler.
///
/// Plugins are consulted in ascending `priority` order, the first one to return a handler
/// wins. They're read-only once the server starts.
pub trait ServicePlugin: Send + Sync {
    fn name(&self) -> &str;

    /// Module protocols this plugin can be installed on.
    fn supported_protocols(&self) -> &[&str] {
        &["HTTP"]
    }

    /// Lower runs first.
    fn priority(&self) -> i32;

    /// Called once when the module is built.
    fn init_plugin(&mut self, _cx: &PluginContext) -> Result<(), Error> {
        Ok(())
    }

    fn determine_io_handler(
        &self,
        request: &HttpRequest,
        cx: &mut SessionContext,
    ) -> Result<Option<Box<dyn IoHandler>>, Error>;

    /// Called once when the server shuts down.
    fn close(&self) {}
}
