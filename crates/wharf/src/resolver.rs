use std::sync::Arc;

use tracing::{event, Level};
use wharf_proto::{DecodeStatus, HttpRequest};

use crate::{
    auth::Authorizer,
    handler::{HandlerLayer, StatusHandler},
    plugin::ServicePlugin,
    ChannelEncoder, Inbound, IoHandler, ResolveError, SessionContext, SessionError,
};

pub(crate) type DefaultHandler = Box<dyn Fn() -> Box<dyn IoHandler> + Send + Sync>;

/// Outcome of looking for a handler for the next buffered message.
pub enum Determination {
    /// No complete message is buffered yet.
    NeedMoreData,
    /// The peer closed the input.
    Closed,
    /// A handler to bind, and the message to give it.
    Found(Box<dyn IoHandler>, Inbound),
    NotFound(ResolveError),
}

/// Picks the handler for each new request from a module's plugins.
pub struct HandlerResolver {
    plugins: Vec<Box<dyn ServicePlugin>>,
    default_handler: Option<DefaultHandler>,
    layers: Vec<Arc<dyn HandlerLayer>>,
    authorizer: Option<Arc<dyn Authorizer>>,
}

impl HandlerResolver {
    pub(crate) fn new(
        mut plugins: Vec<Box<dyn ServicePlugin>>,
        default_handler: Option<DefaultHandler>,
        layers: Vec<Arc<dyn HandlerLayer>>,
        authorizer: Option<Arc<dyn Authorizer>>,
    ) -> Self {
        // Stable, so equal priorities keep registration order
        plugins.sort_by_key(|plugin| plugin.priority());

        Self {
            plugins,
            default_handler,
            layers,
            authorizer,
        }
    }

    /// Plugins in the order they're consulted.
    pub fn plugins(&self) -> impl Iterator<Item = &dyn ServicePlugin> {
        self.plugins.iter().map(|plugin| plugin.as_ref())
    }

    /// Find the handler for `request`.
    ///
    /// The first plugin to return a handler wins, the module's default handler is the
    /// fallback.
    pub fn resolve(
        &self,
        request: &HttpRequest,
        cx: &mut SessionContext,
    ) -> Result<Box<dyn IoHandler>, ResolveError> {
        for plugin in &self.plugins {
            let result = plugin.determine_io_handler(request, cx).map_err(|source| {
                ResolveError::Plugin {
                    plugin: plugin.name().to_string(),
                    source,
                }
            })?;

            if let Some(handler) = result {
                event!(Level::DEBUG, plugin = plugin.name(), path = request.path(), "handler resolved");
                return Ok(self.wrap(handler, request));
            }
        }

        match &self.default_handler {
            Some(default_handler) => Ok(self.wrap(default_handler(), request)),
            None => Err(ResolveError::NoHandler {
                method: request.method().to_string(),
                path: request.path().to_string(),
            }),
        }
    }

    /// Decode the next buffered message and find a handler for it.
    ///
    /// Requests the authorizer refuses get a handler answering with the refusal's status.
    pub fn determine_io_handler(
        &self,
        encoder: &mut ChannelEncoder,
        cx: &mut SessionContext,
    ) -> Result<Determination, SessionError> {
        let request = match encoder.decode_buffered()? {
            DecodeStatus::NeedMoreData => return Ok(Determination::NeedMoreData),
            DecodeStatus::Closed => return Ok(Determination::Closed),
            DecodeStatus::FullyRead(Inbound::Http(request)) => request,
            DecodeStatus::FullyRead(other) => {
                let error = ResolveError::Unexpected(other.kind());
                return Ok(Determination::NotFound(error));
            }
        };

        if let Some(authorizer) = &self.authorizer {
            if let Err(error) = authorizer.check_authorization(cx, &request) {
                event!(Level::INFO, ?error, path = request.path(), "request refused");
                let handler = Box::new(StatusHandler::closing(error.status()));
                return Ok(Determination::Found(handler, Inbound::Http(request)));
            }
        }

        let determination = match self.resolve(&request, cx) {
            Ok(handler) => Determination::Found(handler, Inbound::Http(request)),
            Err(error) => Determination::NotFound(error),
        };
        Ok(determination)
    }

    pub(crate) fn close(&self) {
        for plugin in &self.plugins {
            event!(Level::DEBUG, plugin = plugin.name(), "closing plugin");
            plugin.close();
        }
    }

    fn wrap(&self, handler: Box<dyn IoHandler>, request: &HttpRequest) -> Box<dyn IoHandler> {
        self.layers
            .iter()
            .fold(handler, |handler, layer| layer.wrap(handler, request))
    }
}
