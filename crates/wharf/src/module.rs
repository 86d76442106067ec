use std::{net::SocketAddr, sync::Arc};

use tracing::{event, instrument, Level};
use wharf_proto::http::{HttpLimits, HttpServerCodec};
use wharf_tls::{TlsContext, TlsEngine};

use crate::{
    auth::Authorizer,
    config::ModuleConfig,
    handler::{HandlerFactory, HandlerLayer, HandlerRegistry, StatusHandler},
    plugin::{PluginContext, ServicePlugin},
    pool::TaskPool,
    resolver::{DefaultHandler, HandlerResolver},
    ChannelEncoder, ConfigError, IoHandler, SessionError,
};

const DEFAULT_TASK_THREADS: usize = 4;

/// A protocol served on a set of addresses, with the plugins that handle its requests.
///
/// Read-only once built, shared by every session it accepts.
pub struct ServerModule {
    name: String,
    protocol: String,
    bind: Vec<SocketAddr>,
    read_buffer_size: usize,
    write_queue_limit: usize,
    keep_alive: bool,
    limits: HttpLimits,
    tls: Option<TlsContext>,
    resolver: HandlerResolver,
    factory: Arc<dyn HandlerFactory>,
    pool: Arc<TaskPool>,
}

impl ServerModule {
    pub fn builder(name: impl Into<String>) -> ModuleBuilder {
        ModuleBuilder::new(ModuleConfig::new(name, Vec::new()))
    }

    /// Start a module from its configuration, loading its TLS material.
    pub fn from_config(config: &ModuleConfig) -> Result<ModuleBuilder, ConfigError> {
        config.validate()?;

        let mut builder = ModuleBuilder::new(config.clone());
        if let Some(settings) = &config.tls {
            builder.tls = Some(TlsContext::from_settings(settings)?);
        }

        Ok(builder)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn bind_addresses(&self) -> &[SocketAddr] {
        &self.bind
    }

    pub fn read_buffer_size(&self) -> usize {
        self.read_buffer_size
    }

    pub fn write_queue_limit(&self) -> usize {
        self.write_queue_limit
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    pub fn is_secure(&self) -> bool {
        self.tls.is_some()
    }

    pub fn resolver(&self) -> &HandlerResolver {
        &self.resolver
    }

    pub fn factory(&self) -> &Arc<dyn HandlerFactory> {
        &self.factory
    }

    pub fn pool(&self) -> &Arc<TaskPool> {
        &self.pool
    }

    /// Encoder for a new session, starting a TLS handshake if the module is secure.
    pub fn new_encoder(&self) -> Result<ChannelEncoder, SessionError> {
        let codec = HttpServerCodec::new(self.limits, self.tls.is_some());
        let tls = self.tls.as_ref().map(TlsEngine::handshake).transpose()?;

        Ok(ChannelEncoder::new(Box::new(codec), tls))
    }

    pub(crate) fn close(&self) {
        event!(Level::DEBUG, module = %self.name, "closing module");
        self.resolver.close();
    }
}

/// Collects the parts of a `ServerModule`.
pub struct ModuleBuilder {
    config: ModuleConfig,
    tls: Option<TlsContext>,
    plugins: Vec<Box<dyn ServicePlugin>>,
    default_handler: Option<DefaultHandler>,
    factory: Option<Arc<dyn HandlerFactory>>,
    layers: Vec<Arc<dyn HandlerLayer>>,
    authorizer: Option<Arc<dyn Authorizer>>,
    pool: Option<Arc<TaskPool>>,
}

impl ModuleBuilder {
    fn new(config: ModuleConfig) -> Self {
        Self {
            config,
            tls: None,
            plugins: Vec::new(),
            default_handler: Some(Box::new(|| Box::new(StatusHandler::new(404)))),
            factory: None,
            layers: Vec::new(),
            authorizer: None,
            pool: None,
        }
    }

    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.config.bind.push(addr);
        self
    }

    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size;
        self
    }

    pub fn write_queue_limit(mut self, limit: usize) -> Self {
        self.config.write_queue_limit = limit;
        self
    }

    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.config.keep_alive = keep_alive;
        self
    }

    pub fn limits(mut self, limits: HttpLimits) -> Self {
        self.config.max_header_size = limits.max_header_size;
        self.config.max_body_size = limits.max_body_size;
        self.config.short_read_heuristic = limits.short_read_heuristic;
        self
    }

    pub fn tls(mut self, context: TlsContext) -> Self {
        self.tls = Some(context);
        self
    }

    pub fn plugin<P>(mut self, plugin: P) -> Self
    where
        P: ServicePlugin + 'static,
    {
        self.plugins.push(Box::new(plugin));
        self
    }

    /// Handler for requests no plugin takes, a `404` responder unless replaced.
    pub fn default_handler<F>(mut self, constructor: F) -> Self
    where
        F: Fn() -> Box<dyn IoHandler> + Send + Sync + 'static,
    {
        self.default_handler = Some(Box::new(constructor));
        self
    }

    /// Close sessions whose requests no plugin takes.
    pub fn no_default_handler(mut self) -> Self {
        self.default_handler = None;
        self
    }

    pub fn factory<F>(mut self, factory: F) -> Self
    where
        F: HandlerFactory + 'static,
    {
        self.factory = Some(Arc::new(factory));
        self
    }

    pub fn layer<L>(mut self, layer: L) -> Self
    where
        L: HandlerLayer + 'static,
    {
        self.layers.push(Arc::new(layer));
        self
    }

    pub fn authorizer<A>(mut self, authorizer: A) -> Self
    where
        A: Authorizer + 'static,
    {
        self.authorizer = Some(Arc::new(authorizer));
        self
    }

    /// Share a task pool, by default every module starts its own.
    pub fn task_pool(mut self, pool: Arc<TaskPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Initialize the plugins and freeze the module.
    #[instrument("ModuleBuilder::build", skip_all)]
    pub fn build(self) -> Result<ServerModule, ConfigError> {
        let config = self.config;
        if config.read_buffer_size == 0 || config.write_queue_limit == 0 {
            return Err(ConfigError::Invalid(format!(
                "module {:?}: buffer sizes must be at least 1",
                config.name
            )));
        }

        let pool = match self.pool {
            Some(pool) => pool,
            None => Arc::new(
                TaskPool::new(DEFAULT_TASK_THREADS)
                    .map_err(|error| ConfigError::Invalid(format!("{:#}", error)))?,
            ),
        };
        let factory = self
            .factory
            .unwrap_or_else(|| Arc::new(HandlerRegistry::new()));

        let cx = PluginContext::new(
            config.name.clone(),
            config.protocol.clone(),
            factory.clone(),
            pool.clone(),
        );

        let mut plugins = self.plugins;
        for plugin in &mut plugins {
            let supported = plugin
                .supported_protocols()
                .iter()
                .any(|protocol| protocol.eq_ignore_ascii_case(&config.protocol));
            if !supported {
                return Err(ConfigError::Invalid(format!(
                    "plugin {:?} does not support protocol {:?}",
                    plugin.name(),
                    config.protocol
                )));
            }

            plugin
                .init_plugin(&cx)
                .map_err(|source| ConfigError::Plugin {
                    plugin: plugin.name().to_string(),
                    source,
                })?;
            event!(Level::DEBUG, module = %config.name, plugin = plugin.name(), "plugin initialized");
        }

        let resolver =
            HandlerResolver::new(plugins, self.default_handler, self.layers, self.authorizer);

        Ok(ServerModule {
            limits: config.limits(),
            name: config.name,
            protocol: config.protocol,
            bind: config.bind,
            read_buffer_size: config.read_buffer_size,
            write_queue_limit: config.write_queue_limit,
            keep_alive: config.keep_alive,
            tls: self.tls,
            resolver,
            factory,
            pool,
        })
    }
}
