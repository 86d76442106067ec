use std::{net::SocketAddr, sync::Arc};

use anyhow::{bail, Error};
use tracing::{event, instrument, Level};

use crate::{
    config::ServerConfig,
    module::{ModuleBuilder, ServerModule},
    pool::TaskPool,
    reactor::{Reactor, ShutdownHandle},
    ConfigError,
};

/// Owns the modules and runs them on a reactor.
pub struct Server {
    config: ServerConfig,
    modules: Vec<Arc<ServerModule>>,
    pool: Arc<TaskPool>,
    reactor: Reactor,
}

impl Server {
    #[instrument("Server::new", skip_all)]
    pub fn new(config: ServerConfig) -> Result<Self, Error> {
        config.validate()?;

        let pool = Arc::new(TaskPool::new(config.task_threads)?);
        let reactor = Reactor::new()?;

        Ok(Self {
            config,
            modules: Vec::new(),
            pool,
            reactor,
        })
    }

    pub fn pool(&self) -> &Arc<TaskPool> {
        &self.pool
    }

    /// Builder for the configured module `name`, sharing the server's task pool.
    pub fn module(&self, name: &str) -> Result<ModuleBuilder, ConfigError> {
        let config = self
            .config
            .module(name)
            .ok_or_else(|| ConfigError::Invalid(format!("no module named {:?}", name)))?;

        Ok(ServerModule::from_config(config)?.task_pool(self.pool.clone()))
    }

    pub fn add_module(&mut self, module: ServerModule) {
        event!(Level::DEBUG, module = module.name(), "module added");
        self.modules.push(Arc::new(module));
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.reactor.shutdown_handle()
    }

    /// Open every module's listeners.
    #[instrument("Server::bind", skip_all)]
    pub fn bind(mut self) -> Result<BoundServer, Error> {
        if self.modules.is_empty() {
            bail!("server has no modules");
        }

        let mut addresses = Vec::new();
        for module in &self.modules {
            if module.bind_addresses().is_empty() {
                bail!("module {:?} has no bind addresses", module.name());
            }

            for &addr in module.bind_addresses() {
                let local_addr = self.reactor.listen(addr, module.clone())?;
                addresses.push((module.name().to_string(), local_addr));
            }
        }

        Ok(BoundServer {
            modules: self.modules,
            pool: self.pool,
            reactor: self.reactor,
            addresses,
        })
    }

    /// Bind and run until shut down.
    pub fn run(self) -> Result<(), Error> {
        self.bind()?.run()
    }
}

/// A server with its listeners open, ready to run.
pub struct BoundServer {
    modules: Vec<Arc<ServerModule>>,
    pool: Arc<TaskPool>,
    reactor: Reactor,
    addresses: Vec<(String, SocketAddr)>,
}

impl BoundServer {
    /// Every bound address, in module then configuration order.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.addresses.iter().map(|(_, addr)| *addr).collect()
    }

    /// First address bound for `module`.
    pub fn local_addr(&self, module: &str) -> Option<SocketAddr> {
        self.addresses
            .iter()
            .find(|(name, _)| name == module)
            .map(|(_, addr)| *addr)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.reactor.shutdown_handle()
    }

    /// Serve until shut down, then close plugins and wait for background tasks.
    #[instrument("BoundServer::run", skip_all)]
    pub fn run(mut self) -> Result<(), Error> {
        let result = self.reactor.run();

        for module in &self.modules {
            module.close();
        }
        self.pool.shutdown();

        event!(Level::INFO, "server stopped");
        result
    }
}
