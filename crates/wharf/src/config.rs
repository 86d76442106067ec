use std::{collections::HashSet, fs, net::SocketAddr, path::Path};

use serde::Deserialize;
use tracing::{event, instrument, Level};
use wharf_proto::http::HttpLimits;
use wharf_tls::TlsSettings;

use crate::ConfigError;

/// Top level server configuration, read once at startup.
///
/// ```toml
/// task_threads = 4
///
/// [[modules]]
/// name = "web"
/// bind = ["127.0.0.1:8080"]
/// ```
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_task_threads")]
    pub task_threads: usize,
    #[serde(default)]
    pub modules: Vec<ModuleConfig>,
}

/// One listening module.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ModuleConfig {
    pub name: String,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    pub bind: Vec<SocketAddr>,
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
    #[serde(default = "default_write_queue_limit")]
    pub write_queue_limit: usize,
    #[serde(default = "default_max_header_size")]
    pub max_header_size: usize,
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
    #[serde(default = "default_keep_alive")]
    pub keep_alive: bool,
    /// End unframed bodies on a read shorter than the read buffer.
    #[serde(default)]
    pub short_read_heuristic: bool,
    pub tls: Option<TlsSettings>,
}

fn default_task_threads() -> usize {
    4
}

fn default_protocol() -> String {
    "HTTP".to_string()
}

fn default_read_buffer_size() -> usize {
    8192
}

fn default_write_queue_limit() -> usize {
    64
}

fn default_max_header_size() -> usize {
    16 * 1024
}

fn default_max_body_size() -> usize {
    8 * 1024 * 1024
}

fn default_keep_alive() -> bool {
    true
}

impl ServerConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: ServerConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    #[instrument("ServerConfig::load", skip_all)]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        event!(Level::DEBUG, ?path, "loading config");

        let source = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    pub fn module(&self, name: &str) -> Option<&ModuleConfig> {
        self.modules.iter().find(|module| module.name == name)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.task_threads == 0 {
            return Err(ConfigError::Invalid("task_threads must be at least 1".to_string()));
        }

        let mut names = HashSet::new();
        for module in &self.modules {
            if !names.insert(module.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate module name {:?}",
                    module.name
                )));
            }
            module.validate()?;
        }

        Ok(())
    }
}

impl ModuleConfig {
    /// A plain HTTP module with default limits.
    pub fn new(name: impl Into<String>, bind: Vec<SocketAddr>) -> Self {
        Self {
            name: name.into(),
            protocol: default_protocol(),
            bind,
            read_buffer_size: default_read_buffer_size(),
            write_queue_limit: default_write_queue_limit(),
            max_header_size: default_max_header_size(),
            max_body_size: default_max_body_size(),
            keep_alive: default_keep_alive(),
            short_read_heuristic: false,
            tls: None,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::Invalid(format!("module {:?}: {}", self.name, reason));

        if !self.protocol.eq_ignore_ascii_case("HTTP") {
            return Err(invalid("only the HTTP protocol is supported"));
        }
        if self.bind.is_empty() {
            return Err(invalid("no bind addresses"));
        }
        if self.read_buffer_size == 0 {
            return Err(invalid("read_buffer_size must be at least 1"));
        }
        if self.write_queue_limit == 0 {
            return Err(invalid("write_queue_limit must be at least 1"));
        }
        if self.max_header_size == 0 {
            return Err(invalid("max_header_size must be at least 1"));
        }

        Ok(())
    }

    pub fn limits(&self) -> HttpLimits {
        HttpLimits {
            max_header_size: self.max_header_size,
            max_body_size: self.max_body_size,
            short_read_heuristic: self.short_read_heuristic,
        }
    }
}
