use std::{io, path::PathBuf};

use thiserror::Error;
use wharf_proto::{DecodeError, EncodeError};
use wharf_tls::TlsError;

/// Failure delivered to a write's completion.
#[derive(Error, Debug)]
pub enum WriteError {
    /// The session closed before the data was written.
    #[error("session closed before write completed")]
    Closed,

    /// The session's write queue is at its limit.
    #[error("write queue full")]
    QueueFull,

    /// The write wasn't flushed before its deadline.
    #[error("write timed out")]
    TimedOut,

    /// The message couldn't be encoded for the session's current protocol.
    #[error("failed to encode message")]
    Encode(#[from] EncodeError),

    /// Writing to the channel failed.
    #[error("channel write failed: {0}")]
    Io(String),
}

/// No handler could be found for a request.
#[derive(Error, Debug)]
pub enum ResolveError {
    /// No plugin accepted the request and the module has no default handler.
    #[error("no handler for {method} {path}")]
    NoHandler { method: String, path: String },

    /// A message other than a request arrived with no handler bound.
    #[error("no handler for a {0} message")]
    Unexpected(&'static str),

    /// A plugin failed while resolving.
    #[error("plugin {plugin} failed to resolve a handler")]
    Plugin {
        plugin: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Failure of a session's IO pipeline, fatal to that session.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("channel io failed")]
    Io(#[from] io::Error),

    #[error("failed to decode input")]
    Decode(#[from] DecodeError),

    #[error("failed to encode output")]
    Encode(#[from] EncodeError),

    #[error("tls failed")]
    Tls(#[from] TlsError),
}

/// Invalid or unreadable server configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("failed to load tls material")]
    Tls(#[from] TlsError),

    #[error("plugin {plugin} failed to initialize")]
    Plugin {
        plugin: String,
        #[source]
        source: anyhow::Error,
    },
}
