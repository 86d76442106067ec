use std::{io, path::PathBuf};

use thiserror::Error;

/// Failure in the TLS layer, always fatal to the session it happened on.
#[derive(Error, Debug)]
pub enum TlsError {
    /// Reading PEM material failed.
    #[error("failed to read {path:?}")]
    Pem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The configured certificates or keys can't be used.
    #[error("invalid tls configuration: {0}")]
    Config(String),

    /// The peer violated the TLS protocol or the handshake failed.
    #[error("tls protocol error")]
    Protocol(#[from] rustls::Error),

    /// Moving records in or out of the TLS session failed.
    #[error("tls record io failed")]
    Io(#[from] io::Error),
}
