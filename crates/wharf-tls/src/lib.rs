//! TLS for wharf sessions, on top of rustls.

mod context;
mod engine;
mod error;

pub use self::{
    context::{TlsContext, TlsSettings},
    engine::TlsEngine,
    error::TlsError,
};
