use thiserror::Error;
use wharf_proto::HttpRequest;

use crate::SessionContext;

/// An authorizer refused a request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecurityError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),
}

impl SecurityError {
    pub fn status(&self) -> u16 {
        match self {
            SecurityError::Unauthorized(_) => 401,
            SecurityError::Forbidden(_) => 403,
        }
    }
}

/// Checks each request before a handler is resolved for it.
///
/// Implementations may record who made the request with `SessionContext::set_principal`.
/// A refused request is answered with the error's status and the session closed.
pub trait Authorizer: Send + Sync {
    fn check_authorization(
        &self,
        cx: &mut SessionContext,
        request: &HttpRequest,
    ) -> Result<(), SecurityError>;
}

impl<F> Authorizer for F
where
    F: Fn(&mut SessionContext, &HttpRequest) -> Result<(), SecurityError> + Send + Sync,
{
    fn check_authorization(
        &self,
        cx: &mut SessionContext,
        request: &HttpRequest,
    ) -> Result<(), SecurityError> {
        self(cx, request)
    }
}
