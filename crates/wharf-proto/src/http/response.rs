use bytes::Bytes;

use crate::{DecodeError, Headers};

/// An HTTP/1.x response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    version: String,
    status: u16,
    reason: String,
    headers: Headers,
    body: Option<Bytes>,
}

impl HttpResponse {
    /// Create an HTTP/1.1 response with the standard reason phrase for `status`.
    pub fn new(status: u16) -> Self {
        Self {
            version: "HTTP/1.1".to_string(),
            status,
            reason: status_reason(status).to_string(),
            headers: Headers::new(),
            body: None,
        }
    }

    /// Parse a status line such as `HTTP/1.1 404 Not Found`.
    pub fn from_status_line(line: &str, headers: Headers) -> Result<Self, DecodeError> {
        let error = || DecodeError::StatusLine(line.to_string());

        let (version, rest) = line.split_once(' ').ok_or_else(error)?;
        if !version.starts_with("HTTP/") {
            return Err(error());
        }

        // The reason phrase is optional and may contain spaces
        let (code, reason) = rest.split_once(' ').unwrap_or((rest, ""));
        if code.len() != 3 {
            return Err(error());
        }
        let status = code.parse().map_err(|_| error())?;

        Ok(Self {
            version: version.to_string(),
            status,
            reason: reason.to_string(),
            headers,
            body: None,
        })
    }

    pub fn status_line(&self) -> String {
        format!("{} {} {}", self.version, self.status, self.reason)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn set_version(&mut self, version: impl Into<String>) {
        self.version = version.into();
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// Set the status code, resetting the reason phrase to the standard one.
    pub fn set_status(&mut self, status: u16) {
        self.status = status;
        self.reason = status_reason(status).to_string();
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn set_reason(&mut self, reason: impl Into<String>) {
        self.reason = reason.into();
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn set_body(&mut self, body: Option<Bytes>) {
        self.body = body;
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.add(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Responses to which RFC 7230 forbids a body.
    pub fn is_bodyless(&self) -> bool {
        matches!(self.status, 100..=199 | 204 | 304)
    }
}

/// Standard reason phrase for a status code.
pub fn status_reason(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        413 => "Payload Too Large",
        426 => "Upgrade Required",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_status_line() {
        let response = HttpResponse::from_status_line("HTTP/1.1 404 Not Found", Headers::new());
        let response = response.unwrap();

        assert_eq!(response.status(), 404);
        assert_eq!(response.reason(), "Not Found");
        assert_eq!(response.status_line(), "HTTP/1.1 404 Not Found");
    }

    #[test]
    fn reason_is_optional() {
        let response = HttpResponse::from_status_line("HTTP/1.1 200", Headers::new()).unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.reason(), "");
    }

    #[test]
    fn malformed_status_lines_rejected() {
        assert!(HttpResponse::from_status_line("HTTP/1.1", Headers::new()).is_err());
        assert!(HttpResponse::from_status_line("HTTP/1.1 2000 OK", Headers::new()).is_err());
        assert!(HttpResponse::from_status_line("SIP/2.0 200 OK", Headers::new()).is_err());
    }
}
