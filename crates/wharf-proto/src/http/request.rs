use std::sync::OnceLock;

use bytes::Bytes;

use crate::{DecodeError, Headers};

/// Parsed fields of an HTTP request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: String,
    /// Scheme of an absolute-form target, if the client sent one.
    pub scheme: Option<String>,
    /// Authority of an absolute-form target, if the client sent one.
    pub authority: Option<String>,
    pub path: String,
    pub query: Option<String>,
    pub version: String,
}

impl RequestLine {
    /// Parse a raw request line such as `GET /path?x=1 HTTP/1.1`.
    pub fn parse(line: &str) -> Result<Self, DecodeError> {
        let (method, target, version) = split_parts(line)?;

        // Absolute-form targets carry their own scheme and authority
        let mut scheme = None;
        let mut authority = None;
        let mut rest = target;
        if let Some((s, after)) = target.split_once("://") {
            scheme = Some(s.to_ascii_lowercase());
            let end = after.find(['/', '?']).unwrap_or(after.len());
            authority = Some(after[..end].to_string());
            rest = &after[end..];
        }

        let (path, query) = match rest.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (rest, None),
        };

        Ok(Self {
            method: method.to_string(),
            scheme,
            authority,
            path: normalize_path(path),
            query,
            version: version.to_string(),
        })
    }

    /// Render this line back into wire form, without a terminator.
    pub fn render(&self) -> String {
        let mut line = format!("{} ", self.method);

        if let (Some(scheme), Some(authority)) = (&self.scheme, &self.authority) {
            line.push_str(scheme);
            line.push_str("://");
            line.push_str(authority);
        }

        line.push_str(&self.path);
        if let Some(query) = &self.query {
            line.push('?');
            line.push_str(query);
        }

        line.push(' ');
        line.push_str(&self.version);
        line
    }
}

/// Check that `line` has the shape of a request line, without extracting fields.
pub fn validate_request_line(line: &str) -> Result<(), DecodeError> {
    split_parts(line).map(|_| ())
}

fn split_parts(line: &str) -> Result<(&str, &str, &str), DecodeError> {
    let mut parts = line.split(' ').filter(|p| !p.is_empty());
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(DecodeError::RequestLine(line.to_string()));
    };

    if !version.starts_with("HTTP/") || !method.bytes().all(|b| b.is_ascii_graphic()) {
        return Err(DecodeError::RequestLine(line.to_string()));
    }

    Ok((method, target, version))
}

/// Strip a trailing slash, except on the root path.
fn normalize_path(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }

    if path.len() > 1 && path.ends_with('/') {
        return path[..path.len() - 1].to_string();
    }

    path.to_string()
}

/// Either the raw line as received, parsed on first access, or explicitly set fields.
#[derive(Debug, Clone)]
enum Line {
    Raw {
        text: String,
        parsed: OnceLock<RequestLine>,
    },
    Explicit(RequestLine),
}

/// An HTTP/1.x request.
///
/// Request line fields are derived lazily from the raw line the request was decoded from.
/// Calling any setter switches the request over to its explicit fields, after which the raw line
/// is re-rendered from those fields.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    line: Line,
    default_scheme: &'static str,
    headers: Headers,
    body: Option<Bytes>,
}

impl HttpRequest {
    /// Create a request from explicit fields.
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        let path: String = path.into();
        let (path, query) = match path.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (path, None),
        };

        let line = RequestLine {
            method: method.into(),
            scheme: None,
            authority: None,
            path: normalize_path(&path),
            query,
            version: "HTTP/1.1".to_string(),
        };

        Self {
            line: Line::Explicit(line),
            default_scheme: "http",
            headers: Headers::new(),
            body: None,
        }
    }

    /// Create a request from a raw request line.
    ///
    /// The line is validated up front, field extraction happens on first access.
    pub fn from_raw_line(line: impl Into<String>, headers: Headers) -> Result<Self, DecodeError> {
        let text = line.into();
        validate_request_line(&text)?;

        Ok(Self {
            line: Line::Raw {
                text,
                parsed: OnceLock::new(),
            },
            default_scheme: "http",
            headers,
            body: None,
        })
    }

    /// Set the scheme assumed when the request target doesn't carry one.
    pub fn set_default_scheme(&mut self, scheme: &'static str) {
        self.default_scheme = scheme;
    }

    fn line(&self) -> &RequestLine {
        match &self.line {
            Line::Raw { text, parsed } => parsed.get_or_init(|| {
                // The shape was validated when the raw line was set
                RequestLine::parse(text).unwrap_or_else(|_| RequestLine {
                    method: String::new(),
                    scheme: None,
                    authority: None,
                    path: "/".to_string(),
                    query: None,
                    version: String::new(),
                })
            }),
            Line::Explicit(line) => line,
        }
    }

    fn line_mut(&mut self) -> &mut RequestLine {
        if let Line::Raw { .. } = self.line {
            let explicit = self.line().clone();
            self.line = Line::Explicit(explicit);
        }

        match &mut self.line {
            Line::Explicit(line) => line,
            Line::Raw { .. } => unreachable!("line converted to explicit above"),
        }
    }

    /// The request line, as received or re-rendered from explicit fields.
    pub fn request_line(&self) -> String {
        match &self.line {
            Line::Raw { text, .. } => text.clone(),
            Line::Explicit(line) => line.render(),
        }
    }

    pub fn method(&self) -> &str {
        &self.line().method
    }

    pub fn set_method(&mut self, method: impl Into<String>) {
        self.line_mut().method = method.into();
    }

    pub fn scheme(&self) -> &str {
        self.line().scheme.as_deref().unwrap_or(self.default_scheme)
    }

    pub fn set_scheme(&mut self, scheme: impl Into<String>) {
        self.line_mut().scheme = Some(scheme.into());
    }

    fn authority(&self) -> Option<&str> {
        self.line()
            .authority
            .as_deref()
            .or_else(|| self.headers.get("Host"))
    }

    /// Host from the absolute-form target, or from the `Host` header.
    pub fn host(&self) -> Option<&str> {
        let authority = self.authority()?;
        let host = match authority.rsplit_once(':') {
            Some((host, port)) if port.bytes().all(|b| b.is_ascii_digit()) => host,
            _ => authority,
        };
        Some(host)
    }

    /// Port from the authority, or the scheme's default port.
    pub fn port(&self) -> u16 {
        let explicit = self
            .authority()
            .and_then(|a| a.rsplit_once(':'))
            .and_then(|(_, port)| port.parse().ok());

        explicit.unwrap_or(match self.scheme() {
            "https" | "wss" => 443,
            _ => 80,
        })
    }

    pub fn set_authority(&mut self, authority: impl Into<String>) {
        self.line_mut().authority = Some(authority.into());
    }

    /// Request path, with any trailing slash stripped.
    pub fn path(&self) -> &str {
        &self.line().path
    }

    pub fn set_path(&mut self, path: impl Into<String>) {
        let path = normalize_path(&path.into());
        self.line_mut().path = path;
    }

    pub fn query(&self) -> Option<&str> {
        self.line().query.as_deref()
    }

    pub fn set_query(&mut self, query: Option<String>) {
        self.line_mut().query = query;
    }

    /// Look up a single query parameter, without percent-decoding.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query()?
            .split('&')
            .filter_map(|pair| pair.split_once('=').or(Some((pair, ""))))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value)
    }

    pub fn version(&self) -> &str {
        &self.line().version
    }

    pub fn set_version(&mut self, version: impl Into<String>) {
        self.line_mut().version = version.into();
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

    /// Whether the connection should stay open after this exchange.
    ///
    /// HTTP/1.1 defaults to persistent connections, HTTP/1.0 requires an explicit opt-in.
    pub fn keep_alive(&self) -> bool {
        if self.headers.contains_token("Connection", "close") {
            return false;
        }

        if self.version() == "HTTP/1.0" {
            return self.headers.contains_token("Connection", "keep-alive");
        }

        true
    }
}
