//! Request parsing over a raw byte buffer, via [`httparse`] push parsing.
//!
//! The server reads into a growing buffer and calls [`Request::parse`] after
//! every read; [`RequestError::Incomplete`] means "read more", anything else
//! is terminal for the connection.

use thiserror::Error;

use super::{Headers, Method};

/// Errors from parsing a request off the wire.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request headers incomplete, more data needed")]
    Incomplete,

    #[error("malformed request: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },
}

/// A parsed request line plus headers.
///
/// The gateway serves a body-less GET API, so the body is never captured; the
/// connection loop uses [`content_length`](Self::content_length) only to skip
/// past body bytes a client might send anyway.
///
/// # Examples
///
/// ```
/// use readthru::http::Request;
///
/// let raw = b"GET /api/data/user:42 HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let (request, offset) = Request::parse(raw).unwrap();
/// assert_eq!(request.method().as_str(), "GET");
/// assert_eq!(request.path(), "/api/data/user:42");
/// assert_eq!(offset, raw.len());
/// ```
#[derive(Debug)]
pub struct Request {
    method: Method,
    path: String,
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    headers: Headers,
}

impl Request {
    const MAX_HEADERS: usize = 32;

    /// Parses a request from `buf`, returning it together with the byte
    /// offset where the body begins.
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`] — the header terminator has not arrived.
    /// - [`RequestError::Parse`] — the bytes are not valid HTTP/1.x.
    /// - [`RequestError::MissingField`] — method, path, or version absent.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut header_slots = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw = httparse::Request::new(&mut header_slots);

        let body_offset = match raw.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let method = raw
            .method
            .map(Method::from_token)
            .ok_or(RequestError::MissingField { field: "method" })?;

        let path = raw
            .path
            .ok_or(RequestError::MissingField { field: "path" })?
            .to_owned();

        let version = raw
            .version
            .ok_or(RequestError::MissingField { field: "version" })?;

        let mut headers = Headers::with_capacity(raw.headers.len());
        for header in raw.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                headers.insert(header.name, value);
            }
        }

        Ok((
            Self {
                method,
                path,
                version,
                headers,
            },
            body_offset,
        ))
    }

    /// Returns the HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request path, including any query string the client sent.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the request headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns `true` if the connection should stay open after this request.
    ///
    /// HTTP/1.1 defaults to keep-alive; HTTP/1.0 defaults to close.
    pub fn is_keep_alive(&self) -> bool {
        match self.headers.get("connection") {
            Some(value) => value.eq_ignore_ascii_case("keep-alive"),
            None => self.version == 1,
        }
    }

    /// Returns the declared body length, if any.
    pub fn content_length(&self) -> Option<usize> {
        self.headers.get("content-length")?.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_lookup_request() {
        let raw = b"GET /api/data/user:42 HTTP/1.1\r\nHost: localhost\r\nOrigin: https://app.example\r\n\r\n";
        let (request, offset) = Request::parse(raw).unwrap();
        assert_eq!(request.method(), &Method::Get);
        assert_eq!(request.path(), "/api/data/user:42");
        assert_eq!(request.headers().get("origin"), Some("https://app.example"));
        assert_eq!(offset, raw.len());
        assert!(request.is_keep_alive());
    }

    #[test]
    fn incomplete_headers() {
        let raw = b"GET /api HTTP/1.1\r\nHost:";
        assert!(matches!(
            Request::parse(raw),
            Err(RequestError::Incomplete)
        ));
    }

    #[test]
    fn malformed_request_line() {
        let raw = b"NOT AN HTTP REQUEST\r\n\r\n";
        assert!(matches!(Request::parse(raw), Err(RequestError::Parse(_))));
    }

    #[test]
    fn connection_close_is_honored() {
        let raw = b"GET /api HTTP/1.1\r\nConnection: close\r\n\r\n";
        let (request, _) = Request::parse(raw).unwrap();
        assert!(!request.is_keep_alive());
    }

    #[test]
    fn http10_defaults_to_close() {
        let raw = b"GET /api HTTP/1.0\r\nHost: x\r\n\r\n";
        let (request, _) = Request::parse(raw).unwrap();
        assert!(!request.is_keep_alive());
    }

    #[test]
    fn content_length_parsed() {
        let raw = b"POST /api HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello";
        let (request, offset) = Request::parse(raw).unwrap();
        assert_eq!(request.content_length(), Some(5));
        assert_eq!(&raw[offset..], b"hello");
    }
}
