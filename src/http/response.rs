//! Response builder and HTTP/1.1 serialization.

use bytes::{BufMut, BytesMut};
use serde::Serialize;

use super::{Headers, StatusCode};

/// A response under construction, serialized with [`into_bytes`](Self::into_bytes).
///
/// # Examples
///
/// ```
/// use readthru::http::{Response, StatusCode};
///
/// let bytes = Response::new(StatusCode::Ok).body("ready").into_bytes();
/// let text = std::str::from_utf8(&bytes).unwrap();
/// assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(text.ends_with("\r\n\r\nready"));
/// ```
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Vec<u8>,
    keep_alive: bool,
}

impl Response {
    /// Creates an empty response with the given status.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Vec::new(),
            keep_alive: true,
        }
    }

    /// Appends a response header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Appends a header in place, for code that decorates an already-built
    /// response.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name, value);
    }

    /// Sets a plain-text body.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into().into_bytes();
        self
    }

    /// Sets a JSON body from any `Serialize` value and marks the content type.
    ///
    /// Encoding failure cannot happen for the plain structs this crate
    /// serializes, but if it does, the response degrades to a 500 with a
    /// fixed JSON error body rather than panicking.
    #[must_use]
    pub fn json<T: Serialize>(mut self, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => self.body = body,
            Err(e) => {
                tracing::error!(error = %e, "response JSON encoding failed");
                self.status = StatusCode::InternalServerError;
                self.body = br#"{"error":"response encoding failed"}"#.to_vec();
            }
        }
        self.headers.insert("Content-Type", "application/json");
        self
    }

    /// Controls the `Connection` header written at serialization time.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Returns the status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Serializes to HTTP/1.1 wire format.
    ///
    /// `Content-Length` and `Connection` are always written; a
    /// `Content-Type: text/plain` default is added for non-empty bodies that
    /// did not set one.
    pub fn into_bytes(mut self) -> BytesMut {
        if !self.body.is_empty() && !self.headers.contains("content-type") {
            self.headers
                .insert("Content-Type", "text/plain; charset=utf-8");
        }
        self.headers.insert(
            "Connection",
            if self.keep_alive { "keep-alive" } else { "close" },
        );

        let mut buf = BytesMut::with_capacity(128 + self.headers.len() * 48 + self.body.len());
        buf.put(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status.as_u16(),
                self.status.canonical_reason()
            )
            .as_bytes(),
        );
        for (name, value) in self.headers.iter() {
            buf.put(format!("{name}: {value}\r\n").as_bytes());
        }
        buf.put(format!("Content-Length: {}\r\n\r\n", self.body.len()).as_bytes());
        buf.put(self.body.as_slice());
        buf
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(response: Response) -> String {
        String::from_utf8(response.into_bytes().to_vec()).unwrap()
    }

    #[test]
    fn json_body_sets_content_type() {
        #[derive(Serialize)]
        struct Reply {
            message: &'static str,
        }

        let text = render(Response::new(StatusCode::Ok).json(&Reply { message: "hi" }));
        assert!(text.contains("Content-Type: application/json\r\n"));
        assert!(text.ends_with("{\"message\":\"hi\"}"));
    }

    #[test]
    fn content_length_matches_body() {
        let text = render(Response::new(StatusCode::Ok).body("hello"));
        assert!(text.contains("Content-Length: 5\r\n"));
    }

    #[test]
    fn empty_body_has_no_content_type() {
        let text = render(Response::new(StatusCode::NoContent));
        assert!(!text.contains("Content-Type"));
        assert!(text.contains("Content-Length: 0\r\n"));
    }

    #[test]
    fn connection_close() {
        let text = render(Response::new(StatusCode::BadRequest).keep_alive(false));
        assert!(text.contains("Connection: close\r\n"));
    }
}
