//! Route handling for the lookup API.
//!
//! Two routes, mirroring the service this crate fronts:
//!
//! | Route              | Behavior                                            |
//! |--------------------|-----------------------------------------------------|
//! | `GET /api/data/:key` | Coordinator lookup; `{"source": ..., "value": ...}` |
//! | `GET /api`           | Liveness probe; `{"message": ...}`                  |
//!
//! Lookup errors map onto HTTP statuses: invalid key → 400, not found → 404,
//! store failure → 502, elapsed deadline → 504, all with a JSON error body.
//! CORS is handled here as well: preflights short-circuit, allowed origins
//! get `Access-Control-*` headers appended to actual responses.

use std::time::Duration;

use serde::Serialize;

use crate::cache::CacheService;
use crate::coordinator::{Coordinator, LookupError, Source};
use crate::http::{Method, Request, Response, StatusCode};
use crate::store::BackingStore;

const DATA_PREFIX: &str = "/api/data/";

#[derive(Serialize)]
struct DataReply {
    source: Source,
    value: String,
}

#[derive(Serialize)]
struct MessageReply {
    message: &'static str,
}

#[derive(Serialize)]
struct ErrorReply {
    error: String,
}

/// Cross-origin policy for the gateway.
///
/// Permissive (`*`) by default, matching a cache front that anything may
/// query. Restrict it by starting from [`CorsPolicy::allow_list`].
pub struct CorsPolicy {
    allowed_origins: Vec<String>,
    allowed_methods: Vec<String>,
    allowed_headers: Vec<String>,
}

impl Default for CorsPolicy {
    fn default() -> Self {
        Self::permissive()
    }
}

impl CorsPolicy {
    /// All origins, the methods this API answers, common request headers.
    pub fn permissive() -> Self {
        Self {
            allowed_origins: vec!["*".to_owned()],
            allowed_methods: vec!["GET".to_owned(), "OPTIONS".to_owned()],
            allowed_headers: vec!["Content-Type".to_owned()],
        }
    }

    /// An empty allow-list; add origins with [`allow_origin`](Self::allow_origin).
    pub fn allow_list() -> Self {
        Self {
            allowed_origins: Vec::new(),
            allowed_methods: vec!["GET".to_owned(), "OPTIONS".to_owned()],
            allowed_headers: vec!["Content-Type".to_owned()],
        }
    }

    /// Adds an allowed origin (or `"*"` for all).
    #[must_use]
    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        self.allowed_origins.push(origin.into());
        self
    }

    /// Resolves the `Access-Control-Allow-Origin` value for a request origin,
    /// or `None` when the origin is not allowed.
    fn resolve(&self, origin: &str) -> Option<String> {
        if self.allowed_origins.iter().any(|o| o == "*") {
            Some("*".to_owned())
        } else if self.allowed_origins.iter().any(|o| o == origin) {
            Some(origin.to_owned())
        } else {
            None
        }
    }

    fn preflight(&self, allow_origin: &str) -> Response {
        let mut response = Response::new(StatusCode::NoContent)
            .header("Access-Control-Allow-Origin", allow_origin)
            .header("Access-Control-Allow-Methods", self.allowed_methods.join(", "))
            .header("Access-Control-Allow-Headers", self.allowed_headers.join(", "))
            .header("Access-Control-Max-Age", "3600");
        if allow_origin != "*" {
            response.add_header("Vary", "Origin");
        }
        response
    }

    fn decorate(&self, response: &mut Response, allow_origin: &str) {
        response.add_header("Access-Control-Allow-Origin", allow_origin);
        response.add_header("Access-Control-Allow-Methods", self.allowed_methods.join(", "));
        response.add_header("Access-Control-Allow-Headers", self.allowed_headers.join(", "));
        if allow_origin != "*" {
            response.add_header("Vary", "Origin");
        }
    }
}

/// The HTTP face of a [`Coordinator`].
///
/// Owns no I/O itself; [`Server::run`](crate::server::Server::run) feeds it
/// parsed requests. Values are rendered as UTF-8 text in the JSON reply
/// (lossily, since payloads are opaque bytes).
pub struct Gateway<C, S> {
    lookups: Coordinator<C, S>,
    cors: CorsPolicy,
    /// Per-request lookup deadline; `None` waits as long as the fetch does.
    lookup_deadline: Option<Duration>,
}

impl<C, S> Gateway<C, S>
where
    C: CacheService + 'static,
    S: BackingStore + 'static,
{
    /// Creates a gateway with permissive CORS and no lookup deadline.
    pub fn new(lookups: Coordinator<C, S>) -> Self {
        Self {
            lookups,
            cors: CorsPolicy::permissive(),
            lookup_deadline: None,
        }
    }

    /// Replaces the CORS policy.
    #[must_use]
    pub fn with_cors(mut self, cors: CorsPolicy) -> Self {
        self.cors = cors;
        self
    }

    /// Bounds each lookup; an elapsed deadline answers 504 without affecting
    /// the fetch other callers may be waiting on.
    #[must_use]
    pub fn with_lookup_deadline(mut self, deadline: Duration) -> Self {
        self.lookup_deadline = Some(deadline);
        self
    }

    /// Routes one request to a response.
    pub async fn handle(&self, request: &Request) -> Response {
        let allow_origin = request
            .headers()
            .get("origin")
            .and_then(|origin| self.cors.resolve(origin));

        if request.method() == &Method::Options {
            if let Some(allow) = allow_origin.as_deref() {
                return self.cors.preflight(allow);
            }
        }

        let mut response = self.route(request).await;
        if let Some(allow) = allow_origin.as_deref() {
            self.cors.decorate(&mut response, allow);
        }
        response
    }

    async fn route(&self, request: &Request) -> Response {
        match request.path() {
            "/api" => match request.method() {
                Method::Get => Response::new(StatusCode::Ok).json(&MessageReply {
                    message: "backend is up",
                }),
                _ => method_not_allowed(),
            },
            path if path.starts_with(DATA_PREFIX) => match request.method() {
                Method::Get => {
                    // The rest of the path is the key, taken verbatim.
                    self.lookup(&path[DATA_PREFIX.len()..]).await
                }
                _ => method_not_allowed(),
            },
            _ => Response::new(StatusCode::NotFound).json(&ErrorReply {
                error: "no such route".to_owned(),
            }),
        }
    }

    async fn lookup(&self, key: &str) -> Response {
        let result = match self.lookup_deadline {
            Some(deadline) => self.lookups.get_within(key, deadline).await,
            None => self.lookups.get(key).await,
        };

        match result {
            Ok(lookup) => Response::new(StatusCode::Ok).json(&DataReply {
                source: lookup.source,
                value: String::from_utf8_lossy(&lookup.value).into_owned(),
            }),
            Err(e) => Response::new(error_status(&e)).json(&ErrorReply {
                error: e.to_string(),
            }),
        }
    }
}

fn method_not_allowed() -> Response {
    Response::new(StatusCode::MethodNotAllowed)
        .header("Allow", "GET, OPTIONS")
        .json(&ErrorReply {
            error: "method not allowed".to_owned(),
        })
}

fn error_status(error: &LookupError) -> StatusCode {
    match error {
        LookupError::InvalidKey => StatusCode::BadRequest,
        LookupError::NotFound => StatusCode::NotFound,
        LookupError::Store(_) => StatusCode::BadGateway,
        LookupError::DeadlineExceeded => StatusCode::GatewayTimeout,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;

    use super::*;
    use crate::cache::MemoryCache;
    use crate::store::MemoryStore;

    fn gateway_over(rows: &[(&str, &str)]) -> Gateway<MemoryCache, MemoryStore> {
        let store = MemoryStore::new();
        for (key, value) in rows {
            store.insert(*key, Bytes::from((*value).to_owned()));
        }
        Gateway::new(Coordinator::with_defaults(
            Arc::new(MemoryCache::new()),
            Arc::new(store),
        ))
    }

    fn request(raw: &[u8]) -> Request {
        Request::parse(raw).unwrap().0
    }

    fn body_of(response: Response) -> String {
        let text = String::from_utf8(response.into_bytes().to_vec()).unwrap();
        let split = text.find("\r\n\r\n").unwrap();
        text[split + 4..].to_owned()
    }

    #[tokio::test]
    async fn data_route_reports_store_then_cache() {
        let gateway = gateway_over(&[("user:42", "Alice")]);
        let req = request(b"GET /api/data/user:42 HTTP/1.1\r\nHost: x\r\n\r\n");

        let first = gateway.handle(&req).await;
        assert_eq!(first.status(), StatusCode::Ok);
        assert_eq!(
            body_of(first),
            r#"{"source":"store","value":"Alice"}"#
        );

        let second = gateway.handle(&req).await;
        assert_eq!(
            body_of(second),
            r#"{"source":"cache","value":"Alice"}"#
        );
    }

    #[tokio::test]
    async fn unknown_key_is_404() {
        let gateway = gateway_over(&[]);
        let req = request(b"GET /api/data/ghost HTTP/1.1\r\nHost: x\r\n\r\n");
        assert_eq!(gateway.handle(&req).await.status(), StatusCode::NotFound);
    }

    #[tokio::test]
    async fn empty_key_is_400() {
        let gateway = gateway_over(&[]);
        let req = request(b"GET /api/data/ HTTP/1.1\r\nHost: x\r\n\r\n");
        assert_eq!(gateway.handle(&req).await.status(), StatusCode::BadRequest);
    }

    #[tokio::test]
    async fn liveness_route() {
        let gateway = gateway_over(&[]);
        let req = request(b"GET /api HTTP/1.1\r\nHost: x\r\n\r\n");
        let response = gateway.handle(&req).await;
        assert_eq!(response.status(), StatusCode::Ok);
        assert_eq!(body_of(response), r#"{"message":"backend is up"}"#);
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let gateway = gateway_over(&[]);
        let req = request(b"GET /metrics HTTP/1.1\r\nHost: x\r\n\r\n");
        assert_eq!(gateway.handle(&req).await.status(), StatusCode::NotFound);
    }

    #[tokio::test]
    async fn non_get_is_405() {
        let gateway = gateway_over(&[("k", "v")]);
        let req = request(b"DELETE /api/data/k HTTP/1.1\r\nHost: x\r\n\r\n");
        let response = gateway.handle(&req).await;
        assert_eq!(response.status(), StatusCode::MethodNotAllowed);
    }

    #[tokio::test]
    async fn preflight_short_circuits() {
        let gateway = gateway_over(&[("k", "v")]);
        let req = request(
            b"OPTIONS /api/data/k HTTP/1.1\r\nHost: x\r\nOrigin: https://app.example\r\n\r\n",
        );
        let response = gateway.handle(&req).await;
        assert_eq!(response.status(), StatusCode::NoContent);
        let text = String::from_utf8(response.into_bytes().to_vec()).unwrap();
        assert!(text.contains("Access-Control-Allow-Origin: *\r\n"));
        assert!(text.contains("Access-Control-Allow-Methods: GET, OPTIONS\r\n"));
    }

    #[tokio::test]
    async fn allowed_origin_gets_cors_headers() {
        let gateway = gateway_over(&[("k", "v")]).with_cors(
            CorsPolicy::allow_list().allow_origin("https://app.example"),
        );
        let req = request(
            b"GET /api/data/k HTTP/1.1\r\nHost: x\r\nOrigin: https://app.example\r\n\r\n",
        );
        let text = String::from_utf8(gateway.handle(&req).await.into_bytes().to_vec()).unwrap();
        assert!(text.contains("Access-Control-Allow-Origin: https://app.example\r\n"));
        assert!(text.contains("Vary: Origin\r\n"));
    }

    #[tokio::test]
    async fn rejected_origin_passes_through_without_cors_headers() {
        let gateway = gateway_over(&[("k", "v")])
            .with_cors(CorsPolicy::allow_list().allow_origin("https://app.example"));
        let req = request(
            b"GET /api/data/k HTTP/1.1\r\nHost: x\r\nOrigin: https://evil.example\r\n\r\n",
        );
        let response = gateway.handle(&req).await;
        assert_eq!(response.status(), StatusCode::Ok);
        let text = String::from_utf8(response.into_bytes().to_vec()).unwrap();
        assert!(!text.contains("Access-Control-Allow-Origin"));
    }
}
